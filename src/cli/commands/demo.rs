//! Demo command implementation.
//!
//! Walks through the registry's operation families with a namespace of
//! Turing award winners: set/get/delete, prefix listing, compare-and-swap,
//! prefix watch and lease expiry. The demos only use [`CoordinationStore`],
//! so they run unchanged against any backend.

use crate::core::config::Config;
use crate::core::error::RegistryError;
use crate::registry::txn::{CasOutcome, Expected};
use crate::registry::watch::EventType;
use crate::registry::{CoordinationStore, Registry};
use anyhow::Result;
use bytes::Bytes;
use clap::{Args, ValueEnum};
use serde::Serialize;
use std::time::Duration;

/// Namespace used when neither `--namespace` nor a config file names one.
pub const DEMO_NAMESPACE: &str = "/turing-awards/";

/// Slack past the lease deadline, on top of the sweep period.
const EXPIRY_SLACK: Duration = Duration::from_secs(2);

/// Run the registry demonstrations.
#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Run a single demo.
    #[arg(long, value_enum)]
    pub only: Option<DemoKind>,

    /// Print the transcript as JSON.
    #[arg(long)]
    pub json: bool,

    /// Namespace prefix for demo keys [default: config, else /turing-awards/].
    #[arg(long)]
    pub namespace: Option<String>,

    /// Lease TTL used by the lease demo, in seconds.
    #[arg(long, default_value_t = 5)]
    pub lease_ttl_secs: u64,
}

impl DemoArgs {
    /// Namespace override to apply on top of the loaded config.
    ///
    /// A prefix from `--config` wins over the demo default.
    pub fn namespace_override(&self, has_config: bool) -> Option<String> {
        self.namespace
            .clone()
            .or_else(|| (!has_config).then(|| DEMO_NAMESPACE.to_string()))
    }
}

/// The individual demonstrations.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DemoKind {
    /// Simple set and get.
    GetSet,
    /// Prefix listing.
    Prefix,
    /// Compare-and-swap update.
    Txn,
    /// Prefix watch.
    Watch,
    /// Lease expiry.
    Lease,
}

impl DemoKind {
    /// Every demo, in presentation order.
    pub const ALL: [DemoKind; 5] = [
        DemoKind::GetSet,
        DemoKind::Prefix,
        DemoKind::Txn,
        DemoKind::Watch,
        DemoKind::Lease,
    ];

    /// One-line description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::GetSet => "simple set and get",
            Self::Prefix => "use prefix to get all values",
            Self::Txn => "compare-and-swap with a transaction",
            Self::Watch => "watch key changes",
            Self::Lease => "assign lease to keys",
        }
    }
}

/// One line of demo output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    /// Demo that produced the line.
    pub demo: DemoKind,
    /// Human-readable message.
    pub message: String,
    /// Revision observed by the step, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

/// Everything the demos printed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    /// Steps in order.
    pub steps: Vec<Step>,
    /// Demos that failed, with their error.
    pub failures: Vec<(DemoKind, String)>,
}

impl Transcript {
    fn note(&mut self, demo: DemoKind, message: impl Into<String>) {
        self.steps.push(Step {
            demo,
            message: message.into(),
            revision: None,
        });
    }

    fn note_at(&mut self, demo: DemoKind, message: impl Into<String>, revision: u64) {
        self.steps.push(Step {
            demo,
            message: message.into(),
            revision: Some(revision),
        });
    }

    /// Messages produced by one demo.
    pub fn messages(&self, demo: DemoKind) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.demo == demo)
            .map(|s| s.message.as_str())
            .collect()
    }

    /// Render as text, one banner per demo.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let mut current = None;
        for step in &self.steps {
            if current != Some(step.demo) {
                current = Some(step.demo);
                let index = DemoKind::ALL
                    .iter()
                    .position(|k| *k == step.demo)
                    .map_or(0, |i| i + 1);
                out.push_str(&format!(
                    "\n------------- DEMO {}: {} --------------\n",
                    index,
                    step.demo.description()
                ));
            }
            out.push_str(&step.message);
            out.push('\n');
        }
        for (demo, error) in &self.failures {
            out.push_str(&format!("Demo {:?} failed: {}\n", demo, error));
        }
        out
    }
}

/// Run the demo command.
pub async fn run_demo(args: DemoArgs, config: Config) -> Result<()> {
    let margin = config.leases.sweep_period() + EXPIRY_SLACK;
    let registry = Registry::open(config)?;
    let kinds: Vec<DemoKind> = match args.only {
        Some(kind) => vec![kind],
        None => DemoKind::ALL.to_vec(),
    };

    let ttl = Duration::from_secs(args.lease_ttl_secs);
    let transcript = run_demos(&registry, &kinds, ttl, margin).await;
    registry.shutdown().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&transcript)?);
    } else {
        print!("{}", transcript.render_text());
    }

    if !transcript.failures.is_empty() {
        anyhow::bail!("{} demo(s) failed", transcript.failures.len());
    }
    Ok(())
}

/// Run the given demos against `store`.
///
/// A failing demo is recorded and the remaining ones still run. The lease
/// demo waits for the granted TTL plus `expiry_margin`, which should cover
/// the store's sweep period.
pub async fn run_demos<S: CoordinationStore>(
    store: &S,
    kinds: &[DemoKind],
    lease_ttl: Duration,
    expiry_margin: Duration,
) -> Transcript {
    let mut t = Transcript::default();
    for kind in kinds {
        let result = match kind {
            DemoKind::GetSet => demo_get_set(store, &mut t),
            DemoKind::Prefix => demo_prefix(store, &mut t),
            DemoKind::Txn => demo_txn(store, &mut t),
            DemoKind::Watch => demo_watch(store, &mut t).await,
            DemoKind::Lease => demo_lease(store, &mut t, lease_ttl, expiry_margin).await,
        };
        if let Err(e) = result {
            tracing::warn!(demo = ?kind, error = %e, "demo failed");
            t.failures.push((*kind, e.to_string()));
        }
    }
    t
}

fn full_key<S: CoordinationStore>(store: &S, who: &str) -> String {
    format!("{}{}", store.namespace_prefix(), who)
}

fn set_winner<S: CoordinationStore>(
    store: &S,
    t: &mut Transcript,
    demo: DemoKind,
    who: &str,
    what: &str,
) -> Result<u64> {
    let revision = store.put(who, Bytes::copy_from_slice(what.as_bytes()))?;
    t.note_at(demo, format!("Set {} to [{}]", full_key(store, who), what), revision);
    Ok(revision)
}

fn get_winner<S: CoordinationStore>(
    store: &S,
    t: &mut Transcript,
    demo: DemoKind,
    who: &str,
) -> Result<()> {
    match store.get(who) {
        Ok(entry) => {
            t.note_at(
                demo,
                format!("{} won turing awards for {}", who, entry.value_str()),
                entry.revision,
            );
            Ok(())
        }
        Err(e @ RegistryError::NotFound { .. }) => {
            tracing::debug!(error = %e, "lookup miss");
            t.note(demo, format!("{} does not win Turing Awards", who));
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn delete_winner<S: CoordinationStore>(
    store: &S,
    t: &mut Transcript,
    demo: DemoKind,
    who: &str,
) -> Result<()> {
    store.delete(who)?;
    t.note(demo, format!("Delete {}", full_key(store, who)));
    Ok(())
}

fn update_winner<S: CoordinationStore>(
    store: &S,
    t: &mut Transcript,
    who: &str,
    prev: &str,
    new: &str,
) -> Result<CasOutcome> {
    let demo = DemoKind::Txn;
    t.note(demo, format!("Update {} to [{}]", full_key(store, who), new));
    let outcome = store.compare_and_swap(
        who,
        Expected::from(prev),
        Bytes::copy_from_slice(new.as_bytes()),
    )?;
    match &outcome {
        CasOutcome::Succeeded { revision } => {
            t.note_at(demo, "Set value succeeded", *revision);
        }
        CasOutcome::Failed { current } => {
            let current = current
                .as_ref()
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .unwrap_or_default();
            t.note(
                demo,
                format!("Set value failed: value compare error (current: {})", current),
            );
        }
    }
    Ok(outcome)
}

fn demo_get_set<S: CoordinationStore>(store: &S, t: &mut Transcript) -> Result<()> {
    let demo = DemoKind::GetSet;
    let who = "john-mccarthy";
    set_winner(store, t, demo, who, "Artificial Intelligence")?;
    get_winner(store, t, demo, who)?;
    delete_winner(store, t, demo, who)?;
    get_winner(store, t, demo, who)
}

fn demo_prefix<S: CoordinationStore>(store: &S, t: &mut Transcript) -> Result<()> {
    let demo = DemoKind::Prefix;
    for (who, what) in [
        ("Dijkstra", "Programming Languages"),
        ("Knuth", "analysis of algorithms"),
    ] {
        set_winner(store, t, demo, who, what)?;
    }

    for entry in store.get_prefix("")? {
        t.note_at(
            demo,
            format!(
                "{} won turing awards for {}",
                full_key(store, &entry.key),
                entry.value_str()
            ),
            entry.revision,
        );
    }
    Ok(())
}

fn demo_txn<S: CoordinationStore>(store: &S, t: &mut Transcript) -> Result<()> {
    let demo = DemoKind::Txn;
    let who = "Tim-Berners-Lee";
    set_winner(store, t, demo, who, "WWW")?;

    // Stale expectation: reported as a failed swap, not an error.
    update_winner(store, t, who, "lisp", "Inventing World Wide Web")?;
    get_winner(store, t, demo, who)?;

    update_winner(store, t, who, "WWW", "Inventing World Wide Web")?
        .into_result(who)?;
    get_winner(store, t, demo, who)
}

async fn demo_watch<S: CoordinationStore>(store: &S, t: &mut Transcript) -> Result<()> {
    let demo = DemoKind::Watch;
    let mut stream = store.watch("")?;

    let winners = [
        ("Ken-Thompson", "Unix operating system"),
        ("Alan-Kay", "Object-Oriented Programming Languages"),
        ("cizixs", "nothing"),
    ];
    for (who, what) in winners {
        set_winner(store, t, demo, who, what)?;
    }
    delete_winner(store, t, demo, "cizixs")?;

    let expected = winners.len() + 1;
    let mut received = 0;
    while received < expected {
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next()).await;
        let event = match next {
            Ok(Some(event)) => event?,
            Ok(None) => break,
            Err(_) => anyhow::bail!("timed out after {} of {} watch events", received, expected),
        };
        let value = match event.event_type {
            EventType::Put => event.value_str().into_owned(),
            EventType::Delete => String::new(),
        };
        t.note_at(
            demo,
            format!(
                "Event received: {} {:?}: {:?}",
                event.event_type,
                full_key(store, &event.key),
                value
            ),
            event.revision,
        );
        received += 1;
    }
    stream.cancel();
    Ok(())
}

async fn demo_lease<S: CoordinationStore>(
    store: &S,
    t: &mut Transcript,
    ttl: Duration,
    margin: Duration,
) -> Result<()> {
    let demo = DemoKind::Lease;
    let who = "cizixs";
    let what = "nothing";

    let grant = store.grant_lease(ttl)?;
    t.note(
        demo,
        format!(
            "Set {} to [{}] with lease {} ({}s)",
            full_key(store, who),
            what,
            grant.id,
            grant.ttl.as_secs()
        ),
    );
    store.put_with_lease(who, Bytes::copy_from_slice(what.as_bytes()), grant.id)?;
    get_winner(store, t, demo, who)?;

    // The store may have clamped the requested TTL.
    t.note(demo, "wait for lease to expire...");
    tokio::time::sleep(grant.ttl + margin).await;
    get_winner(store, t, demo, who)
}
