//! Single-key transactions.
//!
//! A transaction names one key, a list of compares against that key's
//! current entry, and the operation to apply when they all hold (or when
//! any fails). Evaluation and application happen in the same write critical
//! section, so no other mutation of the key can interleave.
//!
//! ```
//! use trellis::registry::txn::{Compare, Txn, TxnOp};
//!
//! let txn = Txn::on("Knuth")
//!     .when(Compare::value("1974"))
//!     .and_then(TxnOp::put("1974 (ACM)"));
//! assert_eq!(txn.key(), "Knuth");
//! ```

use crate::core::error::{RegistryError, RegistryResult};
use crate::registry::lease::LeaseId;
use crate::registry::store::Entry;
use bytes::Bytes;

/// What a compare looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompareTarget {
    /// Current value. Never holds for an absent key.
    Value(Bytes),
    /// Key existence. `Equal` holds when the key is absent, `NotEqual` when
    /// it is present.
    Absent,
    /// Revision of the last modification (0 when absent).
    ModRevision(u64),
    /// Number of puts since creation (0 when absent).
    Version(u64),
    /// Bound lease (`None` when unbound or absent).
    Lease(Option<LeaseId>),
}

/// Compare operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareResult {
    Equal,
    NotEqual,
    Greater,
    Less,
}

/// Compare predicate on the transaction's key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compare {
    pub target: CompareTarget,
    pub result: CompareResult,
}

impl Compare {
    /// Value equals `expected`.
    pub fn value(expected: impl Into<Bytes>) -> Self {
        Self {
            target: CompareTarget::Value(expected.into()),
            result: CompareResult::Equal,
        }
    }

    /// Key has no live entry.
    pub fn absent() -> Self {
        Self {
            target: CompareTarget::Absent,
            result: CompareResult::Equal,
        }
    }

    /// Key has a live entry.
    pub fn present() -> Self {
        Self {
            target: CompareTarget::Absent,
            result: CompareResult::NotEqual,
        }
    }

    /// Compare the modification revision.
    pub fn mod_revision(result: CompareResult, revision: u64) -> Self {
        Self {
            target: CompareTarget::ModRevision(revision),
            result,
        }
    }

    /// Compare the version.
    pub fn version(result: CompareResult, version: u64) -> Self {
        Self {
            target: CompareTarget::Version(version),
            result,
        }
    }

    /// Compare the bound lease.
    pub fn lease(result: CompareResult, lease: Option<LeaseId>) -> Self {
        Self {
            target: CompareTarget::Lease(lease),
            result,
        }
    }
}

/// Operation applied by a transaction branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    /// Write a value, optionally bound to a lease.
    Put { value: Bytes, lease: Option<LeaseId> },
    /// Delete the key. No-op if it is absent.
    Delete,
}

impl TxnOp {
    /// Unleased put.
    pub fn put(value: impl Into<Bytes>) -> Self {
        Self::Put {
            value: value.into(),
            lease: None,
        }
    }

    /// Put bound to `lease`.
    pub fn put_with_lease(value: impl Into<Bytes>, lease: LeaseId) -> Self {
        Self::Put {
            value: value.into(),
            lease: Some(lease),
        }
    }
}

/// A single-key transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Txn {
    key: String,
    compares: Vec<Compare>,
    success: Option<TxnOp>,
    failure: Option<TxnOp>,
}

impl Txn {
    /// Start a transaction on `key`, relative to the namespace.
    pub fn on(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            compares: Vec::new(),
            success: None,
            failure: None,
        }
    }

    /// Add a compare. All compares must hold for the success branch.
    pub fn when(mut self, compare: Compare) -> Self {
        self.compares.push(compare);
        self
    }

    /// Operation applied when every compare holds.
    pub fn and_then(mut self, op: TxnOp) -> Self {
        self.success = Some(op);
        self
    }

    /// Operation applied when a compare fails.
    pub fn or_else(mut self, op: TxnOp) -> Self {
        self.failure = Some(op);
        self
    }

    /// Target key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Compares in order.
    pub fn compares(&self) -> &[Compare] {
        &self.compares
    }

    /// Evaluate the compares against `entry` and pick the branch to apply.
    pub fn branch(&self, entry: Option<&Entry>) -> (bool, Option<&TxnOp>) {
        let succeeded = CompareEvaluator::evaluate_all(&self.compares, entry);
        let op = if succeeded {
            self.success.as_ref()
        } else {
            self.failure.as_ref()
        };
        (succeeded, op)
    }
}

/// Result of a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnResponse {
    /// Whether every compare held.
    pub succeeded: bool,
    /// Revision of the applied operation, or the current revision if the
    /// chosen branch changed nothing.
    pub revision: u64,
    /// Value observed at evaluation time.
    pub current: Option<Bytes>,
}

/// Compare evaluation against an entry.
pub struct CompareEvaluator;

impl CompareEvaluator {
    /// Evaluate a compare against the key's current entry.
    pub fn evaluate(compare: &Compare, entry: Option<&Entry>) -> bool {
        match &compare.target {
            CompareTarget::Value(expected) => match entry {
                Some(e) => Self::compare_ord(e.value.as_ref(), expected.as_ref(), compare.result),
                None => false,
            },
            CompareTarget::Absent => match compare.result {
                CompareResult::Equal => entry.is_none(),
                CompareResult::NotEqual => entry.is_some(),
                CompareResult::Greater | CompareResult::Less => false,
            },
            CompareTarget::ModRevision(expected) => Self::compare_ord(
                &entry.map(|e| e.revision).unwrap_or(0),
                expected,
                compare.result,
            ),
            CompareTarget::Version(expected) => Self::compare_ord(
                &entry.map(|e| e.version).unwrap_or(0),
                expected,
                compare.result,
            ),
            CompareTarget::Lease(expected) => {
                let actual = entry.and_then(|e| e.lease);
                match compare.result {
                    CompareResult::Equal => actual == *expected,
                    CompareResult::NotEqual => actual != *expected,
                    _ => Self::compare_ord(
                        &actual.map(|l| l.0).unwrap_or(0),
                        &expected.map(|l| l.0).unwrap_or(0),
                        compare.result,
                    ),
                }
            }
        }
    }

    /// Evaluate all compares. An empty list holds.
    pub fn evaluate_all(compares: &[Compare], entry: Option<&Entry>) -> bool {
        compares.iter().all(|c| Self::evaluate(c, entry))
    }

    fn compare_ord<T: Ord + ?Sized>(actual: &T, expected: &T, result: CompareResult) -> bool {
        match result {
            CompareResult::Equal => actual == expected,
            CompareResult::NotEqual => actual != expected,
            CompareResult::Greater => actual > expected,
            CompareResult::Less => actual < expected,
        }
    }
}

/// Expected state for compare-and-swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected {
    /// The key must not exist.
    Absent,
    /// The key must hold exactly this value.
    Value(Bytes),
}

impl Expected {
    /// The compare this expectation stands for.
    pub fn to_compare(&self) -> Compare {
        match self {
            Self::Absent => Compare::absent(),
            Self::Value(v) => Compare::value(v.clone()),
        }
    }
}

impl From<&str> for Expected {
    fn from(value: &str) -> Self {
        Self::Value(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for Expected {
    fn from(value: String) -> Self {
        Self::Value(Bytes::from(value))
    }
}

impl From<Bytes> for Expected {
    fn from(value: Bytes) -> Self {
        Self::Value(value)
    }
}

impl From<Vec<u8>> for Expected {
    fn from(value: Vec<u8>) -> Self {
        Self::Value(Bytes::from(value))
    }
}

impl From<&[u8]> for Expected {
    fn from(value: &[u8]) -> Self {
        Self::Value(Bytes::copy_from_slice(value))
    }
}

/// Outcome of compare-and-swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The new value was written at `revision`.
    Succeeded { revision: u64 },
    /// The expectation did not hold; nothing was written.
    Failed { current: Option<Bytes> },
}

impl CasOutcome {
    /// Whether the swap happened.
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Convert a failed swap on `key` into [`RegistryError::CasFailed`].
    pub fn into_result(self, key: &str) -> RegistryResult<u64> {
        match self {
            Self::Succeeded { revision } => Ok(revision),
            Self::Failed { current } => Err(RegistryError::CasFailed {
                key: key.to_string(),
                current,
            }),
        }
    }
}

impl From<TxnResponse> for CasOutcome {
    fn from(response: TxnResponse) -> Self {
        if response.succeeded {
            Self::Succeeded {
                revision: response.revision,
            }
        } else {
            Self::Failed {
                current: response.current,
            }
        }
    }
}
