//! Trellis - unified CLI entrypoint.
//!
//! Usage:
//!   trellis demo [--only get-set|prefix|txn|watch|lease] [--json] [--namespace /prefix/]
//!   trellis config validate --config config/trellis.toml
//!   trellis config show [--format toml|json]
//!   trellis config generate [--output path]

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use trellis::cli::commands::{run_config, run_demo};
use trellis::cli::{init_tracing, load_config, Cli, Commands};
use trellis::core::config::ConfigOverrides;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.as_deref().map(Path::new);
    let overrides = ConfigOverrides {
        log_level: cli.log_level.clone(),
        namespace: None,
    };

    match cli.command {
        Commands::Demo(args) => {
            let overrides = ConfigOverrides {
                namespace: args.namespace_override(config_path.is_some()),
                ..overrides
            };
            let config = load_config(config_path, &overrides)?;
            init_tracing(&config.telemetry.log_level);
            run_demo(args, config).await
        }
        Commands::Config(args) => run_config(args, config_path, &overrides),
    }
}
