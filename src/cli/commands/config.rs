//! Config command implementation.

use crate::cli::load_config;
use crate::core::config::{Config, ConfigOverrides};
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate the configuration file given with --config.
    Validate,
    /// Print the effective configuration, defaults included.
    Show {
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
    /// Generate a configuration template.
    Generate {
        /// Output file path.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Run the config command.
pub fn run_config(
    args: ConfigArgs,
    config_path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<()> {
    match args.command {
        ConfigCommand::Validate => validate_config(config_path),
        ConfigCommand::Show { format } => {
            let config = load_config(config_path, overrides)?;
            println!("{}", render_config(&config, &format)?);
            Ok(())
        }
        ConfigCommand::Generate { output } => generate_config(output.as_deref()),
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        anyhow::bail!("no config file given, pass --config <path>");
    };
    if !path.exists() {
        anyhow::bail!("Config file not found: {:?}", path);
    }

    let config = Config::from_file(path)?;
    println!("✓ Configuration is valid");
    println!("  namespace:     {}", config.namespace.prefix);
    println!(
        "  lease ttl:     {}ms..{}ms ({})",
        config.leases.min_ttl_ms,
        config.leases.max_ttl_ms,
        if config.leases.clamp_ttl { "clamp" } else { "reject" }
    );
    println!("  sweep period:  {}ms", config.leases.sweep_period_ms);
    println!("  watch buffer:  {}", config.watch.buffer_capacity);
    Ok(())
}

/// Render a configuration as TOML or JSON.
pub(crate) fn render_config(config: &Config, format: &str) -> Result<String> {
    match format {
        "json" => Ok(serde_json::to_string_pretty(config)?),
        "toml" => config.to_toml(),
        other => anyhow::bail!("unknown format {:?}, expected toml or json", other),
    }
}

fn generate_config(output: Option<&Path>) -> Result<()> {
    let template = generate_template()?;
    match output {
        Some(path) => {
            std::fs::write(path, &template)?;
            println!("Generated config template: {:?}", path);
        }
        None => {
            println!("{}", template);
        }
    }
    Ok(())
}

fn generate_template() -> Result<String> {
    let body = Config::default().to_toml()?;
    Ok(format!("# Trellis registry configuration\n\n{}", body))
}
