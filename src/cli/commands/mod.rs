//! CLI command implementations.

mod config;
mod demo;

pub use config::{run_config, ConfigArgs, ConfigCommand};
pub use demo::{run_demo, run_demos, DemoArgs, DemoKind, Step, Transcript, DEMO_NAMESPACE};
