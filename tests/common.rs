//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use trellis::core::config::Config;
use trellis::core::time::ManualTickSource;
use trellis::registry::Registry;

/// Namespace used by the integration tests.
pub const TEST_NAMESPACE: &str = "/test/";

/// Configuration for tests: short sweep period, small watch buffer.
pub fn test_config() -> Config {
    Config::builder()
        .namespace(TEST_NAMESPACE)
        .sweep_period(Duration::from_millis(100))
        .watch_buffer(64)
        .build()
        .expect("valid test config")
}

/// Open a registry on the tokio clock with [`test_config`].
pub fn open_registry() -> Registry {
    Registry::open(test_config()).expect("failed to open registry")
}

/// Open a registry driven by a manual tick source.
///
/// The background sweeper still runs, but leases only expire when the
/// returned source is advanced.
pub fn open_manual_registry() -> (Registry, Arc<ManualTickSource>) {
    let ticks = Arc::new(ManualTickSource::new());
    let registry =
        Registry::open_with_ticks(test_config(), ticks.clone()).expect("failed to open registry");
    (registry, ticks)
}

/// Write `content` to a temporary config file.
pub fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// A complete configuration file.
pub fn create_full_config() -> NamedTempFile {
    write_config(
        r#"
[namespace]
prefix = "/turing-awards/"

[leases]
min_ttl_ms = 1000
max_ttl_ms = 60000
clamp_ttl = false
sweep_period_ms = 250

[watch]
buffer_capacity = 16

[telemetry]
log_level = "debug"
"#,
    )
}
