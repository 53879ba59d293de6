//! Core infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`error`] - Error taxonomy
//! - [`time`] - Tick sources for lease deadlines

pub mod config;
pub mod error;
pub mod time;
