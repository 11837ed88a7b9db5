//! Command-line checkout for calmledger.
//!
//! # Modules
//!
//! - [`config`] - TOML configuration with environment variable expansion
//! - [`shutdown`] - Ctrl-C / SIGTERM handling through a cancellation token

pub mod config;
pub mod shutdown;

pub use config::{ConfigError, FileConfig};
pub use shutdown::ShutdownSignal;
