//! bTCP CLI Library
//!
//! Shared functionality for the bTCP command-line tools.

pub mod args;
pub mod config;
pub mod stats;

pub use args::{init_tracing, FaultArgs};
pub use config::{ClientConfig, Config, ConfigError, ServerConfig};
pub use stats::{display_client_stats, display_server_stats, format_bytes, format_duration};
