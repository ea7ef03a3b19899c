//! # CS Telemetry
//!
//! Structured logging for Coinset-Sync.
//!
//! Every subsystem logs through `tracing` with a `[cs-NN]` prefix and
//! structured fields (`peer_id`, `height`, ...). This crate installs the
//! subscriber that turns those events into human-readable or JSON lines.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cs_telemetry::{init_logging, TelemetryConfig};
//!
//! let config = TelemetryConfig::for_subsystem("03", "wallet-sync");
//! init_logging(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CS_SERVICE_NAME` | `coinset-sync` | Service name in logs |
//! | `CS_LOG_LEVEL` | `info` | Filter directive (`RUST_LOG` also honoured) |
//! | `CS_CONSOLE_OUTPUT` | `true` | Write to stdout |
//! | `CS_JSON_LOGS` | `false` | JSON lines (default on in containers) |

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{env_filter, init_logging};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// A global subscriber is already installed.
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),

    /// Bad filter directive or other configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Create a span carrying the subsystem id.
///
/// ```rust,ignore
/// let _span = cs_telemetry::subsystem_span!("sync_headers", subsystem = "03", target = 120).entered();
/// ```
#[macro_export]
macro_rules! subsystem_span {
    ($name:expr, $($field:tt)*) => {
        tracing::info_span!($name, $($field)*)
    };
}
