//! Tracing subscriber setup for wearlink binaries.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Error, Result};

/// Crates whose events are enabled by the default filter.
pub const WEARLINK_TARGETS: &[&str] = &["wearlink_relay", "wearlink_core", "wearlink_crypto"];

/// Build the filter directive used when `RUST_LOG` is unset, e.g.
/// `wearlink_relay=debug,wearlink_core=debug,wearlink_crypto=debug`.
pub fn default_directive(level: &str) -> String {
    WEARLINK_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`. With `log_json` every event is a
/// single JSON line for log aggregation; otherwise the compact human format.
pub fn init_tracing(level: &str, log_json: bool) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) => EnvFilter::try_new(directives),
        Err(_) => EnvFilter::try_new(default_directive(level)),
    }
    .map_err(|e| Error::Config(format!("invalid log filter: {e}")))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };
    installed.map_err(|e| Error::Config(format!("tracing already initialised: {e}")))
}
