//! Logging setup using `tracing` and `tracing-subscriber`.
//!
//! The library only emits `tracing` events; installing a subscriber is up to the binary:
//!
//! - `error`: rule evaluation failures, failed chunks
//! - `warn`: degraded joins, empty artifacts
//! - `info`: job milestones (reference loaded, run finished, artifact written)
//! - `debug`: per-chunk and per-rule detail
//!
//! `RUST_LOG` overrides the default filter.

use std::io;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{PipelineError, PipelineResult};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

fn build_env_filter(default_directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives))
}

/// Install the global subscriber, writing to stderr.
///
/// Fails with [`PipelineError::Configuration`] if a global subscriber is already set.
pub fn init_logging(format: LogFormat, default_directives: &str) -> PipelineResult<()> {
    let filter = build_env_filter(default_directives);
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(io::stderr).with_target(false))
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(io::stderr).with_target(false))
            .try_init(),
    };
    result.map_err(|e| PipelineError::config(format!("failed to initialise logging: {e}")))
}
