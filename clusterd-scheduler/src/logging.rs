//! Tracing setup for the daemon process
//!
//! The daemon hosting the scheduler calls [`init_tracing`] once at startup
//! with the logging domain of its config file. Worker processes never go
//! through here; they install their own stderr subscriber so their log
//! records reach the pool's log pipe instead of the IPC channel.

use tracing_subscriber::EnvFilter;

use clusterd_config::{LogFormat, LoggingConfig};

/// Filter from the configured level; `RUST_LOG` wins when set.
fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()))
}

/// Install the global subscriber for the daemon process.
///
/// Quietly does nothing when a subscriber is already installed, so embedders
/// and tests that set their own are unaffected.
pub fn init_tracing(config: &LoggingConfig) {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(config));
    let result = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(err) = result {
        tracing::debug!(%err, "tracing subscriber already installed");
    }
}
