//! Domain-driven configuration for the clusterd daemon
//!
//! Configuration is split by functional domain, each with serde defaults and
//! validation. The loader reads a YAML file, applies `CLUSTERD_*`
//! environment overrides and validates the result.

pub mod error;
pub mod loader;
pub mod validation;

pub mod domains;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

pub use domains::{
    logging::{LogFormat, LogLevel, LoggingConfig},
    scheduler::SchedulerConfig,
    ClusterdConfig,
};
