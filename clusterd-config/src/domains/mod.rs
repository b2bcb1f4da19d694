//! Domain-specific configuration modules

pub mod logging;
pub mod scheduler;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main clusterd configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClusterdConfig {
    /// Task scheduler configuration
    #[serde(default)]
    pub scheduler: scheduler::SchedulerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl ClusterdConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.scheduler.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}
