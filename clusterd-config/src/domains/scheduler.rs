//! Task scheduler configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};

/// Task scheduler configuration
///
/// All durations are written as integer seconds in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Size of the persistent worker pool; bounds normal parallelism
    #[serde(default = "default_max_worker_count")]
    pub max_worker_count: usize,

    /// Cap on temporary workers spawned to break pool deadlocks
    #[serde(default = "default_max_temp_workers")]
    pub max_temp_workers: usize,

    /// Minimum stall time before a pool deadlock is inferred
    #[serde(with = "duration_secs", default = "default_deadlock_threshold_timeout")]
    pub deadlock_threshold_timeout: Duration,

    /// Silence from an executing task after which it is killed
    #[serde(with = "duration_secs", default = "default_task_unresponsive_timeout")]
    pub task_unresponsive_timeout: Duration,

    /// Age at which a task nobody collected is dropped from the register
    #[serde(with = "duration_secs", default = "default_task_abandoned_timeout")]
    pub task_abandoned_timeout: Duration,

    /// Grace period between the first observation of a finished task and
    /// its removal
    #[serde(with = "duration_secs", default = "default_delete_after_terminal")]
    pub delete_after_terminal: Duration,

    /// Recycle a persistent worker after this many tasks
    #[serde(default)]
    pub worker_task_limit: Option<u32>,

    /// Worker executable spawned by the pool; defaults to `clusterd-worker`
    /// next to the daemon binary
    #[serde(default)]
    pub worker_binary: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_worker_count: default_max_worker_count(),
            max_temp_workers: default_max_temp_workers(),
            deadlock_threshold_timeout: default_deadlock_threshold_timeout(),
            task_unresponsive_timeout: default_task_unresponsive_timeout(),
            task_abandoned_timeout: default_task_abandoned_timeout(),
            delete_after_terminal: default_delete_after_terminal(),
            worker_task_limit: None,
            worker_binary: None,
        }
    }
}

impl Validatable for SchedulerConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.max_worker_count, "max_worker_count", self.domain_name())?;

        validate_positive(
            self.task_unresponsive_timeout.as_secs(),
            "task_unresponsive_timeout",
            self.domain_name(),
        )?;

        validate_positive(
            self.task_abandoned_timeout.as_secs(),
            "task_abandoned_timeout",
            self.domain_name(),
        )?;

        if let Some(limit) = self.worker_task_limit {
            validate_positive(limit, "worker_task_limit", self.domain_name())?;
        }

        // A zero deadlock threshold is legal: it makes mitigation fire on
        // the first stalled tick.
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "scheduler"
    }
}

/// Timeout fields appear in the config file as plain integer seconds
/// (`task_abandoned_timeout: 3600`), the representation operators know.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

// Default value functions
fn default_max_worker_count() -> usize {
    num_cpus::get()
}

fn default_max_temp_workers() -> usize {
    4
}

fn default_deadlock_threshold_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_task_unresponsive_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_task_abandoned_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_delete_after_terminal() -> Duration {
    Duration::from_secs(60)
}
