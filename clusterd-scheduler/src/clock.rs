//! Injectable wall clock
//!
//! The scheduler compares timestamps against operator-configured wall-clock
//! timeouts, so it deliberately uses wall time rather than a monotonic
//! clock. Tests substitute a settable mock.

use chrono::{DateTime, Utc};

/// Source of "now"
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
