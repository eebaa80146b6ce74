//! Injected time source.
//!
//! Deployment ids are derived from wall-clock time, so the clock is a trait
//! to keep id generation deterministic in tests.

use chrono::{DateTime, Local};

/// A source of local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}
