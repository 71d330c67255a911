//! Injected time source
//!
//! Slot resolution, conflict windows, due-item selection and the stuck-item
//! watchdog are all relative to "now". Components take an `Arc<dyn Clock>`
//! instead of reading the system clock directly so tests can pin time.

use chrono::{DateTime, Duration, Utc};
use std::sync::RwLock;

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        let mut guard = self.now.write().unwrap_or_else(|e| e.into_inner());
        *guard = instant;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.write().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}
