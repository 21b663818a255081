//! Clock utilities
//!
//! Every "today" used by the engine goes through a [`Clock`] so the frozen
//! boundary can be pinned in tests and in operator tooling.

use chrono::{DateTime, Local, NaiveDate, Utc};
use std::sync::{Arc, RwLock};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Source of the current date
pub trait Clock: Send + Sync {
    /// The current calendar date in the tenant's local time
    fn today(&self) -> NaiveDate;
}

/// Clock backed by the system local time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock pinned to a date that can be moved explicitly
#[derive(Debug, Clone)]
pub struct FixedClock {
    date: Arc<RwLock<NaiveDate>>,
}

impl FixedClock {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date: Arc::new(RwLock::new(date)),
        }
    }

    /// Move the clock to another date (all clones observe the change)
    pub fn set(&self, date: NaiveDate) {
        match self.date.write() {
            Ok(mut guard) => *guard = date,
            Err(poisoned) => *poisoned.into_inner() = date,
        }
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        match self.date.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
