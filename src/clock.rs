use std::sync::Mutex;

use chrono::{Duration, NaiveDateTime, Timelike};

/// The single source of "now" for every date/time decision. Booking dates and
/// times are shelter-local wall-clock values, so the clock reports the same.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    /// `now` truncated to the minute, the resolution bookings are scheduled at.
    fn now_minute(&self) -> NaiveDateTime {
        let now = self.now();
        now.with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now)
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Manually driven clock for tests and replay.
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.now
            .lock()
            .map(|guard| *guard)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}
