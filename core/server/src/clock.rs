//! Strictly increasing server time.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Wall clock that never repeats or goes backwards.
///
/// Every accepted write is stamped from here, so `last_modified` strictly
/// increases even when two writes land in the same tick or the system
/// clock steps back.
#[derive(Debug)]
pub struct MonotonicClock {
    last: Mutex<DateTime<Utc>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Next timestamp, at least one microsecond after the previous one.
    pub fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        let wall = Utc::now();
        let next = if wall > *last {
            wall
        } else {
            *last + Duration::microseconds(1)
        };
        *last = next;
        next
    }

    /// Record a timestamp issued elsewhere, typically by an earlier process
    /// over the same store. Later calls to [`now`](Self::now) are strictly
    /// after it.
    pub fn observe(&self, ts: DateTime<Utc>) {
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        if ts > *last {
            *last = ts;
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
