//! Injectable time capability (§9 redesign note: replace ad-hoc
//! `Date.now()`/`new Date()` call sites with a `Clock` so freshness
//! windows — Multipass `created_at` skew, OTP/window TTL math in
//! tests — are deterministic.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// A source of "now". Production code takes `Arc<dyn Clock>` and calls
/// [`Clock::now`]; tests substitute [`FixedClock`] to pin a timestamp.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that always returns the same instant until explicitly
/// advanced. Used in tests for P3 (TTL expiry) and §4.2's 15-minute
/// failure window, where wall-clock sleeps would make tests slow and
/// flaky.
#[derive(Clone)]
pub struct FixedClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(at)) }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.now.lock().expect("clock mutex poisoned");
        *guard += delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_holds_still_until_advanced() {
        let start = Utc::now();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(30));
    }
}
