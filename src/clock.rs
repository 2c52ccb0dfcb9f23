//! Time source shared by the rate limiter, cache key deriver and response cache.
//!
//! All calendar math is done in UTC. Tests swap in [`ManualClock`] to move
//! across day boundaries without sleeping.

use std::sync::Mutex;

use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// A source of "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current calendar date (UTC).
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// Current calendar year (UTC).
    fn year(&self) -> i32 {
        self.now().year()
    }

    /// Start of the current UTC day.
    fn day_start(&self) -> DateTime<Utc> {
        self.today()
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(|| self.now())
    }
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_day_start_truncates_time() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap());
        assert_eq!(
            clock.day_start(),
            Utc.with_ymd_and_hms(2026, 3, 14, 0, 0, 0).unwrap()
        );
        assert_eq!(clock.year(), 2026);
    }

    #[test]
    fn test_manual_clock_advances_across_midnight() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 14, 23, 59, 0).unwrap());
        let before = clock.today();
        clock.advance(chrono::Duration::minutes(2));
        assert_ne!(clock.today(), before);
    }
}
