//! Monotonic publication clock

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use contracts::ContractError;

/// Wall clock that never returns the same microsecond twice
///
/// Transaction ids are derived from `(created_at, key)`, so two records for
/// the same key published within one clock tick would otherwise collide.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_micros: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time, strictly after every previously returned instant
    pub fn now(&self) -> Result<DateTime<Utc>, ContractError> {
        let wall = Utc::now().timestamp_micros();
        let mut issued = wall;
        // fetch_update retries on contention; the closure always returns Some
        let _ = self
            .last_micros
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                issued = wall.max(last + 1);
                Some(issued)
            });

        DateTime::from_timestamp_micros(issued)
            .ok_or_else(|| ContractError::Other(format!("timestamp out of range: {issued}us")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strictly_increasing() {
        let clock = MonotonicClock::new();
        let mut prev = clock.now().unwrap();
        for _ in 0..1000 {
            let next = clock.now().unwrap();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_microsecond_precision() {
        let clock = MonotonicClock::new();
        let t = clock.now().unwrap();
        assert_eq!(t.timestamp_subsec_nanos() % 1_000, 0);
    }
}
