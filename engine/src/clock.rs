//! Operation clock for FIFO ordering of queued operations.
//!
//! Wall-clock timestamps alone can tie or move backwards, so every queued
//! operation also carries a monotonically increasing sequence number. The
//! queue orders strictly by sequence; `createdAt` is informational and is kept
//! non-decreasing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The ordering stamp assigned to a new operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stamp {
    /// Position in the queue
    pub sequence: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// A clock producing queue stamps.
///
/// Ordering rules:
/// 1. Every `tick` returns a sequence strictly greater than any earlier one
/// 2. `created_at` never goes backwards, even if the system clock does
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationClock {
    /// Last issued sequence number
    pub counter: u64,
    /// Last issued creation time
    last_time: Option<DateTime<Utc>>,
}

impl OperationClock {
    /// Create a new clock starting at counter 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock with a specific counter value.
    pub fn with_counter(counter: u64) -> Self {
        Self {
            counter,
            last_time: None,
        }
    }

    /// Issue the next stamp using the system time.
    pub fn tick(&mut self) -> Stamp {
        self.tick_at(Utc::now())
    }

    /// Issue the next stamp for a caller-supplied time.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> Stamp {
        self.counter += 1;
        let created_at = match self.last_time {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_time = Some(created_at);
        Stamp {
            sequence: self.counter,
            created_at,
        }
    }

    /// Move the clock past a stamp observed elsewhere (e.g. a persisted
    /// operation read back at startup).
    pub fn merge(&mut self, sequence: u64, created_at: DateTime<Utc>) {
        self.counter = self.counter.max(sequence);
        self.last_time = Some(match self.last_time {
            Some(last) if last > created_at => last,
            _ => created_at,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn new_clock() {
        let clock = OperationClock::new();
        assert_eq!(clock.counter, 0);
    }

    #[test]
    fn tick_increments() {
        let mut clock = OperationClock::new();
        let a = clock.tick_at(at(100));
        let b = clock.tick_at(at(100));
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert!(a < b);
    }

    #[test]
    fn created_at_never_goes_backwards() {
        let mut clock = OperationClock::new();
        let a = clock.tick_at(at(200));
        let b = clock.tick_at(at(150));
        assert_eq!(b.created_at, a.created_at);
        assert!(b.sequence > a.sequence);
    }

    #[test]
    fn merge_takes_max() {
        let mut clock = OperationClock::with_counter(5);
        clock.merge(10, at(50));
        assert_eq!(clock.counter, 10);

        clock.merge(3, at(10));
        assert_eq!(clock.counter, 10);

        let next = clock.tick_at(at(20));
        assert_eq!(next.sequence, 11);
        assert_eq!(next.created_at, at(50));
    }
}
