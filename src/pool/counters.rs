// src/pool/counters.rs
//! Pool-wide run counters
//!
//! Every worker reports each finished attempt exactly once. The paired
//! increments run under one mutex so a snapshot can never observe
//! `total_runs != successes + crashes`.

use parking_lot::Mutex;
use serde::Serialize;

/// Consistent view of the counters at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub total_runs: u64,
    pub successes: u64,
    pub crashes: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    total_runs: u64,
    successes: u64,
    crashes: u64,
}

/// Shared success/crash statistics for one pool lifetime
#[derive(Debug, Default)]
pub struct RunCounters {
    counts: Mutex<Counts>,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful attempt, returning the updated snapshot
    pub fn record_success(&self) -> CounterSnapshot {
        let mut counts = self.counts.lock();
        counts.total_runs += 1;
        counts.successes += 1;
        Self::to_snapshot(*counts)
    }

    /// Record one crashed attempt, returning the updated snapshot
    pub fn record_crash(&self) -> CounterSnapshot {
        let mut counts = self.counts.lock();
        counts.total_runs += 1;
        counts.crashes += 1;
        Self::to_snapshot(*counts)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        Self::to_snapshot(*self.counts.lock())
    }

    fn to_snapshot(counts: Counts) -> CounterSnapshot {
        CounterSnapshot {
            total_runs: counts.total_runs,
            successes: counts.successes,
            crashes: counts.crashes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counts_accumulate() {
        let counters = RunCounters::new();
        counters.record_success();
        counters.record_success();
        let snapshot = counters.record_crash();
        assert_eq!(snapshot.total_runs, 3);
        assert_eq!(snapshot.successes, 2);
        assert_eq!(snapshot.crashes, 1);
    }

    #[test]
    fn test_no_lost_updates_across_threads() {
        let counters = Arc::new(RunCounters::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let counters = Arc::clone(&counters);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if i % 2 == 0 {
                            counters.record_success();
                        } else {
                            counters.record_crash();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.total_runs, 8000);
        assert_eq!(snapshot.successes + snapshot.crashes, snapshot.total_runs);
        assert_eq!(snapshot.successes, 4000);
    }
}
