//! Shared byte accounting for a single run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Count of payload bytes sent across all streams of one run.
///
/// Cloning yields another handle to the same counter. Stream workers add,
/// the reporter loads; this single atomic is the only state mutated by more
/// than one task during a run, so no further locking exists.
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `n` bytes to the running total.
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// The total number of bytes recorded so far.
    pub fn total(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_add_and_total() {
        let counter = ByteCounter::new();
        assert_eq!(counter.total(), 0);
        counter.add(2048);
        counter.add(1024);
        assert_eq!(counter.total(), 3072);
    }

    #[test]
    fn test_clones_share_one_counter() {
        let counter = ByteCounter::new();
        let other = counter.clone();
        counter.add(10);
        other.add(5);
        assert_eq!(counter.total(), 15);
        assert_eq!(other.total(), 15);
    }

    #[test]
    fn test_parallel_additions_sum_exactly() {
        const WORKERS: u64 = 8;
        const ADDS: u64 = 10_000;

        let counter = ByteCounter::new();
        thread::scope(|scope| {
            for _ in 0..WORKERS {
                let counter = counter.clone();
                scope.spawn(move || {
                    for _ in 0..ADDS {
                        counter.add(3);
                    }
                });
            }
        });

        assert_eq!(counter.total(), WORKERS * ADDS * 3);
    }
}
