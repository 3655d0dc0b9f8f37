//! Saturating shared counters for bounded scans.
//!
//! Workers increment one shared atomic per category through a compare-and-
//! add that never exceeds the bound. This keeps the final value equal to
//! `min(true_count, bound)` regardless of worker count or scheduling, which
//! is what makes responses bit-identical across `num_threads` settings.
//! Reaching the bound doubles as the soft cancellation signal: workers poll
//! [`CappedCounter::is_full`] at entry and directory boundaries and return
//! early.

use std::sync::atomic::{AtomicUsize, Ordering};

/// A non-negative counter saturating at a configured bound.
#[derive(Debug)]
pub struct CappedCounter {
    value: AtomicUsize,
    bound: usize,
}

impl CappedCounter {
    #[must_use]
    pub fn new(bound: usize) -> Self {
        Self {
            value: AtomicUsize::new(0),
            bound,
        }
    }

    /// Adds `n`, saturating at the bound. Returns the amount actually added.
    pub fn add(&self, n: usize) -> usize {
        let mut current = self.value.load(Ordering::Relaxed);
        loop {
            if current >= self.bound {
                return 0;
            }
            let next = current.saturating_add(n).min(self.bound);
            match self.value.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next - current,
                Err(actual) => current = actual,
            }
        }
    }

    /// Current value (never exceeds the bound).
    #[inline]
    #[must_use]
    pub fn get(&self) -> usize {
        self.value.load(Ordering::Acquire)
    }

    /// True once the bound has been reached.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.get() >= self.bound
    }

    #[inline]
    #[must_use]
    pub fn bound(&self) -> usize {
        self.bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn saturates_at_bound() {
        let counter = CappedCounter::new(3);
        assert_eq!(counter.add(2), 2);
        assert_eq!(counter.add(2), 1);
        assert_eq!(counter.add(1), 0);
        assert_eq!(counter.get(), 3);
        assert!(counter.is_full());
    }

    #[test]
    fn zero_bound_is_immediately_full() {
        let counter = CappedCounter::new(0);
        assert!(counter.is_full());
        assert_eq!(counter.add(5), 0);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn concurrent_increments_never_overshoot() {
        let counter = Arc::new(CappedCounter::new(1000));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.add(1);
                    }
                })
            })
            .collect();
        for th in threads {
            th.join().unwrap();
        }
        assert_eq!(counter.get(), 1000);
    }

    #[test]
    fn exact_below_bound() {
        let counter = Arc::new(CappedCounter::new(usize::MAX));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..500 {
                        counter.add(1);
                    }
                })
            })
            .collect();
        for th in threads {
            th.join().unwrap();
        }
        assert_eq!(counter.get(), 2000);
    }
}
