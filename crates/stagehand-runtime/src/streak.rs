//! [`Streak`] – consecutive-observation counter.
//!
//! Polling waits use it in two ways: to require that a condition holds for
//! several checks in a row before trusting it, and to give up after several
//! misses in a row.
//!
//! # Example
//!
//! ```rust
//! use stagehand_runtime::streak::Streak;
//!
//! let mut seen = Streak::new(3);
//! assert!(!seen.record(true));
//! assert!(!seen.record(true));
//! assert!(!seen.record(false)); // a miss resets the run
//! assert!(!seen.record(true));
//! assert!(!seen.record(true));
//! assert!(seen.record(true));
//! ```

/// Counts consecutive `true` observations.
#[derive(Debug, Clone)]
pub struct Streak {
    threshold: usize,
    current: usize,
}

impl Streak {
    /// `threshold` consecutive hits complete the streak.  A threshold of 0
    /// is treated as 1.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            current: 0,
        }
    }

    /// Record one observation.  Returns `true` once the last `threshold`
    /// observations were all hits.
    pub fn record(&mut self, hit: bool) -> bool {
        if hit {
            self.current = self.current.saturating_add(1);
        } else {
            self.current = 0;
        }
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.current >= self.threshold
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = 0;
    }
}
