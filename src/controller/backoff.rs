//! # Fibonacci Backoff
//!
//! Provides a Fibonacci-based backoff mechanism for retries.
//! This provides a progressive backoff that grows more slowly than exponential backoff,
//! so a key that fails a handful of times is retried quickly while a key that keeps
//! failing settles at the configured maximum.
//!
//! Sequence for `FibonacciBackoff::new(5ms, 40ms)`: 5, 5, 10, 15, 25, 40, 40, ...
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//! use secrets_manager::controller::backoff::FibonacciBackoff;
//!
//! let mut backoff = FibonacciBackoff::new(Duration::from_millis(5), Duration::from_secs(1));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(5));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(5));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(10));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(15));
//! ```

use std::collections::HashMap;
use std::time::Duration;

/// Floor for the first backoff, a zero start would never grow
const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, capped at `max`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Previous backoff value
    prev: Duration,
    /// Current backoff value
    current: Duration,
    /// Maximum backoff value
    max: Duration,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with specified minimum and maximum values
    ///
    /// `min` is used for the first two values; `max` caps the sequence.
    /// Both are raised to at least 1ms.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.max(MIN_BACKOFF);
        let max = max.max(min);
        Self {
            prev: Duration::ZERO,
            current: min,
            max,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;

        let next = self.prev.saturating_add(self.current);
        self.prev = self.current;
        self.current = next.min(self.max);

        result
    }
}

/// Per-key backoff tracking.
///
/// Every key gets its own [`FibonacciBackoff`] and failure count, so one
/// failing key never slows down the others.
#[derive(Debug, Clone)]
pub struct KeyedBackoff {
    min: Duration,
    max: Duration,
    items: HashMap<String, (FibonacciBackoff, u32)>,
}

impl KeyedBackoff {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            items: HashMap::new(),
        }
    }

    /// Record a failure of `key` and return how long to wait before retrying it
    pub fn when(&mut self, key: &str) -> Duration {
        let (min, max) = (self.min, self.max);
        let (backoff, failures) = self
            .items
            .entry(key.to_string())
            .or_insert_with(|| (FibonacciBackoff::new(min, max), 0));
        *failures = failures.saturating_add(1);
        backoff.next_backoff()
    }

    /// Consecutive failures recorded for `key`
    #[must_use]
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.items.get(key).map_or(0, |(_, failures)| *failures)
    }

    /// Clear the history of `key`
    pub fn forget(&mut self, key: &str) {
        self.items.remove(key);
    }
}
