//! Log throttling utility
//!
//! Limits how often the same log message is recorded and counts what was
//! held back, so a corrupt stream at 30 fps produces one line every few
//! seconds instead of thirty per second.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    last: Instant,
    suppressed: u64,
}

/// Log throttler keyed by message type
///
/// # Example
///
/// ```rust
/// use kvm_pipeline::utils::LogThrottler;
/// use std::time::Duration;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
///
/// // First call is let through with nothing suppressed
/// assert_eq!(throttler.check("decode_error"), Some(0));
///
/// // Subsequent calls within 5 seconds are suppressed and counted
/// assert_eq!(throttler.check("decode_error"), None);
/// ```
pub struct LogThrottler {
    entries: Mutex<HashMap<String, Entry>>,
    interval: Duration,
}

impl LogThrottler {
    /// Create a new log throttler with the specified interval
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    /// Create a new log throttler with interval specified in seconds
    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Decide whether a message for `key` should be logged now.
    ///
    /// Returns `Some(n)` when it should, where `n` is how many messages for
    /// the key were suppressed since the last one logged. Returns `None`
    /// and counts the message when it should be suppressed.
    pub fn check(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last) < self.interval => {
                entry.suppressed += 1;
                None
            }
            Some(entry) => {
                entry.last = now;
                Some(std::mem::take(&mut entry.suppressed))
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        last: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Check if a message should be logged (not throttled)
    pub fn should_log(&self, key: &str) -> bool {
        self.check(key).is_some()
    }

    /// Clear throttle state for a key, typically once the condition recovers
    pub fn clear(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Clear all throttle state
    pub fn clear_all(&self) {
        self.entries.lock().clear();
    }

    /// Get the number of tracked keys
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the throttler is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for LogThrottler {
    /// Create a default log throttler with 5 second interval
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled warning logging; appends the suppressed count when non-zero
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        match $throttler.check($key) {
            Some(0) => tracing::warn!($($arg)*),
            Some(n) => tracing::warn!("{} (suppressed {} repeats)", format_args!($($arg)*), n),
            None => {}
        }
    };
}

/// Throttled error logging; appends the suppressed count when non-zero
#[macro_export]
macro_rules! error_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        match $throttler.check($key) {
            Some(0) => tracing::error!($($arg)*),
            Some(n) => tracing::error!("{} (suppressed {} repeats)", format_args!($($arg)*), n),
            None => {}
        }
    };
}
