//! Duplicate-suppressing logger.
//!
//! Radio callbacks can fire many times per second for the same device. This
//! logger collapses identical lines inside a fixed window and reports how many
//! were swallowed the next time the line gets through.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Default suppression window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Maximum number of distinct messages tracked at once.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Memo {
    expires_at: Instant,
    suppressed: u64,
}

/// Logs a message at most once per window per distinct (lower-cased) text.
#[derive(Debug)]
pub struct RateLimitedLogger {
    window: Duration,
    entries: Mutex<HashMap<String, Memo>>,
}

impl Default for RateLimitedLogger {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl RateLimitedLogger {
    /// Create a logger with the given suppression window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The suppression window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Decide whether `message` should be emitted at `now`.
    ///
    /// Returns `Some(n)` when the line should be printed, where `n` is the
    /// number of occurrences suppressed in the previous window, and `None`
    /// when the occurrence was counted and swallowed.
    ///
    /// Once the table is full, expired entries are evicted and any count they
    /// were still holding is flushed at debug level. If every entry is still
    /// live, the one closest to expiry makes room.
    pub fn admit_at(&self, message: &str, now: Instant) -> Option<u64> {
        let key = message.to_lowercase();
        let mut evicted = Vec::new();
        let admitted = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

            if let Some(memo) = entries.get_mut(&key) {
                if now < memo.expires_at {
                    memo.suppressed += 1;
                    return None;
                }
                let previous = memo.suppressed;
                *memo = Memo {
                    expires_at: now + self.window,
                    suppressed: 0,
                };
                return Some(previous);
            }

            if entries.len() >= PRUNE_THRESHOLD {
                entries.retain(|text, memo| {
                    let live = memo.expires_at > now;
                    if !live && memo.suppressed > 0 {
                        evicted.push((text.clone(), memo.suppressed));
                    }
                    live
                });
            }
            if entries.len() >= PRUNE_THRESHOLD {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, memo)| memo.expires_at)
                    .map(|(text, _)| text.clone());
                if let Some(text) = oldest {
                    if let Some(memo) = entries.remove(&text) {
                        if memo.suppressed > 0 {
                            evicted.push((text, memo.suppressed));
                        }
                    }
                }
            }
            entries.insert(
                key,
                Memo {
                    expires_at: now + self.window,
                    suppressed: 0,
                },
            );
            Some(0)
        };

        for (text, suppressed) in evicted {
            tracing::debug!(suppressed, "{text}");
        }
        admitted
    }

    /// [`admit_at`](Self::admit_at) using the current time.
    pub fn admit(&self, message: &str) -> Option<u64> {
        self.admit_at(message, Instant::now())
    }

    /// Emit `message` at info level unless it was seen inside the window.
    pub fn info(&self, message: impl fmt::Display) {
        let text = message.to_string();
        if let Some(suppressed) = self.admit(&text) {
            tracing::info!(suppressed, "{text}");
        }
    }

    /// Emit `message` at debug level unless it was seen inside the window.
    pub fn debug(&self, message: impl fmt::Display) {
        let text = message.to_string();
        if let Some(suppressed) = self.admit(&text) {
            tracing::debug!(suppressed, "{text}");
        }
    }

    /// Number of distinct messages currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_five_in_window_prints_once_then_reports_four() {
        let logger = RateLimitedLogger::new(Duration::from_secs(60));
        let start = Instant::now();

        let printed: Vec<_> = (0..5)
            .map(|i| logger.admit_at("unknown actor: x", start + Duration::from_secs(i)))
            .collect();
        assert_eq!(printed, vec![Some(0), None, None, None, None]);

        let after = start + Duration::from_secs(61);
        assert_eq!(logger.admit_at("unknown actor: x", after), Some(4));
        assert_eq!(logger.admit_at("unknown actor: x", after), None);
    }

    #[test]
    fn test_key_ignores_case() {
        let logger = RateLimitedLogger::default();
        let now = Instant::now();
        assert_eq!(logger.admit_at("Unknown Actor", now), Some(0));
        assert_eq!(logger.admit_at("unknown actor", now), None);
        assert_eq!(logger.tracked(), 1);
    }

    #[test]
    fn test_distinct_messages_are_independent() {
        let logger = RateLimitedLogger::default();
        let now = Instant::now();
        assert_eq!(logger.admit_at("a", now), Some(0));
        assert_eq!(logger.admit_at("b", now), Some(0));
        assert_eq!(logger.admit_at("a", now), None);
    }

    #[test]
    fn test_expiry_boundary_admits() {
        let logger = RateLimitedLogger::new(Duration::from_secs(10));
        let start = Instant::now();
        assert_eq!(logger.admit_at("m", start), Some(0));
        assert_eq!(logger.admit_at("m", start + Duration::from_millis(9_999)), None);
        assert_eq!(logger.admit_at("m", start + Duration::from_secs(10)), Some(1));
    }

    #[test]
    fn test_prunes_stale_entries() {
        let logger = RateLimitedLogger::new(Duration::from_secs(1));
        let start = Instant::now();
        for i in 0..PRUNE_THRESHOLD {
            logger.admit_at(&format!("device {i}"), start);
        }
        logger.admit_at("device 0", start);
        assert_eq!(logger.tracked(), PRUNE_THRESHOLD);

        logger.admit_at("fresh", start + Duration::from_secs(5));
        assert_eq!(logger.tracked(), 1);
    }

    #[test]
    fn test_repeated_devices_do_not_pin_the_table() {
        let logger = RateLimitedLogger::new(Duration::from_secs(60));
        let start = Instant::now();
        for i in 0..5_000 {
            let line = format!("unknown actor: device {i}");
            assert_eq!(logger.admit_at(&line, start), Some(0));
            logger.admit_at(&line, start);
            assert!(logger.tracked() <= PRUNE_THRESHOLD);
        }

        logger.admit_at("fresh", start + Duration::from_secs(3_600));
        assert_eq!(logger.tracked(), 1);
    }

    #[test]
    fn test_full_table_of_live_entries_stays_bounded() {
        let logger = RateLimitedLogger::new(Duration::from_secs(60));
        let start = Instant::now();
        for i in 0..(PRUNE_THRESHOLD as u64 + 10) {
            logger.admit_at(&format!("device {i}"), start + Duration::from_millis(i));
        }
        assert_eq!(logger.tracked(), PRUNE_THRESHOLD);
        // The newest line is still suppressed; the oldest was evicted.
        let last = PRUNE_THRESHOLD as u64 + 9;
        assert_eq!(logger.admit_at(&format!("device {last}"), start), None);
        assert_eq!(logger.admit_at("device 0", start), Some(0));
    }

    #[test]
    fn test_shared_across_threads() {
        let logger = Arc::new(RateLimitedLogger::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let logger = Arc::clone(&logger);
                std::thread::spawn(move || logger.admit("same line").is_some())
            })
            .collect();
        let printed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|printed| *printed)
            .count();
        assert_eq!(printed, 1);
    }
}
