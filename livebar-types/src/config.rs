//! Configuration types for the live feed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How an interval group's expiry advances when the scheduler wakes late.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub enum CatchUpPolicy {
    /// Advance by exactly one period per wake, even if several periods have
    /// elapsed. Late groups fire on consecutive wakes until they catch up;
    /// those catch-up ticks poll once and never retry.
    Single,
    /// Advance until the expiry is in the future, skipping missed periods.
    #[default]
    SkipMissed,
}

/// Retry budget used while waiting for a new bar to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of fetches per series per tick (>= 1).
    pub max_attempts: u32,
    /// Pause between two fetches of the same series.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            delay: Duration::from_millis(100),
        }
    }
}

/// Global configuration for a `LiveFeed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Retry budget for detecting a newly closed bar.
    pub retry: RetryConfig,
    /// Timeout for a single data-source call. `None` waits indefinitely.
    pub fetch_timeout: Option<Duration>,
    /// Default timeout for acquiring the feed lock in control operations.
    /// `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,
    /// Expiry advancement policy for late wakes.
    pub catch_up: CatchUpPolicy,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            fetch_timeout: Some(Duration::from_secs(30)),
            lock_timeout: None,
            catch_up: CatchUpPolicy::default(),
        }
    }
}
