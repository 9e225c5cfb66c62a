use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

/// Source of the current UTC time.
///
/// The scheduler compares trigger expiries against `now()` and converts the
/// difference into a Tokio sleep. A clock whose time does not move with Tokio's
/// timer makes those sleeps inaccurate, so tests that pause Tokio time should
/// use [`RuntimeClock`].
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// Operating-system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that follows Tokio's time driver from a fixed UTC anchor.
///
/// `now()` is the anchor plus the Tokio time elapsed since construction, so it
/// advances with `tokio::time::advance` and auto-advance under a paused runtime.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeClock {
    anchor_utc: DateTime<Utc>,
    anchor: Instant,
}

impl RuntimeClock {
    /// Anchor at the current system time.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Anchor at `start`; `now()` returns `start` until Tokio time moves.
    #[must_use]
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            anchor_utc: start,
            anchor: Instant::now(),
        }
    }
}

impl Default for RuntimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RuntimeClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.anchor.elapsed()).unwrap_or(TimeDelta::MAX);
        self.anchor_utc
            .checked_add_signed(elapsed)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
