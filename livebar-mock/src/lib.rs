//! Mock data sources for the livebar feed.
//!
//! - [`MockBarSource`]: deterministic synthetic bars aligned to the interval grid
//!   of a [`Clock`], with a few magic symbols for failure paths.
//! - [`DynamicMockSource`]: per-key scripted responses driven by a
//!   [`DynamicMockController`].
#![warn(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use livebar_core::{BarSource, Candle, Clock, FeedError, SeriesKey, SystemClock};
use rust_decimal::Decimal;

mod dynamic;
mod grid;

pub use dynamic::{DynamicMockController, DynamicMockSource, FetchCall, MockBehavior};

/// Mock source for CI-safe tests and examples.
///
/// Every call returns the last `count` bars of the synthetic series up to and
/// including the bar that contains `clock.now()`. Prices are derived from the
/// symbol, the seed and the bar timestamp, so repeated calls agree.
///
/// Magic symbols:
/// - `FAIL`: every fetch fails with a source error.
/// - `HANG`: every fetch hangs forever (exercise fetch timeouts).
/// - `EMPTY`: every fetch returns no rows.
#[derive(Debug)]
pub struct MockBarSource {
    clock: Arc<dyn Clock>,
    seed: u64,
    calls: AtomicUsize,
}

impl Default for MockBarSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBarSource {
    /// Name reported by [`BarSource::name`].
    pub const NAME: &'static str = "livebar-mock";

    /// Mock aligned to the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Mock aligned to `clock`; share the feed's clock to keep both in step.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            seed: 0,
            calls: AtomicUsize::new(0),
        }
    }

    /// Change the price seed.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Number of `fetch_bars` calls served so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BarSource for MockBarSource {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn fetch_bars(&self, key: &SeriesKey, count: usize) -> Result<Vec<Candle>, FeedError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match key.symbol() {
            "FAIL" => Err(FeedError::source(
                Self::NAME,
                format!("forced failure: {key}"),
            )),
            "HANG" => std::future::pending().await,
            "EMPTY" => Ok(Vec::new()),
            symbol => Ok(grid::bars(
                symbol,
                self.seed,
                key.interval(),
                self.clock.now(),
                count,
            )),
        }
    }
}

/// Flat candle with every price equal to `price`, for hand-written scripts.
#[must_use]
pub fn flat_candle(ts: DateTime<Utc>, price: i64) -> Candle {
    let p = Decimal::from(price);
    Candle::new(ts, p, p, p, p, Decimal::ZERO)
}
