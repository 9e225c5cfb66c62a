//! Live feed of newly completed OHLCV bars.
//!
//! Overview
//! - Series are keyed by (symbol, exchange, interval) and grouped by interval.
//! - One scheduler task sleeps until the earliest group is due, polls every
//!   series in the due groups and fans each new bar out to the series'
//!   subscribers.
//! - Every subscriber owns a FIFO queue drained by a dedicated worker thread, so
//!   a slow callback delays only itself.
//!
//! Key behaviors and trade-offs
//! - New-bar detection: the source is asked for the last two bars; the newest is
//!   still forming and is ignored. A completed bar whose timestamp matches the
//!   last delivered one means the source is lagging, and the poll is retried
//!   (50 times, 100 ms apart by default).
//! - Failure isolation: a series that exhausts its retries skips the period,
//!   records the error (see `series_info`) and is polled again next period.
//! - Locking: control operations and the scheduler share one lock, held across
//!   remote fetches. Control calls accept a timeout.
//!
//! Examples
//! ```rust,ignore
//! use std::sync::Arc;
//! use livebar::{Interval, LiveFeed};
//! use livebar_mock::MockBarSource;
//!
//! let feed = LiveFeed::builder()
//!     .with_source(Arc::new(MockBarSource::new()))
//!     .build()?;
//! let id = feed.add_series("AAPL", "NASDAQ", Interval::I1m, None).await?;
//! feed.subscribe(id, |key, bar| println!("{key}: {} {}", bar.ts, bar.close), None).await?;
//! // ...
//! feed.shutdown().await;
//! ```
//!
//! See `livebar/examples/` for a runnable demonstration.
#![warn(missing_docs)]

pub(crate) mod core;
mod scheduler;
mod subscriber;
pub mod trigger;

pub use core::{ErrorHandler, LiveFeed, LiveFeedBuilder};

pub use livebar_core::{
    BarSource, Candle, CatchUpPolicy, Clock, FeedConfig, FeedError, Interval, RetryConfig,
    RuntimeClock, SeriesId, SeriesInfo, SeriesKey, SubscriptionId, SystemClock,
};
