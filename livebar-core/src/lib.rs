//! livebar-core
//!
//! Contracts shared by the live feed engine and its data sources.
//!
//! - `connector`: the `BarSource` trait implemented by data-source crates and a
//!   checked fetch helper that applies capability checks, timeouts and error tagging.
//! - `clock`: wall-clock abstraction used to compute trigger delays.
//!
//! Async runtime (Tokio)
//! ---------------------
//! `RuntimeClock` and `fetch_checked` rely on Tokio's time driver. Code that
//! uses them must run under a Tokio 1.x runtime with the `time` feature enabled.
#![warn(missing_docs)]

/// Wall-clock sources used by the scheduler.
pub mod clock;
/// The `BarSource` trait and fetch helpers.
pub mod connector;

pub use clock::{Clock, RuntimeClock, SystemClock};
pub use connector::{BarSource, fetch_checked, tag_err};

pub use livebar_types::{
    Candle, CatchUpPolicy, FeedConfig, FeedError, Interval, RetryConfig, SeriesId, SeriesInfo,
    SeriesKey, SubscriptionId,
};
