//! Value types, configuration and the error taxonomy shared across the livebar crates.
#![warn(missing_docs)]

mod candle;
mod config;
mod error;
mod interval;
mod series;

pub use candle::Candle;
pub use config::{CatchUpPolicy, FeedConfig, RetryConfig};
pub use error::FeedError;
pub use interval::Interval;
pub use series::{SeriesId, SeriesInfo, SeriesKey, SubscriptionId};
