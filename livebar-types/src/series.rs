//! Series identity and the handles used to refer to live series and subscriptions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{FeedError, Interval};

/// Immutable (symbol, exchange, interval) key of a live series.
///
/// Two keys are equal iff all three components are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    symbol: String,
    exchange: String,
    interval: Interval,
}

impl SeriesKey {
    /// Build a key, trimming surrounding whitespace.
    ///
    /// # Errors
    /// Returns `InvalidArg` if the symbol or exchange is empty.
    pub fn new(
        symbol: impl Into<String>,
        exchange: impl Into<String>,
        interval: Interval,
    ) -> Result<Self, FeedError> {
        let symbol = symbol.into().trim().to_string();
        let exchange = exchange.into().trim().to_string();
        if symbol.is_empty() {
            return Err(FeedError::InvalidArg("symbol cannot be empty".into()));
        }
        if exchange.is_empty() {
            return Err(FeedError::InvalidArg("exchange cannot be empty".into()));
        }
        Ok(Self {
            symbol,
            exchange,
            interval,
        })
    }

    /// Ticker symbol as listed on the exchange.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Exchange the symbol is listed on.
    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Refresh interval.
    #[must_use]
    pub const fn interval(&self) -> Interval {
        self.interval
    }

    /// `EXCHANGE:SYMBOL` form; symbols that already carry a prefix are kept as-is.
    #[must_use]
    pub fn ticker(&self) -> String {
        if self.symbol.contains(':') {
            self.symbol.clone()
        } else {
            format!("{}:{}", self.exchange, self.symbol)
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ticker(), self.interval)
    }
}

/// Handle of an active series inside a feed.
///
/// Ids are never reused within one feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesId(pub u64);

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "series#{}", self.0)
    }
}

/// Handle of one subscriber attached to a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId {
    /// Series the subscriber is attached to.
    pub series: SeriesId,
    /// Slot of the subscriber within that series.
    pub slot: u64,
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/sub#{}", self.series, self.slot)
    }
}

/// Point-in-time view of one active series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesInfo {
    /// Series handle.
    pub id: SeriesId,
    /// Series key.
    pub key: SeriesKey,
    /// Timestamp of the last bar delivered, if any.
    pub last_bar_time: Option<DateTime<Utc>>,
    /// Number of attached subscribers.
    pub subscribers: usize,
    /// Most recent scheduler-side failure for this series, cleared on the next delivery.
    pub last_error: Option<FeedError>,
}
