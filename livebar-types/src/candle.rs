use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLCV bar.
///
/// `ts` is the timestamp the data source attaches to the bar (its open time
/// for most sources). The feed only compares timestamps for equality and never
/// looks at the prices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar timestamp.
    pub ts: DateTime<Utc>,
    /// Opening price.
    pub open: Decimal,
    /// Highest traded price.
    pub high: Decimal,
    /// Lowest traded price.
    pub low: Decimal,
    /// Closing (or latest, for an open bar) price.
    pub close: Decimal,
    /// Traded volume.
    pub volume: Decimal,
}

impl Candle {
    /// Build a candle from its components.
    #[must_use]
    pub const fn new(
        ts: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            ts,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}
