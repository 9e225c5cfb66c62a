use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Months, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::FeedError;

/// Refresh period of a live series.
///
/// Variants are declared shortest-first, so the derived ordering sorts by
/// period length. The serialized form is the data-source code (`"5"`, `"1H"`,
/// `"1D"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Interval {
    /// 1 minute.
    #[serde(rename = "1")]
    I1m,
    /// 3 minutes.
    #[serde(rename = "3")]
    I3m,
    /// 5 minutes.
    #[serde(rename = "5")]
    I5m,
    /// 15 minutes.
    #[serde(rename = "15")]
    I15m,
    /// 30 minutes.
    #[serde(rename = "30")]
    I30m,
    /// 45 minutes.
    #[serde(rename = "45")]
    I45m,
    /// 1 hour.
    #[serde(rename = "1H")]
    H1,
    /// 2 hours.
    #[serde(rename = "2H")]
    H2,
    /// 3 hours.
    #[serde(rename = "3H")]
    H3,
    /// 4 hours.
    #[serde(rename = "4H")]
    H4,
    /// 1 day.
    #[serde(rename = "1D")]
    D1,
    /// 1 week.
    #[serde(rename = "1W")]
    W1,
    /// 1 calendar month.
    #[serde(rename = "1M")]
    M1,
}

impl Interval {
    /// Every supported interval, shortest first.
    pub const ALL: [Self; 13] = [
        Self::I1m,
        Self::I3m,
        Self::I5m,
        Self::I15m,
        Self::I30m,
        Self::I45m,
        Self::H1,
        Self::H2,
        Self::H3,
        Self::H4,
        Self::D1,
        Self::W1,
        Self::M1,
    ];

    /// Data-source code for this interval.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::I1m => "1",
            Self::I3m => "3",
            Self::I5m => "5",
            Self::I15m => "15",
            Self::I30m => "30",
            Self::I45m => "45",
            Self::H1 => "1H",
            Self::H2 => "2H",
            Self::H3 => "3H",
            Self::H4 => "4H",
            Self::D1 => "1D",
            Self::W1 => "1W",
            Self::M1 => "1M",
        }
    }

    /// Fixed length of one period, or `None` for calendar months.
    #[must_use]
    pub const fn fixed_step(self) -> Option<TimeDelta> {
        let minutes = match self {
            Self::I1m => 1,
            Self::I3m => 3,
            Self::I5m => 5,
            Self::I15m => 15,
            Self::I30m => 30,
            Self::I45m => 45,
            Self::H1 => 60,
            Self::H2 => 120,
            Self::H3 => 180,
            Self::H4 => 240,
            Self::D1 => 1_440,
            Self::W1 => 10_080,
            Self::M1 => return None,
        };
        Some(TimeDelta::minutes(minutes))
    }

    /// Timestamp one period after `ts`.
    ///
    /// Months are added on the calendar (Jan 31 + 1M = Feb 28/29). Saturates
    /// at `DateTime::<Utc>::MAX_UTC` instead of overflowing.
    #[must_use]
    pub fn advance(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let next = match self.fixed_step() {
            Some(step) => ts.checked_add_signed(step),
            None => ts.checked_add_months(Months::new(1)),
        };
        next.unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Interval {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Case-sensitive: "1m" is not "1M".
        let code = s.trim();
        Self::ALL
            .into_iter()
            .find(|i| i.code() == code)
            .ok_or_else(|| FeedError::InvalidArg(format!("unknown interval code: {s:?}")))
    }
}
