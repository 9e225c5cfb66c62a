use std::time::Duration;

use async_trait::async_trait;

use crate::{Candle, FeedError, Interval, SeriesKey};

/// Remote source of OHLCV bars.
///
/// Implementations are shared between the scheduler task and control callers,
/// so they must be `Send + Sync`.
#[async_trait]
pub trait BarSource: Send + Sync {
    /// A stable identifier used to tag errors (e.g., "tradingview", "livebar-mock").
    fn name(&self) -> &'static str;

    /// Fetch the most recent `count` bars for `key`, oldest first.
    ///
    /// The last element is the bar that is still forming; the element before it
    /// is the most recently completed bar. Sources may return fewer rows than
    /// requested when history is short.
    async fn fetch_bars(&self, key: &SeriesKey, count: usize) -> Result<Vec<Candle>, FeedError>;

    /// Whether this source can serve bars at `interval`.
    ///
    /// Default: every interval is supported.
    fn supports_interval(&self, interval: Interval) -> bool {
        let _ = interval;
        true
    }
}

/// Tag an arbitrary source error with the source name.
///
/// Errors that already identify their origin pass through untouched.
#[must_use]
pub fn tag_err(source_name: &str, e: FeedError) -> FeedError {
    match e {
        e @ (FeedError::Source { .. }
        | FeedError::SourceTimeout { .. }
        | FeedError::NotFound { .. }
        | FeedError::Unsupported { .. }
        | FeedError::InvalidArg(_)) => e,
        other => FeedError::source(source_name, other.to_string()),
    }
}

/// Fetch bars through `source` with a capability check, optional timeout and error tagging.
///
/// # Errors
/// - `Unsupported` if the source rejects the key's interval.
/// - `SourceTimeout` if `timeout` elapses before the source answers.
/// - Any error returned by the source, tagged with its name.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        name = "livebar_core::fetch_checked",
        skip(source, key),
        fields(source = source.name(), key = %key),
        err,
    )
)]
pub async fn fetch_checked(
    source: &dyn BarSource,
    key: &SeriesKey,
    count: usize,
    timeout: Option<Duration>,
) -> Result<Vec<Candle>, FeedError> {
    if !source.supports_interval(key.interval()) {
        return Err(FeedError::unsupported(format!(
            "{} interval {}",
            source.name(),
            key.interval()
        )));
    }
    let fut = source.fetch_bars(key, count);
    let res = match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or_else(|_| Err(FeedError::source_timeout(source.name(), limit))),
        None => fut.await,
    };
    res.map_err(|e| tag_err(source.name(), e))
}
