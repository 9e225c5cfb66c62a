#![allow(dead_code)]

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use livebar::{Candle, LiveFeed, LiveFeedBuilder, RuntimeClock, SeriesKey};
use livebar_mock::{DynamicMockController, DynamicMockSource, MockBarSource};

pub use livebar_mock::{MockBehavior, flat_candle};

/// Common symbol constants used across tests.
pub const AAPL: &str = "AAPL";
pub const MSFT: &str = "MSFT";
pub const NASDAQ: &str = "NASDAQ";

/// Reference bar open used by scripted scenarios: 2024-01-02 15:00:00 UTC.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap()
}

pub fn mins(n: i64) -> TimeDelta {
    TimeDelta::minutes(n)
}

/// Half a minute into the reference bar, where most scenarios start.
pub fn start() -> DateTime<Utc> {
    t0() + TimeDelta::seconds(30)
}

pub fn bar(ts: DateTime<Utc>) -> Candle {
    flat_candle(ts, 100)
}

/// Scripted response: `closed` is the completed bar, followed by the open one.
pub fn rows(closed: DateTime<Utc>, open: DateTime<Utc>) -> MockBehavior {
    MockBehavior::Return(vec![bar(closed), bar(open)])
}

pub fn key(symbol: &str, interval: livebar::Interval) -> SeriesKey {
    SeriesKey::new(symbol, NASDAQ, interval).unwrap()
}

/// Feed wired to a scripted source and a clock that follows paused Tokio time.
pub struct Scripted {
    pub feed: LiveFeed,
    pub ctl: DynamicMockController,
    pub clock: Arc<RuntimeClock>,
}

pub fn scripted(start: DateTime<Utc>) -> Scripted {
    scripted_with(start, |b| b)
}

pub fn scripted_with(
    start: DateTime<Utc>,
    configure: impl FnOnce(LiveFeedBuilder) -> LiveFeedBuilder,
) -> Scripted {
    let (source, ctl) = DynamicMockSource::new_with_controller("scripted");
    let clock = Arc::new(RuntimeClock::starting_at(start));
    let builder = LiveFeed::builder()
        .with_source(source)
        .clock(clock.clone())
        .fetch_timeout(None);
    let feed = configure(builder).build().unwrap();
    Scripted { feed, ctl, clock }
}

/// Feed wired to the grid mock sharing the feed's clock, so every period has a new bar.
pub struct Gridded {
    pub feed: LiveFeed,
    pub source: Arc<MockBarSource>,
    pub clock: Arc<RuntimeClock>,
}

pub fn gridded(start: DateTime<Utc>) -> Gridded {
    let clock = Arc::new(RuntimeClock::starting_at(start));
    let source = Arc::new(MockBarSource::with_clock(clock.clone()));
    let feed = LiveFeed::builder()
        .with_source(source.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    Gridded {
        feed,
        source,
        clock,
    }
}

/// Callback that forwards every bar to a channel.
pub fn recorder() -> (
    impl FnMut(&SeriesKey, &Candle) + Send + 'static,
    mpsc::Receiver<Candle>,
) {
    let (tx, rx) = mpsc::channel();
    let cb = move |_: &SeriesKey, c: &Candle| {
        let _ = tx.send(c.clone());
    };
    (cb, rx)
}

/// Wait (real time, Tokio time frozen) for the next delivered bar.
///
/// Deliveries happen on subscriber threads; blocking here keeps paused Tokio
/// time from advancing while the worker catches up.
pub fn next_bar(rx: &mpsc::Receiver<Candle>) -> Option<Candle> {
    rx.recv_timeout(Duration::from_secs(2)).ok()
}

/// Assert nothing else arrives within a short real-time window.
pub fn assert_quiet(rx: &mpsc::Receiver<Candle>) {
    let extra = rx.recv_timeout(Duration::from_millis(50));
    assert!(extra.is_err(), "unexpected delivery: {extra:?}");
}

/// Advance paused Tokio time until `at` (plus a millisecond of slack) on `clock`.
pub async fn run_until(clock: &RuntimeClock, at: DateTime<Utc>) {
    use livebar::Clock;
    let delta = (at - clock.now()).to_std().unwrap_or_default();
    tokio::time::sleep(delta + Duration::from_millis(1)).await;
}
