use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::helpers::*;
use livebar::{FeedError, Interval, RetryConfig, SeriesKey};

/// Seeded at t0 with the t0 bar, then polled with `poll` as the default response.
async fn seeded(poll: MockBehavior) -> (Scripted, SeriesKey) {
    let h = scripted(start());
    let k = key(AAPL, Interval::I1m);
    h.ctl
        .push_behavior(&k, MockBehavior::Return(vec![bar(t0())]))
        .await;
    h.ctl.set_default(&k, poll).await;
    (h, k)
}

#[tokio::test(start_paused = true)]
async fn stale_bar_is_retried_until_a_new_one_appears() {
    let (h, k) = seeded(rows(t0() + mins(1), t0() + mins(2))).await;
    // One response for the first tick, then three stale ones for the second.
    for _ in 0..4 {
        h.ctl.push_behavior(&k, rows(t0(), t0() + mins(1))).await;
    }

    let id = h.feed.add_series(AAPL, NASDAQ, Interval::I1m, None).await.unwrap();
    let (cb, rx) = recorder();
    h.feed.subscribe(id, cb, None).await.unwrap();

    // last_bar_time starts unset, so the first tick accepts t0 on the first attempt.
    run_until(&h.clock, t0() + mins(1)).await;
    assert_eq!(next_bar(&rx).unwrap().ts, t0());

    // Second tick: three stale t0 rows, then t0+1m on the fourth attempt.
    run_until(&h.clock, t0() + mins(2) + chrono::TimeDelta::milliseconds(300)).await;
    assert_eq!(next_bar(&rx).unwrap().ts, t0() + mins(1));

    let calls = h.ctl.calls_for(&k).await;
    let tick: Vec<_> = calls[2..].iter().map(|c| c.at).collect();
    assert_eq!(tick.len(), 4);
    for pair in tick.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_millis(100));
    }
    h.feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_report_data_unavailable() {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let h = scripted_with(start(), move |b| {
        b.on_error(move |k, e| sink.lock().unwrap().push((k.clone(), e.clone())))
    });
    let k = key(AAPL, Interval::I1m);
    h.ctl
        .push_behavior(&k, MockBehavior::Return(vec![bar(t0())]))
        .await;
    h.ctl.set_default(&k, rows(t0(), t0() + mins(1))).await;

    let id = h.feed.add_series(AAPL, NASDAQ, Interval::I1m, None).await.unwrap();
    let (cb, rx) = recorder();
    h.feed.subscribe(id, cb, None).await.unwrap();

    run_until(&h.clock, t0() + mins(1)).await;
    assert_eq!(next_bar(&rx).unwrap().ts, t0());

    // The t0 row never changes again: 50 attempts spaced 100ms apart.
    run_until(&h.clock, t0() + mins(2) + chrono::TimeDelta::seconds(5)).await;
    assert_quiet(&rx);

    let calls = h.ctl.calls_for(&k).await;
    let tick = &calls[2..];
    assert_eq!(tick.len(), 50);
    assert_eq!(tick[49].at - tick[0].at, Duration::from_millis(4900));

    let seen = errors.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, k);
    assert!(matches!(
        &seen[0].1,
        FeedError::DataUnavailable { attempts: 50, .. }
    ));

    let info = h.feed.series_info(id).await.unwrap();
    assert_eq!(info.last_bar_time, Some(t0()));
    assert!(matches!(
        info.last_error,
        Some(FeedError::DataUnavailable { attempts: 50, .. })
    ));
    h.feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn source_errors_and_short_responses_count_as_attempts() {
    let (h, k) = seeded(rows(t0(), t0() + mins(1))).await;
    h.ctl
        .push_behavior(&k, MockBehavior::Fail(FeedError::source("scripted", "boom")))
        .await;
    h.ctl
        .push_behavior(&k, MockBehavior::Return(vec![bar(t0() + mins(1))]))
        .await;
    h.ctl.push_behavior(&k, MockBehavior::Return(Vec::new())).await;

    let id = h.feed.add_series(AAPL, NASDAQ, Interval::I1m, None).await.unwrap();
    let (cb, rx) = recorder();
    h.feed.subscribe(id, cb, None).await.unwrap();

    run_until(&h.clock, t0() + mins(1) + chrono::TimeDelta::milliseconds(300)).await;
    assert_eq!(next_bar(&rx).unwrap().ts, t0());
    assert_eq!(h.ctl.calls_for(&k).await.len(), 1 + 4);
    h.feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retry_budget_is_configurable() {
    let errors = Arc::new(Mutex::new(0usize));
    let sink = errors.clone();
    let h = scripted_with(start(), move |b| {
        b.retry(RetryConfig {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        })
        .on_error(move |_, e| {
            assert!(matches!(e, FeedError::DataUnavailable { attempts: 3, .. }));
            *sink.lock().unwrap() += 1;
        })
    });
    let k = key(AAPL, Interval::I1m);
    h.ctl
        .push_behavior(&k, MockBehavior::Return(vec![bar(t0())]))
        .await;
    h.ctl
        .set_default(&k, MockBehavior::Fail(FeedError::source("scripted", "down")))
        .await;

    h.feed.add_series(AAPL, NASDAQ, Interval::I1m, None).await.unwrap();
    run_until(&h.clock, t0() + mins(1) + chrono::TimeDelta::seconds(2)).await;

    let calls = h.ctl.calls_for(&k).await;
    assert_eq!(calls.len(), 1 + 3);
    assert_eq!(calls[3].at - calls[1].at, Duration::from_secs(2));
    assert_eq!(*errors.lock().unwrap(), 1);
    h.feed.shutdown().await;
}
