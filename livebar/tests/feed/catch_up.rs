use std::sync::{Arc, Mutex};

use crate::helpers::*;
use livebar::{CatchUpPolicy, FeedError, Interval, LiveFeedBuilder};

/// Feed seeded with a bar ten periods old from a source that never moves on.
async fn frozen(
    configure: impl FnOnce(LiveFeedBuilder) -> LiveFeedBuilder,
) -> (Scripted, Arc<Mutex<Vec<FeedError>>>) {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let h = scripted_with(start(), move |b| {
        configure(b).on_error(move |_, e| sink.lock().unwrap().push(e.clone()))
    });
    let k = key(AAPL, Interval::I1m);
    h.ctl
        .push_behavior(&k, MockBehavior::Return(vec![bar(t0() - mins(10))]))
        .await;
    h.ctl
        .set_default(&k, rows(t0() - mins(11), t0() - mins(10)))
        .await;
    (h, errors)
}

#[tokio::test(start_paused = true)]
async fn stale_seed_skips_missed_periods_by_default() {
    let (h, errors) = frozen(|b| b).await;
    let k = key(AAPL, Interval::I1m);
    let id = h.feed.add_series(AAPL, NASDAQ, Interval::I1m, None).await.unwrap();
    let (cb, rx) = recorder();
    h.feed.subscribe(id, cb, None).await.unwrap();

    run_until(&h.clock, t0() + chrono::TimeDelta::seconds(59)).await;

    assert_eq!(next_bar(&rx).unwrap().ts, t0() - mins(11));
    assert_quiet(&rx);
    assert_eq!(h.ctl.calls_for(&k).await.len(), 2, "seed plus one poll");
    assert!(errors.lock().unwrap().is_empty());
    assert_eq!(h.feed.next_trigger().await.unwrap(), Some(t0() + mins(1)));
    h.feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn single_step_catch_up_polls_once_per_missed_period() {
    let (h, errors) = frozen(|b| b.catch_up(CatchUpPolicy::Single)).await;
    let k = key(AAPL, Interval::I1m);
    let id = h.feed.add_series(AAPL, NASDAQ, Interval::I1m, None).await.unwrap();
    let (cb, rx) = recorder();
    h.feed.subscribe(id, cb, None).await.unwrap();

    run_until(&h.clock, t0() + chrono::TimeDelta::seconds(59)).await;

    assert_eq!(next_bar(&rx).unwrap().ts, t0() - mins(11));
    assert_quiet(&rx);
    // Nine overdue wakes poll once each; only the wake that reaches the
    // current period runs the full retry budget.
    assert_eq!(h.ctl.calls_for(&k).await.len(), 1 + 9 + 50);
    let seen = errors.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert!(matches!(seen[0], FeedError::DataUnavailable { attempts: 50, .. }));
    assert_eq!(h.feed.next_trigger().await.unwrap(), Some(t0() + mins(1)));
    h.feed.shutdown().await;
}
