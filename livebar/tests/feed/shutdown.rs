use std::sync::Arc;
use std::time::Duration;

use crate::helpers::*;
use livebar::Interval;

#[tokio::test(start_paused = true)]
async fn shutdown_joins_workers_and_clears_everything() {
    let Gridded { feed, clock, .. } = gridded(start());
    let guard = Arc::new(());
    for (symbol, interval) in [(AAPL, Interval::I1m), (MSFT, Interval::I5m)] {
        let id = feed.add_series(symbol, NASDAQ, interval, None).await.unwrap();
        for _ in 0..2 {
            let held = guard.clone();
            feed.subscribe(id, move |_, _| drop(held.clone()), None)
                .await
                .unwrap();
        }
    }
    assert_eq!(Arc::strong_count(&guard), 5);

    run_until(&clock, t0() + mins(2)).await;
    feed.shutdown().await;

    assert_eq!(Arc::strong_count(&guard), 1, "every callback was dropped");
    assert!(feed.series().await.unwrap().is_empty());
    assert_eq!(feed.next_trigger().await.unwrap(), None);
    assert!(!feed.is_running().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_queued_bars() {
    let Gridded { feed, clock, .. } = gridded(start());
    let id = feed.add_series(AAPL, NASDAQ, Interval::I1m, None).await.unwrap();
    let (tx, rx) = std::sync::mpsc::channel();
    feed.subscribe(
        id,
        move |_, c| {
            std::thread::sleep(Duration::from_millis(20));
            tx.send(c.ts).unwrap();
        },
        None,
    )
    .await
    .unwrap();

    run_until(&clock, t0() + mins(3)).await;
    feed.shutdown().await;
    let got: Vec<_> = rx.try_iter().collect();
    assert_eq!(got, vec![t0(), t0() + mins(1), t0() + mins(2)]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_a_hung_fetch() {
    let h = scripted(start());
    let k = key(AAPL, Interval::I1m);
    h.ctl
        .push_behavior(&k, MockBehavior::Return(vec![bar(t0())]))
        .await;
    h.ctl.set_default(&k, MockBehavior::Hang).await;
    h.feed.add_series(AAPL, NASDAQ, Interval::I1m, None).await.unwrap();

    // The scheduler is now stuck in the fetch while holding the feed lock.
    run_until(&h.clock, t0() + mins(1) + chrono::TimeDelta::seconds(10)).await;
    tokio::time::timeout(Duration::from_secs(1), h.feed.shutdown())
        .await
        .expect("shutdown is not blocked by the hung fetch");
    assert!(!h.feed.is_running().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn shutdown_cuts_the_retry_loop_short() {
    let h = scripted(start());
    let k = key(AAPL, Interval::I1m);
    h.ctl
        .push_behavior(&k, MockBehavior::Return(vec![bar(t0())]))
        .await;
    h.ctl.push_behavior(&k, rows(t0(), t0() + mins(1))).await;
    h.ctl.set_default(&k, rows(t0(), t0() + mins(1))).await;
    h.feed.add_series(AAPL, NASDAQ, Interval::I1m, None).await.unwrap();

    // Second tick is retrying the stale t0 row every 100ms.
    run_until(&h.clock, t0() + mins(2) + chrono::TimeDelta::milliseconds(250)).await;
    h.feed.shutdown().await;
    let made = h.ctl.calls_for(&k).await.len();
    assert_eq!(made, 2 + 3);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.ctl.calls_for(&k).await.len(), made);
}

#[tokio::test(start_paused = true)]
async fn feed_is_reusable_after_shutdown() {
    let Gridded { feed, clock, .. } = gridded(start());
    feed.add_series(AAPL, NASDAQ, Interval::I1m, None).await.unwrap();
    feed.shutdown().await;
    feed.shutdown().await;

    let id = feed.add_series(AAPL, NASDAQ, Interval::I1m, None).await.unwrap();
    assert!(feed.is_running().await.unwrap());
    let (cb, rx) = recorder();
    feed.subscribe(id, cb, None).await.unwrap();
    run_until(&clock, t0() + mins(1)).await;
    assert_eq!(next_bar(&rx).unwrap().ts, t0());
    feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn dropping_the_feed_stops_subscribers() {
    let Gridded { feed, .. } = gridded(start());
    let guard = Arc::new(());
    let id = feed.add_series(AAPL, NASDAQ, Interval::I1m, None).await.unwrap();
    let held = guard.clone();
    feed.subscribe(id, move |_, _| drop(held.clone()), None)
        .await
        .unwrap();
    drop(feed);

    for _ in 0..200 {
        if Arc::strong_count(&guard) == 1 {
            break;
        }
        tokio::task::yield_now().await;
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(Arc::strong_count(&guard), 1);
}
