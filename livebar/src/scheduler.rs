use std::sync::Arc;

use chrono::{DateTime, Utc};
use livebar_core::{BarSource, Candle, FeedConfig, FeedError, SeriesKey, fetch_checked};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::{FeedState, Shared};
use crate::trigger::TriggerWaiter;

/// Feed-wide stop request, readable without taking the feed lock.
///
/// The channel carries a bound: every scheduler run whose generation is below
/// it must stop.
#[derive(Debug, Clone)]
pub(crate) struct Halt {
    rx: watch::Receiver<u64>,
    generation: u64,
}

impl Halt {
    pub(crate) const fn new(rx: watch::Receiver<u64>, generation: u64) -> Self {
        Self { rx, generation }
    }

    fn is_set(&self) -> bool {
        *self.rx.borrow() > self.generation
    }

    async fn wait(&self) {
        let mut rx = self.rx.clone();
        let generation = self.generation;
        let _ = rx.wait_for(|bound| *bound > generation).await;
    }
}

/// Either way of stopping a run: trigger shutdown (last series removed) or a feed halt.
pub(crate) struct Cancel<'a> {
    waiter: &'a TriggerWaiter,
    halt: &'a Halt,
}

impl Cancel<'_> {
    fn is_set(&self) -> bool {
        self.waiter.is_shutdown() || self.halt.is_set()
    }

    async fn wait(&self) {
        tokio::select! {
            () = self.waiter.shutdown_requested() => {}
            () = self.halt.wait() => {}
        }
    }
}

pub(crate) fn spawn(shared: Arc<Shared>, waiter: TriggerWaiter, halt: Halt) -> JoinHandle<()> {
    tokio::spawn(run(shared, waiter, halt))
}

async fn run(shared: Arc<Shared>, mut waiter: TriggerWaiter, halt: Halt) {
    let generation = halt.generation;
    #[cfg(feature = "tracing")]
    tracing::debug!(generation, "scheduler started");

    loop {
        let due = tokio::select! {
            biased;
            () = halt.wait() => false,
            due = waiter.wait() => due,
        };
        if !due {
            break;
        }
        let mut state = shared.state.lock().await;
        if state.active_generation != Some(generation) {
            break;
        }
        let cancel = Cancel {
            waiter: &waiter,
            halt: &halt,
        };
        tick(&shared, &mut state, &cancel).await;
    }

    let mut state = shared.state.lock().await;
    if state.active_generation == Some(generation) {
        state.teardown();
    }
    #[cfg(feature = "tracing")]
    tracing::debug!(generation, "scheduler stopped");
}

/// Fetch and fan out every series whose interval group is due.
///
/// A group still overdue after advancing is catching up on missed periods:
/// its series are polled once, and a missing new bar is not an error.
async fn tick(shared: &Shared, state: &mut FeedState, cancel: &Cancel<'_>) {
    let now = shared.clock.now();
    let fired = state.triggers.expired(now, shared.cfg.catch_up);
    for interval in fired {
        let catching_up = state
            .triggers
            .next_expiry(interval)
            .is_some_and(|next| next <= now);
        let mut cfg = shared.cfg.clone();
        if catching_up {
            cfg.retry.max_attempts = 1;
            #[cfg(feature = "tracing")]
            tracing::debug!(%interval, "group behind schedule; polling once");
        }
        for id in state.triggers.members(interval) {
            if cancel.is_set() {
                return;
            }
            let Some(series) = state.series.get_mut(&id) else {
                continue;
            };
            let key = Arc::clone(&series.key);
            match fetch_with_retry(
                shared.source.as_ref(),
                &key,
                series.last_bar_time,
                &cfg,
                cancel,
            )
            .await
            {
                Ok(Some(bar)) => series.deliver(bar),
                Ok(None) => return,
                Err(_) if catching_up => {}
                Err(e) => {
                    series.last_error = Some(e.clone());
                    report(shared, &key, &e);
                }
            }
        }
    }
}

/// Poll `key` until a completed bar newer than `last` shows up.
///
/// Each attempt fetches two rows and drops the newest (still forming) one.
/// Source errors and short responses count as attempts. Returns `Ok(None)` when
/// cancelled.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        name = "livebar::scheduler::fetch_with_retry",
        skip(source, key, cfg, cancel),
        fields(key = %key, max_attempts = cfg.retry.max_attempts),
        err,
    )
)]
pub(crate) async fn fetch_with_retry(
    source: &dyn BarSource,
    key: &SeriesKey,
    last: Option<DateTime<Utc>>,
    cfg: &FeedConfig,
    cancel: &Cancel<'_>,
) -> Result<Option<Candle>, FeedError> {
    let max = cfg.retry.max_attempts.max(1);
    for attempt in 1..=max {
        let fetched = tokio::select! {
            biased;
            () = cancel.wait() => return Ok(None),
            res = fetch_checked(source, key, 2, cfg.fetch_timeout) => res,
        };
        match fetched {
            Ok(mut bars) => {
                bars.pop();
                if let Some(candidate) = bars.pop()
                    && Some(candidate.ts) != last
                {
                    return Ok(Some(candidate));
                }
                #[cfg(feature = "tracing")]
                tracing::trace!(attempt, "no new bar yet");
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(attempt, error = %_e, "fetch failed");
            }
        }
        if attempt < max {
            tokio::select! {
                biased;
                () = cancel.wait() => return Ok(None),
                () = tokio::time::sleep(cfg.retry.delay) => {}
            }
        }
    }
    Err(FeedError::DataUnavailable {
        key: key.to_string(),
        attempts: max,
    })
}

fn report(shared: &Shared, key: &SeriesKey, err: &FeedError) {
    #[cfg(feature = "tracing")]
    tracing::warn!(key = %key, error = %err, "series skipped this period");
    if let Some(handler) = &shared.on_error {
        handler(key, err);
    }
}
