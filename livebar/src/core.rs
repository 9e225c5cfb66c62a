use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use livebar_core::{
    BarSource, Candle, CatchUpPolicy, Clock, FeedConfig, FeedError, Interval, RetryConfig,
    SeriesId, SeriesInfo, SeriesKey, SubscriptionId, SystemClock, fetch_checked,
};
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::task::JoinHandle;

use crate::scheduler::{self, Halt};
use crate::subscriber::{self, Subscriber};
use crate::trigger::TriggerGroups;

/// Handler for scheduler-side failures (retry exhaustion, source errors).
///
/// Runs on the scheduler task while the feed lock is held; it must not block.
pub type ErrorHandler = Arc<dyn Fn(&SeriesKey, &FeedError) + Send + Sync>;

/// One active series and its subscribers.
pub(crate) struct Series {
    pub(crate) key: Arc<SeriesKey>,
    pub(crate) last_bar_time: Option<DateTime<Utc>>,
    pub(crate) last_error: Option<FeedError>,
    subscribers: BTreeMap<u64, Subscriber>,
    next_slot: u64,
}

impl Series {
    /// Record `bar` as the latest and queue it for every subscriber in slot order.
    pub(crate) fn deliver(&mut self, bar: Candle) {
        self.last_bar_time = Some(bar.ts);
        self.last_error = None;
        for sub in self.subscribers.values() {
            sub.push(bar.clone());
        }
    }

    fn info(&self, id: SeriesId) -> SeriesInfo {
        SeriesInfo {
            id,
            key: self.key.as_ref().clone(),
            last_bar_time: self.last_bar_time,
            subscribers: self.subscribers.len(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Everything guarded by the feed lock.
pub(crate) struct FeedState {
    pub(crate) triggers: TriggerGroups,
    pub(crate) series: BTreeMap<SeriesId, Series>,
    /// Generation of the scheduler run that owns the current series, if any.
    pub(crate) active_generation: Option<u64>,
    scheduler: Option<JoinHandle<()>>,
    /// Scheduler runs told to stop but not yet awaited.
    retiring: Vec<JoinHandle<()>>,
    /// Worker threads of stopped subscribers.
    retired: Vec<std::thread::JoinHandle<()>>,
    next_series: u64,
}

impl FeedState {
    fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            triggers: TriggerGroups::new(clock),
            series: BTreeMap::new(),
            active_generation: None,
            scheduler: None,
            retiring: Vec::new(),
            retired: Vec::new(),
            next_series: 0,
        }
    }

    fn find(&self, key: &SeriesKey) -> Option<SeriesId> {
        self.series
            .iter()
            .find(|(_, s)| s.key.as_ref() == key)
            .map(|(id, _)| *id)
    }

    fn retire(&mut self, sub: Subscriber) {
        self.retired.extend(sub.stop());
        subscriber::reap_finished(&mut self.retired);
    }

    /// Stop every subscriber, drop every series and group, and end the active run.
    pub(crate) fn teardown(&mut self) {
        for series in std::mem::take(&mut self.series).into_values() {
            for sub in series.subscribers.into_values() {
                self.retired.extend(sub.stop());
            }
        }
        self.triggers.clear();
        self.triggers.request_shutdown();
        self.active_generation = None;
        self.scheduler = None;
    }
}

/// State shared between the public handle and the scheduler task.
pub(crate) struct Shared {
    pub(crate) state: Mutex<FeedState>,
    pub(crate) source: Arc<dyn BarSource>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) cfg: FeedConfig,
    pub(crate) on_error: Option<ErrorHandler>,
    halt: watch::Sender<u64>,
    generations: AtomicU64,
}

/// Live feed of newly completed bars for a set of series.
///
/// Series sharing a refresh interval are polled together when their period
/// ends; each new bar is queued to every subscriber of its series and
/// delivered on that subscriber's own worker thread.
///
/// Control operations take an optional lock timeout; `None` falls back to
/// [`FeedConfig::lock_timeout`]. They share one lock with the scheduler, which
/// holds it while polling, so a call can wait for up to one retry cycle.
///
/// Dropping the feed stops its scheduler and subscribers without joining the
/// worker threads; call [`shutdown`](Self::shutdown) for an orderly stop.
pub struct LiveFeed {
    shared: Arc<Shared>,
}

/// Builder for constructing a [`LiveFeed`].
pub struct LiveFeedBuilder {
    source: Option<Arc<dyn BarSource>>,
    clock: Option<Arc<dyn Clock>>,
    cfg: FeedConfig,
    on_error: Option<ErrorHandler>,
}

impl Default for LiveFeedBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveFeedBuilder {
    /// Create a new builder with default configuration and no source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            source: None,
            clock: None,
            cfg: FeedConfig::default(),
            on_error: None,
        }
    }

    /// Set the data source. Required.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn BarSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Use `clock` for trigger times. Defaults to [`SystemClock`].
    ///
    /// Pair a paused Tokio runtime with `RuntimeClock` so trigger sleeps and
    /// clock readings agree.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, cfg: FeedConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Set the retry budget for detecting a newly closed bar.
    #[must_use]
    pub const fn retry(mut self, retry: RetryConfig) -> Self {
        self.cfg.retry = retry;
        self
    }

    /// Set the timeout for a single source call; `None` waits indefinitely.
    #[must_use]
    pub const fn fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.cfg.fetch_timeout = timeout;
        self
    }

    /// Set the default lock timeout for control operations.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.cfg.lock_timeout = Some(timeout);
        self
    }

    /// Select how late groups catch up.
    #[must_use]
    pub const fn catch_up(mut self, policy: CatchUpPolicy) -> Self {
        self.cfg.catch_up = policy;
        self
    }

    /// Register a handler for series that miss a period.
    #[must_use]
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&SeriesKey, &FeedError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Build the feed.
    ///
    /// # Errors
    /// Returns `InvalidArg` if no source was set via [`with_source`](Self::with_source)
    /// or the retry budget allows no attempts.
    pub fn build(self) -> Result<LiveFeed, FeedError> {
        let source = self.source.ok_or_else(|| {
            FeedError::InvalidArg("no source registered; add one via with_source(...)".into())
        })?;
        if self.cfg.retry.max_attempts == 0 {
            return Err(FeedError::InvalidArg(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let (halt, _) = watch::channel(0);
        Ok(LiveFeed {
            shared: Arc::new(Shared {
                state: Mutex::new(FeedState::new(Arc::clone(&clock))),
                source,
                clock,
                cfg: self.cfg,
                on_error: self.on_error,
                halt,
                generations: AtomicU64::new(0),
            }),
        })
    }
}

impl LiveFeed {
    /// Start building a new feed.
    #[must_use]
    pub fn builder() -> LiveFeedBuilder {
        LiveFeedBuilder::new()
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &FeedConfig {
        &self.shared.cfg
    }

    async fn lock(
        &self,
        operation: &'static str,
        timeout: Option<Duration>,
    ) -> Result<MutexGuard<'_, FeedState>, FeedError> {
        match timeout.or(self.shared.cfg.lock_timeout) {
            Some(limit) => tokio::time::timeout(limit, self.shared.state.lock())
                .await
                .map_err(|_| FeedError::timeout(operation)),
            None => Ok(self.shared.state.lock().await),
        }
    }

    fn start_scheduler(&self, state: &mut FeedState) {
        let generation = self.shared.generations.fetch_add(1, Ordering::SeqCst);
        let waiter = state.triggers.arm();
        let halt = Halt::new(self.shared.halt.subscribe(), generation);
        state.active_generation = Some(generation);
        state.retiring.retain(|h| !h.is_finished());
        state.scheduler = Some(scheduler::spawn(Arc::clone(&self.shared), waiter, halt));
    }

    /// Start monitoring `symbol` on `exchange` at `interval`.
    ///
    /// When no series with this interval is active yet, one bar is fetched
    /// synchronously to seed the group's first due time. The scheduler starts
    /// with the first series.
    ///
    /// # Errors
    /// - `InvalidArg` for an empty symbol or exchange, or when the seed fetch
    ///   returns no rows.
    /// - `AlreadyExists` carrying the active series' id when the key is taken.
    /// - `Timeout` if the lock is not acquired in time.
    /// - Any error from the seed fetch.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "livebar::add_series", skip(self), err)
    )]
    pub async fn add_series(
        &self,
        symbol: &str,
        exchange: &str,
        interval: Interval,
        timeout: Option<Duration>,
    ) -> Result<SeriesId, FeedError> {
        let key = SeriesKey::new(symbol, exchange, interval)?;
        let mut state = self.lock("add_series", timeout).await?;
        if let Some(id) = state.find(&key) {
            return Err(FeedError::AlreadyExists {
                key: key.to_string(),
                id,
            });
        }

        let seed = if state.triggers.contains_group(interval) {
            None
        } else {
            let bars = fetch_checked(
                self.shared.source.as_ref(),
                &key,
                1,
                self.shared.cfg.fetch_timeout,
            )
            .await?;
            bars.last().map(|c| c.ts)
        };

        let id = SeriesId(state.next_series);
        state.triggers.append(id, interval, seed)?;
        state.next_series += 1;
        state.series.insert(
            id,
            Series {
                key: Arc::new(key),
                last_bar_time: None,
                last_error: None,
                subscribers: BTreeMap::new(),
                next_slot: 0,
            },
        );
        if state.active_generation.is_none() {
            self.start_scheduler(&mut state);
        }
        #[cfg(feature = "tracing")]
        tracing::info!(series = %id, "series added");
        Ok(id)
    }

    /// Stop monitoring a series, stopping all of its subscribers.
    ///
    /// Removing the last series stops the scheduler.
    ///
    /// # Errors
    /// `NotFound` if `id` is not active; `Timeout` if the lock is not acquired in time.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "livebar::remove_series", skip(self), fields(series = %id), err)
    )]
    pub async fn remove_series(
        &self,
        id: SeriesId,
        timeout: Option<Duration>,
    ) -> Result<(), FeedError> {
        let mut state = self.lock("remove_series", timeout).await?;
        let interval = state
            .series
            .get(&id)
            .map(|s| s.key.interval())
            .ok_or_else(|| FeedError::not_found(id.to_string()))?;
        state.triggers.discard(id, interval)?;
        let series = state
            .series
            .remove(&id)
            .ok_or_else(|| FeedError::not_found(id.to_string()))?;
        for sub in series.subscribers.into_values() {
            state.retire(sub);
        }

        if state.series.is_empty() {
            state.triggers.request_shutdown();
            state.active_generation = None;
            if let Some(handle) = state.scheduler.take() {
                state.retiring.push(handle);
            }
        }
        #[cfg(feature = "tracing")]
        tracing::info!(remaining = state.series.len(), "series removed");
        Ok(())
    }

    /// Attach `callback` to series `id`.
    ///
    /// The callback runs on a dedicated thread named `livebar-sub-<series>-<slot>`
    /// and sees every new bar of the series in order. A panicking callback ends
    /// only its own thread.
    ///
    /// # Errors
    /// `NotFound` if `id` is not active; `Timeout` if the lock is not acquired in
    /// time; `Worker` if the thread cannot be spawned.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "livebar::subscribe", skip(self, callback), fields(series = %id), err)
    )]
    pub async fn subscribe<F>(
        &self,
        id: SeriesId,
        callback: F,
        timeout: Option<Duration>,
    ) -> Result<SubscriptionId, FeedError>
    where
        F: FnMut(&SeriesKey, &Candle) + Send + 'static,
    {
        let mut state = self.lock("subscribe", timeout).await?;
        let series = state
            .series
            .get_mut(&id)
            .ok_or_else(|| FeedError::not_found(id.to_string()))?;
        let sub_id = SubscriptionId {
            series: id,
            slot: series.next_slot,
        };
        let sub = Subscriber::start(sub_id, Arc::clone(&series.key), Box::new(callback))?;
        series.next_slot += 1;
        series.subscribers.insert(sub_id.slot, sub);
        Ok(sub_id)
    }

    /// Detach and stop a subscriber. Bars already queued to it are still delivered.
    ///
    /// # Errors
    /// `NotFound` if the subscription is not attached (including a second call
    /// for the same subscription); `Timeout` if the lock is not acquired in time.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "livebar::unsubscribe", skip(self), fields(subscription = %subscription), err)
    )]
    pub async fn unsubscribe(
        &self,
        subscription: SubscriptionId,
        timeout: Option<Duration>,
    ) -> Result<(), FeedError> {
        let mut state = self.lock("unsubscribe", timeout).await?;
        let sub = state
            .series
            .get_mut(&subscription.series)
            .and_then(|s| s.subscribers.remove(&subscription.slot))
            .ok_or_else(|| FeedError::not_found(subscription.to_string()))?;
        debug_assert_eq!(sub.id(), subscription);
        state.retire(sub);
        Ok(())
    }

    /// Stop the scheduler, remove every series and join every subscriber thread.
    ///
    /// Waits for callbacks that are running or queued. The feed can be reused
    /// afterwards.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "livebar::shutdown", skip(self))
    )]
    pub async fn shutdown(&self) {
        let bound = self.shared.generations.load(Ordering::SeqCst);
        self.shared.halt.send_replace(bound);

        let runs: Vec<JoinHandle<()>> = {
            let mut state = self.shared.state.lock().await;
            state.triggers.request_shutdown();
            let mut runs = std::mem::take(&mut state.retiring);
            runs.extend(state.scheduler.take());
            runs
        };
        for res in futures::future::join_all(runs).await {
            if let Err(_e) = res {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_e, "scheduler task failed");
            }
        }

        let threads = {
            let mut state = self.shared.state.lock().await;
            state.teardown();
            std::mem::take(&mut state.retired)
        };
        let joined = tokio::task::spawn_blocking(move || {
            for handle in threads {
                subscriber::join_worker(handle);
            }
        })
        .await;
        if let Err(_e) = joined {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_e, "joining subscriber threads failed");
        }
        #[cfg(feature = "tracing")]
        tracing::info!("feed shut down");
    }

    /// Fetch the latest `count` bars for a key directly from the source.
    ///
    /// Shares the feed lock with the scheduler so calls never overlap with polling.
    ///
    /// # Errors
    /// `InvalidArg` for an empty symbol/exchange or `count == 0`; `Timeout` if
    /// the lock is not acquired in time; any source error.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "livebar::history", skip(self), err)
    )]
    pub async fn history(
        &self,
        symbol: &str,
        exchange: &str,
        interval: Interval,
        count: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<Candle>, FeedError> {
        let key = SeriesKey::new(symbol, exchange, interval)?;
        if count == 0 {
            return Err(FeedError::InvalidArg("count must be at least 1".into()));
        }
        let _state = self.lock("history", timeout).await?;
        fetch_checked(
            self.shared.source.as_ref(),
            &key,
            count,
            self.shared.cfg.fetch_timeout,
        )
        .await
    }

    /// Id of the active series with this key, if any.
    ///
    /// # Errors
    /// `InvalidArg` for an empty symbol or exchange; `Timeout` on lock timeout.
    pub async fn find_series(
        &self,
        symbol: &str,
        exchange: &str,
        interval: Interval,
    ) -> Result<Option<SeriesId>, FeedError> {
        let key = SeriesKey::new(symbol, exchange, interval)?;
        let state = self.lock("find_series", None).await?;
        Ok(state.find(&key))
    }

    /// Snapshot of one active series.
    ///
    /// # Errors
    /// `NotFound` if `id` is not active; `Timeout` on lock timeout.
    pub async fn series_info(&self, id: SeriesId) -> Result<SeriesInfo, FeedError> {
        let state = self.lock("series_info", None).await?;
        state
            .series
            .get(&id)
            .map(|s| s.info(id))
            .ok_or_else(|| FeedError::not_found(id.to_string()))
    }

    /// Snapshots of all active series in id order.
    ///
    /// # Errors
    /// `Timeout` on lock timeout.
    pub async fn series(&self) -> Result<Vec<SeriesInfo>, FeedError> {
        let state = self.lock("series", None).await?;
        Ok(state.series.iter().map(|(id, s)| s.info(*id)).collect())
    }

    /// Earliest pending trigger time across all interval groups.
    ///
    /// # Errors
    /// `Timeout` on lock timeout.
    pub async fn next_trigger(&self) -> Result<Option<DateTime<Utc>>, FeedError> {
        let state = self.lock("next_trigger", None).await?;
        Ok(state.triggers.earliest())
    }

    /// Whether a scheduler run is active.
    ///
    /// # Errors
    /// `Timeout` on lock timeout.
    pub async fn is_running(&self) -> Result<bool, FeedError> {
        let state = self.lock("is_running", None).await?;
        Ok(state.active_generation.is_some())
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.shared.halt.send_replace(u64::MAX);
    }
}
