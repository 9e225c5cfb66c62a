//! Interval-grouped trigger times and the interruptible wait used by the scheduler.
//!
//! [`TriggerGroups`] keeps one group per refresh interval with the time its next
//! bar is due. The earliest due time is published on a `watch` channel; the
//! scheduler's [`TriggerWaiter`] sleeps until that time and restarts its sleep
//! whenever membership changes move the earliest time.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use livebar_core::{CatchUpPolicy, Clock, FeedError, Interval, SeriesId};
use tokio::sync::watch;

/// Value published to the waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    /// Earliest due time across all groups; `None` when there are no groups.
    Pending(Option<DateTime<Utc>>),
    /// Stop waiting for good.
    Shutdown,
}

#[derive(Debug)]
struct IntervalGroup {
    members: BTreeSet<SeriesId>,
    next_expiry: DateTime<Utc>,
}

/// Series grouped by refresh interval, each group with its next due time.
#[derive(Debug)]
pub struct TriggerGroups {
    groups: BTreeMap<Interval, IntervalGroup>,
    signal: watch::Sender<Signal>,
    clock: Arc<dyn Clock>,
}

impl TriggerGroups {
    /// Empty set of groups measuring time with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (signal, _) = watch::channel(Signal::Pending(None));
        Self {
            groups: BTreeMap::new(),
            signal,
            clock,
        }
    }

    /// Add `id` to the group for `interval`.
    ///
    /// A missing group is created with its first due time one period after
    /// `seed`, the timestamp of the latest bar known for that interval.
    ///
    /// # Errors
    /// Returns `InvalidArg` when the group does not exist and `seed` is `None`.
    pub fn append(
        &mut self,
        id: SeriesId,
        interval: Interval,
        seed: Option<DateTime<Utc>>,
    ) -> Result<(), FeedError> {
        if let Some(group) = self.groups.get_mut(&interval) {
            group.members.insert(id);
            return Ok(());
        }
        let seed = seed.ok_or_else(|| {
            FeedError::InvalidArg(format!("seed time required for new {interval} group"))
        })?;
        self.groups.insert(
            interval,
            IntervalGroup {
                members: BTreeSet::from([id]),
                next_expiry: interval.advance(seed),
            },
        );
        self.publish();
        Ok(())
    }

    /// Remove `id` from the group for `interval`, deleting the group when it empties.
    ///
    /// # Errors
    /// Returns `NotFound` if `id` is not a member of that group.
    pub fn discard(&mut self, id: SeriesId, interval: Interval) -> Result<(), FeedError> {
        let group = self
            .groups
            .get_mut(&interval)
            .filter(|g| g.members.contains(&id))
            .ok_or_else(|| FeedError::not_found(format!("{id} in {interval} group")))?;
        group.members.remove(&id);
        if group.members.is_empty() {
            self.groups.remove(&interval);
            self.publish();
        }
        Ok(())
    }

    /// Advance every group due at or before `now` and return their intervals, shortest first.
    pub fn expired(&mut self, now: DateTime<Utc>, policy: CatchUpPolicy) -> Vec<Interval> {
        let mut fired = Vec::new();
        for (interval, group) in &mut self.groups {
            if group.next_expiry > now {
                continue;
            }
            group.next_expiry = interval.advance(group.next_expiry);
            if policy == CatchUpPolicy::SkipMissed {
                while group.next_expiry <= now && group.next_expiry < DateTime::<Utc>::MAX_UTC {
                    group.next_expiry = interval.advance(group.next_expiry);
                }
            }
            fired.push(*interval);
        }
        if !fired.is_empty() {
            self.publish();
        }
        fired
    }

    /// Members of the group for `interval`, in id order.
    #[must_use]
    pub fn members(&self, interval: Interval) -> Vec<SeriesId> {
        self.groups
            .get(&interval)
            .map(|g| g.members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Earliest due time across all groups.
    #[must_use]
    pub fn earliest(&self) -> Option<DateTime<Utc>> {
        self.groups.values().map(|g| g.next_expiry).min()
    }

    /// Due time of the group for `interval`, if it exists.
    #[must_use]
    pub fn next_expiry(&self, interval: Interval) -> Option<DateTime<Utc>> {
        self.groups.get(&interval).map(|g| g.next_expiry)
    }

    /// Whether a group for `interval` exists.
    #[must_use]
    pub fn contains_group(&self, interval: Interval) -> bool {
        self.groups.contains_key(&interval)
    }

    /// Number of groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether there are no groups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Make every outstanding and future `wait()` on the current waiter return `false`.
    ///
    /// Idempotent. Only [`arm`](Self::arm) clears it.
    pub fn request_shutdown(&self) {
        self.signal.send_replace(Signal::Shutdown);
    }

    /// Whether shutdown has been requested since the last `arm()`.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.signal.borrow() == Signal::Shutdown
    }

    /// Drop every group. A waiting waiter sees "no groups" and returns `false`.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.publish();
    }

    /// Start a new wait cycle and return its waiter.
    ///
    /// The previous channel is dropped, so a waiter from an earlier cycle keeps
    /// its last value (normally `Shutdown`) and never wakes for this one.
    pub fn arm(&mut self) -> TriggerWaiter {
        let (signal, rx) = watch::channel(Signal::Pending(self.earliest()));
        self.signal = signal;
        TriggerWaiter {
            rx,
            clock: Arc::clone(&self.clock),
        }
    }

    fn publish(&self) {
        let earliest = self.earliest();
        self.signal.send_if_modified(|current| match current {
            Signal::Shutdown => false,
            Signal::Pending(at) if *at == earliest => false,
            Signal::Pending(at) => {
                *at = earliest;
                true
            }
        });
    }
}

/// Scheduler side of [`TriggerGroups`].
#[derive(Debug)]
pub struct TriggerWaiter {
    rx: watch::Receiver<Signal>,
    clock: Arc<dyn Clock>,
}

impl TriggerWaiter {
    /// Sleep until the earliest group is due.
    ///
    /// Returns `true` when the due time is reached and `false` on shutdown or
    /// when no groups remain. Membership changes restart the sleep against the
    /// new earliest time.
    pub async fn wait(&mut self) -> bool {
        loop {
            let at = match *self.rx.borrow_and_update() {
                Signal::Shutdown | Signal::Pending(None) => return false,
                Signal::Pending(Some(at)) => at,
            };
            let delay = at
                .signed_duration_since(self.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::select! {
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                () = tokio::time::sleep(delay) => return true,
            }
        }
    }

    /// Whether shutdown was requested (or the groups were re-armed for a new cycle).
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow() == Signal::Shutdown || self.rx.has_changed().is_err()
    }

    /// Resolve once shutdown is requested or this cycle's channel is gone.
    pub async fn shutdown_requested(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|s| *s == Signal::Shutdown).await;
    }
}
