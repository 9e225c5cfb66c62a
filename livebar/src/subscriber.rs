use std::sync::Arc;
use std::thread::JoinHandle;

use livebar_core::{Candle, FeedError, SeriesKey, SubscriptionId};
use tokio::sync::mpsc;

/// User callback invoked on the subscriber's worker thread.
pub(crate) type Callback = Box<dyn FnMut(&SeriesKey, &Candle) + Send + 'static>;

/// Message on a subscriber queue.
#[derive(Debug)]
pub(crate) enum Delivery {
    Bar(Candle),
    Stop,
}

/// One callback with its private FIFO and dedicated worker thread.
pub(crate) struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::UnboundedSender<Delivery>,
    thread: Option<JoinHandle<()>>,
}

impl Subscriber {
    /// Spawn the worker thread and return the running subscriber.
    pub(crate) fn start(
        id: SubscriptionId,
        key: Arc<SeriesKey>,
        callback: Callback,
    ) -> Result<Self, FeedError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let thread = std::thread::Builder::new()
            .name(format!("livebar-sub-{}-{}", id.series.0, id.slot))
            .spawn(move || drain(&key, callback, rx))
            .map_err(|e| FeedError::Worker(format!("spawn {id}: {e}")))?;
        Ok(Self {
            id,
            tx,
            thread: Some(thread),
        })
    }

    /// Queue `bar` for the worker without blocking.
    ///
    /// Returns `false` if the worker has already exited (its callback panicked).
    pub(crate) fn push(&self, bar: Candle) -> bool {
        if self.tx.send(Delivery::Bar(bar)).is_ok() {
            return true;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(subscription = %self.id, "worker gone; bar dropped");
        false
    }

    /// Queue the stop sentinel and hand back the worker thread for joining.
    ///
    /// Bars queued before the sentinel are still delivered.
    pub(crate) fn stop(mut self) -> Option<JoinHandle<()>> {
        let _ = self.tx.send(Delivery::Stop);
        self.thread.take()
    }

    pub(crate) const fn id(&self) -> SubscriptionId {
        self.id
    }
}

fn drain(key: &SeriesKey, mut callback: Callback, mut rx: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(delivery) = rx.blocking_recv() {
        match delivery {
            Delivery::Bar(bar) => callback(key, &bar),
            Delivery::Stop => break,
        }
    }
}

/// Join worker threads that have already exited, keeping the rest.
pub(crate) fn reap_finished(threads: &mut Vec<JoinHandle<()>>) {
    let (done, running): (Vec<_>, Vec<_>) = threads.drain(..).partition(JoinHandle::is_finished);
    *threads = running;
    for handle in done {
        join_worker(handle);
    }
}

/// Join one worker thread, reporting a panicked callback.
pub(crate) fn join_worker(handle: JoinHandle<()>) {
    #[cfg(feature = "tracing")]
    let name = handle.thread().name().map(str::to_owned);
    if handle.join().is_err() {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            worker = name.as_deref().unwrap_or("?"),
            "subscriber callback panicked"
        );
    }
}
