use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use livebar_core::{BarSource, Candle, FeedError, SeriesKey};

/// Instruction for how one `fetch_bars` call should behave.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Return these rows (oldest first).
    Return(Vec<Candle>),
    /// Fail immediately with the provided error.
    Fail(FeedError),
    /// Hang indefinitely (simulate a stalled connection).
    Hang,
}

/// One recorded `fetch_bars` call.
#[derive(Debug, Clone)]
pub struct FetchCall {
    /// Key that was requested.
    pub key: SeriesKey,
    /// Number of rows requested.
    pub count: usize,
    /// Tokio time of the call.
    pub at: Instant,
}

#[derive(Default)]
struct InternalState {
    scripts: HashMap<SeriesKey, VecDeque<MockBehavior>>,
    defaults: HashMap<SeriesKey, MockBehavior>,
    calls: Vec<FetchCall>,
}

/// Controller handle used by tests to drive the dynamic mock from the outside.
pub struct DynamicMockController {
    state: Arc<Mutex<InternalState>>,
}

impl DynamicMockController {
    /// Queue a one-shot behavior for `key`; queued behaviors are consumed in order
    /// before the default applies.
    pub async fn push_behavior(&self, key: &SeriesKey, behavior: MockBehavior) {
        let mut guard = self.state.lock().await;
        guard
            .scripts
            .entry(key.clone())
            .or_default()
            .push_back(behavior);
    }

    /// Set the behavior used for `key` once its queue is empty.
    pub async fn set_default(&self, key: &SeriesKey, behavior: MockBehavior) {
        let mut guard = self.state.lock().await;
        guard.defaults.insert(key.clone(), behavior);
    }

    /// Return a copy of every recorded call.
    pub async fn calls(&self) -> Vec<FetchCall> {
        self.state.lock().await.calls.clone()
    }

    /// Return a copy of the calls recorded for `key`.
    pub async fn calls_for(&self, key: &SeriesKey) -> Vec<FetchCall> {
        let guard = self.state.lock().await;
        guard
            .calls
            .iter()
            .filter(|c| &c.key == key)
            .cloned()
            .collect()
    }

    /// Clear all configured behaviors and the call log.
    pub async fn clear_all_behaviors(&self) {
        let mut guard = self.state.lock().await;
        guard.scripts.clear();
        guard.defaults.clear();
        guard.calls.clear();
    }
}

/// A source that defers all behavior to an external controller.
pub struct DynamicMockSource {
    name: &'static str,
    state: Arc<Mutex<InternalState>>,
}

impl DynamicMockSource {
    /// Create a new dynamic mock source and its controller.
    #[must_use]
    pub fn new_with_controller(name: &'static str) -> (Arc<dyn BarSource>, DynamicMockController) {
        let state = Arc::new(Mutex::new(InternalState::default()));
        let controller = DynamicMockController {
            state: Arc::clone(&state),
        };
        let me = Arc::new(Self { name, state });
        (me as Arc<dyn BarSource>, controller)
    }
}

#[async_trait]
impl BarSource for DynamicMockSource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch_bars(&self, key: &SeriesKey, count: usize) -> Result<Vec<Candle>, FeedError> {
        // Log and pick the behavior without holding the lock across the hang
        let behavior = {
            let mut guard = self.state.lock().await;
            guard.calls.push(FetchCall {
                key: key.clone(),
                count,
                at: Instant::now(),
            });
            let scripted = guard.scripts.get_mut(key).and_then(VecDeque::pop_front);
            scripted.or_else(|| guard.defaults.get(key).cloned())
        };

        match behavior {
            Some(MockBehavior::Return(rows)) => {
                let skip = rows.len().saturating_sub(count);
                Ok(rows.into_iter().skip(skip).collect())
            }
            Some(MockBehavior::Fail(e)) => Err(e),
            Some(MockBehavior::Hang) => std::future::pending().await,
            None => Err(FeedError::unsupported(format!("fetch_bars {key}"))),
        }
    }
}
