//! Navigation Result Broker
//!
//! Turns the engine's started / response / finished / failed callbacks into
//! one awaitable outcome per navigation.
//!
//! Rules:
//! 1. At most one navigation is active. Starting another resolves the old
//!    one `Overridden` before the new one becomes active.
//! 2. Every handle resolves exactly once. A second terminal result is a
//!    fault, unless the first one was `Canceled` or `Overridden` (the engine
//!    is allowed to report on navigations we already gave up on).
//! 3. Dropping the last unresolved future returned by
//!    [`NavigationBroker::begin`] cancels the navigation right there in
//!    `Drop`; no engine callback is needed. Callers that joined the same
//!    navigation share it, so one of them giving up cancels nothing.
//!
//! All bookkeeping sits behind one mutex. Waiters are woken and events are
//! broadcast only after it is released, so a woken task can call straight
//! back into the broker.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::{broadcast, oneshot};

use crate::error::NavigationError;
use crate::events::{
    EngineError, EventBus, NavigationEvent, NavigationFailure, NavigationHandle,
    NavigationOutcome, ResponseMetadata,
};

/// Terminal input for [`NavigationBroker::resolve`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationResult {
    Ok,
    Error(EngineError),
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Resolved handles remembered for duplicate detection (FIFO)
    pub resolution_history: usize,
    /// Broadcast buffer for [`NavigationBroker::subscribe`]
    pub event_capacity: usize,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            resolution_history: 256,
            event_capacity: 64,
        }
    }
}

type Waiter = oneshot::Sender<NavigationOutcome>;

struct NavigationRecord {
    /// Distinguishes re-activations of a handle evicted from history
    id: u64,
    waiters: Vec<Waiter>,
    /// Live futures from `begin`
    owners: usize,
    response: Option<ResponseMetadata>,
}

#[derive(Default)]
struct BrokerState {
    next_record: u64,
    active: Option<NavigationHandle>,
    records: HashMap<NavigationHandle, NavigationRecord>,
    resolutions: HashMap<NavigationHandle, NavigationOutcome>,
    history: VecDeque<NavigationHandle>,
}

struct Inner {
    state: Mutex<BrokerState>,
    events: EventBus<NavigationEvent>,
    config: NavigationConfig,
}

/// A resolution taken under the lock, delivered after it is released
struct Settled {
    handle: NavigationHandle,
    outcome: NavigationOutcome,
    waiters: Vec<Waiter>,
}

impl Settled {
    fn deliver(self, events: &EventBus<NavigationEvent>) {
        for waiter in self.waiters {
            let _ = waiter.send(self.outcome.clone());
        }
        events.publish(NavigationEvent {
            handle: self.handle,
            outcome: self.outcome,
        });
    }
}

/// Single-flight navigation tracker. Cheap to clone.
#[derive(Clone)]
pub struct NavigationBroker {
    inner: Arc<Inner>,
}

impl NavigationBroker {
    pub fn new() -> Self {
        Self::with_config(NavigationConfig::default())
    }

    pub fn with_config(config: NavigationConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BrokerState::default()),
                events: EventBus::with_capacity(config.event_capacity),
                config,
            }),
        }
    }

    /// Start (or join) a navigation and get a future for its outcome.
    ///
    /// The future owns the navigation together with any other `begin` caller
    /// for the same handle: once every owner has dropped before completion,
    /// the handle resolves `Canceled`.
    pub fn begin(&self, handle: NavigationHandle) -> NavigationFuture {
        let (tx, rx) = oneshot::channel();

        let (settled, owner) = {
            let mut state = self.inner.state.lock();

            let resolved = state.resolutions.get(&handle).cloned();
            if let Some(outcome) = resolved {
                drop(state);
                tracing::debug!(%handle, ?outcome, "Navigation already resolved");
                let _ = tx.send(outcome);
                return NavigationFuture::new(handle, rx, None);
            }

            let settled = self.activate(&mut state, &handle);
            let owner = state.records.get_mut(&handle).map(|record| {
                record.waiters.push(tx);
                record.owners += 1;
                Owner {
                    broker: Arc::downgrade(&self.inner),
                    record: record.id,
                }
            });
            (settled, owner)
        };

        if let Some(settled) = settled {
            settled.deliver(&self.inner.events);
        }

        NavigationFuture::new(handle, rx, owner)
    }

    /// Engine input: a navigation started. No-op for handles that are
    /// already active or already resolved.
    pub fn started(&self, handle: &NavigationHandle) {
        let settled = {
            let mut state = self.inner.state.lock();
            if state.resolutions.contains_key(handle) {
                tracing::debug!(%handle, "Ignoring start of resolved navigation");
                return;
            }
            self.activate(&mut state, handle)
        };

        if let Some(settled) = settled {
            settled.deliver(&self.inner.events);
        }
    }

    /// Engine input: main-document response headers. Only the active
    /// navigation keeps metadata; the latest report wins.
    pub fn record_response_metadata(&self, handle: &NavigationHandle, metadata: ResponseMetadata) {
        let mut state = self.inner.state.lock();
        if state.active.as_ref() != Some(handle) {
            tracing::debug!(%handle, url = %metadata.url, "Ignoring response for inactive navigation");
            return;
        }
        if let Some(record) = state.records.get_mut(handle) {
            record.response = Some(metadata);
        }
    }

    /// Resolve a handle. Returns a fault if the handle already resolved with
    /// anything but `Canceled`/`Overridden`, or was never tracked.
    pub fn resolve(
        &self,
        handle: &NavigationHandle,
        result: NavigationResult,
    ) -> Result<(), NavigationError> {
        let settled = {
            let mut state = self.inner.state.lock();

            if let Some(existing) = state.resolutions.get(handle) {
                if existing.absorbs_late_callbacks() {
                    tracing::debug!(%handle, ?result, "Ignoring late resolution");
                    return Ok(());
                }
                tracing::error!(%handle, ?existing, ?result, "Duplicate navigation resolution");
                return Err(NavigationError::DuplicateResolution {
                    handle: handle.clone(),
                    existing: Box::new(existing.clone()),
                });
            }

            let Some(record) = state.records.get(handle) else {
                tracing::error!(%handle, ?result, "Resolution for untracked navigation");
                return Err(NavigationError::UnknownHandle(handle.clone()));
            };

            let outcome = match result {
                NavigationResult::Ok => match &record.response {
                    Some(metadata) => NavigationOutcome::Success(metadata.clone()),
                    None => NavigationOutcome::Failure(NavigationFailure::MissingResponseMetadata),
                },
                NavigationResult::Error(error) => {
                    NavigationOutcome::Failure(NavigationFailure::Engine(error))
                }
                NavigationResult::Canceled => NavigationOutcome::Canceled,
            };

            self.settle(&mut state, handle, outcome)
        };

        if let Some(settled) = settled {
            settled.deliver(&self.inner.events);
        }
        Ok(())
    }

    /// Engine input: load finished
    pub fn finished(&self, handle: &NavigationHandle) {
        let _ = self.resolve(handle, NavigationResult::Ok);
    }

    /// Engine input: load failed
    pub fn failed(&self, handle: &NavigationHandle, error: EngineError) {
        let _ = self.resolve(handle, NavigationResult::Error(error));
    }

    pub fn cancel(&self, handle: &NavigationHandle) -> Result<(), NavigationError> {
        self.resolve(handle, NavigationResult::Canceled)
    }

    /// Observe the active navigation without owning it. Dropping the
    /// returned future does not cancel anything.
    pub fn await_latest(&self) -> Option<NavigationFuture> {
        let mut state = self.inner.state.lock();
        let handle = state.active.clone()?;
        let record = state.records.get_mut(&handle)?;

        let (tx, rx) = oneshot::channel();
        record.waiters.push(tx);
        Some(NavigationFuture::new(handle, rx, None))
    }

    pub fn active(&self) -> Option<NavigationHandle> {
        self.inner.state.lock().active.clone()
    }

    /// Every resolution, in the order they happened
    pub fn subscribe(&self) -> broadcast::Receiver<NavigationEvent> {
        self.inner.events.subscribe()
    }

    /// Override whatever is active and make `handle` the active record.
    /// No-op when `handle` is already active.
    fn activate(&self, state: &mut BrokerState, handle: &NavigationHandle) -> Option<Settled> {
        if state.active.as_ref() == Some(handle) {
            return None;
        }

        let overridden = state.active.clone().and_then(|previous| {
            tracing::debug!(%previous, by = %handle, "Overriding navigation");
            self.settle(
                state,
                &previous,
                NavigationOutcome::Overridden { by: handle.clone() },
            )
        });

        state.next_record += 1;
        let id = state.next_record;
        state.records.insert(
            handle.clone(),
            NavigationRecord {
                id,
                waiters: Vec::new(),
                owners: 0,
                response: None,
            },
        );
        state.active = Some(handle.clone());
        tracing::debug!(%handle, "Navigation active");

        overridden
    }

    fn settle(
        &self,
        state: &mut BrokerState,
        handle: &NavigationHandle,
        outcome: NavigationOutcome,
    ) -> Option<Settled> {
        let record = state.records.remove(handle)?;
        if state.active.as_ref() == Some(handle) {
            state.active = None;
        }

        if state
            .resolutions
            .insert(handle.clone(), outcome.clone())
            .is_none()
        {
            state.history.push_back(handle.clone());
        }
        while state.history.len() > self.inner.config.resolution_history.max(1) {
            if let Some(evicted) = state.history.pop_front() {
                state.resolutions.remove(&evicted);
            }
        }

        tracing::debug!(%handle, ?outcome, waiters = record.waiters.len(), "Navigation resolved");
        Some(Settled {
            handle: handle.clone(),
            outcome,
            waiters: record.waiters,
        })
    }
}

impl Default for NavigationBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// Release one owner of `record`; the last one out cancels. Silent when
    /// the record already resolved: the owner just never looked at the
    /// result.
    fn abandon(self: Arc<Self>, handle: &NavigationHandle, record: u64) {
        let broker = NavigationBroker { inner: self };
        let settled = {
            let mut state = broker.inner.state.lock();
            let Some(current) = state.records.get_mut(handle).filter(|r| r.id == record) else {
                return;
            };
            current.owners = current.owners.saturating_sub(1);
            if current.owners > 0 {
                tracing::debug!(%handle, owners = current.owners, "Navigation future dropped, still shared");
                return;
            }
            tracing::debug!(%handle, "Navigation future dropped, canceling");
            broker.settle(&mut state, handle, NavigationOutcome::Canceled)
        };

        if let Some(settled) = settled {
            settled.deliver(&broker.inner.events);
        }
    }
}

/// Back-reference held by futures from `begin`
struct Owner {
    broker: Weak<Inner>,
    record: u64,
}

/// Outcome of one navigation.
///
/// Completes `Canceled` if the broker goes away first.
#[must_use = "dropping an owning navigation future cancels the navigation"]
pub struct NavigationFuture {
    handle: NavigationHandle,
    receiver: oneshot::Receiver<NavigationOutcome>,
    owner: Option<Owner>,
    done: bool,
}

impl NavigationFuture {
    fn new(
        handle: NavigationHandle,
        receiver: oneshot::Receiver<NavigationOutcome>,
        owner: Option<Owner>,
    ) -> Self {
        Self {
            handle,
            receiver,
            owner,
            done: false,
        }
    }

    pub fn handle(&self) -> &NavigationHandle {
        &self.handle
    }
}

impl Future for NavigationFuture {
    type Output = NavigationOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let outcome = match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => outcome,
            Poll::Ready(Err(_)) => NavigationOutcome::Canceled,
            Poll::Pending => return Poll::Pending,
        };
        this.done = true;
        Poll::Ready(outcome)
    }
}

impl Drop for NavigationFuture {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let Some(owner) = self.owner.take() else {
            return;
        };
        if let Some(inner) = owner.broker.upgrade() {
            inner.abandon(&self.handle, owner.record);
        }
    }
}

impl std::fmt::Debug for NavigationFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavigationFuture")
            .field("handle", &self.handle)
            .field("owning", &self.owner.is_some())
            .field("done", &self.done)
            .finish()
    }
}
