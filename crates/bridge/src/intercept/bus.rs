//! Interception bus
//!
//! ```text
//! payload ─▶ NetworkMessage ─▶ registrations (registration order)
//!                                 ├─ stream  (demand > 0 ? deliver : drop)
//!                                 └─ waiter  (first match, then removed)
//! ```
//!
//! Registrations live in one mutex-guarded list. Predicates run while it is
//! held, so a predicate must not call back into the bus.

use futures_util::Stream;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::message::NetworkMessage;
use super::pattern::{NetworkMessagePattern, PatternId};
use crate::error::InterceptError;

type Delivery = Result<NetworkMessage, InterceptError>;

/// How many more messages a stream subscriber will take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demand {
    Max(usize),
    Unbounded,
}

impl Demand {
    pub const NONE: Demand = Demand::Max(0);

    pub fn is_exhausted(self) -> bool {
        self == Demand::NONE
    }

    fn consume_one(&mut self) {
        if let Demand::Max(n) = self {
            *n = n.saturating_sub(1);
        }
    }
}

impl std::ops::Add for Demand {
    type Output = Demand;

    fn add(self, other: Demand) -> Demand {
        match (self, other) {
            (Demand::Max(a), Demand::Max(b)) => Demand::Max(a.saturating_add(b)),
            _ => Demand::Unbounded,
        }
    }
}

enum Sink {
    Stream {
        tx: mpsc::UnboundedSender<Delivery>,
        demand: Demand,
    },
    Once {
        tx: Option<oneshot::Sender<Delivery>>,
    },
}

struct Registration {
    id: Uuid,
    pattern: NetworkMessagePattern,
    sink: Sink,
}

/// What one message did to one registration
struct Offer {
    keep: bool,
    delivered: bool,
}

impl Offer {
    const SKIP: Offer = Offer {
        keep: true,
        delivered: false,
    };
    const DROP: Offer = Offer {
        keep: false,
        delivered: false,
    };
}

impl Registration {
    fn offer(&mut self, message: &NetworkMessage) -> Offer {
        match &mut self.sink {
            Sink::Stream { tx, demand } => {
                if tx.is_closed() {
                    return Offer::DROP;
                }
                if demand.is_exhausted() {
                    tracing::trace!(registration = %self.id, url = %message.url, "No demand, dropping message");
                    return Offer::SKIP;
                }
                match self.pattern.matches(message) {
                    Ok(true) => {
                        demand.consume_one();
                        let delivered = tx.send(Ok(message.clone())).is_ok();
                        Offer {
                            keep: delivered,
                            delivered,
                        }
                    }
                    Ok(false) => Offer::SKIP,
                    Err(error) => {
                        tracing::warn!(registration = %self.id, pattern = %self.pattern.id(), %error, "Predicate failed, ending stream");
                        let _ = tx.send(Err(InterceptError::Predicate(error)));
                        Offer::DROP
                    }
                }
            }
            Sink::Once { tx } => {
                if tx.as_ref().map_or(true, |tx| tx.is_closed()) {
                    return Offer::DROP;
                }
                let delivery = match self.pattern.matches(message) {
                    Ok(true) => Ok(message.clone()),
                    Ok(false) => return Offer::SKIP,
                    Err(error) => {
                        tracing::warn!(registration = %self.id, pattern = %self.pattern.id(), %error, "Predicate failed, ending waiter");
                        Err(InterceptError::Predicate(error))
                    }
                };
                let matched = delivery.is_ok();
                let delivered = match tx.take() {
                    Some(tx) => tx.send(delivery).is_ok() && matched,
                    None => false,
                };
                Offer {
                    keep: false,
                    delivered,
                }
            }
        }
    }

    fn close(self) {
        if let Sink::Once { tx: Some(tx) } = self.sink {
            let _ = tx.send(Err(InterceptError::Closed));
        }
    }
}

#[derive(Default)]
struct Registry {
    registrations: Vec<Registration>,
    closed: bool,
}

impl Registry {
    fn remove(&mut self, id: Uuid) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|registration| registration.id != id);
        before != self.registrations.len()
    }
}

/// Multicast of intercepted network traffic. Cheap to clone.
#[derive(Clone, Default)]
pub struct InterceptionBus {
    registry: Arc<Mutex<Registry>>,
}

impl InterceptionBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a raw page payload and deliver it. Payloads that aren't a
    /// network message are dropped. Returns the number of deliveries.
    pub fn ingest(&self, payload: &Value) -> usize {
        match NetworkMessage::from_payload(payload) {
            Ok(message) => self.ingest_message(message),
            Err(error) => {
                tracing::trace!(%error, "Dropping malformed network payload");
                0
            }
        }
    }

    pub fn ingest_message(&self, message: NetworkMessage) -> usize {
        let mut registry = self.registry.lock();
        if registry.closed {
            return 0;
        }

        let mut delivered = 0;
        registry.registrations.retain_mut(|registration| {
            let offer = registration.offer(&message);
            if offer.delivered {
                delivered += 1;
            }
            offer.keep
        });

        tracing::trace!(kind = %message.kind, url = %message.url, delivered, "Network message ingested");
        delivered
    }

    /// Stream every match while demand lasts. Matches arriving with no
    /// demand are dropped, not queued; see [`Subscription::request`].
    pub fn subscribe(&self, pattern: NetworkMessagePattern, demand: Demand) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::now_v7();
        let pattern_id = pattern.id();

        let mut registry = self.registry.lock();
        if registry.closed {
            tracing::debug!(pattern = %pattern_id, "Subscribing to closed bus");
        } else {
            registry.registrations.push(Registration {
                id,
                pattern,
                sink: Sink::Stream { tx, demand },
            });
        }

        Subscription {
            id,
            pattern: pattern_id,
            receiver: rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Resolve with the first matching message
    pub fn wait_for(&self, pattern: NetworkMessagePattern) -> NextMessage {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::now_v7();

        let mut registry = self.registry.lock();
        if registry.closed {
            let _ = tx.send(Err(InterceptError::Closed));
        } else {
            registry.registrations.push(Registration {
                id,
                pattern,
                sink: Sink::Once { tx: Some(tx) },
            });
        }

        NextMessage {
            id,
            receiver: rx,
            registry: Arc::downgrade(&self.registry),
            done: false,
        }
    }

    /// Tear down: streams end, pending waiters fail with `Closed`.
    /// Later registrations are born closed.
    pub fn close(&self) {
        let registrations = {
            let mut registry = self.registry.lock();
            registry.closed = true;
            std::mem::take(&mut registry.registrations)
        };

        tracing::debug!(registrations = registrations.len(), "Interception bus closed");
        for registration in registrations {
            registration.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.registry.lock().closed
    }

    pub fn registration_count(&self) -> usize {
        self.registry.lock().registrations.len()
    }
}

impl std::fmt::Debug for InterceptionBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("InterceptionBus")
            .field("registrations", &registry.registrations.len())
            .field("closed", &registry.closed)
            .finish()
    }
}

fn unregister(registry: &Weak<Mutex<Registry>>, id: Uuid) {
    if let Some(registry) = registry.upgrade() {
        if registry.lock().remove(id) {
            tracing::trace!(registration = %id, "Registration removed");
        }
    }
}

/// Demand-metered stream of matching messages.
///
/// Yields `Err` once if the pattern's predicate fails, then ends.
pub struct Subscription {
    id: Uuid,
    pattern: PatternId,
    receiver: mpsc::UnboundedReceiver<Delivery>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pattern_id(&self) -> PatternId {
        self.pattern
    }

    /// Add to the outstanding demand
    pub fn request(&self, demand: Demand) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock();
        let sink = registry
            .registrations
            .iter_mut()
            .find(|registration| registration.id == self.id)
            .map(|registration| &mut registration.sink);

        if let Some(Sink::Stream { demand: current, .. }) = sink {
            *current = *current + demand;
        }
    }

    /// Outstanding demand, `None` once the registration is gone
    pub fn demand(&self) -> Option<Demand> {
        let registry = self.registry.upgrade()?;
        let registry = registry.lock();
        registry
            .registrations
            .iter()
            .find(|registration| registration.id == self.id)
            .and_then(|registration| match &registration.sink {
                Sink::Stream { demand, .. } => Some(*demand),
                Sink::Once { .. } => None,
            })
    }

    /// Stop receiving. Messages already delivered can still be read.
    pub fn cancel(&mut self) {
        unregister(&self.registry, self.id);
        self.receiver.close();
    }
}

impl Stream for Subscription {
    type Item = Delivery;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        unregister(&self.registry, self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .finish()
    }
}

/// First message matching a pattern
#[must_use = "futures do nothing unless polled"]
pub struct NextMessage {
    id: Uuid,
    receiver: oneshot::Receiver<Delivery>,
    registry: Weak<Mutex<Registry>>,
    done: bool,
}

impl NextMessage {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Future for NextMessage {
    type Output = Delivery;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let delivery = match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(delivery)) => delivery,
            Poll::Ready(Err(_)) => Err(InterceptError::Closed),
            Poll::Pending => return Poll::Pending,
        };
        this.done = true;
        Poll::Ready(delivery)
    }
}

impl Drop for NextMessage {
    fn drop(&mut self) {
        if !self.done {
            unregister(&self.registry, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercept::MessageKind;
    use futures_util::{FutureExt, StreamExt};
    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready, task};

    fn fetch(url: &str) -> Value {
        json!({ "type": "fetch", "method": "GET", "url": url })
    }

    fn drain(subscription: &mut Subscription) -> Vec<NetworkMessage> {
        let mut messages = Vec::new();
        while let Some(Some(delivery)) = subscription.next().now_or_never() {
            messages.push(delivery.unwrap());
        }
        messages
    }

    #[test]
    fn waiter_resolves_once_on_matching_kind() {
        let bus = InterceptionBus::new();
        let mut waiter = task::spawn(bus.wait_for(NetworkMessagePattern::kind(
            MessageKind::FetchError,
        )));
        assert_pending!(waiter.poll());

        assert_eq!(bus.ingest(&fetch("https://api.test/a")), 0);
        assert_pending!(waiter.poll());

        let failure = json!({ "type": "fetchError", "url": "https://api.test/a", "error": "TypeError: Failed to fetch" });
        assert_eq!(bus.ingest(&failure), 1);

        let message = assert_ready!(waiter.poll()).unwrap();
        assert_eq!(message.kind, MessageKind::FetchError);
        assert_eq!(message.error.as_deref(), Some("TypeError: Failed to fetch"));

        assert_eq!(bus.registration_count(), 0);
        assert_eq!(bus.ingest(&failure), 0);
    }

    #[test]
    fn demand_limits_deliveries_until_replenished() {
        let bus = InterceptionBus::new();
        let mut subscription =
            bus.subscribe(NetworkMessagePattern::kind(MessageKind::Fetch), Demand::Max(2));

        let delivered: usize = (0..5)
            .map(|i| bus.ingest(&fetch(&format!("https://api.test/{i}"))))
            .sum();
        assert_eq!(delivered, 2);

        let urls: Vec<_> = drain(&mut subscription).into_iter().map(|m| m.url).collect();
        assert_eq!(urls, vec!["https://api.test/0", "https://api.test/1"]);
        assert_eq!(subscription.demand(), Some(Demand::NONE));

        subscription.request(Demand::Max(1));
        assert_eq!(bus.ingest(&fetch("https://api.test/5")), 1);
        assert_eq!(bus.ingest(&fetch("https://api.test/6")), 0);

        let urls: Vec<_> = drain(&mut subscription).into_iter().map(|m| m.url).collect();
        assert_eq!(urls, vec!["https://api.test/5"]);
    }

    #[test]
    fn unbounded_demand_absorbs_additions() {
        assert_eq!(Demand::Max(1) + Demand::Unbounded, Demand::Unbounded);
        assert_eq!(Demand::Max(2) + Demand::Max(3), Demand::Max(5));
        assert_eq!(Demand::Max(usize::MAX) + Demand::Max(1), Demand::Max(usize::MAX));
    }

    #[test]
    fn every_matching_registration_receives_in_order() {
        let bus = InterceptionBus::new();
        let mut all = bus.subscribe(NetworkMessagePattern::any(), Demand::Unbounded);
        let mut api = bus.subscribe(NetworkMessagePattern::url_contains("/api/"), Demand::Unbounded);

        bus.ingest(&fetch("https://site.test/api/1"));
        bus.ingest(&fetch("https://site.test/static/app.js"));
        bus.ingest(&json!({ "type": "xhrResponse", "url": "https://site.test/api/2", "status": 201 }));

        assert_eq!(drain(&mut all).len(), 3);
        let api: Vec<_> = drain(&mut api).into_iter().map(|m| m.kind).collect();
        assert_eq!(api, vec![MessageKind::Fetch, MessageKind::XhrResponse]);
    }

    #[test]
    fn predicate_error_is_scoped_to_its_registration() {
        let bus = InterceptionBus::new();
        let mut broken = task::spawn(
            bus.wait_for(NetworkMessagePattern::new(|_| Err("cannot inspect".into()))),
        );
        let mut healthy = task::spawn(bus.wait_for(NetworkMessagePattern::any()));

        assert_eq!(bus.ingest(&fetch("https://api.test/")), 1);

        assert!(matches!(
            assert_ready!(broken.poll()),
            Err(InterceptError::Predicate(_))
        ));
        assert!(assert_ready!(healthy.poll()).is_ok());
        assert_eq!(bus.registration_count(), 0);
    }

    #[tokio::test]
    async fn predicate_error_ends_stream() {
        let bus = InterceptionBus::new();
        let mut subscription = bus.subscribe(
            NetworkMessagePattern::new(|message| {
                if message.url.ends_with("/bad") {
                    Err("unexpected url".into())
                } else {
                    Ok(true)
                }
            }),
            Demand::Unbounded,
        );

        bus.ingest(&fetch("https://api.test/good"));
        bus.ingest(&fetch("https://api.test/bad"));
        bus.ingest(&fetch("https://api.test/good"));

        assert!(subscription.next().await.unwrap().is_ok());
        assert!(matches!(
            subscription.next().await,
            Some(Err(InterceptError::Predicate(_)))
        ));
        assert!(subscription.next().await.is_none());
        assert_eq!(bus.registration_count(), 0);
    }

    #[test]
    fn malformed_payloads_are_dropped() {
        let bus = InterceptionBus::new();
        let _subscription = bus.subscribe(NetworkMessagePattern::any(), Demand::Unbounded);

        assert_eq!(bus.ingest(&json!({ "type": "beacon", "url": "https://x.test" })), 0);
        assert_eq!(bus.ingest(&json!("not an object")), 0);
        assert_eq!(bus.ingest(&json!({ "type": "fetch", "url": 7 })), 0);
        assert_eq!(bus.registration_count(), 1);
    }

    #[test]
    fn cancel_and_drop_remove_registrations() {
        let bus = InterceptionBus::new();

        let mut subscription = bus.subscribe(NetworkMessagePattern::any(), Demand::Unbounded);
        let waiter = bus.wait_for(NetworkMessagePattern::any());
        assert_eq!(bus.registration_count(), 2);

        subscription.cancel();
        assert_eq!(bus.registration_count(), 1);
        assert_eq!(subscription.demand(), None);

        drop(waiter);
        assert_eq!(bus.registration_count(), 0);
        assert_eq!(bus.ingest(&fetch("https://api.test/")), 0);
    }

    #[tokio::test]
    async fn close_fails_waiters_and_ends_streams() {
        let bus = InterceptionBus::new();
        let waiter = bus.wait_for(NetworkMessagePattern::any());
        let mut subscription = bus.subscribe(NetworkMessagePattern::any(), Demand::Unbounded);

        bus.close();

        assert!(matches!(waiter.await, Err(InterceptError::Closed)));
        assert!(subscription.next().await.is_none());
        assert!(matches!(
            bus.wait_for(NetworkMessagePattern::any()).await,
            Err(InterceptError::Closed)
        ));
        assert_eq!(bus.ingest(&fetch("https://api.test/")), 0);
        assert!(bus.is_closed());
    }

    #[tokio::test]
    async fn waiter_wakes_across_tasks() {
        let bus = InterceptionBus::new();
        let waiter = bus.wait_for(NetworkMessagePattern::kind(MessageKind::XhrAbort));

        let handle = tokio::spawn(waiter);
        tokio::task::yield_now().await;
        bus.ingest(&json!({ "type": "xhrAbort", "url": "https://api.test/slow" }));

        let message = handle.await.unwrap().unwrap();
        assert_eq!(message.url, "https://api.test/slow");
    }
}
