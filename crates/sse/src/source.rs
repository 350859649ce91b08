//! Event Source - one logical SSE subscription across reconnects
//!
//! Design: a single driver task owns the transport and the decoder. All
//! session bookkeeping (ready state, last event id, retry delay) sits behind
//! one mutex and is updated *before* listeners see the event, so a reconnect
//! right after an event always carries the freshest values.
//!
//! Listeners never run on the driver task. The driver queues open, event and
//! completion notifications on an unbounded channel and a delivery task calls
//! the handlers in that order, so a slow listener delays other listeners but
//! never transport reads.
//!
//! Reconnect policy on transport completion:
//! - 200 → stream ended on purpose, stay closed
//! - 201..=299 → reconnect after `retry` with `Last-Event-Id`
//! - anything else, or no status at all → closed, failure reported

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::decoder::{EventStreamDecoder, LineBreak};
use crate::error::{Result, SseError, TransportError};
use crate::event::ServerSentEvent;
use crate::transport::{HttpTransport, StreamRequest, Transport, TransportResponse};

pub const DEFAULT_RETRY_MS: u64 = 3000;

const ACCEPT: &str = "Accept";
const CACHE_CONTROL: &str = "Cache-Control";
const LAST_EVENT_ID: &str = "Last-Event-Id";

/// Event source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSourceConfig {
    pub url: String,
    /// Extra request headers, sent on every attempt
    pub headers: BTreeMap<String, String>,
    pub default_retry_ms: u64,
    /// Follow the reconnect policy automatically
    pub auto_reconnect: bool,
    pub line_breaks: Vec<LineBreak>,
}

impl Default for EventSourceConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/events".to_string(),
            headers: BTreeMap::new(),
            default_retry_ms: DEFAULT_RETRY_MS,
            auto_reconnect: true,
            line_breaks: LineBreak::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closed,
}

/// How a transport attempt ended
#[derive(Debug, Clone)]
pub struct Completion {
    /// `None` when the transport failed before any response
    pub status: Option<u16>,
    pub should_reconnect: bool,
    pub error: Option<Arc<TransportError>>,
}

pub type EventHandler = Arc<dyn Fn(&ServerSentEvent) + Send + Sync>;
pub type OpenHandler = Arc<dyn Fn() + Send + Sync>;
pub type CompleteHandler = Arc<dyn Fn(&Completion) + Send + Sync>;

/// Notification queued for the delivery task
enum Delivery {
    Open,
    Event(ServerSentEvent),
    Complete(Completion),
}

/// Reconnect verdict for a completed response
pub fn should_reconnect(status: u16) -> bool {
    status > 200 && status < 300
}

struct Connection {
    ready_state: ReadyState,
    last_event_id: Option<String>,
    retry: Duration,
    /// Bumped on every connect/disconnect; stale drivers check it
    generation: u64,
}

struct Shared {
    connection: Mutex<Connection>,
    on_open: RwLock<Option<OpenHandler>>,
    on_message: RwLock<Option<EventHandler>>,
    on_complete: RwLock<Option<CompleteHandler>>,
    listeners: DashMap<String, EventHandler>,
}

impl Shared {
    fn transition(&self, generation: u64, state: ReadyState) -> bool {
        let mut connection = self.connection.lock();
        if connection.generation != generation {
            return false;
        }
        connection.ready_state = state;
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.connection.lock().generation == generation
    }

    fn retry(&self) -> Duration {
        self.connection.lock().retry
    }

    fn last_event_id(&self) -> Option<String> {
        self.connection.lock().last_event_id.clone()
    }

    fn opened(&self) {
        let handler = self.on_open.read().clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    fn completed(&self, completion: &Completion) {
        let handler = self.on_complete.read().clone();
        if let Some(handler) = handler {
            handler(completion);
        }
    }

    /// Apply the event's session updates. Returns false when this driver is
    /// stale or the session isn't open.
    fn apply(&self, generation: u64, event: &ServerSentEvent) -> bool {
        let mut connection = self.connection.lock();
        if connection.generation != generation || connection.ready_state != ReadyState::Open {
            return false;
        }
        if let Some(id) = &event.id {
            connection.last_event_id = Some(id.clone());
        }
        if let Some(retry) = event.retry {
            connection.retry = Duration::from_millis(retry);
        }
        true
    }

    fn dispatch(&self, event: &ServerSentEvent) {
        if event.is_message() {
            let handler = self.on_message.read().clone();
            if let Some(handler) = handler {
                handler(event);
            }
        }

        if let Some(name) = event.event.as_deref() {
            let handler = self.listeners.get(name).map(|entry| entry.value().clone());
            if let Some(handler) = handler {
                handler(event);
            }
        }
    }

    /// Drains one driver's notifications. Ends when the driver is gone;
    /// anything queued for a superseded connection is dropped.
    async fn deliver(self: Arc<Self>, generation: u64, mut queue: mpsc::UnboundedReceiver<Delivery>) {
        while let Some(delivery) = queue.recv().await {
            if !self.is_current(generation) {
                tracing::trace!(generation, "Dropping notification for stale connection");
                continue;
            }
            match delivery {
                Delivery::Open => self.opened(),
                Delivery::Event(event) => self.dispatch(&event),
                Delivery::Complete(completion) => self.completed(&completion),
            }
        }
    }
}

/// SSE session with named/default listeners and reconnect handling
pub struct EventSource {
    url: Url,
    config: EventSourceConfig,
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl EventSource {
    /// Event source over HTTP
    pub fn new(config: EventSourceConfig) -> Result<Self> {
        Self::with_transport(config, Arc::new(HttpTransport::new()))
    }

    pub fn with_transport(config: EventSourceConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let url = Url::parse(&config.url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SseError::UnsupportedScheme(url.scheme().to_string()));
        }

        let shared = Arc::new(Shared {
            connection: Mutex::new(Connection {
                ready_state: ReadyState::Closed,
                last_event_id: None,
                retry: Duration::from_millis(config.default_retry_ms),
                generation: 0,
            }),
            on_open: RwLock::new(None),
            on_message: RwLock::new(None),
            on_complete: RwLock::new(None),
            listeners: DashMap::new(),
        });

        Ok(Self {
            url,
            config,
            transport,
            shared,
            driver: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn ready_state(&self) -> ReadyState {
        self.shared.connection.lock().ready_state
    }

    pub fn last_event_id(&self) -> Option<String> {
        self.shared.last_event_id()
    }

    /// Current reconnect delay
    pub fn retry(&self) -> Duration {
        self.shared.retry()
    }

    pub fn on_open(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.shared.on_open.write() = Some(Arc::new(handler));
    }

    /// General listener: events with no name or named `message`.
    ///
    /// Handlers run in stream order on a delivery task separate from the
    /// connection; a blocking handler holds back later notifications only.
    pub fn on_message(&self, handler: impl Fn(&ServerSentEvent) + Send + Sync + 'static) {
        *self.shared.on_message.write() = Some(Arc::new(handler));
    }

    pub fn on_complete(&self, handler: impl Fn(&Completion) + Send + Sync + 'static) {
        *self.shared.on_complete.write() = Some(Arc::new(handler));
    }

    /// Listener for one exact event name; replaces any previous one
    pub fn add_event_listener(
        &self,
        event: impl Into<String>,
        handler: impl Fn(&ServerSentEvent) + Send + Sync + 'static,
    ) {
        self.shared.listeners.insert(event.into(), Arc::new(handler));
    }

    pub fn remove_event_listener(&self, event: &str) -> bool {
        self.shared.listeners.remove(event).is_some()
    }

    /// Names with a registered listener, sorted
    pub fn events(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .shared
            .listeners
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Start (or restart) the driver task, resuming from the last seen id.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let generation = {
            let mut connection = self.shared.connection.lock();
            connection.generation += 1;
            connection.ready_state = ReadyState::Connecting;
            connection.generation
        };

        tracing::info!(url = %self.url, generation, "Connecting event source");

        let (deliveries, queue) = mpsc::unbounded_channel();
        tokio::spawn(self.shared.clone().deliver(generation, queue));

        let driver = Driver {
            url: self.url.clone(),
            headers: self.config.headers.clone(),
            line_breaks: self.config.line_breaks.clone(),
            auto_reconnect: self.config.auto_reconnect,
            transport: self.transport.clone(),
            shared: self.shared.clone(),
            deliveries,
            generation,
        };

        let handle = tokio::spawn(driver.run());
        if let Some(previous) = self.driver.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn disconnect(&self) {
        {
            let mut connection = self.shared.connection.lock();
            connection.generation += 1;
            connection.ready_state = ReadyState::Closed;
        }

        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
        tracing::info!(url = %self.url, "Event source disconnected");
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            driver.abort();
        }
    }
}

struct Driver {
    url: Url,
    headers: BTreeMap<String, String>,
    line_breaks: Vec<LineBreak>,
    auto_reconnect: bool,
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    deliveries: mpsc::UnboundedSender<Delivery>,
    generation: u64,
}

impl Driver {
    fn notify(&self, delivery: Delivery) {
        // receiver only goes away with the runtime
        let _ = self.deliveries.send(delivery);
    }

    async fn run(self) {
        loop {
            if !self.shared.transition(self.generation, ReadyState::Connecting) {
                return;
            }

            let completion = match self.transport.open(self.request()).await {
                Ok(response) => self.stream(response).await,
                Err(error) => {
                    tracing::warn!(url = %self.url, %error, "Event stream transport failed");
                    Completion {
                        status: None,
                        should_reconnect: false,
                        error: Some(Arc::new(error)),
                    }
                }
            };

            if !self.shared.is_current(self.generation) {
                return;
            }

            let reconnect = completion.should_reconnect && self.auto_reconnect;
            if !reconnect {
                self.shared.transition(self.generation, ReadyState::Closed);
            }
            let status = completion.status;
            self.notify(Delivery::Complete(completion));

            if !reconnect {
                tracing::debug!(?status, "Event stream closed");
                return;
            }

            let delay = self.shared.retry();
            tracing::debug!(
                ?status,
                delay_ms = delay.as_millis() as u64,
                "Event stream reconnecting"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn request(&self) -> StreamRequest {
        let reserved = [ACCEPT, CACHE_CONTROL, LAST_EVENT_ID];
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .filter(|(name, _)| !reserved.iter().any(|r| r.eq_ignore_ascii_case(name)))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        headers.push((ACCEPT.to_string(), "text/event-stream".to_string()));
        headers.push((CACHE_CONTROL.to_string(), "no-cache".to_string()));
        if let Some(id) = self.shared.last_event_id() {
            headers.push((LAST_EVENT_ID.to_string(), id));
        }

        StreamRequest {
            url: self.url.clone(),
            headers,
        }
    }

    async fn stream(&self, mut response: TransportResponse) -> Completion {
        let status = response.status;
        if !self.shared.transition(self.generation, ReadyState::Open) {
            return Completion {
                status: Some(status),
                should_reconnect: false,
                error: None,
            };
        }
        self.notify(Delivery::Open);

        let mut decoder = EventStreamDecoder::with_line_breaks(&self.line_breaks);
        let mut error = None;

        while let Some(chunk) = response.body.next().await {
            match chunk {
                Ok(bytes) => {
                    for event in decoder.push_records(&bytes) {
                        if !self.shared.apply(self.generation, &event) {
                            tracing::trace!("Dropping event for inactive session");
                        } else if event.is_retry_only() {
                            tracing::debug!(retry = ?event.retry, "Retry-only event applied");
                        } else {
                            self.notify(Delivery::Event(event));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(status, error = %e, "Event stream interrupted");
                    error = Some(Arc::new(e));
                    break;
                }
            }
        }
        decoder.finish();

        Completion {
            status: Some(status),
            should_reconnect: should_reconnect(status),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::stream;
    use std::collections::VecDeque;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    type Script = std::result::Result<(u16, Vec<&'static str>), &'static str>;

    /// Plays back canned responses, then hangs
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<StreamRequest>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<StreamRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open(&self, request: StreamRequest) -> std::result::Result<TransportResponse, TransportError> {
            self.requests.lock().push(request);
            let next = self.responses.lock().pop_front();
            match next {
                Some(Ok((status, chunks))) => Ok(TransportResponse {
                    status,
                    body: stream::iter(
                        chunks
                            .into_iter()
                            .map(|c| Ok(Bytes::from_static(c.as_bytes()))),
                    )
                    .boxed(),
                }),
                Some(Err(message)) => Err(TransportError::Closed(message.to_string())),
                None => futures_util::future::pending().await,
            }
        }
    }

    fn config() -> EventSourceConfig {
        EventSourceConfig {
            url: "http://localhost/stream".to_string(),
            default_retry_ms: 5,
            ..Default::default()
        }
    }

    fn completions(source: &EventSource) -> mpsc::UnboundedReceiver<Completion> {
        let (tx, rx) = mpsc::unbounded_channel();
        source.on_complete(move |completion| {
            let _ = tx.send(completion.clone());
        });
        rx
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    #[test]
    fn reconnect_policy() {
        assert!(!should_reconnect(200));
        assert!(should_reconnect(201));
        assert!(should_reconnect(204));
        assert!(should_reconnect(299));
        assert!(!should_reconnect(300));
        assert!(!should_reconnect(404));
        assert!(!should_reconnect(500));
    }

    #[test]
    fn rejects_non_http_urls() {
        let config = EventSourceConfig {
            url: "ftp://localhost/stream".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            EventSource::new(config),
            Err(SseError::UnsupportedScheme(_))
        ));
    }

    #[tokio::test]
    async fn reconnects_on_204_with_last_event_id() {
        let transport = ScriptedTransport::new(vec![
            Ok((204, vec!["id: 7\ndata: a\n\n"])),
            Ok((200, vec!["data: b\n\n"])),
        ]);
        let source = EventSource::with_transport(config(), transport.clone()).unwrap();
        let mut done = completions(&source);

        let (tx, mut messages) = mpsc::unbounded_channel();
        source.on_message(move |event| {
            let _ = tx.send(event.data.clone());
        });

        source.connect();

        let first = next(&mut done).await;
        assert_eq!(first.status, Some(204));
        assert!(first.should_reconnect);

        let second = next(&mut done).await;
        assert_eq!(second.status, Some(200));
        assert!(!second.should_reconnect);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].header("Last-Event-Id"), None);
        assert_eq!(requests[1].header("Last-Event-Id"), Some("7"));

        assert_eq!(next(&mut messages).await.as_deref(), Some("a"));
        assert_eq!(next(&mut messages).await.as_deref(), Some("b"));
        assert_eq!(source.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn does_not_reconnect_on_404() {
        let transport = ScriptedTransport::new(vec![Ok((404, vec![]))]);
        let source = EventSource::with_transport(config(), transport.clone()).unwrap();
        let mut done = completions(&source);

        source.connect();

        let completion = next(&mut done).await;
        assert_eq!(completion.status, Some(404));
        assert!(!completion.should_reconnect);
        assert_eq!(source.ready_state(), ReadyState::Closed);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn transport_error_without_status_is_surfaced() {
        let transport = ScriptedTransport::new(vec![Err("connection refused")]);
        let source = EventSource::with_transport(config(), transport.clone()).unwrap();
        let mut done = completions(&source);

        source.connect();

        let completion = next(&mut done).await;
        assert_eq!(completion.status, None);
        assert!(!completion.should_reconnect);
        assert!(completion.error.is_some());
        assert_eq!(source.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn sends_stream_headers() {
        let transport = ScriptedTransport::new(vec![Ok((200, vec![]))]);
        let mut config = config();
        config
            .headers
            .insert("Authorization".to_string(), "Bearer t".to_string());
        config
            .headers
            .insert("accept".to_string(), "text/html".to_string());

        let source = EventSource::with_transport(config, transport.clone()).unwrap();
        let mut done = completions(&source);
        source.connect();
        next(&mut done).await;

        let request = &transport.requests()[0];
        assert_eq!(request.header("Accept"), Some("text/event-stream"));
        assert_eq!(request.header("Cache-Control"), Some("no-cache"));
        assert_eq!(request.header("Authorization"), Some("Bearer t"));
        assert_eq!(request.header("Last-Event-Id"), None);
    }

    #[tokio::test]
    async fn routes_events_to_general_and_named_listeners() {
        let transport = ScriptedTransport::new(vec![Ok((
            200,
            vec![
                "data: plain\n\nevent: message\ndata: explicit\n\n",
                "event: ping\ndata: p\n\nevent: other\ndata: o\n\n",
            ],
        ))]);
        let source = EventSource::with_transport(config(), transport).unwrap();
        let mut done = completions(&source);

        let (general_tx, mut general) = mpsc::unbounded_channel();
        source.on_message(move |event| {
            let _ = general_tx.send(event.data.clone().unwrap_or_default());
        });
        let (ping_tx, mut ping) = mpsc::unbounded_channel();
        source.add_event_listener("ping", move |event| {
            let _ = ping_tx.send(event.data.clone().unwrap_or_default());
        });
        let (open_tx, mut opened) = mpsc::unbounded_channel();
        source.on_open(move || {
            let _ = open_tx.send(());
        });

        assert_eq!(source.events(), vec!["ping".to_string()]);

        source.connect();
        next(&mut done).await;

        next(&mut opened).await;
        assert_eq!(next(&mut general).await, "plain");
        assert_eq!(next(&mut general).await, "explicit");
        assert!(general.try_recv().is_err());
        assert_eq!(next(&mut ping).await, "p");
        assert!(ping.try_recv().is_err());

        assert!(source.remove_event_listener("ping"));
        assert!(source.events().is_empty());
    }

    /// One 200 response whose body is fed chunk by chunk by the test
    struct FeedTransport {
        body: Mutex<Option<mpsc::UnboundedReceiver<&'static str>>>,
    }

    impl FeedTransport {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<&'static str>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let transport = Arc::new(Self {
                body: Mutex::new(Some(rx)),
            });
            (transport, tx)
        }
    }

    #[async_trait]
    impl Transport for FeedTransport {
        async fn open(&self, _request: StreamRequest) -> std::result::Result<TransportResponse, TransportError> {
            let body = self.body.lock().take();
            let Some(chunks) = body else {
                return futures_util::future::pending().await;
            };
            let body = stream::unfold(chunks, |mut chunks| async move {
                let chunk = chunks.recv().await?;
                Some((Ok::<_, TransportError>(Bytes::from_static(chunk.as_bytes())), chunks))
            });
            Ok(TransportResponse {
                status: 200,
                body: body.boxed(),
            })
        }
    }

    #[tokio::test]
    async fn session_state_updates_before_dispatch() {
        let (transport, feed) = FeedTransport::new();
        let source = Arc::new(EventSource::with_transport(config(), transport).unwrap());
        let mut done = completions(&source);

        let observer = Arc::downgrade(&source);
        let (tx, mut seen) = mpsc::unbounded_channel();
        source.on_message(move |event| {
            let session = observer.upgrade();
            let id = session.as_ref().and_then(|s| s.last_event_id());
            let retry = session.as_ref().map(|s| s.retry());
            let _ = tx.send((event.id.clone(), id, retry));
        });

        source.connect();

        feed.send("retry: 20\n\n").unwrap();
        feed.send("id: 1\ndata: one\n\n").unwrap();
        let (event_id, session_id, retry) = next(&mut seen).await;
        assert_eq!(event_id.as_deref(), Some("1"));
        assert_eq!(session_id.as_deref(), Some("1"));
        assert_eq!(retry, Some(Duration::from_millis(20)));

        feed.send("id: 2\nretry: 40\ndata: two\n\n").unwrap();
        let (event_id, session_id, retry) = next(&mut seen).await;
        assert_eq!(event_id.as_deref(), Some("2"));
        assert_eq!(session_id.as_deref(), Some("2"));
        assert_eq!(retry, Some(Duration::from_millis(40)));

        drop(feed);
        next(&mut done).await;

        // retry-only record never reached the listener
        assert!(seen.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocked_listener_does_not_stall_reads() {
        let transport = ScriptedTransport::new(vec![Ok((
            200,
            vec!["id: 1\ndata: a\n\n", "id: 2\ndata: b\n\n", "id: 3\ndata: c\n\n"],
        ))]);
        let source = EventSource::with_transport(config(), transport).unwrap();
        let mut done = completions(&source);

        let (release, gate) = std::sync::mpsc::channel::<()>();
        let gate = std::sync::Mutex::new(gate);
        let (tx, mut seen) = mpsc::unbounded_channel();
        source.on_message(move |event| {
            let _ = gate
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(2));
            let _ = tx.send(event.data.clone().unwrap_or_default());
        });

        source.connect();

        // the whole body is read while the first handler call is still parked
        timeout(Duration::from_secs(2), async {
            while source.ready_state() != ReadyState::Closed {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stream never finished");
        assert_eq!(source.last_event_id().as_deref(), Some("3"));
        assert!(seen.try_recv().is_err());

        for _ in 0..3 {
            release.send(()).unwrap();
        }
        assert_eq!(next(&mut seen).await, "a");
        assert_eq!(next(&mut seen).await, "b");
        assert_eq!(next(&mut seen).await, "c");
        assert_eq!(next(&mut done).await.status, Some(200));
    }

    #[tokio::test]
    async fn disconnect_closes_pending_connection() {
        let transport = ScriptedTransport::new(vec![]);
        let source = EventSource::with_transport(config(), transport.clone()).unwrap();

        source.connect();
        assert_eq!(source.ready_state(), ReadyState::Connecting);

        tokio::task::yield_now().await;
        source.disconnect();
        assert_eq!(source.ready_state(), ReadyState::Closed);
    }
}
