//! CDP Client - The Core Communication Layer
//!
//! Design decisions:
//! 1. Single WebSocket per browser connection, sessions multiplexed over it
//! 2. Request/response matching via ID, events fanned out to subscribers
//! 3. Fail fast - no retries, no queuing. Let the caller decide.
//!
//! Subscriber callbacks run on the reader task. They must not block.

use dashmap::DashMap;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::protocol::*;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Error, Debug)]
pub enum CDPError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CDP protocol error: {code} - {message}")]
    Protocol { code: i32, message: String },

    #[error("Connection closed")]
    Closed,
}

/// Result type for CDP operations
pub type Result<T> = std::result::Result<T, CDPError>;

/// Event subscriber callback
pub type EventCallback = Arc<dyn Fn(&CDPEvent) + Send + Sync>;

/// CDP Client - manages single WebSocket connection to browser
pub struct CDPClient {
    /// Monotonic request ID counter
    next_id: AtomicU64,

    /// Requests waiting for their response, by request id
    pending: DashMap<RequestId, oneshot::Sender<CDPResponse>>,

    /// Key: method name (e.g., "Page.lifecycleEvent"), Value: callbacks
    subscribers: DashMap<String, Vec<EventCallback>>,

    /// WebSocket write half
    ws_sink: RwLock<WsSink>,

    /// Stops the reader task; taken on close
    shutdown: Mutex<Option<oneshot::Sender<()>>>,

    closed: AtomicBool,
}

impl CDPClient {
    /// Connect to Chrome DevTools Protocol endpoint
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>> {
        let (ws_stream, _) = connect_async(ws_url).await?;
        let (sink, mut stream) = ws_stream.split();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let client = Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            subscribers: DashMap::new(),
            ws_sink: RwLock::new(sink),
            shutdown: Mutex::new(Some(shutdown_tx)),
            closed: AtomicBool::new(false),
        });

        let reader = Arc::downgrade(&client);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = stream.next() => {
                        let Some(client) = reader.upgrade() else { break };
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Err(e) = client.handle_message(&text) {
                                    tracing::error!("Failed to handle message: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::info!("WebSocket closed");
                                break;
                            }
                            Some(Err(e)) => {
                                tracing::error!("WebSocket error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Shutdown signal received");
                        break;
                    }
                }
            }

            // Dropping the senders fails every in-flight request with Closed
            if let Some(client) = reader.upgrade() {
                client.closed.store(true, Ordering::SeqCst);
                client.pending.clear();
            }
        });

        tracing::info!(url = ws_url, "Connected to CDP");
        Ok(client)
    }

    /// Send CDP request and wait for response
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: Option<SessionId>,
    ) -> Result<Value> {
        if self.is_closed() {
            return Err(CDPError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CDPRequest {
            id,
            method: method.into(),
            params,
            session_id,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let json = serde_json::to_string(&request)?;
        let sent = self.ws_sink.write().await.send(Message::Text(json)).await;
        if let Err(e) = sent {
            self.pending.remove(&id);
            return Err(CDPError::WebSocket(e));
        }

        let response = rx.await.map_err(|_| CDPError::Closed)?;

        if let Some(error) = response.error {
            tracing::debug!(method = %request.method, code = error.code, "CDP request failed");
            return Err(CDPError::Protocol {
                code: error.code,
                message: error.message,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Subscribe to CDP events by method name
    pub fn subscribe(&self, method: impl Into<String>, callback: EventCallback) {
        self.subscribers
            .entry(method.into())
            .or_default()
            .push(callback);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn handle_message(&self, text: &str) -> Result<()> {
        let msg: CDPMessage = serde_json::from_str(text)?;

        match msg {
            CDPMessage::Response(response) => {
                if let Some((_, tx)) = self.pending.remove(&response.id) {
                    let _ = tx.send(response); // receiver gave up
                } else {
                    tracing::warn!("Received response for unknown request: {}", response.id);
                }
            }
            CDPMessage::Event(event) => {
                // Clone the list so callbacks can subscribe without deadlocking the map
                let callbacks = self
                    .subscribers
                    .get(&event.method)
                    .map(|entry| entry.value().clone());
                for callback in callbacks.into_iter().flatten() {
                    callback(&event);
                }
            }
        }

        Ok(())
    }

    /// Close connection gracefully
    pub async fn close(&self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        self.closed.store(true, Ordering::SeqCst);
        self.pending.clear();

        let mut sink = self.ws_sink.write().await;
        sink.close().await?;
        Ok(())
    }
}
