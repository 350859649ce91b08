//! Event model and bus
//!
//! Plain value types shared by the navigation broker, the interception bus
//! and the session facade. Nothing in here has behavior beyond construction
//! and conversion; [`EventBus`] is the one piece of plumbing, a thin
//! broadcast wrapper every multicast in the crate goes through.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::broadcast;

use crate::error::NavigationError;

pub use crate::intercept::{MessageKind, NetworkMessage};
pub use sse::ServerSentEvent;

/// Opaque identity of one navigation attempt. Over CDP this is the loader id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NavigationHandle(String);

impl NavigationHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NavigationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NavigationHandle {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NavigationHandle {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Main-document response as reported by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub url: String,
    pub status: u16,
    pub mime_type: Option<String>,
    pub headers: BTreeMap<String, String>,
}

/// Failure reported by the engine for a navigation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
    /// Engine-side cancellation (e.g. `net::ERR_ABORTED` on user stop)
    #[serde(default)]
    pub canceled: bool,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            canceled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum NavigationFailure {
    #[error("engine reported failure: {0}")]
    Engine(EngineError),

    #[error("navigation finished without response metadata")]
    MissingResponseMetadata,
}

/// Terminal result of a navigation. Never changes once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavigationOutcome {
    Success(ResponseMetadata),
    Failure(NavigationFailure),
    Canceled,
    Overridden { by: NavigationHandle },
}

impl NavigationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, NavigationOutcome::Success(_))
    }

    /// Canceled and overridden navigations may still get late engine
    /// callbacks; those are ignored rather than treated as faults.
    pub fn absorbs_late_callbacks(&self) -> bool {
        matches!(
            self,
            NavigationOutcome::Canceled | NavigationOutcome::Overridden { .. }
        )
    }

    pub fn into_result(self) -> Result<ResponseMetadata, NavigationError> {
        match self {
            NavigationOutcome::Success(metadata) => Ok(metadata),
            NavigationOutcome::Failure(failure) => Err(NavigationError::Failed(failure)),
            NavigationOutcome::Canceled => Err(NavigationError::Canceled),
            NavigationOutcome::Overridden { by } => Err(NavigationError::Overridden { by }),
        }
    }
}

/// One resolution, as seen by passive subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationEvent {
    pub handle: NavigationHandle,
    pub outcome: NavigationOutcome,
}

/// Session lifecycle events, dispatched to watchdogs and subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrowserEvent {
    Started,
    Stopped,
    PageAttached {
        target_id: String,
        session_id: String,
    },
    PageDetached {
        target_id: String,
    },
}

/// Broadcast wrapper. Publishing with no subscribers is not an error.
pub struct EventBus<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: E) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}
