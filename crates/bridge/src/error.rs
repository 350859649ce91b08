//! Error types for the bridge crate

use thiserror::Error;

use crate::cdp::client::CDPError;
use crate::events::{NavigationFailure, NavigationHandle, NavigationOutcome};
use crate::intercept::PredicateError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NavigationError {
    #[error("Navigation failed: {0}")]
    Failed(NavigationFailure),

    #[error("Navigation canceled")]
    Canceled,

    #[error("Navigation overridden by {by}")]
    Overridden { by: NavigationHandle },

    /// A second terminal result for a handle that already resolved
    #[error("Navigation {handle} already resolved as {existing:?}")]
    DuplicateResolution {
        handle: NavigationHandle,
        existing: Box<NavigationOutcome>,
    },

    #[error("No navigation tracked for {0}")]
    UnknownHandle(NavigationHandle),
}

impl NavigationError {
    /// Bookkeeping faults, as opposed to navigation results
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            NavigationError::DuplicateResolution { .. } | NavigationError::UnknownHandle(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum InterceptError {
    #[error("Pattern predicate failed: {0}")]
    Predicate(#[source] PredicateError),

    #[error("Interception bus closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Cdp(#[from] CDPError),

    #[error(transparent)]
    Navigation(#[from] NavigationError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Not connected")]
    NotConnected,

    #[error("No page attached")]
    NoPage,

    #[error("Navigation to {url} rejected: {reason}")]
    NavigateRejected { url: String, reason: String },

    #[error("No history entry to navigate to")]
    NoHistoryEntry,

    #[error("Timed out waiting for navigation")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, SessionError>;
