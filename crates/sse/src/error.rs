//! Error types for event stream sessions
//!
//! Two layers: what the transport reports, and what the session API reports.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SseError>;

/// Failure reported by a [`Transport`](crate::transport::Transport)
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed: {0}")]
    Closed(String),
}

#[derive(Debug, Error)]
pub enum SseError {
    #[error("Invalid stream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}
