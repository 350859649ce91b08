//! Transport seam for event stream sessions
//!
//! The session driver only needs "open a request, get a status and a byte
//! stream back". Production uses reqwest; tests plug in scripted transports.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use url::Url;

use crate::error::TransportError;

pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// One connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

impl StreamRequest {
    /// First value of a header, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Response headers arrived; body still streaming
pub struct TransportResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolve once response headers are in. Errors here mean no HTTP
    /// status was ever received.
    async fn open(&self, request: StreamRequest) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: StreamRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self.client.get(request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        tracing::debug!(url = %request.url, status, "Event stream response headers received");

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from))
            .boxed();

        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let request = StreamRequest {
            url: Url::parse("http://localhost/stream").unwrap(),
            headers: vec![("Last-Event-Id".into(), "7".into())],
        };

        assert_eq!(request.header("last-event-id"), Some("7"));
        assert_eq!(request.header("accept"), None);
    }
}
