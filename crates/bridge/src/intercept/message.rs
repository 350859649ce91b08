//! Intercepted request/response records

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    Fetch,
    FetchResponse,
    FetchError,
    Xhr,
    XhrResponse,
    XhrError,
    XhrAbort,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Fetch => "fetch",
            MessageKind::FetchResponse => "fetchResponse",
            MessageKind::FetchError => "fetchError",
            MessageKind::Xhr => "xhr",
            MessageKind::XhrResponse => "xhrResponse",
            MessageKind::XhrError => "xhrError",
            MessageKind::XhrAbort => "xhrAbort",
        }
    }

    pub fn is_request(self) -> bool {
        matches!(self, MessageKind::Fetch | MessageKind::Xhr)
    }

    pub fn is_response(self) -> bool {
        matches!(self, MessageKind::FetchResponse | MessageKind::XhrResponse)
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            MessageKind::FetchError | MessageKind::XhrError | MessageKind::XhrAbort
        )
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One intercepted record. Which fields are set depends on `kind`:
/// requests carry `method`/`body`, responses `status`/`response`,
/// failures `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(rename = "response", default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NetworkMessage {
    pub fn new(kind: MessageKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            method: None,
            url: url.into(),
            body: None,
            status: None,
            response_body: None,
            error: None,
        }
    }

    pub fn from_payload(payload: &Value) -> serde_json::Result<Self> {
        Self::deserialize(payload)
    }

    /// Request body as JSON. Scripts usually send it pre-stringified, so a
    /// string body is parsed once more; anything unparsable comes back as is.
    pub fn body_json(&self) -> Option<Value> {
        match self.body.as_ref()? {
            Value::String(raw) => {
                Some(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())))
            }
            Value::Null => None,
            other => Some(other.clone()),
        }
    }

    /// Response body parsed as JSON, if it is JSON
    pub fn response_json(&self) -> Option<Value> {
        serde_json::from_str(self.response_body.as_deref()?).ok()
    }
}
