//! CDP Protocol Types
//!
//! Wire envelopes plus the handful of event and result payloads the
//! navigation and interception watchdogs read. Anything else stays a
//! `serde_json::Value`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::events::ResponseMetadata;

/// Request ID - monotonically increasing
pub type RequestId = u64;

/// Target ID from Chrome. For page targets it doubles as the main frame id.
pub type TargetId = String;

/// Session ID for attached targets
pub type SessionId = String;

pub type FrameId = String;

pub type LoaderId = String;

/// CDP Request sent to browser
#[derive(Debug, Clone, Serialize)]
pub struct CDPRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// CDP Response from browser
#[derive(Debug, Clone, Deserialize)]
pub struct CDPResponse {
    pub id: RequestId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<CDPError>,
}

/// CDP Error
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CDPError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// CDP Event from browser (no request ID)
#[derive(Debug, Clone, Deserialize)]
pub struct CDPEvent {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
}

impl CDPEvent {
    /// Decode params into a typed payload. `None` if absent or malformed.
    pub fn params_as<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        let params = self.params.as_ref()?;
        match T::deserialize(params) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::debug!(method = %self.method, error = %e, "Unexpected event params");
                None
            }
        }
    }
}

/// Unified CDP Message (response or event)
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CDPMessage {
    Response(CDPResponse),
    Event(CDPEvent),
}

/// Result of Target.attachToTarget
#[derive(Debug, Clone, Deserialize)]
pub struct AttachToTargetResult {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
}

/// Result of Target.createTarget
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTargetResult {
    #[serde(rename = "targetId")]
    pub target_id: TargetId,
}

/// Result of Page.navigate. No loader id means a same-document navigation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateResult {
    pub frame_id: FrameId,
    #[serde(default)]
    pub loader_id: Option<LoaderId>,
    #[serde(default)]
    pub error_text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationHistory {
    pub current_index: usize,
    pub entries: Vec<NavigationEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NavigationEntry {
    pub id: i64,
    pub url: String,
}

impl NavigationHistory {
    /// Entry `offset` steps from the current one, if any
    pub fn relative(&self, offset: isize) -> Option<&NavigationEntry> {
        let index = self.current_index.checked_add_signed(offset)?;
        self.entries.get(index)
    }
}

/// Page.lifecycleEvent
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub frame_id: FrameId,
    pub loader_id: LoaderId,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub url: String,
    pub method: String,
}

/// Network.requestWillBeSent
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
    pub request_id: String,
    pub loader_id: LoaderId,
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub frame_id: Option<FrameId>,
    pub request: Request,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, Value>,
}

impl From<Response> for ResponseMetadata {
    fn from(response: Response) -> Self {
        let headers = response
            .headers
            .into_iter()
            .map(|(name, value)| match value {
                Value::String(s) => (name, s),
                other => (name, other.to_string()),
            })
            .collect();

        ResponseMetadata {
            url: response.url,
            status: response.status,
            mime_type: response.mime_type,
            headers,
        }
    }
}

/// Network.responseReceived
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
    pub request_id: String,
    pub loader_id: LoaderId,
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub frame_id: Option<FrameId>,
    pub response: Response,
}

/// Network.loadingFailed
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailed {
    pub request_id: String,
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
    pub error_text: String,
    #[serde(default)]
    pub canceled: bool,
}

/// Runtime.bindingCalled
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingCalled {
    pub name: String,
    pub payload: String,
    #[serde(default)]
    pub execution_context_id: Option<i64>,
}

/// Resource type CDP reports for main and sub frame documents
pub const DOCUMENT: &str = "Document";
