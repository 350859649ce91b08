//! CDP Session - a connection to one page target
//!
//! Lightweight wrapper around CDPClient with target-specific context.
//! All sessions share the same WebSocket.

use super::client::{CDPClient, CDPError, Result};
use super::protocol::{
    AttachToTargetResult, FrameId, NavigateResult, NavigationHistory, SessionId, TargetId,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Domains a page session needs for navigation tracking and bindings
const PAGE_DOMAINS: [&str; 3] = ["Page", "Network", "Runtime"];

/// CDP Session bound to a specific target
#[derive(Clone)]
pub struct CDPSession {
    client: Arc<CDPClient>,

    pub target_id: TargetId,

    /// Session ID assigned by Chrome
    pub session_id: SessionId,
}

impl CDPSession {
    /// Attach to a page target and enable the domains event tracking needs
    pub async fn attach(client: Arc<CDPClient>, target_id: TargetId) -> Result<Self> {
        let result = client
            .send_request(
                "Target.attachToTarget",
                Some(json!({
                    "targetId": target_id,
                    "flatten": true,
                })),
                None,
            )
            .await?;

        let attach_result: AttachToTargetResult = serde_json::from_value(result)?;
        let session = Self {
            client,
            target_id,
            session_id: attach_result.session_id,
        };

        let enables = PAGE_DOMAINS
            .iter()
            .map(|domain| session.send(format!("{}.enable", domain), None));
        for result in futures_util::future::join_all(enables).await {
            result?;
        }

        session
            .send(
                "Page.setLifecycleEventsEnabled",
                Some(json!({ "enabled": true })),
            )
            .await?;

        tracing::debug!(target_id = %session.target_id, session_id = %session.session_id, "Attached to page");
        Ok(session)
    }

    pub fn client(&self) -> &Arc<CDPClient> {
        &self.client
    }

    /// Main frame of a page target shares the target's id
    pub fn main_frame_id(&self) -> &FrameId {
        &self.target_id
    }

    /// Send command within this session's context
    pub async fn send(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        self.client
            .send_request(method, params, Some(self.session_id.clone()))
            .await
    }

    pub async fn navigate(&self, url: &str) -> Result<NavigateResult> {
        let result = self
            .send("Page.navigate", Some(json!({ "url": url })))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn reload(&self) -> Result<()> {
        self.send("Page.reload", None).await?;
        Ok(())
    }

    /// Step through session history. `false` when there is no entry that
    /// far back or forward.
    pub async fn navigate_history(&self, offset: isize) -> Result<bool> {
        let history: NavigationHistory =
            serde_json::from_value(self.send("Page.getNavigationHistory", None).await?)?;

        let Some(entry) = history.relative(offset) else {
            return Ok(false);
        };

        self.send(
            "Page.navigateToHistoryEntry",
            Some(json!({ "entryId": entry.id })),
        )
        .await?;
        Ok(true)
    }

    /// Expose `window[name](payload)` to page scripts; calls surface as
    /// `Runtime.bindingCalled` events
    pub async fn add_binding(&self, name: &str) -> Result<()> {
        self.send("Runtime.addBinding", Some(json!({ "name": name })))
            .await?;
        Ok(())
    }

    /// Run `source` in every new document before any page script
    pub async fn add_script_on_new_document(&self, source: &str) -> Result<String> {
        let result = self
            .send(
                "Page.addScriptToEvaluateOnNewDocument",
                Some(json!({ "source": source })),
            )
            .await?;

        result["identifier"]
            .as_str()
            .map(str::to_owned)
            .ok_or(CDPError::Protocol {
                code: -1,
                message: "addScriptToEvaluateOnNewDocument returned no identifier".into(),
            })
    }

    /// Evaluate JavaScript
    pub async fn evaluate(&self, expression: impl Into<String>) -> Result<Value> {
        self.send(
            "Runtime.evaluate",
            Some(json!({
                "expression": expression.into(),
                "returnByValue": true,
            })),
        )
        .await
    }

    pub async fn close(&self) -> Result<()> {
        self.client
            .send_request(
                "Target.closeTarget",
                Some(json!({ "targetId": &self.target_id })),
                None,
            )
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for CDPSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CDPSession")
            .field("target_id", &self.target_id)
            .field("session_id", &self.session_id)
            .finish()
    }
}
