//! Interception Watchdog - pipes page fetch/XHR traffic into the bus
//!
//! Each page gets a CDP binding plus a document-start script that wraps
//! `fetch` and `XMLHttpRequest`. The script reports every request, response
//! and failure through the binding; the resulting `Runtime.bindingCalled`
//! payloads are handed to [`InterceptionBus::ingest`] untouched.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::cdp::client::Result;
use crate::cdp::protocol::BindingCalled;
use crate::cdp::{CDPClient, CDPEvent, CDPSession};
use crate::events::BrowserEvent;
use crate::intercept::InterceptionBus;
use crate::watchdog::Watchdog;
use crate::watchdogs::navigation::PageScope;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptionConfig {
    pub enabled: bool,
    /// Global function name the page script reports through
    pub binding_name: String,
}

impl Default for InterceptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binding_name: "network".to_string(),
        }
    }
}

const SCRIPT_TEMPLATE: &str = r#"(() => {
  const report = window[__BINDING__];
  if (typeof report !== 'function' || window.__networkIntercepted) return;
  Object.defineProperty(window, '__networkIntercepted', { value: true });

  const post = (record) => {
    try { report(JSON.stringify(record)); } catch (_) {}
  };
  const asText = (value) => {
    if (value === undefined || value === null) return null;
    if (typeof value === 'string') return value;
    try { return JSON.stringify(value); } catch (_) { return String(value); }
  };

  const originalFetch = window.fetch;
  window.fetch = async function (resource, init) {
    const url = typeof resource === 'string' ? resource : (resource && resource.url) || String(resource);
    const method = (init && init.method) || (resource && resource.method) || 'GET';
    post({ type: 'fetch', method, url, body: asText(init && init.body) });
    try {
      const response = await originalFetch.apply(this, arguments);
      response.clone().text().then(
        (text) => post({ type: 'fetchResponse', url, status: response.status, response: text }),
        () => post({ type: 'fetchResponse', url, status: response.status, response: null })
      );
      return response;
    } catch (error) {
      post({ type: 'fetchError', url, error: String(error) });
      throw error;
    }
  };

  const open = XMLHttpRequest.prototype.open;
  const send = XMLHttpRequest.prototype.send;
  XMLHttpRequest.prototype.open = function (method, url) {
    this.__intercepted = { method: String(method).toUpperCase(), url: String(url) };
    return open.apply(this, arguments);
  };
  XMLHttpRequest.prototype.send = function (body) {
    const info = this.__intercepted || { method: 'GET', url: '' };
    post({ type: 'xhr', method: info.method, url: info.url, body: asText(body) });
    this.addEventListener('load', () => {
      let text = null;
      try {
        text = this.responseType === '' || this.responseType === 'text' ? this.responseText : asText(this.response);
      } catch (_) {}
      post({ type: 'xhrResponse', url: info.url, status: this.status, response: text });
    });
    this.addEventListener('error', () => post({ type: 'xhrError', url: info.url, error: 'Network error' }));
    this.addEventListener('abort', () => post({ type: 'xhrAbort', url: info.url, error: 'Request aborted' }));
    return send.apply(this, arguments);
  };
})();"#;

/// Document-start script reporting through `window[binding]`
pub fn interception_script(binding: &str) -> String {
    SCRIPT_TEMPLATE.replace("__BINDING__", &Value::String(binding.to_string()).to_string())
}

#[derive(Clone)]
pub struct InterceptionWatchdog {
    bus: InterceptionBus,
    binding: String,
    scope: Arc<RwLock<Option<PageScope>>>,
}

impl InterceptionWatchdog {
    pub fn new(bus: InterceptionBus, binding: impl Into<String>) -> Self {
        Self {
            bus,
            binding: binding.into(),
            scope: Arc::new(RwLock::new(None)),
        }
    }

    pub fn bus(&self) -> &InterceptionBus {
        &self.bus
    }

    pub fn set_scope(&self, scope: Option<PageScope>) {
        *self.scope.write() = scope;
    }

    /// Feed one `Runtime.bindingCalled` event to the bus. Returns deliveries.
    pub fn handle_event(&self, event: &CDPEvent) -> usize {
        let accepted = self
            .scope
            .read()
            .as_ref()
            .is_some_and(|scope| event.session_id.as_ref() == Some(&scope.session_id));
        if !accepted {
            return 0;
        }

        let Some(call) = event.params_as::<BindingCalled>() else {
            return 0;
        };
        if call.name != self.binding {
            return 0;
        }

        match serde_json::from_str::<Value>(&call.payload) {
            Ok(payload) => self.bus.ingest(&payload),
            Err(e) => {
                tracing::trace!(error = %e, "Binding payload is not JSON");
                0
            }
        }
    }
}

#[async_trait]
impl Watchdog for InterceptionWatchdog {
    fn name(&self) -> &str {
        "InterceptionWatchdog"
    }

    async fn on_event(&self, event: &BrowserEvent) {
        if let BrowserEvent::PageDetached { target_id } = event {
            let mut scope = self.scope.write();
            if scope.as_ref().is_some_and(|s| &s.frame_id == target_id) {
                *scope = None;
            }
        }
    }

    async fn on_attach(&self, cdp_client: Arc<CDPClient>) -> Result<()> {
        let watchdog = self.clone();
        cdp_client.subscribe(
            "Runtime.bindingCalled",
            Arc::new(move |event: &CDPEvent| {
                watchdog.handle_event(event);
            }),
        );
        Ok(())
    }

    async fn on_page(&self, page: &CDPSession) -> Result<()> {
        page.add_binding(&self.binding).await?;
        page.add_script_on_new_document(&interception_script(&self.binding))
            .await?;
        self.set_scope(Some(PageScope::of(page)));
        tracing::debug!(binding = %self.binding, session_id = %page.session_id, "Network interception installed");
        Ok(())
    }

    async fn on_detach(&self) -> Result<()> {
        self.set_scope(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercept::{MessageKind, NetworkMessagePattern};
    use serde_json::json;

    fn binding_call(session: &str, name: &str, payload: &str) -> CDPEvent {
        serde_json::from_value(json!({
            "method": "Runtime.bindingCalled",
            "sessionId": session,
            "params": { "name": name, "payload": payload, "executionContextId": 3 }
        }))
        .unwrap()
    }

    fn watchdog() -> InterceptionWatchdog {
        let watchdog = InterceptionWatchdog::new(InterceptionBus::new(), "network");
        watchdog.set_scope(Some(PageScope {
            session_id: "S1".into(),
            frame_id: "MAIN".into(),
        }));
        watchdog
    }

    #[tokio::test]
    async fn binding_payloads_reach_waiters() {
        let watchdog = watchdog();
        let waiter = watchdog
            .bus()
            .wait_for(NetworkMessagePattern::kind(MessageKind::XhrResponse));

        let payload = r#"{"type":"xhrResponse","url":"https://api.test/me","status":200,"response":"{}"}"#;
        assert_eq!(watchdog.handle_event(&binding_call("S1", "network", payload)), 1);

        let message = waiter.await.unwrap();
        assert_eq!(message.status, Some(200));
        assert_eq!(message.url, "https://api.test/me");
    }

    #[test]
    fn foreign_bindings_sessions_and_garbage_are_dropped() {
        let watchdog = watchdog();
        let _waiter = watchdog.bus().wait_for(NetworkMessagePattern::any());
        let payload = r#"{"type":"fetch","url":"https://api.test/"}"#;

        assert_eq!(watchdog.handle_event(&binding_call("S1", "other", payload)), 0);
        assert_eq!(watchdog.handle_event(&binding_call("S2", "network", payload)), 0);
        assert_eq!(watchdog.handle_event(&binding_call("S1", "network", "not json")), 0);
        assert_eq!(watchdog.bus().registration_count(), 1);
    }

    #[tokio::test]
    async fn detaching_another_page_keeps_the_current_one() {
        let watchdog = watchdog();
        let payload = r#"{"type":"fetch","url":"https://api.test/"}"#;
        let _waiter = watchdog.bus().wait_for(NetworkMessagePattern::any());

        watchdog
            .on_event(&BrowserEvent::PageDetached {
                target_id: "OLD".into(),
            })
            .await;
        assert_eq!(watchdog.handle_event(&binding_call("S1", "network", payload)), 1);

        let _waiter = watchdog.bus().wait_for(NetworkMessagePattern::any());
        watchdog
            .on_event(&BrowserEvent::PageDetached {
                target_id: "MAIN".into(),
            })
            .await;
        assert_eq!(watchdog.handle_event(&binding_call("S1", "network", payload)), 0);
    }

    #[test]
    fn detached_watchdog_ignores_everything() {
        let watchdog = InterceptionWatchdog::new(InterceptionBus::new(), "network");
        let payload = r#"{"type":"fetch","url":"https://api.test/"}"#;
        let _waiter = watchdog.bus().wait_for(NetworkMessagePattern::any());
        assert_eq!(watchdog.handle_event(&binding_call("S1", "network", payload)), 0);
    }

    #[test]
    fn script_reports_through_named_binding() {
        let script = interception_script("netTap");
        assert!(script.contains(r#"window["netTap"]"#));
        assert!(!script.contains("__BINDING__"));
        for kind in ["fetchError", "xhrAbort", "fetchResponse"] {
            assert!(script.contains(kind), "script never reports {kind}");
        }
    }
}
