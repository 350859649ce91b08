//! Navigation Watchdog - feeds main-frame navigation signals to the broker
//!
//! | CDP event                                   | broker call                  |
//! |---------------------------------------------|------------------------------|
//! | `Network.requestWillBeSent` (Document)      | `started(loaderId)`          |
//! | `Network.responseReceived` (Document)       | `record_response_metadata`   |
//! | `Page.lifecycleEvent` `load`                | `finished(loaderId)`         |
//! | `Network.loadingFailed` (Document)          | `failed(requestId, ..)`      |
//!
//! Only events from the current page's session and main frame count.
//! Subframe documents, workers and other tabs are ignored.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::cdp::client::Result;
use crate::cdp::protocol::{
    FrameId, LifecycleEvent, LoadingFailed, RequestWillBeSent, ResponseReceived, SessionId,
    DOCUMENT,
};
use crate::cdp::{CDPClient, CDPEvent, CDPSession};
use crate::events::{BrowserEvent, EngineError, NavigationHandle};
use crate::navigation::NavigationBroker;
use crate::watchdog::Watchdog;

const EVENTS: [&str; 4] = [
    "Network.requestWillBeSent",
    "Network.responseReceived",
    "Network.loadingFailed",
    "Page.lifecycleEvent",
];

/// Which session and frame navigation signals are accepted from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageScope {
    pub session_id: SessionId,
    pub frame_id: FrameId,
}

impl PageScope {
    pub fn of(page: &CDPSession) -> Self {
        Self {
            session_id: page.session_id.clone(),
            frame_id: page.main_frame_id().clone(),
        }
    }

    fn is_main_document(&self, resource_type: Option<&str>, frame_id: Option<&FrameId>) -> bool {
        resource_type == Some(DOCUMENT) && frame_id == Some(&self.frame_id)
    }
}

#[derive(Clone)]
pub struct NavigationWatchdog {
    broker: NavigationBroker,
    scope: Arc<RwLock<Option<PageScope>>>,
}

impl NavigationWatchdog {
    pub fn new(broker: NavigationBroker) -> Self {
        Self {
            broker,
            scope: Arc::new(RwLock::new(None)),
        }
    }

    pub fn broker(&self) -> &NavigationBroker {
        &self.broker
    }

    pub fn set_scope(&self, scope: Option<PageScope>) {
        *self.scope.write() = scope;
    }

    /// Translate one CDP event. Returns whether it reached the broker.
    pub fn handle_event(&self, event: &CDPEvent) -> bool {
        let Some(scope) = self.scope.read().clone() else {
            return false;
        };
        if event.session_id.as_ref() != Some(&scope.session_id) {
            return false;
        }

        match event.method.as_str() {
            "Network.requestWillBeSent" => {
                let Some(sent) = event.params_as::<RequestWillBeSent>() else {
                    return false;
                };
                // redirects reuse the request id; only the navigation request has id == loader id
                if !scope.is_main_document(sent.resource_type.as_deref(), sent.frame_id.as_ref())
                    || sent.request_id != sent.loader_id
                {
                    return false;
                }
                tracing::debug!(loader_id = %sent.loader_id, url = %sent.request.url, "Main frame navigation started");
                self.broker.started(&NavigationHandle::from(sent.loader_id));
            }
            "Network.responseReceived" => {
                let Some(received) = event.params_as::<ResponseReceived>() else {
                    return false;
                };
                if !scope.is_main_document(
                    received.resource_type.as_deref(),
                    received.frame_id.as_ref(),
                ) {
                    return false;
                }
                self.broker.record_response_metadata(
                    &NavigationHandle::from(received.loader_id),
                    received.response.into(),
                );
            }
            "Network.loadingFailed" => {
                let Some(failed) = event.params_as::<LoadingFailed>() else {
                    return false;
                };
                let handle = NavigationHandle::from(failed.request_id);
                if failed.resource_type.as_deref() != Some(DOCUMENT)
                    || self.broker.active().as_ref() != Some(&handle)
                {
                    return false;
                }
                self.broker.failed(
                    &handle,
                    EngineError {
                        message: failed.error_text,
                        canceled: failed.canceled,
                    },
                );
            }
            "Page.lifecycleEvent" => {
                let Some(lifecycle) = event.params_as::<LifecycleEvent>() else {
                    return false;
                };
                let handle = NavigationHandle::from(lifecycle.loader_id);
                // initial about:blank and same-document loads were never started
                if lifecycle.name != "load"
                    || lifecycle.frame_id != scope.frame_id
                    || self.broker.active().as_ref() != Some(&handle)
                {
                    return false;
                }
                self.broker.finished(&handle);
            }
            _ => return false,
        }

        true
    }

    fn cancel_active(&self, reason: &str) {
        if let Some(handle) = self.broker.active() {
            tracing::debug!(%handle, reason, "Canceling in-flight navigation");
            let _ = self.broker.cancel(&handle);
        }
    }
}

#[async_trait]
impl Watchdog for NavigationWatchdog {
    fn name(&self) -> &str {
        "NavigationWatchdog"
    }

    async fn on_event(&self, event: &BrowserEvent) {
        match event {
            BrowserEvent::PageDetached { target_id } => {
                let current = self.scope.read().as_ref().map(|s| s.frame_id.clone());
                if current.as_ref() == Some(target_id) {
                    self.set_scope(None);
                    self.cancel_active("page detached");
                }
            }
            BrowserEvent::Stopped => self.cancel_active("session stopped"),
            _ => {}
        }
    }

    async fn on_attach(&self, cdp_client: Arc<CDPClient>) -> Result<()> {
        for method in EVENTS {
            let watchdog = self.clone();
            cdp_client.subscribe(
                method,
                Arc::new(move |event: &CDPEvent| {
                    watchdog.handle_event(event);
                }),
            );
        }
        tracing::debug!("[NavigationWatchdog] Subscribed to navigation events");
        Ok(())
    }

    async fn on_page(&self, page: &CDPSession) -> Result<()> {
        // a new page makes whatever the old one was doing irrelevant
        self.cancel_active("page replaced");
        self.set_scope(Some(PageScope::of(page)));
        Ok(())
    }

    async fn on_detach(&self) -> Result<()> {
        self.set_scope(None);
        self.cancel_active("watchdog detached");
        Ok(())
    }
}
