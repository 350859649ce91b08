//! Browser Session
//!
//! The high-level API: connect to Chrome, open a page, navigate and await the
//! outcome, watch intercepted network traffic. Navigation bookkeeping lives in
//! the [`NavigationBroker`]; traffic in the [`InterceptionBus`]. Watchdogs
//! feed both from CDP events.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::cdp::protocol::{CreateTargetResult, TargetId};
use crate::cdp::{CDPClient, CDPSession};
use crate::error::{Result, SessionError};
use crate::events::{BrowserEvent, EventBus, NavigationEvent, NavigationHandle, ResponseMetadata};
use crate::intercept::{Demand, InterceptionBus, NetworkMessagePattern, NextMessage, Subscription};
use crate::navigation::{NavigationBroker, NavigationConfig};
use crate::watchdog::{Watchdog, WatchdogManager};
use crate::watchdogs::{InterceptionConfig, InterceptionWatchdog, NavigationWatchdog};

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub id: String,
    pub cdp_url: String,
    /// Limit for navigations the session triggers indirectly (history,
    /// reload), which may never start if the engine has nothing to do
    pub navigation_timeout_ms: u64,
    pub navigation: NavigationConfig,
    pub interception: InterceptionConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            cdp_url: "ws://localhost:9222".to_string(),
            navigation_timeout_ms: 30_000,
            navigation: NavigationConfig::default(),
            interception: InterceptionConfig::default(),
        }
    }
}

/// Browser Session - one CDP connection, one current page
pub struct BrowserSession {
    pub config: SessionConfig,
    pub event_bus: EventBus<BrowserEvent>,

    navigation: NavigationBroker,
    interception: InterceptionBus,

    cdp_client: Arc<RwLock<Option<Arc<CDPClient>>>>,
    page: Arc<RwLock<Option<CDPSession>>>,

    watchdog_manager: Arc<RwLock<WatchdogManager>>,
}

impl BrowserSession {
    pub fn new(config: SessionConfig) -> Self {
        let navigation = NavigationBroker::with_config(config.navigation.clone());
        let interception = InterceptionBus::new();

        let mut watchdog_manager = WatchdogManager::new();
        watchdog_manager.register(Box::new(NavigationWatchdog::new(navigation.clone())));
        if config.interception.enabled {
            watchdog_manager.register(Box::new(InterceptionWatchdog::new(
                interception.clone(),
                config.interception.binding_name.clone(),
            )));
        }

        Self {
            config,
            event_bus: EventBus::new(),
            navigation,
            interception,
            cdp_client: Arc::new(RwLock::new(None)),
            page: Arc::new(RwLock::new(None)),
            watchdog_manager: Arc::new(RwLock::new(watchdog_manager)),
        }
    }

    /// Add a watchdog. Takes effect on the next `start`.
    pub async fn register_watchdog(&self, watchdog: Box<dyn Watchdog>) {
        self.watchdog_manager.write().await.register(watchdog);
    }

    pub fn navigation(&self) -> &NavigationBroker {
        &self.navigation
    }

    pub fn interception(&self) -> &InterceptionBus {
        &self.interception
    }

    /// Connect to CDP
    pub async fn start(&self) -> Result<()> {
        let client = CDPClient::connect(&self.config.cdp_url).await?;
        *self.cdp_client.write().await = Some(client.clone());

        self.watchdog_manager.read().await.attach_all(client).await?;

        tracing::info!(session = %self.config.id, "Browser session started");
        self.emit(BrowserEvent::Started).await;
        Ok(())
    }

    /// Disconnect. In-flight navigations resolve `Canceled`; interception
    /// subscribers stay registered for the next page.
    pub async fn stop(&self) -> Result<()> {
        self.watchdog_manager.read().await.detach_all().await?;

        if let Some(page) = self.page.write().await.take() {
            self.emit(BrowserEvent::PageDetached {
                target_id: page.target_id,
            })
            .await;
        }

        if let Some(client) = self.cdp_client.write().await.take() {
            client.close().await?;
        }

        tracing::info!(session = %self.config.id, "Browser session stopped");
        self.emit(BrowserEvent::Stopped).await;
        Ok(())
    }

    /// Open a blank page, make it current and install the watchdogs on it.
    /// The previous page (if any) stays open but is no longer tracked.
    pub async fn open_page(&self) -> Result<TargetId> {
        let client = self.client().await?;

        let result = client
            .send_request(
                "Target.createTarget",
                Some(json!({ "url": "about:blank" })),
                None,
            )
            .await?;
        let CreateTargetResult { target_id } = serde_json::from_value(result)
            .map_err(crate::cdp::CDPError::from)?;

        let page = CDPSession::attach(client, target_id.clone()).await?;
        self.watchdog_manager.read().await.page_all(&page).await?;

        let previous = self.page.write().await.replace(page.clone());
        if let Some(previous) = previous {
            self.emit(BrowserEvent::PageDetached {
                target_id: previous.target_id,
            })
            .await;
        }

        self.emit(BrowserEvent::PageAttached {
            target_id: target_id.clone(),
            session_id: page.session_id.clone(),
        })
        .await;
        Ok(target_id)
    }

    pub async fn current_page(&self) -> Option<CDPSession> {
        self.page.read().await.clone()
    }

    /// Navigate the current page and wait for the document to load.
    ///
    /// `None` for same-document navigations (fragment changes), which load
    /// nothing. Dropping the returned future stops tracking the navigation;
    /// it resolves `Canceled` for anyone else watching.
    pub async fn navigate(&self, url: &str) -> Result<Option<ResponseMetadata>> {
        let url = url::Url::parse(url)?;
        let page = self.page().await?;

        let navigated = page.navigate(url.as_str()).await?;
        if let Some(reason) = navigated.error_text.filter(|text| !text.is_empty()) {
            return Err(SessionError::NavigateRejected {
                url: url.to_string(),
                reason,
            });
        }

        let Some(loader_id) = navigated.loader_id else {
            tracing::debug!(%url, "Same-document navigation");
            return Ok(None);
        };

        let outcome = self.navigation.begin(NavigationHandle::from(loader_id)).await;
        Ok(Some(outcome.into_result()?))
    }

    pub async fn go_back(&self) -> Result<ResponseMetadata> {
        self.history(-1).await
    }

    pub async fn go_forward(&self) -> Result<ResponseMetadata> {
        self.history(1).await
    }

    pub async fn reload(&self) -> Result<ResponseMetadata> {
        let page = self.page().await?;
        let events = self.navigation.subscribe();
        let previous = self.navigation.active();
        page.reload().await?;
        self.await_triggered(events, previous).await
    }

    /// Outcome of whatever navigation is in flight, `None` when idle
    pub async fn wait_for_load(&self) -> Result<Option<ResponseMetadata>> {
        match self.navigation.await_latest() {
            Some(pending) => Ok(Some(pending.await.into_result()?)),
            None => Ok(None),
        }
    }

    /// Stream of intercepted messages matching `pattern`
    pub fn network_messages(&self, pattern: NetworkMessagePattern, demand: Demand) -> Subscription {
        self.interception.subscribe(pattern, demand)
    }

    /// First intercepted message matching `pattern`
    pub fn next_network_message(&self, pattern: NetworkMessagePattern) -> NextMessage {
        self.interception.wait_for(pattern)
    }

    pub fn navigation_events(&self) -> broadcast::Receiver<NavigationEvent> {
        self.navigation.subscribe()
    }

    async fn history(&self, offset: isize) -> Result<ResponseMetadata> {
        let page = self.page().await?;
        let events = self.navigation.subscribe();
        let previous = self.navigation.active();
        if !page.navigate_history(offset).await? {
            return Err(SessionError::NoHistoryEntry);
        }
        self.await_triggered(events, previous).await
    }

    /// Wait for a navigation we triggered but don't have a handle for. The
    /// start signal may arrive after the trigger returns, so fall back to the
    /// resolution stream, which was subscribed before triggering. Whatever
    /// was active before the trigger (`previous`) is not ours and its
    /// resolution, typically `Overridden`, is skipped.
    async fn await_triggered(
        &self,
        mut events: broadcast::Receiver<NavigationEvent>,
        previous: Option<NavigationHandle>,
    ) -> Result<ResponseMetadata> {
        let wait = async {
            if let Some(pending) = self.navigation.await_latest() {
                if Some(pending.handle()) != previous.as_ref() {
                    return pending.await.into_result().map_err(SessionError::from);
                }
            }
            loop {
                match events.recv().await {
                    Ok(event) if Some(&event.handle) == previous.as_ref() => {
                        tracing::trace!(handle = %event.handle, "Skipping resolution of earlier navigation");
                    }
                    Ok(event) => return event.outcome.into_result().map_err(SessionError::from),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Navigation events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(SessionError::NotConnected)
                    }
                }
            }
        };

        tokio::time::timeout(Duration::from_millis(self.config.navigation_timeout_ms), wait)
            .await
            .map_err(|_| SessionError::Timeout)?
    }

    async fn client(&self) -> Result<Arc<CDPClient>> {
        self.cdp_client
            .read()
            .await
            .clone()
            .ok_or(SessionError::NotConnected)
    }

    async fn page(&self) -> Result<CDPSession> {
        self.page.read().await.clone().ok_or(SessionError::NoPage)
    }

    /// Publish and dispatch to watchdogs
    async fn emit(&self, event: BrowserEvent) {
        let event = Arc::new(event);
        self.event_bus.publish((*event).clone());
        self.watchdog_manager.read().await.dispatch(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercept::MessageKind;
    use serde_json::json;

    #[test]
    fn config_defaults_and_partial_deserialization() {
        let config: SessionConfig = serde_json::from_value(json!({
            "cdp_url": "ws://127.0.0.1:9333",
            "interception": { "binding_name": "tap" }
        }))
        .unwrap();

        assert_eq!(config.cdp_url, "ws://127.0.0.1:9333");
        assert!(config.interception.enabled);
        assert_eq!(config.interception.binding_name, "tap");
        assert_eq!(config.navigation.resolution_history, 256);
        assert!(Uuid::parse_str(&config.id).is_ok());
    }

    #[tokio::test]
    async fn watchdogs_follow_config() {
        let session = BrowserSession::new(SessionConfig::default());
        assert_eq!(
            session.watchdog_manager.read().await.names(),
            vec!["NavigationWatchdog", "InterceptionWatchdog"]
        );

        let mut config = SessionConfig::default();
        config.interception.enabled = false;
        let session = BrowserSession::new(config);
        assert_eq!(
            session.watchdog_manager.read().await.names(),
            vec!["NavigationWatchdog"]
        );
    }

    #[tokio::test]
    async fn operations_need_a_connection_and_page() {
        let session = BrowserSession::new(SessionConfig::default());

        assert!(matches!(
            session.navigate("https://example.com").await,
            Err(SessionError::NoPage)
        ));
        assert!(matches!(
            session.navigate("not a url").await,
            Err(SessionError::InvalidUrl(_))
        ));
        assert!(matches!(
            session.open_page().await,
            Err(SessionError::NotConnected)
        ));
        assert!(matches!(session.reload().await, Err(SessionError::NoPage)));
        assert!(matches!(session.wait_for_load().await, Ok(None)));
    }

    #[tokio::test]
    async fn network_helpers_share_the_session_bus() {
        let session = BrowserSession::new(SessionConfig::default());
        let waiter = session.next_network_message(NetworkMessagePattern::kind(MessageKind::Fetch));

        session
            .interception()
            .ingest(&json!({ "type": "fetch", "url": "https://api.test/" }));

        assert_eq!(waiter.await.unwrap().url, "https://api.test/");
    }

    fn page_metadata(url: &str) -> ResponseMetadata {
        ResponseMetadata {
            url: url.to_string(),
            status: 200,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn triggered_wait_skips_the_navigation_it_replaced() {
        let session = BrowserSession::new(SessionConfig::default());
        let broker = session.navigation().clone();
        broker.started(&NavigationHandle::from("OLD"));

        let events = broker.subscribe();
        let previous = broker.active();
        let mut wait = tokio_test::task::spawn(session.await_triggered(events, previous));
        tokio_test::assert_pending!(wait.poll());

        broker.started(&NavigationHandle::from("NEW"));
        broker.record_response_metadata(&NavigationHandle::from("NEW"), page_metadata("https://new.test/"));
        broker.finished(&NavigationHandle::from("NEW"));

        let response = tokio_test::assert_ready!(wait.poll()).unwrap();
        assert_eq!(response.url, "https://new.test/");
    }

    #[tokio::test]
    async fn triggered_wait_follows_an_already_started_navigation() {
        let session = BrowserSession::new(SessionConfig::default());
        let broker = session.navigation().clone();
        broker.started(&NavigationHandle::from("OLD"));
        let events = broker.subscribe();
        let previous = broker.active();

        broker.started(&NavigationHandle::from("NEW"));
        let wait = session.await_triggered(events, previous);
        broker.record_response_metadata(&NavigationHandle::from("NEW"), page_metadata("https://new.test/"));
        broker.finished(&NavigationHandle::from("NEW"));

        assert_eq!(wait.await.unwrap().url, "https://new.test/");
    }

    #[tokio::test]
    #[ignore] // Needs running Chrome
    async fn test_session_lifecycle() {
        let config = SessionConfig {
            cdp_url: std::env::var("CDP_URL")
                .unwrap_or_else(|_| "ws://localhost:9222/devtools/browser".to_string()),
            ..Default::default()
        };
        let session = BrowserSession::new(config);

        session.start().await.unwrap();
        let target_id = session.open_page().await.unwrap();
        println!("Opened page: {}", target_id);

        let response = session.navigate("https://example.com").await.unwrap();
        assert_eq!(response.map(|r| r.status), Some(200));

        let error = session.next_network_message(NetworkMessagePattern::kind(MessageKind::FetchError));
        session
            .current_page()
            .await
            .unwrap()
            .evaluate("fetch('https://invalid.invalid/').catch(() => {})")
            .await
            .unwrap();
        println!("Intercepted: {:?}", error.await.unwrap());

        session.stop().await.unwrap();
    }
}
