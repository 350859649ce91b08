//! Watchdog System
//!
//! Watchdogs sit between raw CDP traffic and the rest of the crate: each
//! one subscribes to the events it cares about and turns them into calls on
//! a broker or bus. Session lifecycle reaches them as [`BrowserEvent`]s.
//!
//! Lifecycle per connection:
//!
//! ```text
//! on_attach(client) ─▶ on_page(page)* ─▶ on_event(..)* ─▶ on_detach()
//! ```

use async_trait::async_trait;
use std::sync::Arc;

use crate::cdp::client::Result;
use crate::cdp::{CDPClient, CDPSession};
use crate::events::BrowserEvent;

#[async_trait]
pub trait Watchdog: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    /// Called for every session event. The watchdog decides what to care about.
    async fn on_event(&self, event: &BrowserEvent);

    /// Connection established. Subscribe to CDP events here; callbacks run on
    /// the client's reader task and must not block.
    async fn on_attach(&self, cdp_client: Arc<CDPClient>) -> Result<()> {
        let _ = cdp_client;
        Ok(())
    }

    /// A page became the session's current page. Per-page setup
    /// (bindings, init scripts) goes here.
    async fn on_page(&self, page: &CDPSession) -> Result<()> {
        let _ = page;
        Ok(())
    }

    /// Session stopping
    async fn on_detach(&self) -> Result<()> {
        Ok(())
    }
}

/// Watchdog manager - fans lifecycle calls out to every watchdog
#[derive(Default)]
pub struct WatchdogManager {
    watchdogs: Vec<Box<dyn Watchdog>>,
}

impl WatchdogManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, watchdog: Box<dyn Watchdog>) {
        tracing::debug!("Registered watchdog: {}", watchdog.name());
        self.watchdogs.push(watchdog);
    }

    pub fn names(&self) -> Vec<&str> {
        self.watchdogs.iter().map(|w| w.name()).collect()
    }

    pub async fn attach_all(&self, cdp_client: Arc<CDPClient>) -> Result<()> {
        for watchdog in &self.watchdogs {
            watchdog.on_attach(cdp_client.clone()).await?;
        }
        Ok(())
    }

    pub async fn page_all(&self, page: &CDPSession) -> Result<()> {
        for watchdog in &self.watchdogs {
            if let Err(e) = watchdog.on_page(page).await {
                tracing::warn!(watchdog = watchdog.name(), error = %e, "Page setup failed");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Detach everything, even if one watchdog fails; the first error wins
    pub async fn detach_all(&self) -> Result<()> {
        let mut first_error = None;
        for watchdog in &self.watchdogs {
            if let Err(e) = watchdog.on_detach().await {
                tracing::warn!(watchdog = watchdog.name(), error = %e, "Detach failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Dispatch event to all watchdogs concurrently
    pub async fn dispatch(&self, event: Arc<BrowserEvent>) {
        use futures_util::future::join_all;

        let tasks: Vec<_> = self
            .watchdogs
            .iter()
            .map(|w| {
                let event = event.clone();
                async move {
                    w.on_event(&event).await;
                }
            })
            .collect();

        join_all(tasks).await;
    }
}
