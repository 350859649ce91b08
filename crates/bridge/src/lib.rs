//! Browser event coordination
//!
//! Turns a browser engine's callback-driven lifecycle into ordered,
//! cancellable, awaitable sequences:
//!
//! - [`navigation`] - one single-flight future per navigation, with override
//!   and cancellation, plus a multicast of every resolution
//! - [`intercept`] - pattern-matched, demand-metered streams and one-shot
//!   waiters over intercepted `fetch`/XHR traffic
//! - [`sse`] - Server-Sent Events decoding and session driving (re-exported)
//!
//! The engine side is Chrome over CDP: watchdogs translate CDP events into
//! broker and bus calls, and [`BrowserSession`] ties it together.
//!
//! ```ignore
//! let session = BrowserSession::new(SessionConfig::default());
//! session.start().await?;
//! session.open_page().await?;
//!
//! let failures = session.next_network_message(
//!     NetworkMessagePattern::kind(MessageKind::FetchError),
//! );
//! let response = session.navigate("https://example.com").await?;
//! ```

pub mod cdp;
pub mod error;
pub mod events;
pub mod intercept;
pub mod navigation;
pub mod session;
pub mod watchdog;
pub mod watchdogs;

pub use sse;

pub use cdp::{CDPClient, CDPSession};
pub use error::{InterceptError, NavigationError, SessionError};
pub use events::{
    BrowserEvent, EngineError, EventBus, NavigationEvent, NavigationFailure, NavigationHandle,
    NavigationOutcome, ResponseMetadata,
};
pub use intercept::{
    Demand, InterceptionBus, MessageKind, NetworkMessage, NetworkMessagePattern, NextMessage,
    Subscription,
};
pub use navigation::{NavigationBroker, NavigationConfig, NavigationFuture, NavigationResult};
pub use session::{BrowserSession, SessionConfig};
pub use watchdog::{Watchdog, WatchdogManager};
pub use watchdogs::{InterceptionConfig, InterceptionWatchdog, NavigationWatchdog};
