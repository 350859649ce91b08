//! Network interception
//!
//! Pages report their `fetch`/XHR traffic as loose JSON records. The bus
//! decodes them into [`NetworkMessage`]s and fans them out to pattern-matched
//! streams (metered by demand) and one-shot waiters.

pub mod bus;
pub mod message;
pub mod pattern;

pub use bus::{Demand, InterceptionBus, NextMessage, Subscription};
pub use message::{MessageKind, NetworkMessage};
pub use pattern::{NetworkMessagePattern, PatternId, PredicateError};
