//! Server-Sent Events - decoding and session driving
//!
//! Two layers, usable separately:
//!
//! 1. [`EventStreamDecoder`]: pure, incremental bytes → [`ServerSentEvent`].
//!    No I/O, no async. Chunk boundaries never change the output.
//! 2. [`EventSource`]: owns a connection, applies the reconnect policy and
//!    fans events out to listeners in arrival order.
//!
//! ```text
//! Transport ──bytes──▶ EventStreamDecoder ──events──▶ EventSource ──▶ listeners
//!     ▲                                                   │
//!     └──────── reconnect (Last-Event-Id, retry) ─────────┘
//! ```

pub mod decoder;
pub mod error;
pub mod event;
pub mod source;
pub mod transport;

pub use decoder::{decode, EventStreamDecoder, LineBreak};
pub use error::{Result, SseError, TransportError};
pub use event::ServerSentEvent;
pub use source::{Completion, EventSource, EventSourceConfig, ReadyState};
pub use transport::{HttpTransport, StreamRequest, Transport, TransportResponse};
