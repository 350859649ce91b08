//! Message patterns
//!
//! A pattern is an id plus a fallible predicate. The id only matters for
//! bookkeeping and logs; two patterns with identical predicates are still
//! distinct.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::message::{MessageKind, NetworkMessage};

pub type PredicateError = Box<dyn std::error::Error + Send + Sync>;

type Predicate = dyn Fn(&NetworkMessage) -> Result<bool, PredicateError> + Send + Sync;

static NEXT_PATTERN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatternId(u64);

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pattern-{}", self.0)
    }
}

#[derive(Clone)]
pub struct NetworkMessagePattern {
    id: PatternId,
    predicate: Arc<Predicate>,
}

impl NetworkMessagePattern {
    /// Fallible predicate. An `Err` ends whatever registration evaluated it.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&NetworkMessage) -> Result<bool, PredicateError> + Send + Sync + 'static,
    {
        Self {
            id: PatternId(NEXT_PATTERN_ID.fetch_add(1, Ordering::Relaxed)),
            predicate: Arc::new(predicate),
        }
    }

    pub fn matching<F>(predicate: F) -> Self
    where
        F: Fn(&NetworkMessage) -> bool + Send + Sync + 'static,
    {
        Self::new(move |message| Ok(predicate(message)))
    }

    pub fn any() -> Self {
        Self::matching(|_| true)
    }

    pub fn kind(kind: MessageKind) -> Self {
        Self::matching(move |message| message.kind == kind)
    }

    pub fn kinds(kinds: impl IntoIterator<Item = MessageKind>) -> Self {
        let kinds: Vec<MessageKind> = kinds.into_iter().collect();
        Self::matching(move |message| kinds.contains(&message.kind))
    }

    pub fn url_contains(fragment: impl Into<String>) -> Self {
        let fragment = fragment.into();
        Self::matching(move |message| message.url.contains(&fragment))
    }

    /// Both must match. `self` is evaluated first and short-circuits.
    pub fn and(self, other: NetworkMessagePattern) -> Self {
        Self::new(move |message| Ok(self.matches(message)? && other.matches(message)?))
    }

    pub fn id(&self) -> PatternId {
        self.id
    }

    pub fn matches(&self, message: &NetworkMessage) -> Result<bool, PredicateError> {
        (self.predicate)(message)
    }
}

impl fmt::Debug for NetworkMessagePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkMessagePattern")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_monotonic() {
        let a = NetworkMessagePattern::any();
        let b = NetworkMessagePattern::any();
        assert!(b.id() > a.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn helpers_compose() {
        let pattern = NetworkMessagePattern::kind(MessageKind::FetchResponse)
            .and(NetworkMessagePattern::url_contains("/api/"));

        let hit = NetworkMessage::new(MessageKind::FetchResponse, "https://x.test/api/items");
        let wrong_kind = NetworkMessage::new(MessageKind::Fetch, "https://x.test/api/items");
        let wrong_url = NetworkMessage::new(MessageKind::FetchResponse, "https://x.test/static");

        assert!(pattern.matches(&hit).unwrap());
        assert!(!pattern.matches(&wrong_kind).unwrap());
        assert!(!pattern.matches(&wrong_url).unwrap());
    }

    #[test]
    fn errors_propagate_through_and() {
        let failing = NetworkMessagePattern::new(|_| Err("bad predicate".into()));
        let pattern = NetworkMessagePattern::any().and(failing);

        let message = NetworkMessage::new(MessageKind::Xhr, "https://x.test/");
        assert_eq!(
            pattern.matches(&message).unwrap_err().to_string(),
            "bad predicate"
        );
    }

    #[test]
    fn kinds_matches_any_listed() {
        let failures = NetworkMessagePattern::kinds([MessageKind::XhrError, MessageKind::XhrAbort]);
        assert!(failures
            .matches(&NetworkMessage::new(MessageKind::XhrAbort, "u"))
            .unwrap());
        assert!(!failures
            .matches(&NetworkMessage::new(MessageKind::Xhr, "u"))
            .unwrap());
    }
}
