//! Live-query bookkeeping per session.
//!
//! Each session has at most one live query. Submitting a new query overwrites
//! it, and every run started for an older query notices at its next batch
//! boundary that it is no longer live.
use dashmap::DashMap;
use std::fmt;

use super::matcher::SearchQuery;

/// Opaque identifier of one search consumer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Maps each session to the query currently considered live.
///
/// Reads and writes only touch a single map entry, so executors can check
/// liveness while a host submits new queries.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    live: DashMap<SessionId, SearchQuery>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `query` the live query of `session`, replacing any previous one
    pub fn set_live(&self, session: &SessionId, query: &SearchQuery) {
        self.live.insert(session.clone(), query.clone());
    }

    /// True iff `query` is the live query of `session`
    pub fn is_live(&self, session: &SessionId, query: &SearchQuery) -> bool {
        self.live
            .get(session)
            .is_some_and(|live| *live == *query)
    }

    /// Forgets the live query of `session`
    pub fn clear(&self, session: &SessionId) {
        self.live.remove(session);
    }

    /// The live query of `session`, if any
    pub fn live_query(&self, session: &SessionId) -> Option<SearchQuery> {
        self.live.get(session).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn q(text: &str) -> SearchQuery {
        SearchQuery::new(text).unwrap()
    }

    #[test]
    fn test_set_and_check() {
        let registry = SessionRegistry::new();
        let panel: SessionId = "panel-1".into();

        assert!(!registry.is_live(&panel, &q("cat")));

        registry.set_live(&panel, &q("cat"));
        assert!(registry.is_live(&panel, &q("cat")));
        assert!(registry.is_live(&panel, &q("  cat ")));

        registry.set_live(&panel, &q("dog"));
        assert!(!registry.is_live(&panel, &q("cat")));
        assert!(registry.is_live(&panel, &q("dog")));
        assert_eq!(registry.live_query(&panel), Some(q("dog")));
    }

    #[test]
    fn test_clear() {
        let registry = SessionRegistry::new();
        let panel = SessionId::new("panel");
        registry.set_live(&panel, &q("cat"));
        registry.clear(&panel);

        assert!(!registry.is_live(&panel, &q("cat")));
        assert!(registry.live_query(&panel).is_none());
    }

    #[test]
    fn test_sessions_are_independent() {
        let registry = SessionRegistry::new();
        let left = SessionId::new("left");
        let right = SessionId::new("right");

        registry.set_live(&left, &q("cat"));
        registry.set_live(&right, &q("dog"));
        registry.clear(&right);

        assert!(registry.is_live(&left, &q("cat")));
        assert!(!registry.is_live(&right, &q("dog")));
    }

    #[test]
    fn test_concurrent_readers_see_whole_values() {
        let registry = Arc::new(SessionRegistry::new());
        let panel = SessionId::new("panel");
        let queries = [q("alpha"), q("beta")];
        registry.set_live(&panel, &queries[0]);

        let writer = {
            let registry = Arc::clone(&registry);
            let panel = panel.clone();
            let queries = queries.clone();
            thread::spawn(move || {
                for i in 0..1000 {
                    registry.set_live(&panel, &queries[i % 2]);
                }
            })
        };

        for _ in 0..1000 {
            let live = registry.live_query(&panel).unwrap();
            assert!(queries.contains(&live));
        }
        writer.join().unwrap();
    }
}
