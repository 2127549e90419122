//! Session registry
//!
//! Shared lookup table from session id to live [`CallSession`]. Owned by
//! the orchestrator and passed by reference wherever lookups happen; the
//! registry is never reachable through a global.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::session::CallSession;
use crate::{Error, Result};

/// Concurrent map of active call sessions
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<CallSession>>>,
}

impl SessionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session.
    ///
    /// # Errors
    ///
    /// Returns a config error if a session with this id is already live.
    pub async fn register(&self, session: Arc<CallSession>) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(Error::Config(format!(
                "session '{}' is already registered",
                session.id
            )));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    /// Look up a session by id
    pub async fn lookup(&self, id: &str) -> Option<Arc<CallSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Remove a session, returning it if it was present
    pub async fn remove(&self, id: &str) -> Option<Arc<CallSession>> {
        self.sessions.write().await.remove(id)
    }

    /// Number of live sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no sessions are live
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Ids of all live sessions
    pub async fn ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{BoundaryDetector, BoundaryPolicy};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn session(id: &str) -> Arc<CallSession> {
        let (out_tx, _out_rx) = mpsc::channel(1);
        let (cmd_tx, _cmd_rx) = mpsc::channel(1);
        let (sig_tx, _sig_rx) = mpsc::channel(1);
        let detector = BoundaryDetector::new(BoundaryPolicy::default(), Duration::from_secs(3));
        Arc::new(CallSession::new(
            id,
            "en",
            "wf-1",
            "alloy",
            String::new(),
            Vec::new(),
            detector,
            100,
            out_tx,
            cmd_tx,
            sig_tx,
        ))
    }

    #[tokio::test]
    async fn register_lookup_remove_roundtrip() {
        let registry = SessionRegistry::new();
        registry.register(session("a")).await.unwrap();

        assert!(registry.lookup("a").await.is_some());
        assert!(registry.lookup("b").await.is_none());
        assert_eq!(registry.len().await, 1);

        let removed = registry.remove("a").await;
        assert!(removed.is_some());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let registry = SessionRegistry::new();
        registry.register(session("a")).await.unwrap();

        let err = registry.register(session("a")).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(registry.len().await, 1);
    }
}
