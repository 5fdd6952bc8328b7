//! Session lookup seam.
//!
//! The gateway does not own session storage; deployments plug in their own
//! store. [`MemorySessionStore`] serves single-process setups and tests.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

/// A live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    /// Seconds since the Unix epoch.
    pub expires_at: u64,
}

impl Session {
    pub fn is_active(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.expires_at > now
    }
}

#[derive(Debug, Error)]
#[error("session store unavailable: {0}")]
pub struct SessionStoreError(pub String);

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the session if the identifier is known, expired or not.
    async fn lookup(&self, session_id: &str) -> Result<Option<Session>, SessionStoreError>;
}

/// In-process session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session_id: impl Into<String>, session: Session) {
        self.sessions.insert(session_id.into(), session);
    }

    pub fn remove(&self, session_id: &str) -> Option<Session> {
        self.sessions.remove(session_id).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn lookup(&self, session_id: &str) -> Result<Option<Session>, SessionStoreError> {
        Ok(self.sessions.get(session_id).map(|s| s.value().clone()))
    }
}
