//! The session-storage capability.
//!
//! Sessions are opaque byte blobs keyed by id; the runtime treats their
//! wire form as owned by the caller (the team layer stores JSON run
//! records through this surface). [`InMemorySessionStore`] is the built-in
//! backend; persistent stores live outside this crate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::Result;

/// Storage capability for persisted sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a session blob by id.
    async fn get_session(&self, id: &str) -> Result<Option<Vec<u8>>>;

    /// Store a session blob.
    async fn save_session(&self, id: &str, data: &[u8]) -> Result<()>;

    /// Delete a session. Returns whether it existed.
    async fn delete_session(&self, id: &str) -> Result<bool>;

    /// List every stored session id.
    async fn list_sessions(&self) -> Result<Vec<String>>;

    /// Delete sessions older than `max_age_seconds`. Returns the count
    /// removed.
    async fn cleanup_expired(&self, max_age_seconds: u64) -> Result<usize>;

    /// Release any held resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Type alias for an Arc-wrapped session store.
pub type SharedSessionStore = Arc<dyn SessionStore>;

/// In-memory [`SessionStore`] backed by a `tokio::sync::RwLock` map.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl InMemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_session(&self, id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(id)
            .map(|(data, _)| data.clone()))
    }

    async fn save_session(&self, id: &str, data: &[u8]) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(id.to_owned(), (data.to_vec(), Utc::now()));
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<bool> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        Ok(self.sessions.read().await.keys().cloned().collect())
    }

    async fn cleanup_expired(&self, max_age_seconds: u64) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::seconds(max_age_seconds as i64);
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, (_, saved_at)| *saved_at >= cutoff);
        Ok(before - sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_get_delete_roundtrip() {
        let store = InMemorySessionStore::new();
        store.save_session("s1", b"payload").await.unwrap();

        assert_eq!(
            store.get_session("s1").await.unwrap().as_deref(),
            Some(b"payload".as_slice())
        );
        assert!(store.delete_session("s1").await.unwrap());
        assert!(!store.delete_session("s1").await.unwrap());
        assert!(store.get_session("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_returns_all_ids() {
        let store = InMemorySessionStore::new();
        store.save_session("a", b"1").await.unwrap();
        store.save_session("b", b"2").await.unwrap();

        let mut ids = store.list_sessions().await.unwrap();
        ids.sort();
        assert_eq!(ids, ["a", "b"]);
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired() {
        let store = InMemorySessionStore::new();
        store.save_session("old", b"1").await.unwrap();
        {
            let mut sessions = store.sessions.write().await;
            sessions.get_mut("old").unwrap().1 = Utc::now() - chrono::Duration::hours(2);
        }
        store.save_session("fresh", b"2").await.unwrap();

        let removed = store.cleanup_expired(3600).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_session("fresh").await.unwrap().is_some());
    }
}
