//! Short-lived "user is connected" records
//!
//! A session exists only while it keeps being refreshed. There is no
//! separate create operation: the first refresh creates it, and expiry or an
//! explicit `end` removes it.

use super::KeyValueStore;
use crate::error::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Active session marker for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// User identifier
    pub user_id: String,
    /// First time this session was seen (unix seconds)
    pub created_at: i64,
    /// Last refresh (unix seconds)
    pub last_active: i64,
    /// Gateway connection that last refreshed the session
    #[serde(default)]
    pub socket_id: Option<String>,
    /// Originating address of that connection
    #[serde(default)]
    pub ip: Option<String>,
}

/// Session store over an expiring key/value backend
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl SessionStore {
    /// Create a session store with the given TTL
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(user_id: &str) -> String {
        format!("session:{}", user_id)
    }

    /// Create or refresh the session for `user_id`
    ///
    /// Resets `last_active` and the TTL. An unexpired prior session keeps
    /// its `created_at`, and its connection details when none are given.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    pub async fn refresh(
        &self,
        user_id: &str,
        socket_id: Option<&str>,
        ip: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().timestamp();

        // A failed read only loses the original creation time
        let previous = match self.get(user_id).await {
            Ok(previous) => previous,
            Err(e) => {
                tracing::debug!(user_id, error = %e, "Could not read prior session");
                None
            }
        };

        let session = match previous {
            Some(prev) => Session {
                user_id: user_id.to_string(),
                created_at: prev.created_at,
                last_active: now,
                socket_id: socket_id.map(str::to_string).or(prev.socket_id),
                ip: ip.map(str::to_string).or(prev.ip),
            },
            None => Session {
                user_id: user_id.to_string(),
                created_at: now,
                last_active: now,
                socket_id: socket_id.map(str::to_string),
                ip: ip.map(str::to_string),
            },
        };

        let value = serde_json::to_string(&session)?;
        self.store
            .set_with_expiry(&Self::key(user_id), value, self.ttl)
            .await?;
        tracing::debug!(user_id, ttl_secs = self.ttl.as_secs(), "Session refreshed");
        Ok(())
    }

    /// Return the session for `user_id` if it has not expired
    ///
    /// A stored value that is not a valid session is treated as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    pub async fn get(&self, user_id: &str) -> Result<Option<Session>> {
        let Some(raw) = self.store.get(&Self::key(user_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Discarding malformed session record");
                Ok(None)
            }
        }
    }

    /// Whether `user_id` currently has a session
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    pub async fn is_active(&self, user_id: &str) -> Result<bool> {
        Ok(self.get(user_id).await?.is_some())
    }

    /// End the session for `user_id`; ending an absent session is a no-op
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    pub async fn end(&self, user_id: &str) -> Result<()> {
        self.store.delete(&Self::key(user_id)).await?;
        tracing::debug!(user_id, "Session ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, MockKeyValueStore};

    fn session_store(ttl_secs: u64) -> (SessionStore, Arc<MemoryStore>) {
        let backend = Arc::new(MemoryStore::new());
        let store = SessionStore::new(backend.clone(), Duration::from_secs(ttl_secs));
        (store, backend)
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_then_get_within_ttl() {
        let (sessions, _) = session_store(600);
        let before = Utc::now().timestamp();
        sessions
            .refresh("42", Some("conn-1"), Some("10.0.0.1"))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(599)).await;
        let session = sessions.get("42").await.unwrap().expect("session present");
        assert_eq!(session.user_id, "42");
        assert!(session.last_active >= before);
        assert_eq!(session.socket_id.as_deref(), Some("conn-1"));
        assert_eq!(session.ip.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_after_ttl_is_absent() {
        let (sessions, _) = session_store(600);
        sessions.refresh("42", None, None).await.unwrap();

        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(sessions.get("42").await.unwrap().is_none());
        assert!(!sessions.is_active("42").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_extends_lifetime() {
        let (sessions, _) = session_store(600);
        sessions.refresh("42", None, None).await.unwrap();
        tokio::time::advance(Duration::from_secs(500)).await;
        sessions.refresh("42", None, None).await.unwrap();
        tokio::time::advance(Duration::from_secs(500)).await;

        assert!(sessions.is_active("42").await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_keeps_created_at_and_connection() {
        let (sessions, backend) = session_store(600);
        let seeded = Session {
            user_id: "42".to_string(),
            created_at: 1_000,
            last_active: 1_000,
            socket_id: Some("conn-1".to_string()),
            ip: None,
        };
        backend
            .set_with_expiry(
                "session:42",
                serde_json::to_string(&seeded).unwrap(),
                Duration::from_secs(600),
            )
            .await
            .unwrap();

        sessions.refresh("42", None, Some("10.0.0.2")).await.unwrap();
        let session = sessions.get("42").await.unwrap().unwrap();
        assert_eq!(session.created_at, 1_000);
        assert!(session.last_active > 1_000);
        assert_eq!(session.socket_id.as_deref(), Some("conn-1"));
        assert_eq!(session.ip.as_deref(), Some("10.0.0.2"));
    }

    #[tokio::test]
    async fn test_end_is_idempotent() {
        let (sessions, _) = session_store(600);
        sessions.refresh("42", None, None).await.unwrap();
        sessions.end("42").await.unwrap();
        sessions.end("42").await.unwrap();
        assert!(sessions.get("42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_record_reads_as_absent() {
        let (sessions, backend) = session_store(600);
        backend
            .set_with_expiry(
                "session:42",
                "not json".to_string(),
                Duration::from_secs(600),
            )
            .await
            .unwrap();
        assert!(sessions.get("42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_propagates_write_failure() {
        let mut backend = MockKeyValueStore::new();
        backend.expect_get().returning(|_| Ok(None));
        backend
            .expect_set_with_expiry()
            .returning(|_, _, _| Err(anyhow::anyhow!("store unavailable")));

        let sessions = SessionStore::new(Arc::new(backend), Duration::from_secs(600));
        let err = sessions.refresh("42", None, None).await.unwrap_err();
        assert!(err.to_string().contains("store unavailable"));
    }
}
