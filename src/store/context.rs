//! Rolling per-user conversation context
//!
//! Context is an ordered list of recent message texts stored as one JSON
//! array per user. The whole list expires together; every append rewrites
//! it with a fresh TTL.
//!
//! Appends are a read-modify-write against the backing store. Concurrent
//! appends for the same user are serialized by an in-process lock keyed on
//! the user id, so no append is lost within one relay process. The lock is
//! held for exactly one get/set pair.

use super::KeyValueStore;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

/// Per-user context log over an expiring key/value backend
pub struct ContextStore {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    max_entries: Option<usize>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ContextStore {
    /// Create a context store
    ///
    /// # Arguments
    ///
    /// * `store` - Backing key/value store
    /// * `ttl` - Lifetime of a user's context after the last append
    /// * `max_entries` - Optional cap; the oldest entries are dropped first
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration, max_entries: Option<usize>) -> Self {
        Self {
            store,
            ttl,
            max_entries,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn key(user_id: &str) -> String {
        format!("context:{}", user_id)
    }

    /// Read the context for `user_id`, oldest first
    ///
    /// Never fails: an absent, expired, unreadable, or malformed context is
    /// returned as an empty list.
    pub async fn get_context(&self, user_id: &str) -> Vec<String> {
        match self.load(user_id).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Context read failed, using empty context");
                Vec::new()
            }
        }
    }

    /// Append `text` to the context for `user_id` and reset its TTL
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read or written. A
    /// failed read never overwrites the stored list.
    pub async fn append_to_context(&self, user_id: &str, text: &str) -> Result<()> {
        let lock = self.lock_for(user_id);
        let result = {
            let _guard = lock.lock().await;
            self.append_locked(user_id, text).await
        };
        self.release(user_id, lock);
        result
    }

    async fn append_locked(&self, user_id: &str, text: &str) -> Result<()> {
        let mut entries = self.load(user_id).await?;
        entries.push(text.to_string());

        if let Some(max) = self.max_entries {
            if entries.len() > max {
                let excess = entries.len() - max;
                entries.drain(..excess);
            }
        }

        let value = serde_json::to_string(&entries)?;
        self.store
            .set_with_expiry(&Self::key(user_id), value, self.ttl)
            .await?;
        tracing::debug!(user_id, entries = entries.len(), "Context appended");
        Ok(())
    }

    async fn load(&self, user_id: &str) -> Result<Vec<String>> {
        let Some(raw) = self.store.get(&Self::key(user_id)).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Discarding malformed context record");
                Ok(Vec::new())
            }
        }
    }

    fn lock_for(&self, user_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks.entry(user_id.to_string()).or_default().clone()
    }

    // Drop the map entry once nobody else holds or waits on it
    fn release(&self, user_id: &str, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        if Arc::strong_count(&lock) == 2 {
            locks.remove(user_id);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or_default()
    }
}
