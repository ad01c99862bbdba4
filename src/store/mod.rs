//! Time-bounded key/value storage for sessions and conversation context
//!
//! The session and context stores only need three primitives from the
//! backing store: set-with-expiry, get, and delete. `KeyValueStore` captures
//! that surface so the relay can run against the in-process `MemoryStore`
//! or any external store offering the same semantics.

use crate::error::{Result, RelayError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;

pub mod context;
pub mod session;

pub use context::ContextStore;
pub use session::{Session, SessionStore};

/// Key/value store whose entries expire as a whole
///
/// Every operation is a single atomic call. Expiry is enforced by the store
/// itself: a `get` after the deadline returns `None`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value and resetting its TTL
    async fn set_with_expiry(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Fetch the value under `key` if present and unexpired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove `key`; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process expiring map
///
/// Deadlines are measured on the tokio clock, so tests can pause and
/// advance time instead of sleeping.
///
/// # Examples
///
/// ```
/// use chatrelay::store::{KeyValueStore, MemoryStore};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> chatrelay::error::Result<()> {
/// let store = MemoryStore::new();
/// store.set_with_expiry("session:42", "{}".to_string(), Duration::from_secs(600)).await?;
/// assert!(store.get("session:42").await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry and return how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Number of entries currently held, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_default()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> RelayError {
        RelayError::Store("memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set_with_expiry(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries
            .write()
            .map_err(|_| Self::poisoned())?
            .insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().map_err(|_| Self::poisoned())?;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // Expired: purge lazily, re-checking in case a writer refreshed it meanwhile
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries
            .write()
            .map_err(|_| Self::poisoned())?
            .remove(key);
        Ok(())
    }
}
