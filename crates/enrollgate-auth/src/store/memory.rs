//! In-memory secret store.
//!
//! A mutex-guarded map with lazy TTL expiry. State is per-instance and lost
//! on restart, so this backend is only suitable for tests and single-node
//! development; deployments share state through `enrollgate-store-redis`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::error::AuthError;
use crate::store::SecretStore;

struct Entry {
    value: String,
    expires_at: Option<OffsetDateTime>,
}

impl Entry {
    fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory [`SecretStore`] implementation.
///
/// Expired entries are dropped lazily on access rather than by a sweeper
/// task; the map never grows unbounded in tests.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemorySecretStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AuthResult<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| AuthError::store_unavailable("memory store lock poisoned"))
    }

    fn expires_at(ttl: Option<Duration>, now: OffsetDateTime) -> Option<OffsetDateTime> {
        ttl.map(|d| now + d)
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        let now = OffsetDateTime::now_utc();
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> AuthResult<()> {
        let now = OffsetDateTime::now_utc();
        let mut entries = self.lock()?;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Self::expires_at(ttl, now),
            },
        );
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> AuthResult<bool> {
        let now = OffsetDateTime::now_utc();
        let mut entries = self.lock()?;
        if let Some(existing) = entries.get(key) {
            if !existing.is_expired(now) {
                return Ok(false);
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Self::expires_at(ttl, now),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> AuthResult<bool> {
        let now = OffsetDateTime::now_utc();
        let mut entries = self.lock()?;
        match entries.remove(key) {
            Some(entry) => Ok(!entry.is_expired(now)),
            None => Ok(false),
        }
    }

    async fn increment(&self, key: &str, window: Duration) -> AuthResult<u64> {
        let now = OffsetDateTime::now_utc();
        let mut entries = self.lock()?;
        let current = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.value.parse::<u64>().unwrap_or(0)
            }
            _ => 0,
        };
        let next = current + 1;
        // Window TTL is only set on creation, matching Redis EXPIRE NX.
        let expires_at = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => entry.expires_at,
            _ => Some(now + window),
        };
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }
}
