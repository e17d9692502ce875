//! Shared secret store abstraction.
//!
//! Token metadata, blacklist entries, MFA secrets, and rate-limit counters
//! all live in a TTL'd key-value store shared by every portal instance.
//! This module defines the interface; backends live in separate crates
//! (`enrollgate-store-redis`) and an in-memory implementation for tests
//! is provided by [`MemorySecretStore`].

mod memory;

pub use memory::MemorySecretStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::AuthResult;

/// Storage trait for the shared key-value store.
///
/// All values are strings (serialized records or counters). Every key may
/// carry a time-to-live; the store drops expired entries on its own, which
/// is how token metadata and blacklist entries disappear exactly when the
/// token they describe would have expired anyway.
///
/// # Errors
///
/// Every method returns `AuthError::StoreUnavailable` if the backend cannot
/// be reached. Callers must treat that as infrastructure failure, never as
/// "key absent".
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetches the value at `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> AuthResult<Option<String>>;

    /// Stores `value` at `key`, replacing any existing value.
    ///
    /// With `ttl = Some(d)` the entry expires after `d`; with `None` it
    /// persists until deleted.
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> AuthResult<()>;

    /// Stores `value` at `key` only if the key does not already exist.
    ///
    /// Returns `true` if the value was written, `false` if the key was
    /// already present. This is the atomic test-and-set that refresh-token
    /// rotation and single-use backup codes depend on: for a given key,
    /// exactly one concurrent caller observes `true`.
    async fn put_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>)
    -> AuthResult<bool>;

    /// Deletes the entry at `key`.
    ///
    /// Returns `true` if an entry existed and was removed.
    async fn delete(&self, key: &str) -> AuthResult<bool>;

    /// Atomically increments the counter at `key` and returns the new value.
    ///
    /// A missing key counts from zero, so the first call returns 1. The
    /// `window` TTL is applied only when the key is created; later
    /// increments never extend it, so the counter vanishes a fixed time
    /// after the first event no matter how many follow.
    async fn increment(&self, key: &str, window: Duration) -> AuthResult<u64>;
}
