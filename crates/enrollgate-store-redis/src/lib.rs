//! Redis-backed [`SecretStore`] implementation.
//!
//! The production backend for the Enrollgate auth subsystem. Every portal
//! instance shares one Redis, so revocations, MFA records, and attempt
//! counters are visible everywhere immediately. TTLs map directly onto
//! Redis key expiry; the conditional-set contract maps onto `SET NX`.
//!
//! Counters are incremented by a Lua script that sets the window expiry
//! only when the key is created, so the window is fixed at the first
//! failure, later increments never extend it, and a counter can never
//! exist without its TTL.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use enrollgate_auth::error::AuthError;
use enrollgate_auth::store::SecretStore;
use enrollgate_auth::AuthResult;

// INCR returns 1 exactly when it created the key.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// [`SecretStore`] over a Redis connection manager.
///
/// `ConnectionManager` reconnects on its own; callers only ever see
/// `StoreUnavailable` while the connection is down.
#[derive(Clone)]
pub struct RedisSecretStore {
    manager: ConnectionManager,
}

impl RedisSecretStore {
    /// Wraps an existing connection manager.
    #[must_use]
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    /// Connects to Redis at the given URL.
    ///
    /// # Errors
    /// Returns `StoreUnavailable` if the URL is invalid or the initial
    /// connection fails.
    pub async fn connect(url: &str) -> AuthResult<Self> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let manager = ConnectionManager::new(client).await.map_err(store_error)?;
        tracing::debug!("connected to redis secret store");
        Ok(Self::new(manager))
    }

    fn ttl_secs(ttl: Duration) -> u64 {
        ttl.as_secs().max(1)
    }
}

fn store_error(err: redis::RedisError) -> AuthError {
    AuthError::store_unavailable(err.to_string())
}

#[async_trait]
impl SecretStore for RedisSecretStore {
    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> AuthResult<()> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(Self::ttl_secs(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(store_error)?;
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> AuthResult<bool> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(Self::ttl_secs(ttl));
        }
        // SET NX replies OK on write, nil when the key already exists.
        let reply: Option<String> = cmd.query_async(&mut conn).await.map_err(store_error)?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> AuthResult<bool> {
        let mut conn = self.manager.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(removed > 0)
    }

    async fn increment(&self, key: &str, window: Duration) -> AuthResult<u64> {
        let mut conn = self.manager.clone();
        redis::Script::new(INCREMENT_SCRIPT)
            .key(key)
            .arg(Self::ttl_secs(window))
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)
    }
}
