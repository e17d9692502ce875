//! Failed-attempt tracking and lockout.
//!
//! Counters live in the shared store so limits hold across portal
//! instances. Each (action, actor) pair gets a sliding window that starts
//! at the first failure; once the per-action threshold is reached, the
//! actor is blocked until the window lapses. A successful attempt clears
//! the counter immediately.
//!
//! # Security Considerations
//!
//! - The blocked check runs before credential verification, so a locked
//!   actor learns nothing about credential validity.
//! - Login failures are tracked per client IP; MFA and refresh failures
//!   per subject.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::AuthResult;
use crate::config::RateLimitConfig;
use crate::error::AuthError;
use crate::store::SecretStore;

/// Actions with independent failure budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptAction {
    /// Password login attempts, tracked per client IP.
    Login,
    /// TOTP/backup code attempts, tracked per subject.
    Mfa,
    /// Refresh-token exchanges, tracked per subject.
    Refresh,
}

impl AttemptAction {
    /// Returns the action name used in store keys and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Mfa => "mfa",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for AttemptAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tracks authentication failures and enforces per-action lockouts.
pub struct AttemptTracker {
    store: Arc<dyn SecretStore>,
    config: RateLimitConfig,
}

impl AttemptTracker {
    /// Creates a new tracker over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn SecretStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    fn key(action: AttemptAction, actor: &str) -> String {
        format!("attempts:{}:{}", action.as_str(), actor)
    }

    fn limits(&self, action: AttemptAction) -> (u64, Duration) {
        match action {
            AttemptAction::Login => (self.config.login_max_failures, self.config.login_window),
            AttemptAction::Mfa => (self.config.mfa_max_failures, self.config.mfa_window),
            AttemptAction::Refresh => {
                (self.config.refresh_max_failures, self.config.refresh_window)
            }
        }
    }

    /// Records a failed attempt and returns the failure count within the
    /// current window.
    ///
    /// # Errors
    /// Returns `StoreUnavailable` if the store cannot be reached.
    pub async fn record_failure(&self, action: AttemptAction, actor: &str) -> AuthResult<u64> {
        let (max_failures, window) = self.limits(action);
        let count = self.store.increment(&Self::key(action, actor), window).await?;
        if count == max_failures {
            warn!(
                action = action.as_str(),
                actor,
                failures = count,
                "actor locked out after repeated failures"
            );
        }
        Ok(count)
    }

    /// Returns `true` if the actor has reached the failure threshold for
    /// this action within the current window.
    ///
    /// # Errors
    /// Returns `StoreUnavailable` if the store cannot be reached.
    pub async fn is_blocked(&self, action: AttemptAction, actor: &str) -> AuthResult<bool> {
        let (max_failures, _) = self.limits(action);
        let count = match self.store.get(&Self::key(action, actor)).await? {
            // A counter that does not parse fails closed, like the
            // revocation watermark.
            Some(raw) => raw.parse::<u64>().unwrap_or(u64::MAX),
            None => 0,
        };
        Ok(count >= max_failures)
    }

    /// Fails with `RateLimited` if the actor is currently blocked.
    ///
    /// Callers run this before touching credentials so lockouts leak no
    /// information about credential validity.
    ///
    /// # Errors
    /// Returns `RateLimited` if blocked, `StoreUnavailable` on store failure.
    pub async fn check(&self, action: AttemptAction, actor: &str) -> AuthResult<()> {
        if self.is_blocked(action, actor).await? {
            return Err(AuthError::rate_limited(action.as_str()));
        }
        Ok(())
    }

    /// Clears the failure counter after a successful attempt.
    ///
    /// # Errors
    /// Returns `StoreUnavailable` if the store cannot be reached.
    pub async fn reset(&self, action: AttemptAction, actor: &str) -> AuthResult<()> {
        self.store.delete(&Self::key(action, actor)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySecretStore;

    fn tracker() -> AttemptTracker {
        let config = RateLimitConfig {
            login_max_failures: 3,
            login_window: Duration::from_secs(60),
            mfa_max_failures: 2,
            mfa_window: Duration::from_millis(50),
            refresh_max_failures: 3,
            refresh_window: Duration::from_secs(60),
        };
        AttemptTracker::new(Arc::new(MemorySecretStore::new()), config)
    }

    #[tokio::test]
    async fn test_not_blocked_before_threshold() {
        let tracker = tracker();
        assert!(!tracker.is_blocked(AttemptAction::Login, "10.0.0.1").await.unwrap());

        tracker.record_failure(AttemptAction::Login, "10.0.0.1").await.unwrap();
        tracker.record_failure(AttemptAction::Login, "10.0.0.1").await.unwrap();
        assert!(!tracker.is_blocked(AttemptAction::Login, "10.0.0.1").await.unwrap());
        assert!(tracker.check(AttemptAction::Login, "10.0.0.1").await.is_ok());
    }

    #[tokio::test]
    async fn test_blocked_at_threshold() {
        let tracker = tracker();
        for _ in 0..3 {
            tracker.record_failure(AttemptAction::Login, "10.0.0.1").await.unwrap();
        }
        assert!(tracker.is_blocked(AttemptAction::Login, "10.0.0.1").await.unwrap());

        let result = tracker.check(AttemptAction::Login, "10.0.0.1").await;
        assert!(matches!(result, Err(AuthError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn test_actions_tracked_independently() {
        let tracker = tracker();
        for _ in 0..2 {
            tracker.record_failure(AttemptAction::Mfa, "student-1").await.unwrap();
        }
        assert!(tracker.is_blocked(AttemptAction::Mfa, "student-1").await.unwrap());
        assert!(!tracker.is_blocked(AttemptAction::Refresh, "student-1").await.unwrap());
        assert!(!tracker.is_blocked(AttemptAction::Login, "student-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_actors_tracked_independently() {
        let tracker = tracker();
        for _ in 0..3 {
            tracker.record_failure(AttemptAction::Login, "10.0.0.1").await.unwrap();
        }
        assert!(tracker.is_blocked(AttemptAction::Login, "10.0.0.1").await.unwrap());
        assert!(!tracker.is_blocked(AttemptAction::Login, "10.0.0.2").await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_clears_counter() {
        let tracker = tracker();
        for _ in 0..3 {
            tracker.record_failure(AttemptAction::Login, "10.0.0.1").await.unwrap();
        }
        assert!(tracker.is_blocked(AttemptAction::Login, "10.0.0.1").await.unwrap());

        tracker.reset(AttemptAction::Login, "10.0.0.1").await.unwrap();
        assert!(!tracker.is_blocked(AttemptAction::Login, "10.0.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_counter_fails_closed() {
        let store = Arc::new(MemorySecretStore::new());
        let tracker = AttemptTracker::new(store.clone(), RateLimitConfig::default());

        store
            .put("attempts:login:10.0.0.1", "not-a-number", None)
            .await
            .unwrap();

        assert!(tracker.is_blocked(AttemptAction::Login, "10.0.0.1").await.unwrap());
        let result = tracker.check(AttemptAction::Login, "10.0.0.1").await;
        assert!(matches!(result, Err(AuthError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn test_window_expiry_unblocks() {
        let tracker = tracker();
        for _ in 0..2 {
            tracker.record_failure(AttemptAction::Mfa, "student-1").await.unwrap();
        }
        assert!(tracker.is_blocked(AttemptAction::Mfa, "student-1").await.unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!tracker.is_blocked(AttemptAction::Mfa, "student-1").await.unwrap());
    }
}
