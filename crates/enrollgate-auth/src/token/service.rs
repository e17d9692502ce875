//! Token lifecycle management.
//!
//! This module implements issuance, verification, revocation, and rotation
//! of portal tokens. Signed JWTs carry the claims; the shared store carries
//! everything revocable:
//!
//! - `token:access:{jti}` / `token:refresh:{jti}` - metadata for every live
//!   token, TTL = remaining lifetime, so records vanish with the token.
//! - `token:revoked:{jti}` - blacklist entries, same TTL rule.
//! - `token:revoked:subject:{sub}` - a revocation watermark; any token
//!   issued at or before the watermark is rejected. This is how a whole
//!   token set is invalidated without enumerating jtis.
//!
//! Refresh rotation claims the old token by a conditional set on its
//! blacklist key, so of any number of concurrent exchanges exactly one
//! succeeds and the rest are reported as replays.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::AuthResult;
use crate::config::TokenConfig;
use crate::directory::SubjectDirectory;
use crate::error::AuthError;
use crate::ratelimit::{AttemptAction, AttemptTracker};
use crate::store::SecretStore;
use crate::token::jwt::{JwtError, JwtService, TokenClaims, TokenUse};

/// Server-side record kept for every live token, keyed by jti.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenMetadata {
    /// Token identifier.
    pub jti: String,

    /// Subject the token was issued to.
    pub subject: String,

    /// Access/refresh marker.
    pub token_use: TokenUse,

    /// Issue time (Unix timestamp).
    pub issued_at: i64,

    /// Expiry time (Unix timestamp).
    pub expires_at: i64,

    /// How many rotations this refresh lineage has been through.
    /// Always 0 for access tokens.
    pub rotations: u32,
}

/// A freshly minted token together with its identifying data.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The signed JWT string.
    pub token: String,

    /// Token identifier, usable with [`TokenService::revoke`].
    pub jti: String,

    /// When the token expires.
    pub expires_at: OffsetDateTime,
}

/// An access/refresh token pair issued together.
#[derive(Debug, Clone)]
pub struct TokenPair {
    /// The short-lived access token.
    pub access: IssuedToken,

    /// The long-lived refresh token.
    pub refresh: IssuedToken,
}

/// Service managing the full token lifecycle.
///
/// Shared across request handlers behind an `Arc`; all state lives in the
/// store so any portal instance can verify or revoke any token.
pub struct TokenService {
    jwt: Arc<JwtService>,
    store: Arc<dyn SecretStore>,
    directory: Arc<dyn SubjectDirectory>,
    attempts: Arc<AttemptTracker>,
    config: TokenConfig,
}

impl TokenService {
    /// Creates a new token service.
    #[must_use]
    pub fn new(
        jwt: Arc<JwtService>,
        store: Arc<dyn SecretStore>,
        directory: Arc<dyn SubjectDirectory>,
        attempts: Arc<AttemptTracker>,
        config: TokenConfig,
    ) -> Self {
        Self {
            jwt,
            store,
            directory,
            attempts,
            config,
        }
    }

    /// Returns the underlying JWT service (JWKS export, issuer data).
    #[must_use]
    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    fn metadata_key(token_use: TokenUse, jti: &str) -> String {
        format!("token:{token_use}:{jti}")
    }

    fn revoked_key(jti: &str) -> String {
        format!("token:revoked:{jti}")
    }

    fn watermark_key(subject: &str) -> String {
        format!("token:revoked:subject:{subject}")
    }

    /// Store TTL for a record tied to a token's lifetime. Clamped to one
    /// second so a record for an about-to-expire token still lands.
    fn remaining_ttl(expires_at: i64, now: OffsetDateTime) -> Duration {
        let remaining = expires_at - now.unix_timestamp();
        Duration::from_secs(remaining.max(1) as u64)
    }

    fn classify(err: JwtError) -> AuthError {
        match err {
            JwtError::Expired => AuthError::Expired,
            JwtError::EncodingError { .. }
            | JwtError::KeyGenerationError { .. }
            | JwtError::InvalidKey { .. } => AuthError::signing(err.to_string()),
            other => AuthError::malformed(other.to_string()),
        }
    }

    async fn mint(
        &self,
        subject: &str,
        roles: Vec<String>,
        token_use: TokenUse,
        lifetime: Duration,
        rotations: u32,
    ) -> AuthResult<IssuedToken> {
        let now = OffsetDateTime::now_utc();
        let expires_at = now + lifetime;
        let jti = Uuid::new_v4().to_string();

        let claims = TokenClaims {
            iss: self.jwt.issuer().to_string(),
            sub: subject.to_string(),
            aud: self.jwt.audience().to_string(),
            exp: expires_at.unix_timestamp(),
            iat: now.unix_timestamp(),
            jti: jti.clone(),
            roles,
            token_use,
        };

        let token = self.jwt.encode(&claims).map_err(Self::classify)?;

        let metadata = TokenMetadata {
            jti: jti.clone(),
            subject: subject.to_string(),
            token_use,
            issued_at: claims.iat,
            expires_at: claims.exp,
            rotations,
        };
        let record = serde_json::to_string(&metadata)
            .map_err(|e| AuthError::signing(format!("metadata serialization failed: {e}")))?;
        self.store
            .put(&Self::metadata_key(token_use, &jti), &record, Some(lifetime))
            .await?;

        debug!(%jti, subject, kind = %token_use, rotations, "issued token");

        Ok(IssuedToken {
            token,
            jti,
            expires_at,
        })
    }

    /// Issues an access token carrying the subject's roles.
    ///
    /// # Errors
    /// Returns `Signing` on key failure, `StoreUnavailable` on store failure.
    pub async fn issue_access_token(
        &self,
        subject: &str,
        roles: Vec<String>,
    ) -> AuthResult<IssuedToken> {
        self.mint(
            subject,
            roles,
            TokenUse::Access,
            self.config.access_lifetime,
            0,
        )
        .await
    }

    /// Issues a refresh token. Refresh tokens carry no roles; grants are
    /// re-derived from the directory at exchange time.
    ///
    /// # Errors
    /// Returns `Signing` on key failure, `StoreUnavailable` on store failure.
    pub async fn issue_refresh_token(&self, subject: &str) -> AuthResult<IssuedToken> {
        self.mint(
            subject,
            Vec::new(),
            TokenUse::Refresh,
            self.config.refresh_lifetime,
            0,
        )
        .await
    }

    /// Issues a fresh access/refresh pair, as on successful login.
    ///
    /// # Errors
    /// Returns `Signing` on key failure, `StoreUnavailable` on store failure.
    pub async fn issue_pair(&self, subject: &str, roles: Vec<String>) -> AuthResult<TokenPair> {
        let access = self.issue_access_token(subject, roles).await?;
        let refresh = self.issue_refresh_token(subject).await?;
        Ok(TokenPair { access, refresh })
    }

    /// Verifies a token string and returns its claims.
    ///
    /// Checks, in order: signature/expiry/issuer/audience, token kind,
    /// per-token blacklist, subject revocation watermark, metadata
    /// presence, and subject agreement between claims and metadata.
    ///
    /// # Errors
    /// `Malformed`, `Expired`, `Revoked`, `UnknownToken`, `SubjectMismatch`,
    /// or `StoreUnavailable`.
    pub async fn verify(&self, token: &str, expected_use: TokenUse) -> AuthResult<TokenClaims> {
        let claims = self.jwt.decode(token).map_err(Self::classify)?.claims;

        if claims.token_use != expected_use {
            return Err(AuthError::malformed(format!(
                "expected {expected_use} token, got {}",
                claims.token_use
            )));
        }

        if self.store.get(&Self::revoked_key(&claims.jti)).await?.is_some() {
            return Err(AuthError::Revoked);
        }
        self.check_watermark(&claims).await?;

        let metadata = self.load_metadata(expected_use, &claims.jti).await?;
        if metadata.subject != claims.sub {
            warn!(jti = %claims.jti, "token subject disagrees with stored metadata");
            return Err(AuthError::SubjectMismatch);
        }

        Ok(claims)
    }

    /// Verifies an access token, the hot path behind request middleware.
    ///
    /// # Errors
    /// Same as [`TokenService::verify`].
    pub async fn verify_access(&self, token: &str) -> AuthResult<TokenClaims> {
        self.verify(token, TokenUse::Access).await
    }

    async fn check_watermark(&self, claims: &TokenClaims) -> AuthResult<()> {
        if let Some(raw) = self.store.get(&Self::watermark_key(&claims.sub)).await? {
            let watermark = raw.parse::<i64>().unwrap_or(i64::MAX);
            if claims.iat <= watermark {
                return Err(AuthError::Revoked);
            }
        }
        Ok(())
    }

    async fn load_metadata(&self, token_use: TokenUse, jti: &str) -> AuthResult<TokenMetadata> {
        let raw = self
            .store
            .get(&Self::metadata_key(token_use, jti))
            .await?
            .ok_or(AuthError::UnknownToken)?;
        serde_json::from_str(&raw)
            .map_err(|e| AuthError::store_unavailable(format!("corrupt token metadata: {e}")))
    }

    /// Revokes a token by jti.
    ///
    /// With `blacklist = true` the jti is blocked for the token's remaining
    /// lifetime; with `false` the metadata is simply forgotten, after which
    /// verification reports `UnknownToken`.
    ///
    /// # Errors
    /// Returns `UnknownToken` if no metadata exists for the jti.
    pub async fn revoke(&self, jti: &str, blacklist: bool) -> AuthResult<()> {
        // A jti lives in exactly one namespace.
        let metadata = match self.load_metadata(TokenUse::Access, jti).await {
            Ok(metadata) => metadata,
            Err(AuthError::UnknownToken) => self.load_metadata(TokenUse::Refresh, jti).await?,
            Err(err) => return Err(err),
        };

        self.store
            .delete(&Self::metadata_key(metadata.token_use, jti))
            .await?;

        if blacklist {
            let now = OffsetDateTime::now_utc();
            let ttl = Self::remaining_ttl(metadata.expires_at, now);
            self.store
                .put(
                    &Self::revoked_key(jti),
                    &now.unix_timestamp().to_string(),
                    Some(ttl),
                )
                .await?;
        }

        debug!(%jti, subject = %metadata.subject, blacklist, "revoked token");
        Ok(())
    }

    /// Revokes the subject's entire active token set by writing a
    /// revocation watermark. Every token issued at or before this moment
    /// is rejected from now on.
    ///
    /// # Errors
    /// Returns `StoreUnavailable` if the store cannot be reached.
    pub async fn revoke_all_for_subject(&self, subject: &str) -> AuthResult<()> {
        let now = OffsetDateTime::now_utc();
        self.store
            .put(
                &Self::watermark_key(subject),
                &now.unix_timestamp().to_string(),
                Some(self.config.refresh_lifetime),
            )
            .await?;
        warn!(subject, "revoked all tokens for subject");
        Ok(())
    }

    /// Exchanges a refresh token for a new access/refresh pair.
    ///
    /// The presented token is blacklisted by a conditional set before
    /// anything is issued, so of any concurrent exchanges of the same
    /// token exactly one succeeds. A token that is already blacklisted is
    /// a replay: the subject's whole token set is revoked and
    /// `ReplayDetected` is returned.
    ///
    /// # Errors
    /// Any verification error, `RateLimited`, `ReplayDetected`, or
    /// `StoreUnavailable`.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let claims = self.jwt.decode(refresh_token).map_err(Self::classify)?.claims;
        if claims.token_use != TokenUse::Refresh {
            return Err(AuthError::malformed("refresh requires a refresh token"));
        }
        let subject = claims.sub.clone();

        self.attempts.check(AttemptAction::Refresh, &subject).await?;

        if self.store.get(&Self::revoked_key(&claims.jti)).await?.is_some() {
            return self.handle_replay(&subject, &claims.jti).await;
        }
        if let Err(err) = self.check_watermark(&claims).await {
            self.attempts
                .record_failure(AttemptAction::Refresh, &subject)
                .await?;
            return Err(err);
        }

        let metadata = match self.load_metadata(TokenUse::Refresh, &claims.jti).await {
            Ok(metadata) => metadata,
            Err(err) => {
                if err.is_authentication_error() {
                    self.attempts
                        .record_failure(AttemptAction::Refresh, &subject)
                        .await?;
                }
                return Err(err);
            }
        };
        if metadata.subject != subject {
            self.attempts
                .record_failure(AttemptAction::Refresh, &subject)
                .await?;
            return Err(AuthError::SubjectMismatch);
        }

        // Claim the old token. Losing this race means another exchange
        // already consumed it.
        let now = OffsetDateTime::now_utc();
        let claimed = self
            .store
            .put_if_absent(
                &Self::revoked_key(&claims.jti),
                &now.unix_timestamp().to_string(),
                Some(Self::remaining_ttl(claims.exp, now)),
            )
            .await?;
        if !claimed {
            return self.handle_replay(&subject, &claims.jti).await;
        }

        self.store
            .delete(&Self::metadata_key(TokenUse::Refresh, &claims.jti))
            .await?;
        self.attempts.reset(AttemptAction::Refresh, &subject).await?;

        let record = self.directory.lookup_subject(&subject).await?;
        let access = self.issue_access_token(&subject, record.roles).await?;
        let refresh = self
            .mint(
                &subject,
                Vec::new(),
                TokenUse::Refresh,
                self.config.refresh_lifetime,
                metadata.rotations + 1,
            )
            .await?;

        debug!(
            subject = %subject,
            rotations = metadata.rotations + 1,
            old_jti = %claims.jti,
            new_jti = %refresh.jti,
            "rotated refresh token"
        );

        Ok(TokenPair { access, refresh })
    }

    async fn handle_replay(&self, subject: &str, jti: &str) -> AuthResult<TokenPair> {
        warn!(subject, %jti, "refresh token replay detected");
        self.revoke_all_for_subject(subject).await?;
        self.attempts
            .record_failure(AttemptAction::Refresh, subject)
            .await?;
        Err(AuthError::ReplayDetected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::directory::StaticSubjectDirectory;
    use crate::store::MemorySecretStore;
    use crate::token::jwt::SigningKeyPair;

    fn test_service_with(store: Arc<MemorySecretStore>) -> TokenService {
        let key_pair = SigningKeyPair::generate_ec().unwrap();
        let jwt = Arc::new(JwtService::new(key_pair, "https://auth.example.edu", "portal"));
        let directory = Arc::new(StaticSubjectDirectory::new(vec!["student".to_string()]));
        let attempts = Arc::new(AttemptTracker::new(
            store.clone(),
            RateLimitConfig {
                refresh_max_failures: 3,
                ..RateLimitConfig::default()
            },
        ));
        TokenService::new(jwt, store, directory, attempts, TokenConfig::default())
    }

    fn test_service() -> TokenService {
        test_service_with(Arc::new(MemorySecretStore::new()))
    }

    #[tokio::test]
    async fn test_issue_and_verify_access_token() {
        let service = test_service();
        let issued = service
            .issue_access_token("student-42", vec!["student".to_string()])
            .await
            .unwrap();

        let claims = service.verify_access(&issued.token).await.unwrap();
        assert_eq!(claims.sub, "student-42");
        assert_eq!(claims.jti, issued.jti);
        assert_eq!(claims.roles, vec!["student".to_string()]);
        assert_eq!(claims.token_use, TokenUse::Access);
    }

    #[tokio::test]
    async fn test_refresh_token_rejected_on_access_path() {
        let service = test_service();
        let issued = service.issue_refresh_token("student-42").await.unwrap();

        let result = service.verify_access(&issued.token).await;
        assert!(matches!(result, Err(AuthError::Malformed { .. })));
    }

    #[tokio::test]
    async fn test_garbage_token_is_malformed() {
        let service = test_service();
        let result = service.verify_access("definitely-not-a-jwt").await;
        assert!(matches!(result, Err(AuthError::Malformed { .. })));
    }

    #[tokio::test]
    async fn test_blacklist_revocation() {
        let service = test_service();
        let issued = service
            .issue_access_token("student-42", vec![])
            .await
            .unwrap();
        service.verify_access(&issued.token).await.unwrap();

        service.revoke(&issued.jti, true).await.unwrap();
        let result = service.verify_access(&issued.token).await;
        assert!(matches!(result, Err(AuthError::Revoked)));
    }

    #[tokio::test]
    async fn test_forget_revocation_yields_unknown_token() {
        let service = test_service();
        let issued = service
            .issue_access_token("student-42", vec![])
            .await
            .unwrap();

        service.revoke(&issued.jti, false).await.unwrap();
        let result = service.verify_access(&issued.token).await;
        assert!(matches!(result, Err(AuthError::UnknownToken)));
    }

    #[tokio::test]
    async fn test_revoke_unknown_jti() {
        let service = test_service();
        let result = service.revoke("no-such-jti", true).await;
        assert!(matches!(result, Err(AuthError::UnknownToken)));
    }

    #[tokio::test]
    async fn test_revoke_refresh_token_by_jti() {
        let service = test_service();
        let issued = service.issue_refresh_token("student-42").await.unwrap();

        service.revoke(&issued.jti, true).await.unwrap();
        let result = service.refresh(&issued.token).await;
        // Blacklisted refresh tokens are reported as replays.
        assert!(matches!(result, Err(AuthError::ReplayDetected)));
    }

    #[tokio::test]
    async fn test_subject_mismatch_detected() {
        let store = Arc::new(MemorySecretStore::new());
        let service = test_service_with(store.clone());
        let issued = service
            .issue_access_token("student-42", vec![])
            .await
            .unwrap();

        // Overwrite the stored record with one claiming a different subject.
        let tampered = TokenMetadata {
            jti: issued.jti.clone(),
            subject: "someone-else".to_string(),
            token_use: TokenUse::Access,
            issued_at: 0,
            expires_at: issued.expires_at.unix_timestamp(),
            rotations: 0,
        };
        store
            .put(
                &format!("token:access:{}", issued.jti),
                &serde_json::to_string(&tampered).unwrap(),
                None,
            )
            .await
            .unwrap();

        let result = service.verify_access(&issued.token).await;
        assert!(matches!(result, Err(AuthError::SubjectMismatch)));
    }

    #[tokio::test]
    async fn test_refresh_rotates_pair() {
        let service = test_service();
        let pair = service
            .issue_pair("student-42", vec!["student".to_string()])
            .await
            .unwrap();

        let rotated = service.refresh(&pair.refresh.token).await.unwrap();
        assert_ne!(rotated.refresh.jti, pair.refresh.jti);

        // New access token carries directory-resolved roles.
        let claims = service.verify_access(&rotated.access.token).await.unwrap();
        assert_eq!(claims.sub, "student-42");
        assert_eq!(claims.roles, vec!["student".to_string()]);
    }

    #[tokio::test]
    async fn test_replayed_refresh_token_detected() {
        let service = test_service();
        let pair = service
            .issue_pair("student-42", vec!["student".to_string()])
            .await
            .unwrap();

        service.refresh(&pair.refresh.token).await.unwrap();
        let result = service.refresh(&pair.refresh.token).await;
        assert!(matches!(result, Err(AuthError::ReplayDetected)));
    }

    #[tokio::test]
    async fn test_concurrent_refresh_has_exactly_one_winner() {
        let service = Arc::new(test_service());
        let pair = service
            .issue_pair("student-42", vec!["student".to_string()])
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            service.refresh(&pair.refresh.token),
            service.refresh(&pair.refresh.token)
        );
        let successes = usize::from(a.is_ok()) + usize::from(b.is_ok());
        assert_eq!(successes, 1);

        // Depending on interleaving the loser sees the blacklist entry or
        // the already-deleted metadata; either way it is rejected.
        let loser = if a.is_err() { a } else { b };
        assert!(loser.unwrap_err().is_authentication_error());
    }

    #[tokio::test]
    async fn test_replay_revokes_whole_token_set() {
        let service = test_service();
        let pair = service
            .issue_pair("student-42", vec!["student".to_string()])
            .await
            .unwrap();
        let rotated = service.refresh(&pair.refresh.token).await.unwrap();

        // Replay of the consumed token burns everything, including the
        // freshly rotated pair.
        let result = service.refresh(&pair.refresh.token).await;
        assert!(matches!(result, Err(AuthError::ReplayDetected)));

        let result = service.verify_access(&rotated.access.token).await;
        assert!(matches!(result, Err(AuthError::Revoked)));
        let result = service.refresh(&rotated.refresh.token).await;
        assert!(matches!(result, Err(AuthError::Revoked)));
    }

    #[tokio::test]
    async fn test_tokens_issued_after_subject_revocation_are_valid() {
        let service = test_service();
        let before = service
            .issue_access_token("student-42", vec![])
            .await
            .unwrap();

        service.revoke_all_for_subject("student-42").await.unwrap();

        let result = service.verify_access(&before.token).await;
        assert!(matches!(result, Err(AuthError::Revoked)));

        // Watermark resolution is one second.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let after = service
            .issue_access_token("student-42", vec![])
            .await
            .unwrap();
        service.verify_access(&after.token).await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_rate_limited_after_repeated_failures() {
        let store = Arc::new(MemorySecretStore::new());
        let service = test_service_with(store.clone());
        let pair = service.issue_pair("student-42", vec![]).await.unwrap();
        service.refresh(&pair.refresh.token).await.unwrap();

        // Each replay attempt records a failure; threshold is 3.
        for _ in 0..3 {
            let result = service.refresh(&pair.refresh.token).await;
            assert!(matches!(result, Err(AuthError::ReplayDetected)));
        }
        let result = service.refresh(&pair.refresh.token).await;
        assert!(matches!(result, Err(AuthError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn test_rotation_counter_increments() {
        let store = Arc::new(MemorySecretStore::new());
        let service = test_service_with(store.clone());
        let pair = service.issue_pair("student-42", vec![]).await.unwrap();

        let rotated = service.refresh(&pair.refresh.token).await.unwrap();
        let raw = store
            .get(&format!("token:refresh:{}", rotated.refresh.jti))
            .await
            .unwrap()
            .unwrap();
        let metadata: TokenMetadata = serde_json::from_str(&raw).unwrap();
        assert_eq!(metadata.rotations, 1);
    }
}
