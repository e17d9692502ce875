//! TOTP multi-factor authentication.
//!
//! Setup issues a TOTP secret (SHA-1; digits and step per [`MfaConfig`],
//! 6 digits / 30 seconds by default), an otpauth provisioning URI,
//! single-use backup codes, and a recovery key. The secret is encrypted at
//! rest; backup codes and the recovery key are stored as SHA-256 hashes
//! only, so the record never reveals a credential. Code comparison is
//! constant-time.
//!
//! Verification accepts a configured number of steps of clock drift either
//! side of now. Every check runs the rate limiter first, so a locked-out
//! subject learns nothing about code validity.

use std::sync::Arc;

use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use totp_rs::{Algorithm, TOTP};
use tracing::{debug, warn};

use crate::AuthResult;
use crate::config::MfaConfig;
use crate::error::AuthError;
use crate::mfa::crypto::{CipherError, SecretCipher};
use crate::ratelimit::{AttemptAction, AttemptTracker};
use crate::store::SecretStore;

/// Everything handed to the subject at enrollment. Backup codes and the
/// recovery key are shown exactly once; only their hashes persist.
#[derive(Debug, Clone)]
pub struct MfaSetup {
    /// Base32-encoded TOTP secret for manual entry.
    pub secret: String,

    /// otpauth:// provisioning URI for authenticator apps.
    pub otpauth_url: String,

    /// Single-use backup codes.
    pub backup_codes: Vec<String>,

    /// Recovery key that can disable MFA without a live code.
    pub recovery_key: String,
}

/// Stored MFA record, keyed by subject.
#[derive(Debug, Serialize, Deserialize)]
struct MfaRecord {
    /// Encrypted TOTP secret (see [`SecretCipher`]).
    secret: String,
    /// SHA-256 hashes of the backup codes.
    backup_codes: Vec<String>,
    /// SHA-256 hash of the recovery key.
    recovery_key: String,
    /// Enrollment time (Unix timestamp).
    enabled_at: i64,
}

/// Service managing TOTP enrollment and verification.
pub struct MfaService {
    store: Arc<dyn SecretStore>,
    cipher: SecretCipher,
    attempts: Arc<AttemptTracker>,
    config: MfaConfig,
}

impl MfaService {
    /// Creates a new MFA service.
    #[must_use]
    pub fn new(
        store: Arc<dyn SecretStore>,
        cipher: SecretCipher,
        attempts: Arc<AttemptTracker>,
        config: MfaConfig,
    ) -> Self {
        Self {
            store,
            cipher,
            attempts,
            config,
        }
    }

    fn record_key(subject: &str) -> String {
        format!("mfa:secret:{subject}")
    }

    fn used_key(subject: &str, code_hash: &str) -> String {
        format!("mfa:used:{subject}:{code_hash}")
    }

    fn cipher_error(err: CipherError) -> AuthError {
        AuthError::signing(err.to_string())
    }

    fn totp(&self, account_name: &str, secret: Vec<u8>) -> AuthResult<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            self.config.digits,
            1,
            self.config.step.as_secs(),
            secret,
            Some(self.config.issuer.clone()),
            account_name.to_string(),
        )
        .map_err(|e| AuthError::signing(format!("TOTP construction failed: {e}")))
    }

    async fn load_record(&self, subject: &str) -> AuthResult<MfaRecord> {
        let raw = self
            .store
            .get(&Self::record_key(subject))
            .await?
            .ok_or(AuthError::NotEnabled)?;
        serde_json::from_str(&raw)
            .map_err(|e| AuthError::store_unavailable(format!("corrupt MFA record: {e}")))
    }

    /// Returns whether the subject has MFA enabled.
    ///
    /// # Errors
    /// Returns `StoreUnavailable` if the store cannot be reached.
    pub async fn is_enabled(&self, subject: &str) -> AuthResult<bool> {
        Ok(self.store.get(&Self::record_key(subject)).await?.is_some())
    }

    /// Enrolls a subject in MFA.
    ///
    /// `identity_label` is the human-readable account name shown in
    /// authenticator apps (typically the subject's email address); the
    /// opaque subject id never appears in the provisioning URI.
    ///
    /// # Errors
    /// Returns `AlreadyEnabled` if the subject has an MFA record, `Signing`
    /// on crypto failure, `StoreUnavailable` on store failure.
    pub async fn set_up(&self, subject: &str, identity_label: &str) -> AuthResult<MfaSetup> {
        if self.is_enabled(subject).await? {
            return Err(AuthError::AlreadyEnabled);
        }

        // 160-bit secret per the TOTP recommendation for SHA-1.
        let mut secret_bytes = vec![0u8; 20];
        OsRng.fill_bytes(&mut secret_bytes);
        let totp = self.totp(identity_label, secret_bytes.clone())?;

        let backup_codes: Vec<String> = (0..self.config.backup_code_count)
            .map(|_| generate_backup_code(self.config.backup_code_length))
            .collect();
        let recovery_key = generate_recovery_key();

        let record = MfaRecord {
            secret: self
                .cipher
                .encrypt(&secret_bytes)
                .map_err(Self::cipher_error)?,
            backup_codes: backup_codes.iter().map(|c| sha256_hex(c)).collect(),
            recovery_key: sha256_hex(&recovery_key),
            enabled_at: OffsetDateTime::now_utc().unix_timestamp(),
        };
        let raw = serde_json::to_string(&record)
            .map_err(|e| AuthError::signing(format!("record serialization failed: {e}")))?;

        // Conditional set so two concurrent enrollments produce one record.
        let created = self
            .store
            .put_if_absent(&Self::record_key(subject), &raw, None)
            .await?;
        if !created {
            return Err(AuthError::AlreadyEnabled);
        }

        debug!(subject, "MFA enrolled");

        Ok(MfaSetup {
            secret: totp.get_secret_base32(),
            otpauth_url: totp.get_url(),
            backup_codes,
            recovery_key,
        })
    }

    /// Verifies a TOTP or backup code for the subject.
    ///
    /// Returns `Ok(true)` on a valid code, `Ok(false)` on a wrong, reused,
    /// or expired one. Failures count toward the MFA lockout; success
    /// clears the counter.
    ///
    /// # Errors
    /// Returns `RateLimited` if the subject is locked out, `NotEnabled` if
    /// no MFA record exists, `StoreUnavailable` on store failure.
    pub async fn verify(&self, subject: &str, code: &str) -> AuthResult<bool> {
        let now = OffsetDateTime::now_utc().unix_timestamp().max(0) as u64;
        self.verify_at(subject, code, now).await
    }

    async fn verify_at(&self, subject: &str, code: &str, now: u64) -> AuthResult<bool> {
        self.attempts.check(AttemptAction::Mfa, subject).await?;

        let record = self.load_record(subject).await?;
        let secret = self
            .cipher
            .decrypt(&record.secret)
            .map_err(Self::cipher_error)?;
        let totp = self.totp(subject, secret)?;

        let step = self.config.step.as_secs();
        let mut timestamps = vec![now];
        for offset in 1..=self.config.drift_steps {
            timestamps.push(now.saturating_sub(offset * step));
            timestamps.push(now + offset * step);
        }
        for ts in timestamps {
            if ct_eq(&totp.generate(ts), code) {
                self.attempts.reset(AttemptAction::Mfa, subject).await?;
                return Ok(true);
            }
        }

        if self.redeem_backup_code(subject, &record, code).await? {
            self.attempts.reset(AttemptAction::Mfa, subject).await?;
            return Ok(true);
        }

        self.attempts
            .record_failure(AttemptAction::Mfa, subject)
            .await?;
        Ok(false)
    }

    async fn redeem_backup_code(
        &self,
        subject: &str,
        record: &MfaRecord,
        code: &str,
    ) -> AuthResult<bool> {
        let hash = sha256_hex(code);
        for stored in &record.backup_codes {
            if ct_eq(stored, &hash) {
                // Conditional set on the used-marker: exactly one
                // redemption of a given code wins.
                let fresh = self
                    .store
                    .put_if_absent(&Self::used_key(subject, &hash), "1", None)
                    .await?;
                if fresh {
                    debug!(subject, "backup code consumed");
                }
                return Ok(fresh);
            }
        }
        Ok(false)
    }

    /// Deletes the consumed-code markers so nothing outlives the record.
    async fn clear_used_markers(&self, subject: &str, record: &MfaRecord) -> AuthResult<()> {
        for hash in &record.backup_codes {
            self.store.delete(&Self::used_key(subject, hash)).await?;
        }
        Ok(())
    }

    /// Disables MFA, requiring a valid live code as proof of possession.
    ///
    /// # Errors
    /// Returns `Unauthorized` if the code is invalid, plus everything
    /// [`MfaService::verify`] can return.
    pub async fn disable(&self, subject: &str, code: &str) -> AuthResult<()> {
        if !self.verify(subject, code).await? {
            return Err(AuthError::unauthorized("invalid MFA code"));
        }
        let record = self.load_record(subject).await?;
        self.store.delete(&Self::record_key(subject)).await?;
        self.clear_used_markers(subject, &record).await?;
        debug!(subject, "MFA disabled");
        Ok(())
    }

    /// Disables MFA using the recovery key issued at enrollment.
    ///
    /// # Errors
    /// Returns `Unauthorized` if the key does not match, `NotEnabled` if no
    /// record exists, `RateLimited` if the subject is locked out.
    pub async fn disable_with_recovery_key(
        &self,
        subject: &str,
        recovery_key: &str,
    ) -> AuthResult<()> {
        self.attempts.check(AttemptAction::Mfa, subject).await?;

        let record = self.load_record(subject).await?;
        if !ct_eq(&record.recovery_key, &sha256_hex(recovery_key)) {
            self.attempts
                .record_failure(AttemptAction::Mfa, subject)
                .await?;
            return Err(AuthError::unauthorized("invalid recovery key"));
        }

        self.store.delete(&Self::record_key(subject)).await?;
        self.clear_used_markers(subject, &record).await?;
        self.attempts.reset(AttemptAction::Mfa, subject).await?;
        warn!(subject, "MFA disabled via recovery key");
        Ok(())
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

fn ct_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn generate_backup_code(length: usize) -> String {
    let mut bytes = vec![0u8; length.div_ceil(2)];
    OsRng.fill_bytes(&mut bytes);
    let mut code = hex::encode(bytes);
    code.truncate(length);
    code
}

fn generate_recovery_key() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
