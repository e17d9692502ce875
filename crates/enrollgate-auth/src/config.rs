//! Authentication subsystem configuration.
//!
//! All tunables are injected through this module; no component reads the
//! process environment directly. Durations deserialize from humantime
//! strings ("15m", "7d"). `AuthConfig::validate` is called once at startup
//! and fails fast on inconsistent settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// Description of the problem.
        message: String,
    },
}

impl ConfigError {
    #[must_use]
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Top-level configuration for the authentication subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Token issuance and validation settings.
    pub tokens: TokenConfig,

    /// TOTP MFA settings.
    pub mfa: MfaConfig,

    /// Failed-attempt thresholds and windows.
    pub rate_limit: RateLimitConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tokens: TokenConfig::default(),
            mfa: MfaConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl AuthConfig {
    /// Validates the full configuration.
    ///
    /// # Errors
    /// Returns an error describing the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tokens.validate()?;
        self.mfa.validate()?;
        self.rate_limit.validate()?;
        Ok(())
    }
}

/// Token issuance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Issuer claim for every minted token.
    pub issuer: String,

    /// Audience claim for every minted token.
    pub audience: String,

    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_lifetime: Duration,

    /// Refresh token lifetime. Also bounds the subject-level revocation
    /// watermark, so it must be at least the access lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_lifetime: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: "https://enrollgate.example.com".to_string(),
            audience: "enrollgate-portal".to_string(),
            access_lifetime: Duration::from_secs(15 * 60),
            refresh_lifetime: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl TokenConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::invalid("token issuer must not be empty"));
        }
        if self.audience.is_empty() {
            return Err(ConfigError::invalid("token audience must not be empty"));
        }
        if self.access_lifetime.is_zero() {
            return Err(ConfigError::invalid("access token lifetime must be > 0"));
        }
        if self.refresh_lifetime < self.access_lifetime {
            return Err(ConfigError::invalid(
                "refresh token lifetime must be >= access token lifetime",
            ));
        }
        Ok(())
    }
}

/// TOTP MFA configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MfaConfig {
    /// Issuer label shown in authenticator apps.
    pub issuer: String,

    /// Code length in digits.
    pub digits: usize,

    /// TOTP time step.
    #[serde(with = "humantime_serde")]
    pub step: Duration,

    /// Steps of clock drift accepted either side of now.
    pub drift_steps: u64,

    /// Number of single-use backup codes issued at setup.
    pub backup_code_count: usize,

    /// Backup code length in hex characters.
    pub backup_code_length: usize,
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self {
            issuer: "Enrollgate".to_string(),
            digits: 6,
            step: Duration::from_secs(30),
            drift_steps: 1,
            backup_code_count: 10,
            backup_code_length: 8,
        }
    }
}

impl MfaConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::invalid("MFA issuer must not be empty"));
        }
        if !(6..=8).contains(&self.digits) {
            return Err(ConfigError::invalid("TOTP digits must be 6 to 8"));
        }
        if self.step.is_zero() {
            return Err(ConfigError::invalid("TOTP step must be > 0"));
        }
        if self.backup_code_count == 0 {
            return Err(ConfigError::invalid("backup code count must be > 0"));
        }
        if self.backup_code_length < 8 {
            return Err(ConfigError::invalid("backup codes must be >= 8 characters"));
        }
        Ok(())
    }
}

/// Per-action failure thresholds and sliding windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Login failures allowed per client IP before blocking.
    pub login_max_failures: u64,

    /// Sliding window for login failures.
    #[serde(with = "humantime_serde")]
    pub login_window: Duration,

    /// MFA code failures allowed per subject before blocking.
    pub mfa_max_failures: u64,

    /// Sliding window for MFA failures.
    #[serde(with = "humantime_serde")]
    pub mfa_window: Duration,

    /// Refresh failures allowed per subject before blocking.
    pub refresh_max_failures: u64,

    /// Sliding window for refresh failures.
    #[serde(with = "humantime_serde")]
    pub refresh_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login_max_failures: 5,
            login_window: Duration::from_secs(15 * 60),
            mfa_max_failures: 5,
            mfa_window: Duration::from_secs(5 * 60),
            refresh_max_failures: 5,
            refresh_window: Duration::from_secs(15 * 60),
        }
    }
}

impl RateLimitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.login_max_failures == 0 || self.mfa_max_failures == 0 || self.refresh_max_failures == 0
        {
            return Err(ConfigError::invalid("failure thresholds must be > 0"));
        }
        if self.login_window.is_zero() || self.mfa_window.is_zero() || self.refresh_window.is_zero()
        {
            return Err(ConfigError::invalid("rate-limit windows must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AuthConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_issuer_rejected() {
        let mut config = AuthConfig::default();
        config.tokens.issuer = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_refresh_shorter_than_access_rejected() {
        let mut config = AuthConfig::default();
        config.tokens.access_lifetime = Duration::from_secs(3600);
        config.tokens.refresh_lifetime = Duration::from_secs(60);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut config = AuthConfig::default();
        config.rate_limit.mfa_max_failures = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_backup_codes_rejected() {
        let mut config = AuthConfig::default();
        config.mfa.backup_code_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_totp_parameters_rejected() {
        let mut config = AuthConfig::default();
        config.mfa.digits = 4;
        assert!(config.validate().is_err());

        let mut config = AuthConfig::default();
        config.mfa.step = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = AuthConfig::default();
        config.mfa.backup_code_length = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_humantime_deserialization() {
        let json = r#"{
            "tokens": {
                "issuer": "https://portal.example.edu",
                "audience": "portal",
                "access_lifetime": "15m",
                "refresh_lifetime": "7d"
            }
        }"#;
        let config: AuthConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.tokens.access_lifetime, Duration::from_secs(900));
        assert_eq!(
            config.tokens.refresh_lifetime,
            Duration::from_secs(7 * 24 * 3600)
        );
        // Unlisted sections fall back to defaults.
        assert_eq!(config.rate_limit.login_max_failures, 5);
        assert!(config.validate().is_ok());
    }
}
