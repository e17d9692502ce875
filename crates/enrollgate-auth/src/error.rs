//! Authentication and session-security error types.
//!
//! This module defines all error types that can occur during token,
//! MFA, and rate-limiting operations. Raw store or crypto-library errors
//! are always classified into one of these variants before they reach a
//! caller.

use std::fmt;

/// Errors that can occur during authentication and session-security operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token could not be parsed, carries the wrong type marker, or has
    /// an invalid signature, issuer, or audience.
    #[error("Malformed token: {message}")]
    Malformed {
        /// Description of why the token is malformed.
        message: String,
    },

    /// The token's expiry time has passed.
    #[error("Token expired")]
    Expired,

    /// The token's jti is present on the blacklist, or the subject's token
    /// set has been revoked since the token was issued.
    #[error("Token revoked")]
    Revoked,

    /// No metadata exists for the token's jti. Either the metadata TTL
    /// already lapsed or the token was never issued by this service.
    #[error("Unknown token")]
    UnknownToken,

    /// The stored metadata names a different subject than the token claims.
    #[error("Token subject does not match stored metadata")]
    SubjectMismatch,

    /// Signing or key material failure while issuing a token.
    #[error("Signing error: {message}")]
    Signing {
        /// Description of the signing failure.
        message: String,
    },

    /// A refresh token was presented again after it had already been
    /// exchanged. A fatal security event, not a transient failure.
    #[error("Refresh token replay detected")]
    ReplayDetected,

    /// The actor has exceeded the failure threshold for this action within
    /// the current window.
    #[error("Rate limited: {action}")]
    RateLimited {
        /// The action that was rate limited.
        action: String,
    },

    /// MFA setup was requested for a subject that already has MFA active.
    #[error("MFA already enabled")]
    AlreadyEnabled,

    /// An MFA operation was requested for a subject without MFA enabled.
    #[error("MFA not enabled")]
    NotEnabled,

    /// The shared key-value store could not be reached or answered with a
    /// protocol error. Infrastructure-fatal: distinguishes "cannot check
    /// token" from "token invalid".
    #[error("Secret store unavailable: {message}")]
    StoreUnavailable {
        /// Description of the store failure.
        message: String,
    },

    /// The request lacks valid authentication credentials.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Description of why the request is unauthorized.
        message: String,
    },

    /// The authenticated identity does not hold any of the required roles.
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Description of why access is forbidden.
        message: String,
    },

    /// The request itself is malformed (e.g. a broken authorization header).
    #[error("Bad request: {message}")]
    BadRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The auth configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `Malformed` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Creates a new `Signing` error.
    #[must_use]
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }

    /// Creates a new `RateLimited` error for the given action.
    #[must_use]
    pub fn rate_limited(action: impl Into<String>) -> Self {
        Self::RateLimited {
            action: action.into(),
        }
    }

    /// Creates a new `StoreUnavailable` error.
    #[must_use]
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a new `Forbidden` error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a new `BadRequest` error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` if this failure means the presented credential is bad,
    /// as opposed to the service being unable to check it.
    #[must_use]
    pub fn is_authentication_error(&self) -> bool {
        matches!(
            self,
            Self::Malformed { .. }
                | Self::Expired
                | Self::Revoked
                | Self::UnknownToken
                | Self::SubjectMismatch
                | Self::ReplayDetected
                | Self::Unauthorized { .. }
        )
    }

    /// Returns `true` if this error is infrastructure-fatal and should
    /// trigger upstream circuit-breaking rather than a 4xx response.
    #[must_use]
    pub fn is_infrastructure_error(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::Signing { .. } | Self::Configuration { .. }
        )
    }

    /// Returns `true` if this is a security event that warrants proactive
    /// containment beyond failing the request.
    #[must_use]
    pub fn is_security_event(&self) -> bool {
        matches!(self, Self::ReplayDetected)
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Malformed { .. }
            | Self::Expired
            | Self::Revoked
            | Self::UnknownToken
            | Self::SubjectMismatch => ErrorCategory::Token,
            Self::Signing { .. } => ErrorCategory::Signing,
            Self::ReplayDetected => ErrorCategory::Security,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::AlreadyEnabled | Self::NotEnabled => ErrorCategory::Mfa,
            Self::StoreUnavailable { .. } => ErrorCategory::Infrastructure,
            Self::Unauthorized { .. } | Self::BadRequest { .. } => ErrorCategory::Authentication,
            Self::Forbidden { .. } => ErrorCategory::Authorization,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }
}

/// Categories of session-security errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Token validation errors (signature, expiry, revocation).
    Token,
    /// Signing/key material errors.
    Signing,
    /// Security events requiring containment (replay).
    Security,
    /// Rate-limit rejections.
    RateLimit,
    /// MFA lifecycle errors.
    Mfa,
    /// Shared-store infrastructure errors.
    Infrastructure,
    /// Request-level authentication errors.
    Authentication,
    /// Role/permission errors.
    Authorization,
    /// Configuration errors.
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token => write!(f, "token"),
            Self::Signing => write!(f, "signing"),
            Self::Security => write!(f, "security"),
            Self::RateLimit => write!(f, "rate-limit"),
            Self::Mfa => write!(f, "mfa"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}
