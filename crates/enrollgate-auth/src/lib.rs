//! Authentication and session security for the Enrollgate portal.
//!
//! This crate owns the portal's token lifecycle, TOTP multi-factor
//! authentication, failed-attempt lockouts, and the HTTP middleware that
//! guards protected routes. State that must be visible to every portal
//! instance (token metadata, revocations, MFA records, attempt counters)
//! lives behind the [`store::SecretStore`] trait; the production Redis
//! backend is in the `enrollgate-store-redis` crate.
//!
//! # Architecture
//!
//! - [`token`] - JWT signing plus issuance, verification, revocation, and
//!   refresh rotation with replay detection
//! - [`mfa`] - TOTP enrollment and verification with backup codes and a
//!   recovery key
//! - [`ratelimit`] - per-action failure counters and lockouts
//! - [`middleware`] - axum extractors and error responses
//! - [`directory`] - the lookup seam to the portal's user-management
//!   service
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use enrollgate_auth::config::AuthConfig;
//! use enrollgate_auth::directory::StaticSubjectDirectory;
//! use enrollgate_auth::ratelimit::AttemptTracker;
//! use enrollgate_auth::store::MemorySecretStore;
//! use enrollgate_auth::token::{JwtService, SigningKeyPair, TokenService};
//!
//! let config = AuthConfig::default();
//! config.validate()?;
//!
//! let store = Arc::new(MemorySecretStore::new());
//! let attempts = Arc::new(AttemptTracker::new(store.clone(), config.rate_limit.clone()));
//! let jwt = Arc::new(JwtService::new(
//!     SigningKeyPair::generate_ec()?,
//!     &config.tokens.issuer,
//!     &config.tokens.audience,
//! ));
//! let directory = Arc::new(StaticSubjectDirectory::new(vec!["student".into()]));
//! let tokens = TokenService::new(jwt, store, directory, attempts, config.tokens.clone());
//!
//! let pair = tokens.issue_pair("student-42", vec!["student".into()]).await?;
//! let claims = tokens.verify_access(&pair.access.token).await?;
//! ```

pub mod config;
pub mod directory;
pub mod error;
pub mod mfa;
pub mod middleware;
pub mod ratelimit;
pub mod store;
pub mod token;

pub use config::AuthConfig;
pub use directory::{SubjectDirectory, SubjectRecord};
pub use error::AuthError;
pub use mfa::{MfaService, MfaSetup, SecretCipher};
pub use middleware::{AuthContext, AuthState, BearerAuth};
pub use ratelimit::{AttemptAction, AttemptTracker};
pub use store::SecretStore;
pub use token::{IssuedToken, TokenClaims, TokenPair, TokenService, TokenUse};

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;
