//! Bearer token authentication extractors.
//!
//! `BearerAuth` validates the `Authorization: Bearer` header on protected
//! routes and attaches an [`AuthContext`]. The client IP's lockout status
//! is checked before the token is touched, and verification failures feed
//! the login attempt counter for that IP.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use enrollgate_auth::middleware::{AuthState, BearerAuth};
//!
//! async fn protected_handler(BearerAuth(auth): BearerAuth) -> String {
//!     format!("Hello, {}!", auth.subject())
//! }
//!
//! let app = Router::new()
//!     .route("/enrollments", get(protected_handler))
//!     .with_state(auth_state);
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRef, FromRequestParts};
use axum::http::{header::AUTHORIZATION, request::Parts};

use crate::error::AuthError;
use crate::ratelimit::{AttemptAction, AttemptTracker};
use crate::token::TokenService;

use super::types::AuthContext;

// =============================================================================
// Auth State
// =============================================================================

/// State required by the authentication extractors.
///
/// Include this in the application state and expose it via `FromRef`:
///
/// ```ignore
/// #[derive(Clone)]
/// struct AppState {
///     auth: AuthState,
/// }
///
/// impl FromRef<AppState> for AuthState {
///     fn from_ref(state: &AppState) -> Self {
///         state.auth.clone()
///     }
/// }
/// ```
#[derive(Clone)]
pub struct AuthState {
    /// Token service for verification.
    pub token_service: Arc<TokenService>,

    /// Attempt tracker for login lockouts.
    pub attempts: Arc<AttemptTracker>,

    /// Path prefixes that skip authentication entirely.
    public_paths: Arc<Vec<String>>,
}

impl AuthState {
    /// Creates a new auth state with no public paths.
    #[must_use]
    pub fn new(token_service: Arc<TokenService>, attempts: Arc<AttemptTracker>) -> Self {
        Self {
            token_service,
            attempts,
            public_paths: Arc::new(Vec::new()),
        }
    }

    /// Sets the path prefixes exempt from authentication (health checks,
    /// the login endpoint itself, the JWKS document).
    #[must_use]
    pub fn with_public_paths(mut self, paths: Vec<String>) -> Self {
        self.public_paths = Arc::new(paths);
        self
    }

    /// Returns `true` if the path matches a public prefix. Router wiring
    /// consults this to leave public routes unguarded.
    #[must_use]
    pub fn is_public_path(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| path.starts_with(p))
    }
}

// =============================================================================
// Bearer Auth Extractor
// =============================================================================

/// Axum extractor that validates Bearer tokens and attaches auth context.
///
/// This extractor:
/// 1. Resolves the client IP and rejects locked-out addresses
/// 2. Parses the `Authorization: Bearer <token>` header
/// 3. Verifies the token (signature, expiry, revocation, metadata)
/// 4. Records the outcome against the IP's failure counter
///
/// # Errors
///
/// Returns `AuthError` (which implements `IntoResponse`) on a missing or
/// broken header, an invalid token, or a rate-limited address.
pub struct BearerAuth(pub AuthContext);

impl<S> FromRequestParts<S> for BearerAuth
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = AuthState::from_ref(state);
        let ip = client_ip(parts);

        // Locked-out addresses learn nothing about token validity.
        auth_state.attempts.check(AttemptAction::Login, &ip).await?;

        let token = bearer_token(parts)?;

        match auth_state.token_service.verify_access(token).await {
            Ok(claims) => {
                auth_state.attempts.reset(AttemptAction::Login, &ip).await?;
                let context = AuthContext::new(claims);
                tracing::debug!(
                    subject = context.subject(),
                    jti = context.jti(),
                    "request authenticated"
                );
                Ok(BearerAuth(context))
            }
            Err(err) => {
                if err.is_authentication_error() {
                    auth_state
                        .attempts
                        .record_failure(AttemptAction::Login, &ip)
                        .await?;
                }
                Err(err)
            }
        }
    }
}

// =============================================================================
// Admin Auth Extractor
// =============================================================================

/// Extractor for routes restricted to portal administrators.
///
/// Runs the full `BearerAuth` flow, then requires the `admin` role.
pub struct AdminAuth(pub AuthContext);

impl<S> FromRequestParts<S> for AdminAuth
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let BearerAuth(context) = BearerAuth::from_request_parts(parts, state).await?;
        context.require_any_role(&["admin"])?;
        Ok(AdminAuth(context))
    }
}

// =============================================================================
// Request Helpers
// =============================================================================

/// Resolves the client IP: first hop of `X-Forwarded-For` when present,
/// otherwise the connection's peer address.
fn client_ip(parts: &Parts) -> String {
    if let Some(forwarded) = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |ci| ci.0.ip().to_string())
}

fn bearer_token(parts: &Parts) -> Result<&str, AuthError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AuthError::unauthorized("missing Authorization header"))?;
    let header = header
        .to_str()
        .map_err(|_| AuthError::bad_request("Authorization header is not valid UTF-8"))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AuthError::bad_request("Authorization header is not a Bearer token"))?;
    if token.is_empty() {
        return Err(AuthError::bad_request("empty Bearer token"));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    use crate::config::{RateLimitConfig, TokenConfig};
    use crate::directory::StaticSubjectDirectory;
    use crate::store::MemorySecretStore;
    use crate::token::jwt::{JwtService, SigningKeyPair};

    fn parts_with_headers(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/enrollments");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn test_state() -> AuthState {
        let store = Arc::new(MemorySecretStore::new());
        let attempts = Arc::new(AttemptTracker::new(store.clone(), RateLimitConfig::default()));
        let jwt = Arc::new(JwtService::new(
            SigningKeyPair::generate_ec().unwrap(),
            "https://auth.example.edu",
            "portal",
        ));
        let token_service = Arc::new(TokenService::new(
            jwt,
            store,
            Arc::new(StaticSubjectDirectory::new(vec!["student".to_string()])),
            attempts.clone(),
            TokenConfig::default(),
        ));
        AuthState::new(token_service, attempts)
    }

    #[test]
    fn test_bearer_token_parsing() {
        let parts = parts_with_headers(&[("authorization", "Bearer abc.def.ghi")]);
        assert_eq!(bearer_token(&parts).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn test_missing_header_is_unauthorized() {
        let parts = parts_with_headers(&[]);
        let result = bearer_token(&parts);
        assert!(matches!(result, Err(AuthError::Unauthorized { .. })));
    }

    #[test]
    fn test_broken_header_is_bad_request() {
        let parts = parts_with_headers(&[("authorization", "Basic dXNlcjpwYXNz")]);
        assert!(matches!(
            bearer_token(&parts),
            Err(AuthError::BadRequest { .. })
        ));

        let parts = parts_with_headers(&[("authorization", "Bearer ")]);
        assert!(matches!(
            bearer_token(&parts),
            Err(AuthError::BadRequest { .. })
        ));
    }

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let parts = parts_with_headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1")]);
        assert_eq!(client_ip(&parts), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let mut parts = parts_with_headers(&[]);
        parts
            .extensions
            .insert(ConnectInfo::<SocketAddr>("198.51.100.4:55123".parse().unwrap()));
        assert_eq!(client_ip(&parts), "198.51.100.4");
    }

    #[test]
    fn test_client_ip_unknown_without_sources() {
        let parts = parts_with_headers(&[]);
        assert_eq!(client_ip(&parts), "unknown");
    }

    #[test]
    fn test_public_path_matching() {
        let state = test_state().with_public_paths(vec![
            "/health".to_string(),
            "/auth/login".to_string(),
            "/.well-known/jwks.json".to_string(),
        ]);

        assert!(state.is_public_path("/health"));
        assert!(state.is_public_path("/auth/login"));
        assert!(state.is_public_path("/.well-known/jwks.json"));
        assert!(!state.is_public_path("/enrollments"));
    }

    #[tokio::test]
    async fn test_valid_token_attaches_context() {
        let state = test_state();
        let issued = state
            .token_service
            .issue_access_token("student-42", vec!["student".to_string()])
            .await
            .unwrap();

        let header = format!("Bearer {}", issued.token);
        let mut parts = parts_with_headers(&[
            ("authorization", header.as_str()),
            ("x-forwarded-for", "203.0.113.9"),
        ]);
        let BearerAuth(context) = BearerAuth::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert_eq!(context.subject(), "student-42");
        assert!(context.has_role("student"));
    }

    #[tokio::test]
    async fn test_repeated_bad_tokens_lock_out_the_ip() {
        let state = test_state();

        // Default threshold is five failures per address.
        for _ in 0..5 {
            let mut parts = parts_with_headers(&[
                ("authorization", "Bearer not.a.jwt"),
                ("x-forwarded-for", "203.0.113.9"),
            ]);
            let result = BearerAuth::from_request_parts(&mut parts, &state).await;
            assert!(matches!(result, Err(AuthError::Malformed { .. })));
        }

        // The sixth attempt is refused before the token is examined: the
        // same bad token now yields RateLimited instead of Malformed.
        let mut parts = parts_with_headers(&[
            ("authorization", "Bearer not.a.jwt"),
            ("x-forwarded-for", "203.0.113.9"),
        ]);
        let result = BearerAuth::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(AuthError::RateLimited { .. })));

        // Other addresses are unaffected.
        let mut parts = parts_with_headers(&[
            ("authorization", "Bearer not.a.jwt"),
            ("x-forwarded-for", "203.0.113.10"),
        ]);
        let result = BearerAuth::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(AuthError::Malformed { .. })));
    }

    #[tokio::test]
    async fn test_successful_auth_resets_ip_counter() {
        let state = test_state();
        let issued = state
            .token_service
            .issue_access_token("student-42", vec![])
            .await
            .unwrap();

        for _ in 0..4 {
            let mut parts = parts_with_headers(&[
                ("authorization", "Bearer not.a.jwt"),
                ("x-forwarded-for", "203.0.113.9"),
            ]);
            let result = BearerAuth::from_request_parts(&mut parts, &state).await;
            assert!(result.is_err());
        }

        let header = format!("Bearer {}", issued.token);
        let mut parts = parts_with_headers(&[
            ("authorization", header.as_str()),
            ("x-forwarded-for", "203.0.113.9"),
        ]);
        assert!(BearerAuth::from_request_parts(&mut parts, &state).await.is_ok());

        // The counter was cleared, so the next failure is the first of a
        // fresh window rather than the fifth.
        let mut parts = parts_with_headers(&[
            ("authorization", "Bearer not.a.jwt"),
            ("x-forwarded-for", "203.0.113.9"),
        ]);
        let result = BearerAuth::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(AuthError::Malformed { .. })));
    }

    #[tokio::test]
    async fn test_admin_auth_requires_role() {
        let state = test_state();

        let issued = state
            .token_service
            .issue_access_token("student-42", vec!["student".to_string()])
            .await
            .unwrap();
        let header = format!("Bearer {}", issued.token);
        let mut parts = parts_with_headers(&[("authorization", header.as_str())]);
        let result = AdminAuth::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(AuthError::Forbidden { .. })));

        let issued = state
            .token_service
            .issue_access_token("registrar-7", vec!["admin".to_string()])
            .await
            .unwrap();
        let header = format!("Bearer {}", issued.token);
        let mut parts = parts_with_headers(&[("authorization", header.as_str())]);
        let AdminAuth(context) = AdminAuth::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert_eq!(context.subject(), "registrar-7");
    }
}
