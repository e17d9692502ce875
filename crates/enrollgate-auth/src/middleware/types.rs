//! Authenticated request context.

use std::sync::Arc;

use crate::AuthResult;
use crate::error::AuthError;
use crate::token::jwt::TokenClaims;

/// Context attached to a request after successful authentication.
///
/// Claims are wrapped in `Arc` for cheap cloning across async boundaries.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Validated access token claims.
    pub claims: Arc<TokenClaims>,
}

impl AuthContext {
    /// Creates a context from validated claims.
    #[must_use]
    pub fn new(claims: TokenClaims) -> Self {
        Self {
            claims: Arc::new(claims),
        }
    }

    /// Gets the subject identifier.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    /// Gets the token identifier.
    #[must_use]
    pub fn jti(&self) -> &str {
        &self.claims.jti
    }

    /// Gets the roles carried by the token.
    #[must_use]
    pub fn roles(&self) -> &[String] {
        &self.claims.roles
    }

    /// Returns `true` if the subject holds a specific role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.claims.roles.iter().any(|r| r == role)
    }

    /// Returns `true` if the subject holds any of the given roles.
    #[must_use]
    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|role| self.has_role(role))
    }

    /// Fails with `Forbidden` unless the subject holds at least one of the
    /// given roles.
    ///
    /// # Errors
    /// Returns `Forbidden` naming the missing roles.
    pub fn require_any_role(&self, roles: &[&str]) -> AuthResult<()> {
        if self.has_any_role(roles) {
            Ok(())
        } else {
            Err(AuthError::forbidden(format!(
                "requires one of roles: {}",
                roles.join(", ")
            )))
        }
    }
}
