//! HTTP authentication middleware.
//!
//! Axum extractors for protecting portal routes, the request context they
//! attach, and the `IntoResponse` mapping for [`AuthError`](crate::error::AuthError).

mod auth;
mod error;
mod types;

pub use auth::{AdminAuth, AuthState, BearerAuth};
pub use types::AuthContext;
