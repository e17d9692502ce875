//! HTTP response mapping for authentication errors.
//!
//! Every authentication failure returns the same generic body no matter
//! which check failed, so responses never reveal whether a token was
//! expired, revoked, or unknown. The concrete kind is logged together with
//! a correlation id that is echoed to the client for support lookups.

use axum::Json;
use axum::http::{StatusCode, header::WWW_AUTHENTICATE};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use uuid::Uuid;

use crate::error::AuthError;

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let correlation_id = Uuid::new_v4().to_string();
        let (status, message) = response_parts(&self);

        if self.is_security_event() {
            tracing::warn!(
                %correlation_id,
                category = %self.category(),
                error = %self,
                "security event rejected request"
            );
        } else {
            tracing::debug!(
                %correlation_id,
                category = %self.category(),
                error = %self,
                "request rejected"
            );
        }

        let body = Json(json!({
            "error": message,
            "correlation_id": correlation_id,
        }));

        if status == StatusCode::UNAUTHORIZED {
            (status, [(WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

/// Maps an error to its status code and the generic client-facing message.
fn response_parts(err: &AuthError) -> (StatusCode, &'static str) {
    match err {
        // All credential failures collapse into one indistinguishable reply.
        AuthError::Malformed { .. }
        | AuthError::Expired
        | AuthError::Revoked
        | AuthError::UnknownToken
        | AuthError::SubjectMismatch
        | AuthError::ReplayDetected
        | AuthError::Unauthorized { .. } => (StatusCode::UNAUTHORIZED, "authentication failed"),

        AuthError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "too many attempts"),

        AuthError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden"),
        AuthError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad request"),

        AuthError::AlreadyEnabled => (StatusCode::CONFLICT, "MFA already enabled"),
        AuthError::NotEnabled => (StatusCode::BAD_REQUEST, "MFA not enabled"),

        AuthError::StoreUnavailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "service unavailable")
        }
        AuthError::Signing { .. } | AuthError::Configuration { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}
