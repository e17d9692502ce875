//! Subject directory collaborator.
//!
//! Account records, passwords, and role assignments live in a separate
//! user-management service. This subsystem only needs to re-resolve a
//! subject's current roles when exchanging a refresh token, so grants are
//! never frozen for a full refresh lifetime.

use async_trait::async_trait;

use crate::AuthResult;

/// A subject as seen by this subsystem: an identifier and its current roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectRecord {
    /// Account identifier (the token `sub` claim).
    pub subject: String,
    /// Role names currently granted.
    pub roles: Vec<String>,
}

/// Lookup interface to the portal's user-management service.
///
/// # Errors
///
/// Implementations return `Unauthorized` for subjects that no longer exist
/// or are disabled, and `StoreUnavailable` for connectivity failures.
#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    /// Resolves a subject's current record.
    async fn lookup_subject(&self, subject: &str) -> AuthResult<SubjectRecord>;
}

/// Fixed-answer directory for tests and single-role deployments.
pub struct StaticSubjectDirectory {
    roles: Vec<String>,
}

impl StaticSubjectDirectory {
    /// Creates a directory that grants every subject the given roles.
    #[must_use]
    pub fn new(roles: Vec<String>) -> Self {
        Self { roles }
    }
}

#[async_trait]
impl SubjectDirectory for StaticSubjectDirectory {
    async fn lookup_subject(&self, subject: &str) -> AuthResult<SubjectRecord> {
        Ok(SubjectRecord {
            subject: subject.to_string(),
            roles: self.roles.clone(),
        })
    }
}
