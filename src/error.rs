//! Error kinds surfaced by the core services.
//!
//! ERROR HANDLING
//! ==============
//! Every failure is per-operation and recoverable. Callers get a typed
//! `CoreError`; transports turn it into an error frame (`Frame::error_from`)
//! or an HTTP status plus `{code, message}` body. Only database failures
//! are flagged retryable.

use uuid::Uuid;

use crate::frame::ErrorCode;

// =============================================================================
// STORE ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("duplicate chat sequence {seq} in scope {scope_id}")]
    DuplicateSequence { scope_id: Uuid, seq: i64 },
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        "E_STORE"
    }

    /// Corrupt rows, sequence collisions and migrations fail identically on
    /// every retry.
    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

// =============================================================================
// CORE ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
    #[error("request {0} already claimed by another provider")]
    AlreadyClaimed(Uuid),
    #[error("user {user_id} may not {action} {target}")]
    Unauthorized { user_id: Uuid, action: &'static str, target: Uuid },
    #[error("scope {0} is closed")]
    ScopeClosed(Uuid),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CoreError {
    /// Build an `Unauthorized` error and write the audit record for it.
    pub fn unauthorized(user_id: Uuid, action: &'static str, target: Uuid) -> Self {
        tracing::warn!(target: "audit", %user_id, action, %target, "unauthorized");
        Self::Unauthorized { user_id, action, target }
    }

    #[must_use]
    pub fn not_found(kind: &'static str, id: Uuid) -> Self {
        Self::NotFound { kind, id }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}

impl ErrorCode for CoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::InvalidTransition { .. } => "E_INVALID_TRANSITION",
            Self::AlreadyClaimed(_) => "E_ALREADY_CLAIMED",
            Self::Unauthorized { .. } => "E_UNAUTHORIZED",
            Self::ScopeClosed(_) => "E_SCOPE_CLOSED",
            Self::NotFound { .. } => "E_NOT_FOUND",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let id = Uuid::new_v4();
        assert_eq!(CoreError::validation("x").error_code(), "E_VALIDATION");
        assert_eq!(
            CoreError::InvalidTransition { from: "cancelled", to: "accepted" }.error_code(),
            "E_INVALID_TRANSITION"
        );
        assert_eq!(CoreError::AlreadyClaimed(id).error_code(), "E_ALREADY_CLAIMED");
        assert_eq!(CoreError::unauthorized(id, "subscribe to", id).error_code(), "E_UNAUTHORIZED");
        assert_eq!(CoreError::ScopeClosed(id).error_code(), "E_SCOPE_CLOSED");
        assert_eq!(CoreError::not_found("request", id).error_code(), "E_NOT_FOUND");
    }

    #[test]
    fn only_database_failures_are_retryable() {
        let id = Uuid::new_v4();
        assert!(!CoreError::AlreadyClaimed(id).retryable());
        assert!(!CoreError::ScopeClosed(id).retryable());
        assert!(CoreError::Store(StoreError::Database(sqlx::Error::PoolTimedOut)).retryable());
        assert!(!CoreError::Store(StoreError::Corrupt("bad status".into())).retryable());
        assert!(!CoreError::Store(StoreError::DuplicateSequence { scope_id: id, seq: 3 }).retryable());
    }

    #[test]
    fn transition_message_names_both_states() {
        let err = CoreError::InvalidTransition { from: "cancelled", to: "accepted" };
        assert_eq!(err.to_string(), "invalid transition: cancelled -> accepted");
    }
}
