//! Common error types for Slothboard
//!
//! Every rejection maps to one of four classes which drive both HTTP
//! status selection and client retry behavior:
//! - Validation: bad input shape/value, no retry
//! - Conflict: duplicate vote, stale version, wrong state; resubmit with fresh state
//! - Transient: persistence/transport failure; retry with the same request id
//! - Fatal: invariant violation; channel is torn down, subscribers resync

use thiserror::Error;

/// Common result type for Slothboard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad error class, used to pick HTTP status and retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Conflict,
    Transient,
    Fatal,
}

/// Error types across the Slothboard realtime core
#[derive(Error, Debug)]
pub enum Error {
    /// No member credential and no guest join form supplied
    #[error("identity required: supply a member token or a join form")]
    IdentityRequired,

    /// Vote value outside the permitted point scale
    #[error("invalid vote value: {0} is not on the point scale")]
    InvalidValue(u32),

    /// Identity already has a vote in this session
    #[error("duplicate vote: identity already voted in session {0}")]
    DuplicateVote(uuid::Uuid),

    /// A collecting session already exists for this board item
    #[error("a collecting session already exists for board item {0}")]
    SessionAlreadyActive(uuid::Uuid),

    /// Session is not accepting this operation any more
    #[error("session {0} is closed to this operation")]
    SessionClosed(uuid::Uuid),

    /// Requester is not the session moderator
    #[error("only the moderator may perform this operation")]
    NotModerator,

    /// Proposed mutation was based on a stale item version
    #[error("stale version for item {item_id}: proposed {proposed}, current {current}")]
    StaleVersion {
        item_id: uuid::Uuid,
        proposed: i64,
        current: i64,
    },

    /// Subtask move targets a lane under a different parent story
    #[error("cross-parent move rejected for subtask {0}")]
    CrossParentMoveRejected(uuid::Uuid),

    /// Requested resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration loading or validation error
    #[error("configuration error: {0}")]
    Config(String),

    /// Database operation error (wraps sqlx::Error)
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel corruption or invariant violation
    #[error("fatal: {0}")]
    Fatal(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify this error for status mapping and retry policy
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::IdentityRequired
            | Error::InvalidValue(_)
            | Error::InvalidInput(_)
            | Error::NotFound(_) => ErrorClass::Validation,

            Error::DuplicateVote(_)
            | Error::SessionAlreadyActive(_)
            | Error::SessionClosed(_)
            | Error::NotModerator
            | Error::StaleVersion { .. }
            | Error::CrossParentMoveRejected(_) => ErrorClass::Conflict,

            Error::Database(_) | Error::Io(_) => ErrorClass::Transient,

            Error::Config(_) | Error::Fatal(_) | Error::Internal(_) => ErrorClass::Fatal,
        }
    }

    /// Stable machine-readable code for the wire
    pub fn code(&self) -> &'static str {
        match self {
            Error::IdentityRequired => "IdentityRequired",
            Error::InvalidValue(_) => "InvalidValue",
            Error::DuplicateVote(_) => "DuplicateVote",
            Error::SessionAlreadyActive(_) => "SessionAlreadyActive",
            Error::SessionClosed(_) => "SessionClosed",
            Error::NotModerator => "NotModerator",
            Error::StaleVersion { .. } => "StaleVersion",
            Error::CrossParentMoveRejected(_) => "CrossParentMoveRejected",
            Error::NotFound(_) => "NotFound",
            Error::InvalidInput(_) => "InvalidInput",
            Error::Config(_) => "Config",
            Error::Database(_) => "Database",
            Error::Io(_) => "Io",
            Error::Fatal(_) => "Fatal",
            Error::Internal(_) => "Internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_class_covers_state_machine_rejections() {
        let id = uuid::Uuid::new_v4();
        for err in [
            Error::DuplicateVote(id),
            Error::SessionAlreadyActive(id),
            Error::SessionClosed(id),
            Error::NotModerator,
            Error::StaleVersion {
                item_id: id,
                proposed: 1,
                current: 2,
            },
            Error::CrossParentMoveRejected(id),
        ] {
            assert_eq!(err.class(), ErrorClass::Conflict, "{err}");
        }
    }

    #[test]
    fn test_validation_class() {
        assert_eq!(Error::IdentityRequired.class(), ErrorClass::Validation);
        assert_eq!(Error::InvalidValue(4).class(), ErrorClass::Validation);
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::NotModerator.code(), "NotModerator");
        assert_eq!(
            Error::CrossParentMoveRejected(uuid::Uuid::new_v4()).code(),
            "CrossParentMoveRejected"
        );
    }
}
