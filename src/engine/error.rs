use ulid::Ulid;

use crate::identity::AuthError;
use crate::model::TimeOffStatus;
use crate::policy::Operation;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input; names the offending field.
    InvalidFormat(&'static str),
    /// End at or before start.
    InvalidRange,
    NotFound(&'static str, Ulid),
    /// Overlaps the given existing shift.
    Conflict(Ulid),
    AlreadyExists(&'static str),
    InvalidTransition {
        from: TimeOffStatus,
        to: TimeOffStatus,
    },
    PermissionDenied(Operation),
    Auth(AuthError),
    LimitExceeded(&'static str),
    Storage(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidFormat(field) => write!(f, "invalid format: {field}"),
            EngineError::InvalidRange => write!(f, "end time must be after start time"),
            EngineError::NotFound(what, id) => write!(f, "{what} not found: {id}"),
            EngineError::Conflict(id) => write!(f, "shift conflicts with existing shift {id}"),
            EngineError::AlreadyExists(what) => write!(f, "already exists: {what}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot move request from {from} to {to}")
            }
            EngineError::PermissionDenied(op) => write!(f, "permission denied: {op}"),
            EngineError::Auth(e) => write!(f, "{e}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<AuthError> for EngineError {
    fn from(e: AuthError) -> Self {
        EngineError::Auth(e)
    }
}
