use ulid::Ulid;

use crate::timegrid::TimeError;

#[derive(Debug)]
pub enum EngineError {
    /// Business, service, staff member or appointment missing.
    NotFound(Ulid),
    InvalidRequest(String),
    /// The interval is held by this active appointment.
    Conflict(Ulid),
    /// The appointment changed between read and commit.
    Stale(Ulid),
    /// Promotion code failed validation. Deliberately carries no reason.
    InvalidPromotion,
    LimitExceeded(&'static str),
    WalError(String),
}

/// The caller-facing error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidRequest,
    Conflict,
    Invalid,
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::InvalidRequest(_) | EngineError::LimitExceeded(_) => ErrorKind::InvalidRequest,
            EngineError::Conflict(_) | EngineError::Stale(_) => ErrorKind::Conflict,
            EngineError::InvalidPromotion => ErrorKind::Invalid,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidRequest(msg.into())
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::Conflict(id) => write!(f, "conflict with appointment: {id}"),
            EngineError::Stale(id) => write!(f, "appointment {id} was modified concurrently"),
            EngineError::InvalidPromotion => write!(f, "invalid promotion code"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<TimeError> for EngineError {
    fn from(e: TimeError) -> Self {
        EngineError::InvalidRequest(e.to_string())
    }
}
