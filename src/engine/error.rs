use ulid::Ulid;

use crate::model::Coordinate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    InvalidCoordinate(Coordinate),
    /// The coordinate is held by this booking.
    Conflict(Ulid),
    NotFound(Ulid),
    /// A payment referenced a booking that is not live.
    BookingNotFound(Ulid),
    InvalidAuthorization,
    Validation(&'static str),
    InvalidQuery(&'static str),
    LimitExceeded(&'static str),
    StorageUnavailable(String),
    Internal(String),
}

impl EngineError {
    /// Only storage failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StorageUnavailable(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidCoordinate(c) => write!(f, "no such bed: floor {}, room {}, bed {}", c.floor, c.room, c.bed),
            EngineError::Conflict(id) => write!(f, "bed already occupied by booking {id}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::InvalidAuthorization => write!(f, "invalid payment authorization code"),
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::InvalidQuery(msg) => write!(f, "invalid query: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StorageUnavailable(e) => write!(f, "storage unavailable: {e}"),
            EngineError::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
