use thiserror::Error;
use warp::http::StatusCode;

/// Custom error types for the room & quiz coordinator
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Validation errors: bad input, never retried
    #[error("Invalid display name: {0}")]
    InvalidName(String),

    #[error("Invalid room code: {0}")]
    InvalidCode(String),

    #[error("Invalid question set: {0}")]
    InvalidQuestions(String),

    /// Room lifecycle errors
    #[error("Room {0} not found")]
    RoomNotFound(String),

    #[error("Room {0} has ended")]
    RoomEnded(String),

    /// Authorization errors
    #[error("Missing or invalid host credential: {0}")]
    Unauthorized(String),

    #[error("Operation not permitted: {0}")]
    Forbidden(String),

    #[error("Invalid room token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    /// Lost a concurrency race on a room transition; caller may re-fetch and retry once
    #[error("Stale room state: {0}")]
    StaleState(String),

    /// Answer rejection outcomes: normal rejected results, not faults
    #[error("Answer targets question {got}, current question is {current}")]
    NotCurrentQuestion { got: String, current: String },

    #[error("Answer arrived at or after the question deadline")]
    DeadlinePassed,

    #[error("An answer for this question was already recorded")]
    DuplicateAnswer,

    #[error("Quiz for room {0} is not accepting answers")]
    QuizNotActive(String),

    /// Backing store / transport unreachable within the latency bound
    #[error("Backing store unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Convenience type alias for Results using CoordinatorError
pub type Result<T> = std::result::Result<T, CoordinatorError>;

impl CoordinatorError {
    /// Helper to create StaleState errors with context
    pub fn stale(msg: impl Into<String>) -> Self {
        CoordinatorError::StaleState(msg.into())
    }

    /// Helper to create Unavailable errors with context
    pub fn unavailable(msg: impl Into<String>) -> Self {
        CoordinatorError::Unavailable(msg.into())
    }

    /// Machine-readable reason string carried in WebSocket acks
    pub fn reason(&self) -> &'static str {
        match self {
            CoordinatorError::InvalidName(_) => "invalid-name",
            CoordinatorError::InvalidCode(_) => "invalid-code",
            CoordinatorError::InvalidQuestions(_) => "invalid-questions",
            CoordinatorError::RoomNotFound(_) => "room-not-found",
            CoordinatorError::RoomEnded(_) => "room-ended",
            CoordinatorError::Unauthorized(_) => "unauthorized",
            CoordinatorError::Forbidden(_) => "forbidden",
            CoordinatorError::InvalidToken(_) => "invalid-token",
            CoordinatorError::StaleState(_) => "stale-state",
            CoordinatorError::NotCurrentQuestion { .. } => "not-current-question",
            CoordinatorError::DeadlinePassed => "deadline-passed",
            CoordinatorError::DuplicateAnswer => "duplicate",
            CoordinatorError::QuizNotActive(_) => "quiz-not-active",
            CoordinatorError::Unavailable(_) => "unavailable",
            CoordinatorError::SerializationFailed(_) => "internal",
        }
    }

    /// HTTP status mapping used by the REST routes
    pub fn http_status(&self) -> StatusCode {
        match self {
            CoordinatorError::InvalidName(_)
            | CoordinatorError::InvalidCode(_)
            | CoordinatorError::InvalidQuestions(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::RoomNotFound(_) => StatusCode::NOT_FOUND,
            CoordinatorError::RoomEnded(_) => StatusCode::GONE,
            CoordinatorError::Unauthorized(_) | CoordinatorError::InvalidToken(_) => {
                StatusCode::UNAUTHORIZED
            }
            CoordinatorError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoordinatorError::StaleState(_)
            | CoordinatorError::NotCurrentQuestion { .. }
            | CoordinatorError::DeadlinePassed
            | CoordinatorError::DuplicateAnswer
            | CoordinatorError::QuizNotActive(_) => StatusCode::CONFLICT,
            CoordinatorError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoordinatorError::SerializationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
