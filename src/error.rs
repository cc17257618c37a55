use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError, scoring::ScoringError, state::InvalidTransition,
    timer::TimerError,
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Question source is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<TimerError> for ServiceError {
    fn from(err: TimerError) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

/// Reasons a room refuses an inbound event. Sent back to the sender as an `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomRejection {
    /// The player already has a score for this question.
    #[error("answer already recorded for this question")]
    AlreadyAnswered,
    /// No question is accepting answers, or the answer targets another question.
    #[error("question is not accepting answers")]
    QuestionClosed,
    /// A host-only command came from a non-host connection.
    #[error("only the host can do that")]
    NotHost,
    /// The connection is not attached to a known player.
    #[error("unknown player")]
    UnknownPlayer,
    /// The command is not valid in the current phase.
    #[error("{0}")]
    InvalidTransition(String),
    /// Selected option or question index is out of range.
    #[error("{0}")]
    InvalidOption(String),
    /// Another player already uses the requested name.
    #[error("name already taken in this game")]
    NameTaken,
    /// The game is over.
    #[error("game has ended")]
    GameEnded,
    /// The connection has not joined or created this room.
    #[error("not part of this game")]
    NotInRoom,
    /// No room uses the given code.
    #[error("game not found")]
    RoomNotFound,
    /// The inbound frame could not be parsed or validated.
    #[error("{0}")]
    InvalidMessage(String),
    /// Scoring failed on inputs it should never receive.
    #[error("{0}")]
    Internal(String),
}

impl RoomRejection {
    /// Stable machine-readable code sent in `error` payloads.
    pub fn code(&self) -> &'static str {
        match self {
            RoomRejection::AlreadyAnswered => "alreadyAnswered",
            RoomRejection::QuestionClosed => "questionClosed",
            RoomRejection::NotHost => "notHost",
            RoomRejection::UnknownPlayer => "unknownPlayer",
            RoomRejection::InvalidTransition(_) => "invalidTransition",
            RoomRejection::InvalidOption(_) => "invalidOption",
            RoomRejection::NameTaken => "nameTaken",
            RoomRejection::GameEnded => "gameEnded",
            RoomRejection::NotInRoom => "notInRoom",
            RoomRejection::RoomNotFound => "roomNotFound",
            RoomRejection::InvalidMessage(_) => "invalidMessage",
            RoomRejection::Internal(_) => "internal",
        }
    }
}

impl From<InvalidTransition> for RoomRejection {
    fn from(err: InvalidTransition) -> Self {
        RoomRejection::InvalidTransition(err.to_string())
    }
}

impl From<ScoringError> for RoomRejection {
    fn from(err: ScoringError) -> Self {
        RoomRejection::Internal(err.to_string())
    }
}

impl From<ServiceError> for RoomRejection {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(_) => RoomRejection::RoomNotFound,
            ServiceError::InvalidInput(message) => RoomRejection::InvalidMessage(message),
            ServiceError::InvalidState(message) => RoomRejection::InvalidTransition(message),
            other => RoomRejection::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::response::IntoResponse;

    use super::*;

    #[test]
    fn service_errors_map_to_http_statuses() {
        let cases = [
            (ServiceError::NotFound("room".into()), StatusCode::NOT_FOUND),
            (ServiceError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (ServiceError::InvalidState("x".into()), StatusCode::CONFLICT),
            (ServiceError::Timeout, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn rejection_codes_are_camel_case() {
        assert_eq!(RoomRejection::AlreadyAnswered.code(), "alreadyAnswered");
        assert_eq!(RoomRejection::NotHost.code(), "notHost");
        assert_eq!(
            RoomRejection::from(ServiceError::NotFound("123456".into())).code(),
            "roomNotFound"
        );
    }
}
