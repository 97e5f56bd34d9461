use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use jambox_collab::RoomError;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{resource} not found")]
    NotFound { resource: &'static str },
    #[error("{0}")]
    Conflict(String),
    #[error("Too many requests, try again later")]
    TooManyRequests,
    #[error("Request timed out")]
    Timeout,
    #[error("Unknown internal error: {0}")]
    Unknown(String),
}

impl ServerError {
    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound { resource: _ } => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.as_status_code(), self.to_string()).into_response()
    }
}

impl From<RoomError> for ServerError {
    fn from(value: RoomError) -> Self {
        match value {
            RoomError::SessionNotFound | RoomError::NotHost => Self::Forbidden(value.to_string()),
            RoomError::AlreadyCreated => Self::TooManyRequests,
            RoomError::AlreadyConnected => Self::Conflict(value.to_string()),
            RoomError::NotFound => Self::NotFound { resource: "Room" },
            RoomError::NoTrack => Self::NotFound { resource: "Track" },
            RoomError::InvalidName(_) | RoomError::InvalidUrl | RoomError::Queue(_) => {
                Self::BadRequest(value.to_string())
            }
        }
    }
}
