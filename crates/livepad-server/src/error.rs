use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use uuid::Uuid;

use livepad_shared::RoomError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("File not found: {0}")]
    BlobNotFound(Uuid),

    #[error("File size too large: {size} bytes (max {max})")]
    BlobTooLarge { size: usize, max: usize },

    #[error("Upload exceeds the {max} byte limit")]
    PayloadTooLarge { max: usize },

    #[error("Blob storage error: {0}")]
    BlobStorage(String),

    #[error("Too many uploads. Please try again later.")]
    TooManyRequests,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Room(#[from] RoomError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BlobNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BlobTooLarge { .. } | ServerError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, self.to_string())
            }
            ServerError::BlobStorage(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Blob storage error".to_string())
            }
            ServerError::TooManyRequests => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Room(err) => match err {
                RoomError::AuthenticationFailed => (StatusCode::UNAUTHORIZED, err.to_string()),
                RoomError::Unauthorized => (StatusCode::FORBIDDEN, err.to_string()),
                RoomError::NotFound => (StatusCode::NOT_FOUND, "Room not found".to_string()),
                RoomError::CapacityExceeded { .. } | RoomError::DuplicateId { .. } => {
                    (StatusCode::CONFLICT, err.to_string())
                }
                RoomError::InvalidRoomId(_) => (StatusCode::BAD_REQUEST, err.to_string()),
                RoomError::Storage(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                ),
            },
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
