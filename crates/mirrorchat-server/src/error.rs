use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mirrorchat_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The shared counter could not issue an ID. Nothing was written.
    #[error("ID allocation failed: {0}")]
    IdMint(String),

    #[error("Durable store error: {0}")]
    Durable(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::IdMint(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Temporarily unavailable, retry later".to_string(),
            ),
            ServerError::Store(StoreError::ChannelNotFound(_) | StoreError::UserNotFound(_)) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ServerError::Durable(_) | ServerError::Store(_) | ServerError::Internal(_) => {
                tracing::error!(error = %self, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
