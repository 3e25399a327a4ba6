use crate::error::ResizerError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

/// Error returned by handlers, rendered as `{"detail": "..."}`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }
}

impl From<ResizerError> for ApiError {
    fn from(err: ResizerError) -> Self {
        match err {
            ResizerError::NotFound(msg) => Self::not_found(msg),
            ResizerError::ImageError(e) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error processing image: {}", e),
            ),
            other => {
                error!("Request failed: {}", other);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let not_found: ApiError = ResizerError::NotFound("gone".to_string()).into();
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);
        assert_eq!(not_found.detail, "gone");

        let corrupt: ApiError =
            ResizerError::ImageError(image::ImageError::IoError(std::io::Error::other("eof")))
                .into();
        assert_eq!(corrupt.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(corrupt.detail.starts_with("Error processing image"));

        let io: ApiError = ResizerError::CacheError("disk full".to_string()).into();
        assert_eq!(io.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(io.detail.contains("disk full"));
    }
}
