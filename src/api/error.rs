//! JSON error responses for API handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Handler error rendered as `{"error": "..."}` with the given status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "authentication required")
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden")
    }

    pub fn not_found(entity: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{entity} not found"))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> Self {
        if crate::db::is_unique_violation(&error) {
            return ApiError::conflict("already exists");
        }
        if crate::db::is_foreign_key_violation(&error) {
            return ApiError::not_found("referenced record");
        }
        tracing::error!(%error, "database error");
        ApiError::internal()
    }
}

impl From<crate::Error> for ApiError {
    fn from(error: crate::Error) -> Self {
        use crate::Error;
        match error {
            Error::NotFound { entity, .. } => ApiError::not_found(entity),
            Error::Invalid(message) => ApiError::bad_request(message),
            Error::Config(message) => {
                tracing::warn!(%message, "request hit a configuration gap");
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, message)
            }
            Error::Google(error) => {
                tracing::error!(%error, "google api call failed");
                ApiError::new(StatusCode::BAD_GATEWAY, error.to_string())
            }
            Error::Database(crate::error::DbError::Sqlx(error)) => ApiError::from(error),
            other => {
                tracing::error!(error = %other, "request failed");
                ApiError::internal()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn renders_json_body() {
        let response = ApiError::conflict("slug taken").into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["error"], "slug taken");
    }

    #[test]
    fn maps_library_errors() {
        let not_found = ApiError::from(crate::Error::not_found("client", "c1"));
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);
        assert_eq!(not_found.message, "client not found");

        let invalid = ApiError::from(crate::Error::Invalid("bad".into()));
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);

        let google = ApiError::from(crate::Error::Google(
            crate::google::GoogleApiError::AuthExpired,
        ));
        assert_eq!(google.status, StatusCode::BAD_GATEWAY);
    }
}
