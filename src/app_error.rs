use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Anyhow(anyhow::Error),

    InvalidFormData(String),
    NotFound(String),
    // Failure talking to a third-party API; the message is passed through.
    Upstream(String),
    DatabaseError(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Anyhow(_) | AppError::Upstream(_) | AppError::DatabaseError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::InvalidFormData(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn sentry_level(&self) -> sentry::Level {
        if self.status().is_server_error() {
            sentry::Level::Error
        } else {
            sentry::Level::Info
        }
    }
}

// Every error leaves as a flat `{ "error": message }` body.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!("{}", message);
        } else {
            tracing::debug!("{}", message);
        }
        sentry::capture_message(&message, self.sentry_level());

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Anyhow(err) => write!(f, "{}", err),
            AppError::InvalidFormData(msg) => write!(f, "Invalid form data: {}", msg),
            AppError::NotFound(resource) => write!(f, "{} not found", resource),
            AppError::Upstream(msg) => write!(f, "{}", msg),
            AppError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

// This enables using `?` on functions that return `Result<_, anyhow::Error>` to turn them into
// `Result<_, AppError>`. That way you don't need to do that manually.
impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        AppError::Anyhow(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_body_is_flat_json() {
        let response = AppError::Upstream("quota exceeded".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({ "error": "quota exceeded" }));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::InvalidFormData("url".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("Shortener bitly".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
