use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

// Taken from https://github.com/tokio-rs/axum/blob/main/examples/anyhow-error-response/src/main.rs
/// Every failure leaves the service as HTTP 200 with this envelope, clients only read `success`.
#[derive(Debug)]
pub struct TranscriberError {
    pub message: HttpErrorResponse,
}

#[derive(Debug, Serialize)]
pub struct HttpErrorResponse {
    success: bool,
    error: String,
}

impl From<String> for HttpErrorResponse {
    fn from(message: String) -> Self {
        HttpErrorResponse {
            success: false,
            error: message,
        }
    }
}

impl From<&str> for HttpErrorResponse {
    fn from(message: &str) -> Self {
        HttpErrorResponse::from(message.to_string())
    }
}

impl TranscriberError {
    pub fn failure(message: impl Into<String>) -> Self {
        TranscriberError {
            message: HttpErrorResponse::from(message.into()),
        }
    }

    pub fn from_multipart(err: MultipartError) -> Self {
        warn!(status = %err.status(), "Failed to read multipart upload: {}", err.body_text());
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            TranscriberError::failure("File too large")
        } else {
            TranscriberError::failure("Invalid upload")
        }
    }

    pub fn from_rejection(rejection: MultipartRejection) -> Self {
        warn!(status = %rejection.status(), "Rejected upload: {}", rejection.body_text());
        TranscriberError::failure("Invalid upload")
    }
}

impl IntoResponse for TranscriberError {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self.message)).into_response()
    }
}

impl<E> From<E> for TranscriberError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();
        error!("Unhandled error while serving request: {err:#}");
        TranscriberError::failure("Server error")
    }
}

pub type ApiResult<T, E = TranscriberError> = Result<T, E>;

#[macro_export]
macro_rules! bail_transcriber {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        return Err($crate::error::TranscriberError::failure(format!($fmt $(, $arg)*)))
    };
}
