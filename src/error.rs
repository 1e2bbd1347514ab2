use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::warn;

use crate::{moviehash::FingerprintError, relay::RelayError};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

/// Error returned by every handler; rendered as `{"error": ..., "code": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<&'static str>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            code: Some("VALIDATION_ERROR"),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            code: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            code: None,
        }
    }

    /// Upstream answered with a non-success status. Error statuses are passed
    /// through; anything else becomes 502.
    pub fn upstream(status: StatusCode, message: impl Into<String>) -> Self {
        let status = if status.is_client_error() || status.is_server_error() {
            status
        } else {
            StatusCode::BAD_GATEWAY
        };

        Self {
            status,
            message: message.into(),
            code: Some("UPSTREAM_ERROR"),
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
        });

        (self.status, body).into_response()
    }
}

impl From<RelayError> for ApiError {
    fn from(error: RelayError) -> Self {
        warn!("Upstream relay failed: {error}");

        match error {
            RelayError::TooManyRedirects { .. } => {
                Self::internal("Upstream redirected too many times.").with_code("TOO_MANY_REDIRECTS")
            }
            RelayError::RedirectToErrorPage { .. } => {
                Self::internal("Upstream redirected to an error page.")
                    .with_code("REDIRECT_TO_ERROR_PAGE")
            }
            RelayError::HtmlResponse { .. } | RelayError::InvalidJson { .. } => {
                Self::internal("Upstream returned a malformed response.")
                    .with_code("MALFORMED_RESPONSE")
            }
            RelayError::Network(_) | RelayError::InvalidRedirect { .. } => {
                Self::internal("Could not reach the subtitle service.")
                    .with_code("UPSTREAM_UNREACHABLE")
            }
        }
    }
}

impl From<FingerprintError> for ApiError {
    fn from(error: FingerprintError) -> Self {
        match error {
            FingerprintError::ShortFile { min, .. } => Self::bad_request(format!(
                "Uploaded file is too small to fingerprint (minimum {min} bytes)."
            ))
            .with_code("FILE_TOO_SMALL"),
            FingerprintError::Io { .. } => {
                warn!("Fingerprinting failed: {error}");
                Self::internal("Could not read the uploaded file.").with_code("IO_ERROR")
            }
        }
    }
}
