use axum::http::StatusCode;
use axum::response::IntoResponse;
use axon_taskdb::StoreError;

/// The standardized error returned by the bridge host.
#[derive(thiserror::Error, Debug)]
pub enum HostError {
    /// For invalid bind address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// For malformed request payloads.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// For results that are not on disk (yet).
    #[error("task result not ready")]
    ResultNotReady,

    /// For store failures and missing rows.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// For I/O errors.
    #[error("there was a I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// For Serde errors.
    #[error("there was a deserialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A catch-all error for any other error type.
    #[error("there was an unexpected error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl IntoResponse for HostError {
    fn into_response(self) -> axum::response::Response {
        let (code, error) = match &self {
            HostError::InvalidAddress(_) => (StatusCode::BAD_REQUEST, "invalid_address"),
            HostError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            HostError::ResultNotReady => (StatusCode::NOT_FOUND, "result_not_ready"),
            HostError::Store(StoreError::NotFound { .. }) => (StatusCode::NOT_FOUND, "not_found"),
            HostError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
            HostError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            HostError::Serde(_) => (StatusCode::INTERNAL_SERVER_ERROR, "serde_error"),
            HostError::Anyhow(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        let body = axum::Json(serde_json::json!({
            "status": "error",
            "error": error,
            "message": self.to_string(),
        }));
        (code, body).into_response()
    }
}

/// A type alias for the standardized result type returned by the host.
pub type HostResult<T> = Result<T, HostError>;
