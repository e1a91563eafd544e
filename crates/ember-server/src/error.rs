use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use ember_vault::VaultError;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Vault(VaultError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Vault(VaultError::NotFound) => StatusCode::NOT_FOUND,
            Self::Vault(VaultError::StoreUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Vault(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Server-side failures are reported generically;
    /// the cause goes to the log.
    fn detail(&self) -> String {
        match self {
            Self::Vault(VaultError::TooLarge { .. }) => "File too large".into(),
            Self::Vault(VaultError::NotFound) => "File not found".into(),
            Self::Vault(VaultError::IngestFailed(_)) => "Upload failed".into(),
            Self::Vault(VaultError::StoreUnavailable(_)) => "Storage unavailable".into(),
            Self::RateLimited { retry_after_secs } => {
                format!("Rate limit exceeded, retry in {retry_after_secs}s")
            }
            Self::BadRequest(msg) => msg.clone(),
            _ => "Internal server error".into(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "request failed");
        }
        let body = Json(serde_json::json!({ "detail": self.detail() }));
        match self {
            Self::RateLimited { retry_after_secs } => (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}
