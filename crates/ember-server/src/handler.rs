use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Json, Response};
use ember_store::ObjectStore;
use ember_vault::Vault;
use serde::de::{self, Unexpected};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::{ServerError, ServerResult};
use crate::ratelimit::RateLimitState;

/// Multipart field carrying the payload.
pub const UPLOAD_FIELD: &str = "file";

/// Bytes of a multipart request assumed to be boundaries, part headers and
/// small extra fields rather than payload.
pub const MULTIPART_FRAMING_ALLOWANCE: u64 = 64 * 1024;

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub vault: Vault,
    pub rate_limit: RateLimitState,
}

impl AppState {
    pub fn new(vault: Vault, rate_limit: RateLimitState) -> Self {
        Self { vault, rate_limit }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    #[serde(default, deserialize_with = "flag")]
    pub burn: bool,
}

/// Parse a query-string flag. Accepts the usual spellings of a boolean,
/// case-insensitively.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "f" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_flag(&raw).ok_or_else(|| {
        de::Error::invalid_value(Unexpected::Str(&raw), &"true/false, 1/0, yes/no or on/off")
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub file_id: String,
    pub burned: bool,
}

/// Upload handler. Streams the `file` field straight into the vault.
///
/// `Content-Length` measures the whole form, not the payload, so
/// [`MULTIPART_FRAMING_ALLOWANCE`] is taken off before it is used for early
/// rejection. A payload of exactly the size limit is therefore accepted; the
/// limit itself is enforced on the bytes actually received.
pub async fn upload_handler(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ServerResult<Json<UploadResponse>> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|len| len.saturating_sub(MULTIPART_FRAMING_ALLOWANCE));

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            debug!(field = ?field.name(), "skipping unexpected form field");
            continue;
        }
        let receipt = state.vault.ingest(field, declared, query.burn).await?;
        return Ok(Json(UploadResponse {
            success: true,
            file_id: receipt.id.to_string(),
            burned: receipt.mode.is_burn(),
        }));
    }

    Err(ServerError::BadRequest(format!(
        "missing multipart field `{UPLOAD_FIELD}`"
    )))
}

/// Download handler. Burn objects are consumed by the first caller.
pub async fn download_handler(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ServerResult<Response> {
    let retrieval = state.vault.retrieve(&file_id).await?;

    let mut response = Body::from_stream(retrieval.stream).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(retrieval.size));
    let disposition = format!("attachment; filename=\"{}\"", retrieval.filename);
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .map_err(|e| ServerError::Internal(e.to_string()))?,
    );
    Ok(response)
}

/// Health check handler. Reports 503 when the store is unusable.
pub async fn health_handler(State(state): State<AppState>) -> ServerResult<Json<serde_json::Value>> {
    state
        .vault
        .store()
        .health_check()
        .await
        .map_err(ember_vault::VaultError::from)?;
    Ok(Json(json!({ "status": "ok" })))
}

/// Info handler.
pub async fn info_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = state.vault.config();
    Json(json!({
        "name": "ember-server",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.vault.store().backend_name(),
        "max_file_size": config.max_file_size,
        "expiration_seconds": config.expiration_secs,
    }))
}
