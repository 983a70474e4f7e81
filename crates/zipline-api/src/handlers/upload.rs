//! Upload handler.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::HOST;
use bytes::Bytes;

use zipline_service::PartialUploadResponse;

use crate::error::ApiError;
use crate::extractors::MaybeUser;
use crate::state::AppState;

/// POST /api/upload
///
/// Accepts one chunk of a chunked upload; the body is the raw chunk.
pub async fn upload(
    State(state): State<AppState>,
    user: MaybeUser,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PartialUploadResponse>, ApiError> {
    let host = headers.get(HOST).and_then(|v| v.to_str().ok());
    let response = state
        .uploads
        .handle_chunk(user.user(), &headers, host, body)
        .await?;
    Ok(Json(response))
}
