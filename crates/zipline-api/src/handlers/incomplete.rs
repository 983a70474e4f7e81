//! Assembly progress handlers.

use axum::Json;
use axum::extract::State;

use zipline_entity::file::IncompleteFile;

use crate::dto::request::DeleteIncompleteRequest;
use crate::dto::response::CountResponse;
use crate::error::ApiError;
use crate::extractors::AuthUser;
use crate::state::AppState;

/// GET /api/user/files/incomplete
pub async fn list_incomplete(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<IncompleteFile>>, ApiError> {
    let files = state.repos.incomplete_files.list_for_user(auth.id).await?;
    Ok(Json(files))
}

/// DELETE /api/user/files/incomplete
///
/// Rows still being assembled are kept.
pub async fn delete_incomplete(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<DeleteIncompleteRequest>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state
        .repos
        .incomplete_files
        .delete_for_user(auth.id, &req.id)
        .await?;
    tracing::debug!(user_id = %auth.id, requested = req.id.len(), count, "Deleted incomplete files");
    Ok(Json(CountResponse { count }))
}
