//! Raw content serving.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use chrono::Utc;

use zipline_core::error::AppError;
use zipline_entity::file::FileRecord;

use crate::dto::request::RawQuery;
use crate::error::ApiError;
use crate::state::AppState;

/// Outcome of matching a `Range` header against a file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// Serve the whole file.
    Full,
    /// Serve `start..=end`.
    Partial { start: u64, end: u64 },
    /// Answer 416.
    Unsatisfiable,
}

/// Interpret a `Range` header for a file of `size` bytes.
///
/// Only a single `bytes=` range is honoured; anything else is ignored and
/// the full file is served.
pub fn parse_range(value: Option<&str>, size: u64) -> RangeRequest {
    let Some(spec) = value.and_then(|v| v.trim().strip_prefix("bytes=")) else {
        return RangeRequest::Full;
    };
    if spec.contains(',') {
        return RangeRequest::Full;
    }
    let Some((first, last)) = spec.split_once('-') else {
        return RangeRequest::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // Suffix range: the last `n` bytes.
        let Ok(n) = last.parse::<u64>() else {
            return RangeRequest::Full;
        };
        if n == 0 || size == 0 {
            return RangeRequest::Unsatisfiable;
        }
        return RangeRequest::Partial {
            start: size - n.min(size),
            end: size - 1,
        };
    }

    let Ok(start) = first.parse::<u64>() else {
        return RangeRequest::Full;
    };
    let end = if last.is_empty() {
        u64::MAX
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => end,
            _ => return RangeRequest::Full,
        }
    };
    if start >= size {
        return RangeRequest::Unsatisfiable;
    }
    RangeRequest::Partial {
        start,
        end: end.min(size - 1),
    }
}

async fn check_password(
    state: &AppState,
    file: &FileRecord,
    supplied: Option<&str>,
) -> Result<(), ApiError> {
    let Some(hash) = file.password.as_deref() else {
        return Ok(());
    };
    let supplied =
        supplied.ok_or_else(|| AppError::authorization("This file is password protected"))?;
    if !state.password_hasher.verify_password(supplied, hash)? {
        return Err(AppError::authorization("Incorrect password").into());
    }
    Ok(())
}

fn build(builder: axum::http::response::Builder, body: Body) -> Result<Response, ApiError> {
    builder
        .body(body)
        .map_err(|e| AppError::internal(format!("Response build failed: {e}")).into())
}

/// GET /raw/{name}?pw=
///
/// Pending, expired and unknown files are all 404.
pub async fn raw(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<RawQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let file = state
        .repos
        .files
        .find_by_name(&name)
        .await?
        .filter(|f| !f.is_pending() && !f.is_expired(Utc::now()))
        .ok_or_else(|| AppError::not_found("File not found"))?;

    check_password(&state, &file, query.pw.as_deref()).await?;

    let size = state.storage.size(&file.name).await?;
    let range = parse_range(
        headers.get(header::RANGE).and_then(|v| v.to_str().ok()),
        size,
    );

    let builder = Response::builder()
        .header(header::CONTENT_TYPE, file.mime_type.as_str())
        .header(header::ACCEPT_RANGES, "bytes");

    let (builder, body, counts_view) = match range {
        RangeRequest::Unsatisfiable => {
            let builder = builder
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{size}"));
            return build(builder, Body::empty());
        }
        RangeRequest::Partial { start, end } => {
            let data = state.storage.range(&file.name, start, end + 1).await?;
            let builder = builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{size}"))
                .header(header::CONTENT_LENGTH, data.len());
            (builder, Body::from(data), start == 0)
        }
        RangeRequest::Full => {
            let stream = state.storage.get(&file.name).await?;
            let builder = builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, size);
            (builder, Body::from_stream(stream), true)
        }
    };

    if counts_view {
        if let Err(e) = state.repos.files.increment_views(file.id).await {
            tracing::warn!(file_id = %file.id, error = %e, "Failed to count view");
        }
    }

    build(builder, body)
}
