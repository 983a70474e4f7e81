//! End-to-end chunked upload tests: HTTP → session tracker → fragments →
//! assembly pool → content store.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;

use zipline_core::traits::StorageProvider;
use zipline_entity::file::IncompleteFileStatus;

use helpers::{ChunkRequest, TestApp, pattern};

const MIB: usize = 1024 * 1024;

#[tokio::test]
async fn test_ten_mib_in_four_chunks_assembles() {
    let app = TestApp::new().await;
    let data = pattern(10 * MIB, 7);

    let (status, body) = app.upload(&data, &[3 * MIB, 3 * MIB, 3 * MIB, MIB]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["partialSuccess"], true);
    assert_eq!(body["files"][0]["pending"], true);
    let url = body["files"][0]["url"].as_str().unwrap();
    assert!(url.starts_with("http://files.test/u/"));

    let file_id = TestApp::file_id(&body);
    let progress = app.wait_for_assembly(file_id).await;
    assert_eq!(progress.status, IncompleteFileStatus::Complete);
    assert_eq!(progress.chunks_total, 4);
    assert_eq!(progress.chunks_complete, 4);

    let file = app.store.files().await.into_iter().find(|f| f.id == file_id).unwrap();
    assert_eq!(file.size, (10 * MIB) as i64);
    assert_eq!(app.local.size(&file.name).await.unwrap(), (10 * MIB) as u64);

    let (status, headers, served) = app.get(&format!("/raw/{}", file.name), &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["accept-ranges"], "bytes");
    assert_eq!(&served[..], &data[..]);
    assert!(app.chunks.list_identifiers().await.unwrap().is_empty());
    assert!(app.tracker.is_empty());
}

#[tokio::test]
async fn test_size_limit_rejects_third_chunk() {
    let app = TestApp::with_config(|c| c.files.max_file_size_bytes = (8 * MIB) as u64).await;
    let data = pattern(10 * MIB, 1);

    let (status, body) = app.upload(&data, &[3 * MIB, 3 * MIB, 3 * MIB, MIB]).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "PAYLOAD_TOO_LARGE");

    assert!(app.chunks.list_identifiers().await.unwrap().is_empty());
    assert!(app.store.files().await.is_empty());
    assert!(app.tracker.is_empty());
}

#[tokio::test]
async fn test_interleaved_uploads_stay_separate() {
    let app = TestApp::new().await;
    let a = pattern(40_000, 3);
    let b = pattern(40_000, 200);
    let sizes = [(0, 15_000), (15_000, 30_000), (30_000, 40_000)];

    let mut ids: [Option<String>; 2] = [None, None];
    let mut finals = Vec::new();
    for (start, end) in sizes {
        for (slot, data) in [&a, &b].into_iter().enumerate() {
            let chunk = ChunkRequest::slice(data, start, end, ids[slot].as_deref());
            let (status, body) = app.upload_chunk(chunk).await;
            assert_eq!(status, StatusCode::OK, "{body}");
            if let Some(id) = body["partialIdentifier"].as_str() {
                ids[slot] = Some(id.to_string());
            }
            if end == 40_000 {
                finals.push((TestApp::file_id(&body), data.clone()));
            }
        }
    }
    assert_ne!(ids[0], ids[1]);

    for (file_id, data) in finals {
        assert_eq!(app.wait_for_assembly(file_id).await.status, IncompleteFileStatus::Complete);
        let file = app.store.files().await.into_iter().find(|f| f.id == file_id).unwrap();
        let (status, _, served) = app.get(&format!("/raw/{}", file.name), &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&served[..], &data[..]);
    }
}

#[tokio::test]
async fn test_header_errors_name_the_header() {
    let app = TestApp::new().await;
    let data = pattern(100, 0);

    let chunk = ChunkRequest::slice(&data, 0, 100, None).header("x-zipline-max-views", "lots");
    let (status, body) = app.upload_chunk(chunk).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["header"], "x-zipline-max-views");
    assert_eq!(body["error"], "Invalid max views (NaN)");

    let mut chunk = ChunkRequest::slice(&data, 0, 50, None);
    chunk.total = 0;
    let (status, body) = app.upload_chunk(chunk).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["header"], "content-range");

    assert!(app.tracker.is_empty());
    assert!(app.store.files().await.is_empty());
}

#[tokio::test]
async fn test_unknown_identifier_is_not_found() {
    let app = TestApp::new().await;
    let data = pattern(100, 0);

    let chunk = ChunkRequest::slice(&data, 50, 100, Some("ZZZZZZZZ"));
    let (status, body) = app.upload_chunk(chunk).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");
}

#[tokio::test]
async fn test_anonymous_upload_needs_open_folder() {
    let app = TestApp::new().await;
    let data = pattern(100, 0);

    let mut chunk = ChunkRequest::slice(&data, 0, 100, None);
    chunk.token = None;
    let (status, _) = app.upload_chunk(chunk).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let folder = app.store.add_folder(app.user.id, "drop", true).await;
    let mut chunk = ChunkRequest::slice(&data, 0, 100, None)
        .header("x-zipline-folder", folder.id.to_string());
    chunk.token = None;
    let (status, body) = app.upload_chunk(chunk).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let file_id = TestApp::file_id(&body);
    assert_eq!(app.wait_for_assembly(file_id).await.status, IncompleteFileStatus::Complete);
    let file = app.store.files().await.into_iter().find(|f| f.id == file_id).unwrap();
    assert_eq!(file.user_id, app.user.id);
    assert_eq!(file.folder_id, Some(folder.id));

    let mut chunk = ChunkRequest::slice(&data, 0, 100, None);
    chunk.token = Some("wrong".to_string());
    let (status, _) = app.upload_chunk(chunk).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_deferred_options_apply_on_completion() {
    let app = TestApp::new().await;
    let data = pattern(3_000, 9);

    let (status, body) = app
        .upload_with(&data, &[1_000, 1_000, 1_000], |c| {
            c.header("x-zipline-max-views", "5")
                .header("x-zipline-password", "hunter2")
                .header("x-zipline-filename", "report")
        })
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["files"][0]["url"].as_str().unwrap().ends_with("/u/report.bin"));

    let file_id = TestApp::file_id(&body);
    app.wait_for_assembly(file_id).await;
    let file = app.store.files().await.into_iter().find(|f| f.id == file_id).unwrap();
    assert_eq!(file.name, "report.bin");
    assert_eq!(file.max_views, Some(5));
    assert!(file.password.as_deref().unwrap().starts_with("$argon2"));

    let (status, _, _) = app.get("/raw/report.bin", &[]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _, _) = app.get("/raw/report.bin?pw=nope", &[]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, headers, served) = app
        .get("/raw/report.bin?pw=hunter2", &[("range", "bytes=1000-1999")])
        .await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers["content-range"], "bytes 1000-1999/3000");
    assert_eq!(&served[..], &data[1_000..2_000]);

    let (status, headers, _) = app
        .get("/raw/report.bin?pw=hunter2", &[("range", "bytes=5000-")])
        .await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(headers["content-range"], "bytes */3000");
}

#[tokio::test]
async fn test_name_conflict_is_rejected() {
    let app = TestApp::new().await;
    let data = pattern(500, 4);
    let named = |c: ChunkRequest| c.header("x-zipline-filename", "clip");

    let (status, body) = app.upload_with(&data, &[250, 250], named).await;
    assert_eq!(status, StatusCode::OK);
    app.wait_for_assembly(TestApp::file_id(&body)).await;

    let (status, body) = app.upload_with(&data, &[250, 250], named).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "CONFLICT");
    assert!(app.chunks.list_identifiers().await.unwrap().is_empty());
    assert_eq!(app.store.files().await.len(), 1);
}

#[tokio::test]
async fn test_incomplete_files_list_and_delete() {
    let app = TestApp::new().await;
    let data = pattern(2_000, 5);

    let (status, _, _) = app.get("/api/user/files/incomplete", &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, body) = app.upload(&data, &[1_000, 1_000]).await;
    let progress = app.wait_for_assembly(TestApp::file_id(&body)).await;

    let (status, _, listed) = app
        .get("/api/user/files/incomplete", &[("authorization", helpers::TOKEN)])
        .await;
    assert_eq!(status, StatusCode::OK);
    let listed: serde_json::Value = serde_json::from_slice(&listed).unwrap();
    assert_eq!(listed[0]["status"], "COMPLETE");
    assert_eq!(listed[0]["chunksComplete"], 2);

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/user/files/incomplete")
        .header("authorization", helpers::TOKEN)
        .header("content-type", "application/json")
        .body(Body::from(json!({ "id": [progress.id] }).to_string()))
        .unwrap();
    let (status, _, deleted) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    let deleted: serde_json::Value = serde_json::from_slice(&deleted).unwrap();
    assert_eq!(deleted["count"], 1);
    assert!(app.store.incomplete_files().await.is_empty());
}

#[tokio::test]
async fn test_health_reports_store() {
    let app = TestApp::new().await;
    let (status, _, body) = app.get("/api/health", &[]).await;
    assert_eq!(status, StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"], "local");
    assert_eq!(body["upload_sessions"], 0);
}
