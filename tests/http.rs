#![cfg(feature = "http")]

use anyhow::Result;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use bulkload::backend::{ErrorKind, FakeCache, FakeQueue};
use bulkload::config::PipelineConfig;
use bulkload::http::{AppState, FAILED_DIR, UPLOAD_ROUTE, router};
use bulkload::producer::IngestProducer;
use bulkload::testing::{assert_chunk_sizes, user_csv_text};
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "X-BULKLOAD-BOUNDARY";
const QUEUE: &str = "csv_chunk_queue";

async fn app(queue: &FakeQueue, upload_dir: &Path) -> Result<axum::Router> {
    let config = PipelineConfig {
        chunk_size: 10,
        row_buffer: 10,
        publish_retry: bulkload::backend::RetryConfig::none(),
        ..PipelineConfig::default()
    };
    let producer =
        IngestProducer::new(Arc::new(queue.clone()), Arc::new(FakeCache::new()), config).await?;
    Ok(router(AppState {
        producer: Arc::new(producer),
        upload_dir: upload_dir.to_path_buf(),
    }))
}

fn multipart(field: &str, filename: &str, content: &str) -> Request<Body> {
    multipart_bytes(field, filename, content.as_bytes())
}

fn multipart_bytes(field: &str, filename: &str, content: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
         Content-Type: text/csv\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    Request::post(UPLOAD_ROUTE)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Result<serde_json::Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn upload_is_queued_and_spool_file_removed() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let queue = FakeQueue::new();
    let app = app(&queue, tmp.path()).await?;

    let response = app.oneshot(multipart("file", "users.csv", &user_csv_text(25))).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert!(body["message"].as_str().is_some_and(|m| m.contains("processed")));
    assert_eq!(body["rows"], 25);
    assert_chunk_sizes(&queue, QUEUE, &[10, 10, 5]);
    assert_eq!(std::fs::read_dir(tmp.path())?.count(), 0);
    Ok(())
}

#[tokio::test]
async fn missing_file_field_is_bad_request() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let queue = FakeQueue::new();
    let app = app(&queue, tmp.path()).await?;

    let response = app.oneshot(multipart("attachment", "users.csv", "Name\nAda")).await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await?;
    assert_eq!(body["error"], "no file uploaded");
    assert_eq!(queue.published_count(QUEUE), 0);
    Ok(())
}

#[tokio::test]
async fn publish_failure_is_bad_gateway() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let queue = FakeQueue::new();
    let app = app(&queue, tmp.path()).await?;
    queue.fail_next_publishes(1, ErrorKind::Network);

    let response = app.oneshot(multipart("file", "users.csv", &user_csv_text(3))).await?;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(json_body(response).await?["error"].as_str().is_some());
    Ok(())
}

#[tokio::test]
async fn failed_upload_is_kept_under_failed_dir() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let queue = FakeQueue::new();
    let app = app(&queue, tmp.path()).await?;
    queue.fail_next_publishes(1, ErrorKind::Network);
    let csv = user_csv_text(3);

    let response = app.oneshot(multipart("file", "users.csv", &csv)).await?;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let top: Vec<_> = std::fs::read_dir(tmp.path())?
        .map(|e| e.map(|e| e.file_name()))
        .collect::<std::io::Result<_>>()?;
    assert_eq!(top, vec![std::ffi::OsString::from(FAILED_DIR)]);

    let kept: Vec<_> = std::fs::read_dir(tmp.path().join(FAILED_DIR))?
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    assert_eq!(kept.len(), 1);
    assert_eq!(std::fs::read_to_string(&kept[0])?, csv);
    Ok(())
}

#[tokio::test]
async fn rejected_csv_is_kept_under_failed_dir() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let queue = FakeQueue::new();
    let app = app(&queue, tmp.path()).await?;

    let response = app
        .oneshot(multipart_bytes("file", "users.csv", b"Name,Age\nAda,36\n\xff\xfe,1\n"))
        .await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(std::fs::read_dir(tmp.path().join(FAILED_DIR))?.count(), 1);
    Ok(())
}

#[tokio::test]
async fn healthz_answers() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let app = app(&FakeQueue::new(), tmp.path()).await?;

    let response = app
        .oneshot(Request::get("/healthz").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}
