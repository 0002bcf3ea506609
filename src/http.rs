//! HTTP intake for uploads.
//!
//! `POST /api/users/upload-users` takes a multipart form with a `file` field,
//! spools it to the upload directory and hands it to the [`IngestProducer`].
//! The response is sent once every chunk is queued, not once rows are in the
//! store. Spools whose ingestion fails are moved to [`FAILED_DIR`] under the
//! upload directory.

use crate::error::IngestError;
use crate::producer::{IngestProducer, Upload};
use axum::Router;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const UPLOAD_ROUTE: &str = "/api/users/upload-users";

/// Subdirectory of the upload directory holding spools that failed to ingest.
pub const FAILED_DIR: &str = "failed";
pub const UPLOAD_FIELD: &str = "file";
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub producer: Arc<IngestProducer>,
    /// Where uploads are spooled before ingestion.
    pub upload_dir: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(UPLOAD_ROUTE, post(upload_users))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Serve `router(state)` on `listener` until `shutdown` fires.
///
/// # Errors
///
/// Returns an error if the upload directory cannot be created or the server
/// fails.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    use anyhow::Context;
    tokio::fs::create_dir_all(&state.upload_dir)
        .await
        .with_context(|| format!("create upload dir {}", state.upload_dir.display()))?;
    let addr = listener.local_addr().context("listener address")?;
    info!(%addr, "http intake listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("http server")
}

async fn healthz() -> &'static str {
    "ok"
}

async fn upload_users(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let upload = match receive_upload(&state.upload_dir, &mut multipart).await {
        Ok(upload) => upload,
        Err(err) => return err.into_response(),
    };
    let spooled = upload.as_ref().map(|u| u.path.clone());
    match state.producer.submit(upload).await {
        Ok(report) => Json(json!({
            "message": "File uploaded successfully and is being processed",
            "chunks": report.chunks,
            "rows": report.rows,
        }))
        .into_response(),
        Err(err) => {
            if let Some(path) = spooled {
                set_aside(&state.upload_dir, &path).await;
            }
            ApiError::from(err).into_response()
        }
    }
}

/// Move a spool the producer left behind into [`FAILED_DIR`].
async fn set_aside(upload_dir: &Path, spooled: &Path) {
    let Some(name) = spooled.file_name() else {
        return;
    };
    let failed_dir = upload_dir.join(FAILED_DIR);
    let dest = failed_dir.join(name);
    let moved = async {
        tokio::fs::create_dir_all(&failed_dir).await?;
        tokio::fs::rename(spooled, &dest).await
    }
    .await;
    match moved {
        Ok(()) => warn!(path = %dest.display(), "kept failed upload"),
        Err(e) => warn!(path = %spooled.display(), error = %e, "kept failed upload in place"),
    }
}

/// Spool the `file` field to disk. Other fields are skipped.
async fn receive_upload(dir: &Path, multipart: &mut Multipart) -> Result<Option<Upload>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(ApiError::multipart)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let original_name = field.file_name().unwrap_or(UPLOAD_FIELD).to_string();
        let path = spool_path(dir)?;
        if let Err(err) = spool(field, &path).await {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "could not remove partial upload");
            }
            return Err(err);
        }
        return Ok(Some(Upload::new(path, original_name)));
    }
    Ok(None)
}

fn spool_path(dir: &Path) -> Result<PathBuf, ApiError> {
    let file = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(|e| ApiError::internal(format!("create spool file: {e}")))?;
    let (_, path) = file
        .keep()
        .map_err(|e| ApiError::internal(format!("keep spool file: {e}")))?;
    Ok(path)
}

async fn spool(mut field: Field<'_>, path: &Path) -> Result<(), ApiError> {
    let mut out = tokio::fs::File::create(path)
        .await
        .map_err(|e| ApiError::internal(format!("open {}: {e}", path.display())))?;
    while let Some(bytes) = field.chunk().await.map_err(ApiError::multipart)? {
        out.write_all(&bytes)
            .await
            .map_err(|e| ApiError::internal(format!("write {}: {e}", path.display())))?;
    }
    out.flush()
        .await
        .map_err(|e| ApiError::internal(format!("flush {}: {e}", path.display())))?;
    Ok(())
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message,
        }
    }

    fn multipart(err: MultipartError) -> Self {
        Self {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else if matches!(err, IngestError::Publish { .. } | IngestError::Backend(_)) {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.message, "upload failed");
        } else {
            warn!(status = %self.status, error = %self.message, "upload rejected");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
