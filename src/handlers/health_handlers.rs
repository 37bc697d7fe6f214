//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness ("ok")
//! - GET /readyz   -> readiness: SQLite reachable, `images` table present,
//!   storage root writable

use crate::services::image_service::ImageService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// HTTP 200 when every check passes, HTTP 503 otherwise. The body lists
/// each check with its error, if any.
pub async fn readyz(State(service): State<ImageService>) -> impl IntoResponse {
    let mut checks: BTreeMap<&'static str, CheckStatus> = BTreeMap::new();
    checks.insert("sqlite", check_sqlite(&service).await.into());
    checks.insert("schema", check_schema(&service).await.into());
    checks.insert("disk", check_disk(&service).await.into());

    let ready = checks.values().all(|check| check.ok);
    let body = ReadyResponse {
        status: if ready { "ok".into() } else { "error".into() },
        checks,
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn check_sqlite(service: &ImageService) -> Result<(), String> {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*service.db)
        .await
    {
        Ok(1) => Ok(()),
        Ok(v) => Err(format!("unexpected result: {}", v)),
        Err(e) => Err(format!("error: {}", e)),
    }
}

async fn check_schema(service: &ImageService) -> Result<(), String> {
    match sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'images'",
    )
    .fetch_one(&*service.db)
    .await
    {
        Ok(1) => Ok(()),
        Ok(_) => Err("table `images` does not exist".to_string()),
        Err(e) => Err(format!("error: {}", e)),
    }
}

/// Write, read back and delete a marker file in the storage root.
async fn check_disk(service: &ImageService) -> Result<(), String> {
    let marker = service
        .storage_root
        .join(format!(".readyz-{}", Uuid::new_v4()));

    fs::write(&marker, b"readyz")
        .await
        .map_err(|e| format!("could not write tmp file: {}", e))?;
    let read_back = fs::read(&marker).await;
    let removed = fs::remove_file(&marker).await;

    match read_back {
        Ok(bytes) if bytes == b"readyz" => {}
        Ok(_) => return Err("tmp file content mismatch".to_string()),
        Err(e) => return Err(format!("could not read tmp file: {}", e)),
    }
    removed.map_err(|e| format!("could not remove tmp file: {}", e))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl From<Result<(), String>> for CheckStatus {
    fn from(result: Result<(), String>) -> Self {
        Self {
            ok: result.is_ok(),
            error: result.err(),
        }
    }
}
