//! `/status`, `/live`, `/ready`: host memory/load-average/CPU-count
//! reporting via `sysinfo`, queried once per request rather than polled into
//! a metrics stream, plus liveness/readiness probes.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use dbgrid_core::executor::Executor as _;
use serde::Serialize;
use serde_json::json;
use sysinfo::System;

use crate::state::AppState;

#[derive(Serialize)]
pub struct MemoryStatus {
    total: u64,
    available: u64,
    used: u64,
    percent: f64,
}

#[derive(Serialize)]
pub struct LoadAverage {
    one: f64,
    five: f64,
    fifteen: f64,
}

#[derive(Serialize)]
pub struct StatusResponse {
    hostname: String,
    os: String,
    architecture: String,
    cpu_count: usize,
    cpu_load: LoadAverage,
    memory: MemoryStatus,
}

pub async fn handle_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let system = System::new_all();
    let load = System::load_average();
    let total = system.total_memory();
    let used = system.used_memory();
    let percent = if total > 0 {
        used as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    Json(StatusResponse {
        hostname: state.hostname.clone(),
        os: std::env::consts::OS.to_string(),
        architecture: std::env::consts::ARCH.to_string(),
        cpu_count: system.cpus().len(),
        cpu_load: LoadAverage {
            one: load.one,
            five: load.five,
            fifteen: load.fifteen,
        },
        memory: MemoryStatus {
            total,
            available: system.available_memory(),
            used,
            percent,
        },
    })
}

pub async fn handle_live() -> Json<serde_json::Value> {
    Json(json!({ "status": "alive" }))
}

pub async fn handle_ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut session = state.executor.session();
    if session.query("SELECT 1").await.is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not ready", "executor": "error" })),
        )
            .into_response();
    }
    drop(session);

    if probe_cache_dir(&state.cache.root).await.is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not ready", "disk": "error" })),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        Json(json!({ "status": "ready", "executor": "ok", "disk": "ok" })),
    )
        .into_response()
}

async fn probe_cache_dir(root: &str) -> anyhow::Result<()> {
    let path = std::path::Path::new(root);
    tokio::fs::create_dir_all(path).await?;
    let probe = path.join(".readiness_check");
    tokio::fs::write(&probe, b"ok").await?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}
