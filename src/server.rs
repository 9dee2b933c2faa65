use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    scanner::{self, ProgressSink, ScanError},
    types::{ScanRequest, ScanSummary},
    validate,
};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<RwLock<ServerState>>, // background job bookkeeping
    shutdown: CancellationToken,
}

#[derive(Debug, Default)]
struct ServerState {
    job_id: u64,
    status: JobStatus,
    results: Option<ScanSummary>,
    progress: Option<Arc<AtomicUsize>>,
    cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Done,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct JobStatus {
    pub total: usize,
    pub scanned: usize,
    pub open: usize,
    pub state: JobState,
}

impl AppState {
    /// Cancelling `shutdown` stops the server and any running background scan.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ServerState::default())),
            shutdown,
        }
    }
}

/// Build the API router, serving static UI files from `ui_dir` for everything else.
pub fn router(state: AppState, ui_dir: impl Into<PathBuf>) -> Router {
    let api = Router::new()
        .route("/scan", post(post_scan_job))
        .route("/status", get(get_status))
        .route("/results", get(get_results))
        .route("/cancel", post(post_cancel));

    let static_svc = ServeDir::new(ui_dir.into()).append_index_html_on_directories(true);

    Router::new()
        .route("/scan", post(post_scan))
        .route("/shutdown", post(post_shutdown))
        .nest("/api", api)
        .fallback_service(static_svc)
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Serve until `shutdown` is cancelled (by `POST /shutdown` or the caller) or Ctrl+C arrives.
pub async fn serve(bind: &str, ui_dir: impl Into<PathBuf>, shutdown: CancellationToken) -> Result<()> {
    let app = router(AppState::new(shutdown.clone()), ui_dir);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %listener.local_addr()?, "serving UI");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::signal::ctrl_c() => shutdown.cancel(),
            }
            info!("shutting down server");
        })
        .await
        .context("HTTP server error")?;
    info!("server has been shut down");
    Ok(())
}

fn rejected(err: validate::ValidationError) -> Response {
    (StatusCode::BAD_REQUEST, Json(ScanSummary::rejected(err.to_string()))).into_response()
}

/// Synchronous scan: responds once every port in the range has been tried.
async fn post_scan(Json(req): Json<ScanRequest>) -> Response {
    let spec = match validate::validate_request(&req).await {
        Ok(spec) => spec,
        Err(e) => return rejected(e),
    };
    let summary = scanner::run_scan(&spec, None).await;
    (StatusCode::OK, Json(summary)).into_response()
}

async fn post_shutdown(State(app): State<AppState>) -> impl IntoResponse {
    info!("shutdown requested over HTTP");
    app.shutdown.cancel();
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "shutting_down" })),
    )
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    let mut out = s.status.clone();
    if let Some(p) = s.progress.as_ref() {
        out.scanned = p.load(Ordering::Relaxed);
    }
    (StatusCode::OK, Json(out))
}

async fn get_results(State(app): State<AppState>) -> Response {
    let s = app.inner.read().await;
    if let Some(res) = s.results.as_ref() {
        (StatusCode::OK, Json(res.clone())).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn post_cancel(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    if let Some(c) = s.cancel.as_ref() {
        c.cancel();
    }
    (StatusCode::ACCEPTED, Json(s.status.clone()))
}

/// Background scan job; progress is polled through `/api/status`.
async fn post_scan_job(State(app): State<AppState>, Json(req): Json<ScanRequest>) -> Response {
    let spec = match validate::validate_request(&req).await {
        Ok(spec) => spec,
        Err(e) => return rejected(e),
    };

    let total = spec.total_ports();
    let scanned = Arc::new(AtomicUsize::new(0));
    let cancel = app.shutdown.child_token();
    let progress: ProgressSink = {
        let scanned = scanned.clone();
        Arc::new(move |done: usize, _total: usize| scanned.store(done, Ordering::Relaxed))
    };

    let status = JobStatus {
        total,
        scanned: 0,
        open: 0,
        state: JobState::Running,
    };
    let job_id = {
        let mut s = app.inner.write().await;
        // Cancel any existing scan
        if let Some(c) = s.cancel.take() {
            c.cancel();
        }
        s.job_id += 1;
        s.status = status.clone();
        s.results = None;
        s.progress = Some(scanned);
        s.cancel = Some(cancel.clone());
        s.job_id
    };

    let app2 = app.clone();
    tokio::spawn(async move {
        let res = scanner::run_scan_with_cancel(&spec, Some(progress), cancel).await;

        let mut s = app2.inner.write().await;
        if s.job_id != job_id {
            // superseded by a newer request
            return;
        }
        s.progress = None;
        s.cancel = None;
        match res {
            Ok(summary) => {
                s.status.scanned = summary.total_ports;
                s.status.open = summary.open_ports.len();
                s.status.state = JobState::Done;
                s.results = Some(summary);
            }
            Err(ScanError::Cancelled { completed, .. }) => {
                warn!(job_id, completed, "scan job cancelled");
                s.status.scanned = completed;
                s.status.state = JobState::Cancelled;
            }
        }
    });

    (StatusCode::ACCEPTED, Json(status)).into_response()
}
