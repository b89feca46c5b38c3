use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;

use crate::{
    codes,
    error::ScanError,
    range::AddrRange,
    scheduler::Scheduler,
    types::{Progress, Protocol, ScanConfig, ScanState},
};

#[derive(Clone)]
pub struct AppState {
    scheduler: Arc<Scheduler>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub state: ScanState,
    pub progress: Progress,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub range: String,
    pub port: u16,
    pub protocol: Protocol,
    pub target_url: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Accepted outcome codes, either as a list or the textual form the CLI
    /// takes (`"0,200-204"`).
    #[serde(default)]
    pub accept_codes: Option<AcceptCodes>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AcceptCodes {
    List(Vec<i32>),
    Text(String),
}

#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    pub codes: Vec<i32>,
}

pub async fn spawn_server(bind: &str, scheduler: Arc<Scheduler>) -> Result<()> {
    let state = AppState { scheduler };

    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/stop", post(post_stop))
        .route("/filter", post(post_filter))
        .route("/results", get(get_results))
        .route("/filtered", get(get_filtered))
        .with_state(state.clone());

    let static_svc = ServeDir::new("ui").append_index_html_on_directories(true);

    let app = Router::new().nest("/api", api).fallback_service(static_svc);

    println!("Serving UI on http://{}", bind);
    axum::serve(tokio::net::TcpListener::bind(bind).await?, app).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let out = Status {
        state: app.scheduler.state(),
        progress: app.scheduler.progress(),
    };
    (StatusCode::OK, Json(out))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.scheduler.full_report()))
}

async fn get_filtered(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.scheduler.filtered_report()))
}

async fn post_filter(
    State(app): State<AppState>,
    Json(req): Json<FilterRequest>,
) -> impl IntoResponse {
    app.scheduler
        .set_accepted_codes(req.codes.into_iter().collect());
    (StatusCode::OK, Json(app.scheduler.filtered_report())).into_response()
}

async fn post_scan(
    State(app): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> impl IntoResponse {
    let range = match AddrRange::parse(&req.range) {
        Ok(r) => r,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let accepted: HashSet<i32> = match req.accept_codes {
        None => HashSet::new(),
        Some(AcceptCodes::List(list)) => list.into_iter().collect(),
        Some(AcceptCodes::Text(text)) => match codes::parse_codes_set(&text) {
            Ok(set) => set,
            Err(e) => return (StatusCode::BAD_REQUEST, format!("invalid codes: {e}")).into_response(),
        },
    };

    let config = ScanConfig {
        range,
        port: req.port,
        protocol: req.protocol,
        target_url: req.target_url,
        probe_timeout: Duration::from_millis(req.timeout_ms.unwrap_or(3_000)),
        max_concurrency: req.concurrency.unwrap_or(200),
        accepted_codes: accepted,
    };

    match app.scheduler.start(config) {
        Ok(()) => {
            let out = Status {
                state: app.scheduler.state(),
                progress: app.scheduler.progress(),
            };
            (StatusCode::ACCEPTED, Json(out)).into_response()
        }
        Err(e) => scan_error_response(e),
    }
}

async fn post_stop(State(app): State<AppState>) -> impl IntoResponse {
    match app.scheduler.stop().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "stopped": true }))).into_response(),
        // Forced abandonment is a warning, not a failure: the scheduler is
        // idle either way.
        Err(e @ ScanError::CancellationTimeout(_)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "stopped": true, "warning": e.to_string() })),
        )
            .into_response(),
        Err(e) => scan_error_response(e),
    }
}

fn scan_error_response(e: ScanError) -> axum::response::Response {
    let status = match e {
        ScanError::InvalidAddress(_) | ScanError::InvalidConcurrency(_) => StatusCode::BAD_REQUEST,
        ScanError::AlreadyRunning => StatusCode::CONFLICT,
        ScanError::NetworkUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ScanError::CancellationTimeout(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string()).into_response()
}
