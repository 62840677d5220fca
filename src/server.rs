//! Small HTTP control surface: start, cancel and observe one scan at a time.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    config::ScanConfig,
    engine::ScanEngine,
    lookup::DnsResolver,
    netdetect, ports,
    stream::{now_rfc3339, ResultStream},
    types::{ScanEvent, ScanOutcome, ScanSummary},
};

#[derive(Clone, Default)]
pub struct AppState {
    inner: Arc<RwLock<ServerState>>,
}

#[derive(Debug, Default)]
struct ServerState {
    /// Bumped for every started scan so a superseded scan cannot overwrite newer state.
    generation: u64,
    status: Status,
    summary: Option<ScanSummary>,
    cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Running,
    Completed,
    Canceled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub total: u64,
    pub scanned: u64,
    pub open: u64,
    pub state: ScanState,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            total: 0,
            scanned: 0,
            open: 0,
            state: ScanState::Idle,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    /// IPs and/or CIDRs.
    pub targets: Vec<String>,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub config: ScanConfig,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/cancel", post(post_cancel))
        .route("/results", get(get_results))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str) -> Result<()> {
    let app = router(AppState::default());
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("serving API on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    (StatusCode::OK, Json(s.status.clone()))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    match s.summary.as_ref() {
        Some(summary) => (StatusCode::OK, Json(summary.clone())).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn post_cancel(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    match s.cancel.as_ref() {
        Some(cancel) => {
            cancel.cancel();
            StatusCode::ACCEPTED
        }
        None => StatusCode::CONFLICT,
    }
}

async fn post_scan(State(app): State<AppState>, Json(req): Json<ScanRequest>) -> impl IntoResponse {
    let mut targets = Vec::new();
    for t in &req.targets {
        match netdetect::parse_targets(t) {
            Ok(ips) => targets.extend(ips),
            Err(e) => return (StatusCode::BAD_REQUEST, format!("{e:#}")).into_response(),
        }
    }
    let ports = if req.ports.is_empty() {
        ports::default_ports()
    } else {
        req.ports
    };

    let config = req.config.normalized();
    let mut engine = ScanEngine::new(config.clone()).with_port_lookup(ports::WellKnownPorts);
    if config.resolve_hostnames {
        engine = engine.with_resolver(DnsResolver::from_system_conf(config.probe_timeout()));
    }

    let cancel = CancellationToken::new();
    let stream = engine.scan(targets, ports, &cancel);
    let status = Status {
        total: stream.total(),
        scanned: 0,
        open: 0,
        state: ScanState::Running,
    };

    let generation = {
        let mut s = app.inner.write().await;
        if let Some(previous) = s.cancel.take() {
            info!("new scan requested, canceling the running one");
            previous.cancel();
        }
        s.generation += 1;
        s.status = status.clone();
        s.summary = None;
        s.cancel = Some(cancel);
        s.generation
    };

    tokio::spawn(track_scan(app, generation, stream));

    (StatusCode::ACCEPTED, Json(status)).into_response()
}

/// Mirror a running scan's events into the shared state.
async fn track_scan(app: AppState, generation: u64, mut stream: ResultStream) {
    let mut summary = ScanSummary::new(stream.total(), stream.started_at().to_string());

    while let Some(event) = stream.next().await {
        if let ScanEvent::Failed(reason) = &event {
            warn!("scan failed: {reason}");
        }
        summary.record(event);

        let mut s = app.inner.write().await;
        if s.generation != generation {
            // superseded; dropping the stream cancels what is left
            return;
        }
        s.status.scanned = summary.completed;
        s.status.open = summary.open;
    }

    summary.finished_at = now_rfc3339();
    let mut s = app.inner.write().await;
    if s.generation != generation {
        return;
    }
    s.status.state = match summary.outcome {
        ScanOutcome::Completed => ScanState::Completed,
        ScanOutcome::Canceled => ScanState::Canceled,
        ScanOutcome::Failed(_) => ScanState::Failed,
    };
    s.cancel = None;
    s.summary = Some(summary);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_for_terminal(app: &AppState) -> Status {
        for _ in 0..200 {
            let status = app.inner.read().await.status.clone();
            if status.state != ScanState::Running {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("scan never finished");
    }

    #[tokio::test]
    async fn scan_request_runs_to_completion() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();

        let app = AppState::default();
        let req = ScanRequest {
            targets: vec!["127.0.0.1".into()],
            ports: vec![open_port],
            config: ScanConfig::default()
                .with_resolve_hostnames(false)
                .with_timeout(Duration::from_secs(2)),
        };
        let resp = post_scan(State(app.clone()), Json(req)).await.into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let status = wait_for_terminal(&app).await;
        assert_eq!(status.state, ScanState::Completed);
        assert_eq!(status.total, 1);
        assert_eq!(status.scanned, 1);
        assert_eq!(status.open, 1);

        let s = app.inner.read().await;
        let summary = s.summary.as_ref().unwrap();
        assert_eq!(summary.results.len(), 1);
        assert_eq!(summary.results[0].port, open_port);
    }

    #[tokio::test]
    async fn bad_target_is_rejected() {
        let app = AppState::default();
        let req = ScanRequest {
            targets: vec!["nope".into()],
            ports: vec![80],
            config: ScanConfig::default(),
        };
        let resp = post_scan(State(app.clone()), Json(req)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(app.inner.read().await.status.state, ScanState::Idle);
    }

    #[tokio::test]
    async fn cancel_without_scan_conflicts() {
        let app = AppState::default();
        let resp = post_cancel(State(app)).await.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}
