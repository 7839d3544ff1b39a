//! HTTP surface: start a pipeline run as an event stream, browse results,
//! and download artifacts.

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, DefaultBodyLimit, Path as UrlPath, Request, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use governor::{DefaultKeyedRateLimiter, RateLimiter};
use serde_json::{json, Value};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use tower_http::{services::ServeFile, trace::TraceLayer};

use crate::catalog::{self, ResolveError};
use crate::config::{Config, RateLimit};
use crate::output;
use crate::pipeline::Orchestrator;
use crate::utils::validate_profile_url;
use crate::Result;

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// How often idle clients are dropped from the rate limiter
const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub download_dir: PathBuf,
    pub limiter: Option<Arc<DefaultKeyedRateLimiter<IpAddr>>>,
}

impl AppState {
    pub fn new(
        orchestrator: Orchestrator,
        download_dir: PathBuf,
        rate_limit: Option<RateLimit>,
    ) -> Self {
        Self {
            orchestrator,
            download_dir,
            limiter: rate_limit.map(|limit| Arc::new(RateLimiter::keyed(limit.quota()))),
        }
    }

    fn allow(&self, client: IpAddr) -> bool {
        self.limiter
            .as_ref()
            .map_or(true, |limiter| limiter.check_key(&client).is_ok())
    }

    /// Forget clients whose quota has fully replenished
    pub fn prune_limiter(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }

    /// Prune the rate limiter periodically for as long as the server runs
    fn spawn_limiter_pruning(&self) -> Option<tokio::task::JoinHandle<()>> {
        self.limiter.as_ref()?;
        let state = self.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(LIMITER_PRUNE_INTERVAL);
            loop {
                interval.tick().await;
                state.prune_limiter();
                if let Some(limiter) = &state.limiter {
                    tracing::trace!("Rate limiter tracks {} client(s)", limiter.len());
                }
            }
        }))
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Build the router with all routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/download", post(start_download))
        .route("/downloads", get(list_downloads))
        .route("/downloads/*path", get(serve_artifact))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl-C
pub async fn serve(config: &Config) -> Result<()> {
    let state = AppState::new(
        Orchestrator::from_config(config),
        config.storage.download_dir.clone(),
        Some(config.rate_limit()?),
    );
    let pruning = state.spawn_limiter_pruning();
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down");
    })
    .await?;

    if let Some(pruning) = pruning {
        pruning.abort();
    }
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// POST /download - validate the URL, then stream pipeline events
async fn start_download(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    body: Bytes,
) -> Response {
    let client = connect
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
    if !state.allow(client) {
        tracing::warn!(%client, "Rate limit exceeded");
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded. Please wait before trying again.",
        );
    }

    let request = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(map)) if !map.is_empty() => map,
        _ => return error_response(StatusCode::BAD_REQUEST, "Invalid JSON body"),
    };
    let url = request.get("url").and_then(Value::as_str).unwrap_or_default();

    if let Some(message) = validate_profile_url(url) {
        tracing::debug!("Rejected URL {:?}: {}", url, message);
        return error_response(StatusCode::BAD_REQUEST, &message);
    }

    tracing::info!(%client, "Starting pipeline for {}", url.trim());
    let events = state.orchestrator.run(url.trim());

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(output::sse_frames(events)),
    )
        .into_response()
}

/// GET /downloads - catalog of everything on disk
async fn list_downloads(State(state): State<AppState>) -> Response {
    let dir = state.download_dir.clone();
    match tokio::task::spawn_blocking(move || catalog::scan(&dir)).await {
        Ok(Ok(profiles)) => Json(profiles).into_response(),
        Ok(Err(e)) => {
            tracing::error!("Failed to scan downloads: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list downloads")
        }
        Err(e) => {
            tracing::error!("Catalog scan panicked: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list downloads")
        }
    }
}

/// GET /downloads/*path - one artifact, confined to the download root
async fn serve_artifact(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
    request: Request,
) -> Response {
    let root = state.download_dir.clone();
    let requested = path.clone();
    let resolved =
        match tokio::task::spawn_blocking(move || catalog::resolve_artifact(&root, &requested))
            .await
        {
            Ok(Ok(resolved)) => resolved,
            Ok(Err(ResolveError::Forbidden)) => {
                tracing::warn!("Refused artifact path {:?}", path);
                return error_response(StatusCode::FORBIDDEN, "Forbidden");
            }
            Ok(Err(ResolveError::NotFound)) => {
                return error_response(StatusCode::NOT_FOUND, "Not found")
            }
            Err(e) => {
                tracing::error!("Artifact lookup panicked: {}", e);
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read file");
            }
        };

    match ServeFile::new(resolved).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}
