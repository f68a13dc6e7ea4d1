use crate::catalog::StubCatalog;
use crate::config::AppConfig;
use crate::peer::PeerProcess;
use crate::webseed::WebseedProxy;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    catalog: Arc<StubCatalog>,
    peer: Arc<dyn PeerProcess>,
    webseed: WebseedProxy,
    peer_enabled: bool,
    /// Advertised when the peer implementation has no endpoint of its own.
    peer_fallback_url: Option<String>,
}

impl AppState {
    pub fn new(config: &AppConfig, peer: Arc<dyn PeerProcess>, webseed: WebseedProxy) -> Self {
        Self {
            catalog: Arc::new(StubCatalog::new()),
            peer,
            webseed,
            peer_enabled: config.peer.enabled,
            peer_fallback_url: config.peer.static_url().map(str::to_string),
        }
    }

    async fn local_peer_url(&self) -> Option<String> {
        if !self.peer_enabled {
            return None;
        }
        match self.peer.endpoint_url().await {
            Some(url) => Some(url),
            None => self.peer_fallback_url.clone(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/v1/catalog", get(api_catalog))
        .route("/api/v1/models/{namespace}/{name}/revs/{rev}", get(api_revision))
        .route("/api/v1/bootstrap", get(api_bootstrap))
        .route("/api/v1/health/swarm", get(api_swarm_health))
        .route("/api/v1/peer", get(api_peer))
        .route("/torrents/{namespace}/{name}/{file}", get(torrent))
        .route("/webseed/{namespace}/{name}/{rev}/{*path}", get(webseed))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Serve the API until `shutdown` resolves.
pub async fn run(
    config: &AppConfig,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("serve listening on {local_addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

#[derive(Deserialize)]
struct CatalogQuery {
    query: Option<String>,
}

async fn api_catalog(
    State(state): State<AppState>,
    Query(params): Query<CatalogQuery>,
) -> Json<crate::catalog::CatalogResponse> {
    Json(state.catalog.catalog(params.query.as_deref()))
}

async fn api_revision(
    State(state): State<AppState>,
    Path((namespace, name, rev)): Path<(String, String, String)>,
) -> Result<Json<crate::catalog::ModelRevision>, StatusCode> {
    let id = format!("{namespace}/{name}");
    state
        .catalog
        .revision(&id, &rev)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Deserialize)]
struct ModelQuery {
    model: String,
    rev: String,
}

async fn api_bootstrap(
    State(state): State<AppState>,
    Query(params): Query<ModelQuery>,
) -> Result<Json<crate::catalog::BootstrapResponse>, StatusCode> {
    let local_peer = state.local_peer_url().await;
    state
        .catalog
        .bootstrap(&params.model, &params.rev, local_peer)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn api_swarm_health(
    State(state): State<AppState>,
    Query(params): Query<ModelQuery>,
) -> Result<Json<crate::catalog::SwarmHealth>, StatusCode> {
    state
        .catalog
        .health(&params.model, &params.rev)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn api_peer(State(state): State<AppState>) -> Json<serde_json::Value> {
    let peer = &state.peer;
    let peer_state = peer.state().await;
    let running = peer.is_running().await;
    let endpoint = peer.endpoint_url().await;
    let started_at = peer.started_at().await;
    Json(serde_json::json!({
        "impl": peer.name(),
        "enabled": state.peer_enabled,
        "state": peer_state,
        "running": running,
        "endpoint": endpoint,
        "startedAt": started_at,
    }))
}

async fn torrent(
    State(state): State<AppState>,
    Path((namespace, name, file)): Path<(String, String, String)>,
) -> Response {
    let Some(rev) = file.strip_suffix(".torrent") else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let id = format!("{namespace}/{name}");
    let Some(bytes) = state.catalog.torrent(&id, rev) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let disposition = format!("inline; filename=\"{name}-{rev}.torrent\"");
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-bittorrent"),
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    (headers, bytes).into_response()
}

/// Headers that describe the upstream connection rather than the payload.
const HOP_BY_HOP: &[&str] = &["connection", "keep-alive", "transfer-encoding", "upgrade"];

async fn webseed(
    State(state): State<AppState>,
    Path((namespace, name, rev, path)): Path<(String, String, String, String)>,
    request_headers: HeaderMap,
) -> Response {
    let id = format!("{namespace}/{name}");
    if state.catalog.revision(&id, &rev).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }

    if !state.webseed.is_enabled() {
        let Some(bytes) = state.catalog.file(&id, &rev, &path) else {
            return StatusCode::NOT_FOUND.into_response();
        };
        let content_type = if path.ends_with(".json") {
            "application/json"
        } else {
            "application/octet-stream"
        };
        return ([(header::CONTENT_TYPE, content_type)], bytes.to_vec()).into_response();
    }

    let range = request_headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());
    match state.webseed.fetch(&id, &rev, &path, range).await {
        Ok(upstream) => {
            let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut headers = upstream.headers;
            for name in HOP_BY_HOP {
                headers.remove(*name);
            }
            (status, headers, upstream.body).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "webseed proxy request failed");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}
