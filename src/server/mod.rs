//! HTTP surface: ecosystem mounts, operational endpoints, and the JSON
//! API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::{info, Instrument};

use crate::adapters::{AdapterSet, Resolution};
use crate::blob::BlobStore;
use crate::catalog::Catalog;
use crate::enrich::Enricher;
use crate::error::ProxyError;
use crate::metrics::Metrics;
use crate::proxy::{ProxyCore, ServeReply};

mod api;
mod browse;

pub struct AppState {
    pub proxy: ProxyCore,
    pub catalog: Arc<dyn Catalog>,
    pub store: Arc<dyn BlobStore>,
    pub adapters: AdapterSet,
    pub enricher: Enricher,
    pub metrics: Arc<Metrics>,
    pub storage_path: String,
    pub database_path: String,
    request_ids: AtomicU64,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("storage_path", &self.storage_path)
            .finish()
    }
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        proxy: ProxyCore,
        catalog: Arc<dyn Catalog>,
        store: Arc<dyn BlobStore>,
        adapters: AdapterSet,
        enricher: Enricher,
        metrics: Arc<Metrics>,
        storage_path: String,
        database_path: String,
    ) -> Self {
        Self {
            proxy,
            catalog,
            store,
            adapters,
            enricher,
            metrics,
            storage_path,
            database_path,
            request_ids: AtomicU64::new(0),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, self.to_string()).into_response()
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        .route("/api/package/{ecosystem}/{name}", get(api::package))
        .route(
            "/api/package/{ecosystem}/{name}/{version}",
            get(api::package_version),
        )
        .route("/api/vulns/{ecosystem}/{name}", get(api::vulns))
        .route(
            "/api/vulns/{ecosystem}/{name}/{version}",
            get(api::vulns_for_version),
        )
        .route("/api/outdated", post(api::outdated))
        .route("/api/bulk", post(api::bulk))
        .route("/api/search", get(api::search))
        .route("/api/packages", get(api::packages))
        .route(
            "/api/browse/{ecosystem}/{name}/{version}",
            get(browse::listing),
        )
        .route(
            "/api/browse/{ecosystem}/{name}/{version}/file/{*filepath}",
            get(browse::file),
        )
        .route(
            "/api/compare/{ecosystem}/{name}/{from}/{to}",
            get(browse::compare),
        )
        .route("/{mount}/{*path}", get(ecosystem_proxy))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            request_id_layer,
        ))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn run(state: Arc<AppState>, listen: &str) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(%listen, "depot listening");
    axum::serve(listener, router).await?;
    Ok(())
}

/// Monotonic per-process request IDs, echoed as `X-Request-ID` and
/// attached to every log line in the request's span.
async fn request_id_layer(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let id = state.request_ids.fetch_add(1, Ordering::Relaxed) + 1;
    let span = tracing::info_span!(
        "request",
        request_id = id,
        method = %req.method(),
        path = %req.uri().path(),
    );
    let mut resp = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        resp.headers_mut().insert("x-request-id", value);
    }
    resp
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    match state.catalog.schema_version().await {
        Ok(_) => (StatusCode::OK, "ok").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "catalog unreachable").into_response()
        }
    }
}

#[derive(Serialize)]
struct StatsResponse {
    cached_artifacts: i64,
    total_size_bytes: i64,
    total_size: String,
    storage_path: String,
    database_path: String,
    packages: i64,
    versions: i64,
}

async fn stats(State(state): State<Arc<AppState>>) -> Result<Response, ProxyError> {
    let stats = state.catalog.cache_stats().await?;
    let body = StatsResponse {
        cached_artifacts: stats.cached_artifacts,
        total_size_bytes: stats.total_size_bytes,
        total_size: format_size(stats.total_size_bytes.max(0) as u64),
        storage_path: state.storage_path.clone(),
        database_path: state.database_path.clone(),
        packages: stats.packages,
        versions: stats.versions,
    };
    Ok(axum::Json(body).into_response())
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

/// The ecosystem mounts: everything under `/{mount}/…` goes through the
/// matching adapter and the proxy core.
async fn ecosystem_proxy(
    State(state): State<Arc<AppState>>,
    Path((mount, path)): Path<(String, String)>,
) -> Result<Response, ProxyError> {
    let adapter = state
        .adapters
        .get(&mount)
        .ok_or(ProxyError::NotFound)?;

    match adapter.resolve(&path)? {
        Resolution::Synthetic { content_type, body } => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type)],
            body,
        )
            .into_response()),
        Resolution::Fetch(req) => {
            let reply = state.proxy.serve(&req).await?;
            Ok(stream_reply(reply))
        }
    }
}

/// Build a streaming response from the proxy core's reply.
fn stream_reply(reply: ServeReply) -> Response {
    let mut builder = Response::builder().status(StatusCode::OK);
    let content_type = reply
        .meta
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    builder = builder.header(header::CONTENT_TYPE, content_type);
    if let Some(size) = reply.meta.size {
        builder = builder.header(header::CONTENT_LENGTH, size);
    }
    if let Some(etag) = &reply.meta.etag {
        builder = builder.header(header::ETAG, etag);
    }
    builder = builder.header("x-cache", reply.meta.cache.as_str());

    builder
        .body(Body::from_stream(ReaderStream::new(reply.body)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Human-readable byte counts for the stats endpoint.
fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
    }
}
