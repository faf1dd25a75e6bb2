//! Archive browsing and version diffing over cached artifacts.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

use crate::archive::{detect_format, open_archive, ArchiveReader, FileInfo, PrefixStripped};
use crate::diff::{self, Comparison};
use crate::error::ProxyError;
use crate::purl::Purl;

use super::AppState;

/// Locate the cached archive for a version, read it fully, and open it
/// with the ecosystem's wrapper prefix stripped.
async fn load_archive(
    state: &AppState,
    ecosystem: &str,
    name: &str,
    version: &str,
) -> Result<Box<dyn ArchiveReader>, ProxyError> {
    let version_purl = Purl::version(ecosystem, name, version).to_purl_string();
    let artifacts = state.catalog.list_artifacts(&version_purl).await?;
    let artifact = artifacts
        .iter()
        .find(|a| a.is_cached() && detect_format(&a.filename).is_some())
        .ok_or(ProxyError::NotFound)?;
    let storage_path = artifact.storage_path.as_deref().ok_or(ProxyError::NotFound)?;

    let mut reader = state.store.open(storage_path).await?;
    let mut bytes = Vec::with_capacity(artifact.size.unwrap_or(0).max(0) as usize);
    reader
        .read_to_end(&mut bytes)
        .await
        .map_err(|e| ProxyError::Storage(e.into()))?;

    let prefix = state
        .adapters
        .by_ecosystem(ecosystem)
        .and_then(|a| a.archive_prefix(name, version, &artifact.filename));
    let filename = artifact.filename.clone();

    let archive = tokio::task::spawn_blocking(move || open_archive(&filename, bytes))
        .await
        .map_err(|e| ProxyError::Validation(format!("archive task failed: {e}")))??;

    Ok(match prefix {
        Some(prefix) => Box::new(PrefixStripped::new(archive, &prefix)),
        None => Box::new(archive),
    })
}

#[derive(Debug, Deserialize)]
pub(super) struct BrowseQuery {
    #[serde(default)]
    path: String,
}

#[derive(Debug, Serialize)]
pub(super) struct BrowseResponse {
    ecosystem: String,
    name: String,
    version: String,
    path: String,
    entries: Vec<FileInfo>,
}

/// `GET /api/browse/{ecosystem}/{name}/{version}?path=`
pub(super) async fn listing(
    State(state): State<Arc<AppState>>,
    Path((ecosystem, name, version)): Path<(String, String, String)>,
    Query(query): Query<BrowseQuery>,
) -> Result<Json<BrowseResponse>, ProxyError> {
    let archive = load_archive(&state, &ecosystem, &name, &version).await?;
    let entries = archive.list_dir(&query.path);
    Ok(Json(BrowseResponse {
        ecosystem,
        name,
        version,
        path: query.path,
        entries,
    }))
}

/// `GET /api/browse/{ecosystem}/{name}/{version}/file/{filepath…}`
pub(super) async fn file(
    State(state): State<Arc<AppState>>,
    Path((ecosystem, name, version, filepath)): Path<(String, String, String, String)>,
) -> Result<Response, ProxyError> {
    let archive = load_archive(&state, &ecosystem, &name, &version).await?;
    let bytes = archive.extract(&filepath)?;

    let filename = filepath.rsplit('/').next().unwrap_or(&filepath).to_string();
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, guess_content_type(&filepath).to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// `GET /api/compare/{ecosystem}/{name}/{from}/{to}`
pub(super) async fn compare(
    State(state): State<Arc<AppState>>,
    Path((ecosystem, name, from, to)): Path<(String, String, String, String)>,
) -> Result<Json<Comparison>, ProxyError> {
    let old = load_archive(&state, &ecosystem, &name, &from).await?;
    let new = load_archive(&state, &ecosystem, &name, &to).await?;
    let comparison =
        tokio::task::spawn_blocking(move || diff::compare(old.as_ref(), new.as_ref()))
            .await
            .map_err(|e| ProxyError::Validation(format!("diff task failed: {e}")))??;
    Ok(Json(comparison))
}

/// Extension-based content type for browsed files.
fn guess_content_type(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or_default();
    match ext {
        "json" => "application/json",
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" | "mjs" | "cjs" => "text/javascript",
        "md" | "txt" | "rs" | "py" | "rb" | "go" | "java" | "c" | "h" | "cpp" | "hpp" | "ts"
        | "tsx" | "jsx" | "sh" | "toml" | "yaml" | "yml" | "xml" | "lock" | "cfg" | "ini"
        | "gemspec" | "license" => "text/plain; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "gz" | "tgz" | "zip" | "whl" | "gem" | "crate" => "application/octet-stream",
        _ => "application/octet-stream",
    }
}
