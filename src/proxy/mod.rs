//! The request-servicing core: catalog-checked, single-flight cache fill.
//!
//! `serve` is the one public entry. Cache hits stream straight from the
//! blob store; cold artifacts are fetched once per storage key no matter
//! how many clients ask concurrently, teed through a SHA-256 hasher into
//! the store, recorded in the catalog, and only then handed out — every
//! reader gets the final bytes, never an in-flight stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tracing::{error, warn};

use crate::blob::{BlobStore, StoreError};
use crate::catalog::{Artifact, Catalog, Package, Version};
use crate::error::{ErrorKind, ProxyError};
use crate::fetch::Fetcher;
use crate::metrics::Metrics;
use crate::purl::Purl;

mod flight;

pub use flight::{Flight, FlightMap, Stored};
use flight::FlightFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Metadata,
    Artifact,
}

/// What a protocol adapter hands the core: where the bytes live upstream
/// and, for cacheable requests, where they belong locally.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub kind: RequestKind,
    pub upstream_url: String,
    /// `ecosystem/[namespace/]name/version/filename`; required for
    /// artifacts, optional derived key for cacheable metadata.
    pub storage_key: Option<String>,
    /// Package identity; must carry a version for artifacts.
    pub purl: Option<Purl>,
    pub filename: Option<String>,
    /// Adapter hint used when the catalog has no recorded content type.
    pub content_type: Option<String>,
}

impl FetchRequest {
    pub fn metadata(upstream_url: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Metadata,
            upstream_url: upstream_url.into(),
            storage_key: None,
            purl: None,
            filename: None,
            content_type: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Bypass => "bypass",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponseMeta {
    pub content_type: Option<String>,
    pub size: Option<u64>,
    pub etag: Option<String>,
    pub cache: CacheStatus,
}

/// A response body plus its metadata.
pub struct ServeReply {
    pub body: Box<dyn AsyncRead + Send + Unpin>,
    pub meta: ResponseMeta,
}

impl std::fmt::Debug for ServeReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServeReply").field("meta", &self.meta).finish()
    }
}

pub struct ProxyCore {
    catalog: Arc<dyn Catalog>,
    store: Arc<dyn BlobStore>,
    fetcher: Arc<Fetcher>,
    flights: FlightMap,
    metrics: Arc<Metrics>,
    metadata_ttl: Duration,
}

impl std::fmt::Debug for ProxyCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCore")
            .field("metadata_ttl", &self.metadata_ttl)
            .finish()
    }
}

impl ProxyCore {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        store: Arc<dyn BlobStore>,
        fetcher: Arc<Fetcher>,
        metrics: Arc<Metrics>,
        metadata_ttl: Duration,
    ) -> Self {
        Self {
            catalog,
            store,
            fetcher,
            flights: FlightMap::new(),
            metrics,
            metadata_ttl,
        }
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub async fn serve(&self, req: &FetchRequest) -> Result<ServeReply, ProxyError> {
        self.metrics.requests_total.inc();
        match req.kind {
            RequestKind::Artifact => self.serve_artifact(req).await,
            RequestKind::Metadata => self.serve_metadata(req).await,
        }
    }

    async fn serve_artifact(&self, req: &FetchRequest) -> Result<ServeReply, ProxyError> {
        let purl = req
            .purl
            .as_ref()
            .filter(|p| p.version.is_some())
            .ok_or_else(|| {
                ProxyError::BadRequest("artifact request without versioned identity".to_string())
            })?;
        let version_purl = purl.to_purl_string();
        let filename = req.filename.as_deref().ok_or_else(|| {
            ProxyError::BadRequest("artifact request without filename".to_string())
        })?;
        let key = req.storage_key.as_deref().ok_or_else(|| {
            ProxyError::BadRequest("artifact request without storage key".to_string())
        })?;

        loop {
            if let Some(artifact) = self.catalog.get_artifact(&version_purl, filename).await? {
                if artifact.is_cached() {
                    if let Some(reply) = self.open_hit(&artifact).await? {
                        return Ok(reply);
                    }
                    // Cached row but missing blob: refill below.
                }
            }

            match self.flights.join(key) {
                Flight::Follower(slot) => match flight::wait(slot).await {
                    // Filled (or abandoned); loop to re-read the catalog —
                    // on abandonment this caller may become the new leader.
                    Ok(_) => continue,
                    Err(f) if f.kind == ErrorKind::Cancelled => continue,
                    Err(f) => return Err(ProxyError::from_kind(f.kind, &f.message)),
                },
                Flight::Leader(permit) => {
                    self.metrics.cache_misses_total.inc();
                    let outcome = self.fill(req, &version_purl, filename, key).await;
                    return match outcome {
                        Ok(stored) => {
                            permit.publish(Ok(stored.clone()));
                            // A fresh reader over the stored bytes, never
                            // the in-flight stream.
                            let body = self.store.open(key).await?;
                            Ok(ServeReply {
                                body,
                                meta: ResponseMeta {
                                    content_type: stored.content_type,
                                    size: Some(stored.size),
                                    etag: Some(format!("sha256-{}", stored.content_hash)),
                                    cache: CacheStatus::Miss,
                                },
                            })
                        }
                        Err(err) => {
                            permit.publish(Err(FlightFailure {
                                kind: err.kind(),
                                message: err.to_string(),
                            }));
                            Err(err)
                        }
                    };
                }
            }
        }
    }

    /// Hit path: open the blob, bump the hit count off the latency path.
    /// Returns `None` when the catalog row points at a missing blob, which
    /// degrades the request to a miss.
    async fn open_hit(&self, artifact: &Artifact) -> Result<Option<ServeReply>, ProxyError> {
        let Some(path) = artifact.storage_path.clone() else {
            return Ok(None);
        };
        match self.store.open(&path).await {
            Ok(body) => {
                let catalog = Arc::clone(&self.catalog);
                let version_purl = artifact.version_purl.clone();
                let filename = artifact.filename.clone();
                tokio::spawn(async move {
                    if let Err(e) = catalog.record_hit(&version_purl, &filename).await {
                        warn!(%version_purl, %filename, error = %e, "recording hit failed");
                    }
                });
                self.metrics.cache_hits_total.inc();
                Ok(Some(ServeReply {
                    body,
                    meta: ResponseMeta {
                        content_type: artifact.content_type.clone(),
                        size: artifact.size.map(|s| s as u64),
                        etag: artifact
                            .content_hash
                            .as_ref()
                            .map(|h| format!("sha256-{h}")),
                        cache: CacheStatus::Hit,
                    },
                }))
            }
            Err(StoreError::NotFound(_)) => {
                warn!(
                    version_purl = %artifact.version_purl,
                    filename = %artifact.filename,
                    "catalog says cached but blob is missing; refilling"
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The leader's fill: upsert identity rows, fetch, tee into the store,
    /// then flip the catalog row to cached.
    async fn fill(
        &self,
        req: &FetchRequest,
        version_purl: &str,
        filename: &str,
        key: &str,
    ) -> Result<Stored, ProxyError> {
        self.ensure_rows(req, version_purl, filename).await?;

        self.metrics.upstream_fetches_total.inc();
        let mut remote = match self.fetcher.fetch(&req.upstream_url).await {
            Ok(remote) => remote,
            Err(e) => {
                self.metrics.upstream_errors_total.inc();
                return Err(e.into());
            }
        };

        let (size, content_hash) = match self.store.store(key, &mut remote.body).await {
            Ok(v) => v,
            Err(e) => {
                // Partial writes never became visible; clear any previous
                // blob under this key anyway, best effort.
                self.store.delete(key).await.ok();
                return Err(e.into());
            }
        };

        if let Some(expected) = remote.size {
            if expected != size {
                self.store.delete(key).await.ok();
                return Err(ProxyError::UpstreamDown(format!(
                    "truncated body: got {size} of {expected} bytes"
                )));
            }
        }

        let content_type = remote.content_type.clone().or_else(|| req.content_type.clone());
        match self
            .catalog
            .mark_artifact_cached(
                version_purl,
                filename,
                key,
                &content_hash,
                size as i64,
                content_type.as_deref(),
            )
            .await
        {
            Ok(()) => Ok(Stored {
                content_hash,
                size,
                content_type,
            }),
            Err(e) => {
                // The blob is already durable; deleting may fail and leak
                // it. Report loudly rather than mask.
                error!(
                    %version_purl, %filename, storage_key = %key, error = %e,
                    "catalog update failed after blob write; deleting blob"
                );
                self.store.delete(key).await.ok();
                Err(e.into())
            }
        }
    }

    /// Parent rows exist before any artifact row referencing them.
    async fn ensure_rows(
        &self,
        req: &FetchRequest,
        version_purl: &str,
        filename: &str,
    ) -> Result<(), ProxyError> {
        let Some(purl) = &req.purl else {
            return Ok(());
        };
        let Some(version) = &purl.version else {
            return Ok(());
        };

        let package_purl = purl.package_purl();
        self.catalog
            .upsert_package(&Package {
                purl: package_purl.clone(),
                ecosystem: purl.ecosystem.clone(),
                name: purl.name.clone(),
                ..Package::default()
            })
            .await?;
        self.catalog
            .upsert_version(&Version {
                purl: version_purl.to_string(),
                package_purl,
                version: version.clone(),
                ..Version::default()
            })
            .await?;
        self.catalog
            .upsert_artifact(&Artifact {
                version_purl: version_purl.to_string(),
                filename: filename.to_string(),
                upstream_url: Some(req.upstream_url.clone()),
                ..Artifact::default()
            })
            .await?;
        Ok(())
    }

    /// Metadata is never coalesced. With a derived key the body is cached
    /// in the blob store under a freshness TTL (stale copies are served if
    /// the refresh fails); without one the upstream response streams
    /// straight through.
    async fn serve_metadata(&self, req: &FetchRequest) -> Result<ServeReply, ProxyError> {
        let Some(key) = req.storage_key.as_deref() else {
            let remote = self.fetcher.fetch(&req.upstream_url).await?;
            return Ok(ServeReply {
                meta: ResponseMeta {
                    content_type: remote.content_type.clone(),
                    size: remote.size,
                    etag: remote.etag.clone(),
                    cache: CacheStatus::Bypass,
                },
                body: remote.body,
            });
        };

        if let Some(modified) = self.store.modified(key).await? {
            let age = modified.elapsed().unwrap_or(Duration::MAX);
            if age < self.metadata_ttl {
                return self.open_cached_metadata(req, key, CacheStatus::Hit).await;
            }
        }

        match self.fetcher.fetch(&req.upstream_url).await {
            Ok(mut remote) => {
                self.store.store(key, &mut remote.body).await?;
                self.open_cached_metadata(req, key, CacheStatus::Miss).await
            }
            Err(e) => {
                if self.store.exists(key).await.unwrap_or(false) {
                    warn!(url = %req.upstream_url, error = %e, "serving stale metadata");
                    return self.open_cached_metadata(req, key, CacheStatus::Hit).await;
                }
                self.metrics.upstream_errors_total.inc();
                Err(e.into())
            }
        }
    }

    async fn open_cached_metadata(
        &self,
        req: &FetchRequest,
        key: &str,
        cache: CacheStatus,
    ) -> Result<ServeReply, ProxyError> {
        let body = self.store.open(key).await?;
        let size = self.store.size(key).await.ok();
        Ok(ServeReply {
            body,
            meta: ResponseMeta {
                content_type: req.content_type.clone(),
                size,
                etag: None,
                cache,
            },
        })
    }

    /// Explicit cache clear: catalog row back to NULL, blob removed.
    pub async fn clear(&self, version_purl: &str, filename: &str) -> Result<(), ProxyError> {
        if let Some(artifact) = self.catalog.get_artifact(version_purl, filename).await? {
            if let Some(path) = &artifact.storage_path {
                self.store.delete(path).await?;
            }
            self.catalog.clear_artifact(version_purl, filename).await?;
        }
        Ok(())
    }
}
