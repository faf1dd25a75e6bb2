//! Relational catalog of packages, versions, artifacts, and vulnerabilities.
//!
//! The catalog fronts the blob store: an artifact row with a non-NULL
//! `storage_path` points at cached bytes, a NULL one is merely known. Two
//! backends are supported (embedded SQLite and client/server Postgres)
//! behind a single query layer parameterized by [`Dialect`].

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

mod dialect;
mod postgres;
mod schema;
mod sql;
mod sqlite;

pub use dialect::Dialect;
pub use postgres::connect_postgres;
pub use sql::{SqlCatalog, SqlConn, SqlRow, SqlValue};
pub use sqlite::open_sqlite;

/// Current schema version recorded in `schema_meta`.
pub const SCHEMA_VERSION: &str = "3";

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// A cached row already owns the storage path being claimed.
    #[error("storage path conflict: {0}")]
    Conflict(String),

    #[error("row decode error: {0}")]
    Decode(String),

    #[error("database error: {0}")]
    Backend(String),
}

/// A package identity plus enrichment attributes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Package {
    pub purl: String,
    pub ecosystem: String,
    pub name: String,
    pub latest_version: Option<String>,
    pub license: Option<String>,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub repository_url: Option<String>,
    pub registry_url: Option<String>,
    pub enriched_at: Option<i64>,
    pub vulns_synced_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Version {
    pub purl: String,
    pub package_purl: String,
    pub version: String,
    /// Upstream-asserted digest, stored opaquely (e.g. `sha512-…`).
    pub integrity: Option<String>,
    pub published_at: Option<i64>,
    pub yanked: bool,
    pub license: Option<String>,
    pub enriched_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Artifact {
    pub version_purl: String,
    pub filename: String,
    pub upstream_url: Option<String>,
    /// NULL iff not yet cached. Unique among cached rows.
    pub storage_path: Option<String>,
    /// Lowercase hex SHA-256 of the stored bytes.
    pub content_hash: Option<String>,
    pub size: Option<i64>,
    pub content_type: Option<String>,
    pub fetched_at: Option<i64>,
    pub hit_count: i64,
    pub last_accessed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Artifact {
    pub fn is_cached(&self) -> bool {
        self.storage_path.is_some() && self.fetched_at.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Vulnerability {
    pub vuln_id: String,
    pub ecosystem: String,
    pub package_name: String,
    pub severity: Option<String>,
    pub summary: Option<String>,
    pub fixed_version: Option<String>,
    pub cvss_score: Option<f64>,
    pub references: Option<String>,
    pub source: Option<String>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub cached_artifacts: i64,
    pub total_size_bytes: i64,
    pub packages: i64,
    pub versions: i64,
}

/// One row of the cached-artifact listing, joined across all three tables.
#[derive(Debug, Clone, Serialize)]
pub struct CachedArtifact {
    pub ecosystem: String,
    pub name: String,
    pub version: String,
    pub filename: String,
    pub size: Option<i64>,
    pub hit_count: i64,
    pub fetched_at: Option<i64>,
    pub content_hash: Option<String>,
    pub vuln_count: i64,
}

/// Sort orders accepted by the cached-artifact listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    #[default]
    Hits,
    Name,
    Size,
    CachedAt,
    Ecosystem,
    Vulns,
}

impl SortBy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hits" => Some(Self::Hits),
            "name" => Some(Self::Name),
            "size" => Some(Self::Size),
            "cached_at" => Some(Self::CachedAt),
            "ecosystem" => Some(Self::Ecosystem),
            "vulns" => Some(Self::Vulns),
            _ => None,
        }
    }
}

/// Persistent index over cached content. All operations are idempotent on
/// identity; "not found" is `Ok(None)` or an empty `Vec`, never an error.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_package(&self, purl: &str) -> Result<Option<Package>, CatalogError>;
    async fn get_package_by_name(
        &self,
        ecosystem: &str,
        name: &str,
    ) -> Result<Option<Package>, CatalogError>;
    /// Insert or merge. Non-identity fields merge field-wise: an absent
    /// (None) field never clobbers a present one. `created_at` is
    /// preserved, `updated_at` refreshed.
    async fn upsert_package(&self, pkg: &Package) -> Result<(), CatalogError>;

    async fn get_version(&self, purl: &str) -> Result<Option<Version>, CatalogError>;
    async fn list_versions(&self, package_purl: &str) -> Result<Vec<Version>, CatalogError>;
    async fn upsert_version(&self, version: &Version) -> Result<(), CatalogError>;

    async fn get_artifact(
        &self,
        version_purl: &str,
        filename: &str,
    ) -> Result<Option<Artifact>, CatalogError>;
    async fn get_artifact_by_path(
        &self,
        storage_path: &str,
    ) -> Result<Option<Artifact>, CatalogError>;
    async fn list_artifacts(&self, version_purl: &str) -> Result<Vec<Artifact>, CatalogError>;
    /// Insert the row if new (with NULL cache fields); merge `upstream_url`
    /// otherwise. Cache fields are only ever touched by
    /// [`mark_artifact_cached`](Catalog::mark_artifact_cached) and
    /// [`clear_artifact`](Catalog::clear_artifact).
    async fn upsert_artifact(&self, artifact: &Artifact) -> Result<(), CatalogError>;

    /// Atomic NULL→cached transition. Fails with [`CatalogError::Conflict`]
    /// if another cached row already owns `storage_path`.
    async fn mark_artifact_cached(
        &self,
        version_purl: &str,
        filename: &str,
        storage_path: &str,
        content_hash: &str,
        size: i64,
        content_type: Option<&str>,
    ) -> Result<(), CatalogError>;

    /// Atomic `hit_count += 1` and `last_accessed_at = now`.
    async fn record_hit(&self, version_purl: &str, filename: &str) -> Result<(), CatalogError>;

    /// Atomic cached→NULL transition; the row survives for hit history.
    async fn clear_artifact(&self, version_purl: &str, filename: &str)
        -> Result<(), CatalogError>;

    async fn cache_stats(&self) -> Result<CacheStats, CatalogError>;
    /// Cached artifacts, least recently used first (never-accessed first).
    async fn lru_artifacts(&self, limit: i64) -> Result<Vec<Artifact>, CatalogError>;
    async fn popular(&self, limit: i64) -> Result<Vec<Artifact>, CatalogError>;
    async fn recent(&self, limit: i64) -> Result<Vec<Artifact>, CatalogError>;
    async fn search(
        &self,
        pattern: &str,
        ecosystem: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Package>, CatalogError>;
    async fn list_cached(
        &self,
        ecosystem: Option<&str>,
        sort: SortBy,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CachedArtifact>, CatalogError>;

    async fn upsert_vulnerability(&self, vuln: &Vulnerability) -> Result<(), CatalogError>;
    async fn vulnerabilities(
        &self,
        ecosystem: &str,
        name: &str,
    ) -> Result<Vec<Vulnerability>, CatalogError>;

    /// Schema version from `schema_meta`; the health check treats failure
    /// here as "catalog unreachable".
    async fn schema_version(&self) -> Result<String, CatalogError>;
}

/// Epoch seconds, the timestamp representation used across both backends.
pub(crate) fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}
