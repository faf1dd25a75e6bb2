//! JSON API over the catalog and the enricher.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::catalog::{Package, SortBy, Version, Vulnerability};
use crate::enrich::{self, LicenseCategory};
use crate::error::ProxyError;
use crate::purl::Purl;

use super::AppState;

#[derive(Debug, Serialize)]
pub(super) struct PackageResponse {
    purl: String,
    ecosystem: String,
    name: String,
    latest_version: Option<String>,
    license: Option<String>,
    license_category: Option<LicenseCategory>,
    description: Option<String>,
    homepage: Option<String>,
    repository_url: Option<String>,
    registry_url: Option<String>,
    enriched_at: Option<i64>,
    vulns_synced_at: Option<i64>,
}

impl From<&Package> for PackageResponse {
    fn from(pkg: &Package) -> Self {
        Self {
            purl: pkg.purl.clone(),
            ecosystem: pkg.ecosystem.clone(),
            name: pkg.name.clone(),
            latest_version: pkg.latest_version.clone(),
            license: pkg.license.clone(),
            license_category: pkg
                .license
                .as_deref()
                .map(|raw| enrich::normalize(raw).category),
            description: pkg.description.clone(),
            homepage: pkg.homepage.clone(),
            repository_url: pkg.repository_url.clone(),
            registry_url: pkg.registry_url.clone(),
            enriched_at: pkg.enriched_at,
            vulns_synced_at: pkg.vulns_synced_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct PackageDetail {
    #[serde(flatten)]
    package: PackageResponse,
    versions: Vec<Version>,
    vulnerabilities: Vec<Vulnerability>,
}

/// `GET /api/package/{ecosystem}/{name}` — enriched on demand if the
/// catalog has never seen the package.
pub(super) async fn package(
    State(state): State<Arc<AppState>>,
    Path((ecosystem, name)): Path<(String, String)>,
) -> Result<Json<PackageDetail>, ProxyError> {
    let purl = Purl::package(&ecosystem, &name).to_purl_string();

    let mut pkg = state.catalog.get_package(&purl).await?;
    let needs_enrichment = pkg.as_ref().map(|p| p.enriched_at.is_none()).unwrap_or(true);
    if needs_enrichment {
        if let Err(e) = state.enricher.enrich_package(&ecosystem, &name).await {
            tracing::warn!(%ecosystem, %name, error = %e, "on-demand enrichment failed");
        }
        pkg = state.catalog.get_package(&purl).await?;
    }
    let pkg = pkg.ok_or(ProxyError::NotFound)?;

    let versions = state.catalog.list_versions(&purl).await?;
    let vulnerabilities = state.catalog.vulnerabilities(&ecosystem, &name).await?;
    Ok(Json(PackageDetail {
        package: PackageResponse::from(&pkg),
        versions,
        vulnerabilities,
    }))
}

#[derive(Debug, Serialize)]
pub(super) struct VersionDetail {
    #[serde(flatten)]
    package: PackageResponse,
    version: Version,
    artifacts: Vec<crate::catalog::Artifact>,
}

/// `GET /api/package/{ecosystem}/{name}/{version}`
pub(super) async fn package_version(
    State(state): State<Arc<AppState>>,
    Path((ecosystem, name, version)): Path<(String, String, String)>,
) -> Result<Json<VersionDetail>, ProxyError> {
    let package_purl = Purl::package(&ecosystem, &name).to_purl_string();
    let version_purl = Purl::version(&ecosystem, &name, &version).to_purl_string();

    let pkg = state
        .catalog
        .get_package(&package_purl)
        .await?
        .ok_or(ProxyError::NotFound)?;
    let version = state
        .catalog
        .get_version(&version_purl)
        .await?
        .ok_or(ProxyError::NotFound)?;
    let artifacts = state.catalog.list_artifacts(&version_purl).await?;

    Ok(Json(VersionDetail {
        package: PackageResponse::from(&pkg),
        version,
        artifacts,
    }))
}

/// `GET /api/vulns/{ecosystem}/{name}`
pub(super) async fn vulns(
    State(state): State<Arc<AppState>>,
    Path((ecosystem, name)): Path<(String, String)>,
) -> Result<Json<Vec<Vulnerability>>, ProxyError> {
    Ok(Json(state.catalog.vulnerabilities(&ecosystem, &name).await?))
}

/// `GET /api/vulns/{ecosystem}/{name}/{version}` — the subset not yet
/// fixed by `version`.
pub(super) async fn vulns_for_version(
    State(state): State<Arc<AppState>>,
    Path((ecosystem, name, version)): Path<(String, String, String)>,
) -> Result<Json<Vec<Vulnerability>>, ProxyError> {
    let all = state.catalog.vulnerabilities(&ecosystem, &name).await?;
    let affecting = all
        .into_iter()
        .filter(|v| match v.fixed_version.as_deref() {
            // Fixed at or below the requested version → no longer affected.
            Some(fixed) => !matches!(
                enrich::compare_versions(&version, fixed),
                Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
            ),
            None => true,
        })
        .collect();
    Ok(Json(affecting))
}

#[derive(Debug, Deserialize)]
pub(super) struct OutdatedRequest {
    packages: Vec<OutdatedEntry>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OutdatedEntry {
    ecosystem: String,
    name: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub(super) struct OutdatedResponse {
    ecosystem: String,
    name: String,
    version: String,
    latest_version: Option<String>,
    is_outdated: bool,
}

/// `POST /api/outdated`
pub(super) async fn outdated(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OutdatedRequest>,
) -> Result<Json<Vec<OutdatedResponse>>, ProxyError> {
    let mut out = Vec::with_capacity(req.packages.len());
    for entry in req.packages {
        let latest = state
            .enricher
            .latest_version(&entry.ecosystem, &entry.name)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(
                    ecosystem = %entry.ecosystem, name = %entry.name, error = %e,
                    "latest-version lookup failed"
                );
                None
            });
        let is_outdated = latest
            .as_deref()
            .map(|l| enrich::is_outdated(&entry.version, l))
            .unwrap_or(false);
        out.push(OutdatedResponse {
            ecosystem: entry.ecosystem,
            name: entry.name,
            version: entry.version,
            latest_version: latest,
            is_outdated,
        });
    }
    Ok(Json(out))
}

#[derive(Debug, Deserialize)]
pub(super) struct BulkRequest {
    purls: Vec<String>,
}

/// `POST /api/bulk` — map of purl → package for every purl the catalog
/// knows.
pub(super) async fn bulk(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkRequest>,
) -> Result<Json<HashMap<String, PackageResponse>>, ProxyError> {
    let mut out = HashMap::with_capacity(req.purls.len());
    for raw in req.purls {
        let Ok(purl) = Purl::parse(&raw) else {
            continue;
        };
        if let Some(pkg) = state.catalog.get_package(&purl.package_purl()).await? {
            out.insert(raw, PackageResponse::from(&pkg));
        }
    }
    Ok(Json(out))
}

#[derive(Debug, Deserialize)]
pub(super) struct SearchQuery {
    q: String,
    ecosystem: Option<String>,
    #[serde(default)]
    offset: i64,
}

/// `GET /api/search?q=&ecosystem=`
pub(super) async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<PackageResponse>>, ProxyError> {
    let found = state
        .catalog
        .search(&query.q, query.ecosystem.as_deref(), 50, query.offset)
        .await?;
    Ok(Json(found.iter().map(PackageResponse::from).collect()))
}

#[derive(Debug, Deserialize)]
pub(super) struct PackagesQuery {
    ecosystem: Option<String>,
    sort: Option<String>,
    #[serde(default)]
    offset: i64,
}

/// `GET /api/packages?ecosystem=&sort=` — the cached-artifact listing.
pub(super) async fn packages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PackagesQuery>,
) -> Result<Json<Vec<crate::catalog::CachedArtifact>>, ProxyError> {
    let sort = query
        .sort
        .as_deref()
        .and_then(SortBy::parse)
        .unwrap_or_default();
    let rows = state
        .catalog
        .list_cached(query.ecosystem.as_deref(), sort, 100, query.offset)
        .await?;
    Ok(Json(rows))
}
