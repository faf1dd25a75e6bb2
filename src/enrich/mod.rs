//! Metadata, license, and vulnerability enrichment.
//!
//! A background-or-on-demand task that pulls registry-canonical metadata
//! and vulnerability reports into the catalog. Batches run concurrently;
//! per-package writes are serialized by the catalog's upsert-by-identity.

use std::cmp::Ordering;
use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::{Catalog, CatalogError, Package, Vulnerability};
use crate::purl::Purl;

mod license;
mod sources;

pub use license::{normalize, LicenseCategory, NormalizedLicense};
pub use sources::{
    MetadataSource, NoVulnSource, OsvSource, RegistrySource, UpstreamMetadata, VulnRecord,
    VulnSource,
};

#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

/// Parse versions the way registries actually publish them: optional `v`
/// prefix, possibly fewer than three components.
pub fn parse_version_lenient(raw: &str) -> Option<semver::Version> {
    let raw = raw.trim().trim_start_matches('v');
    if let Ok(version) = semver::Version::parse(raw) {
        return Some(version);
    }
    // Pad "1" / "1.2" out to three components, preserving any
    // pre-release/build suffix.
    let split = raw.find(['-', '+']).unwrap_or(raw.len());
    let (core, suffix) = raw.split_at(split);
    let dots = core.chars().filter(|c| *c == '.').count();
    if dots >= 2 {
        return None;
    }
    let padded = format!("{core}{}{suffix}", ".0".repeat(2 - dots));
    semver::Version::parse(&padded).ok()
}

/// Semver comparison of two registry version strings; `None` when either
/// side is unparseable.
pub fn compare_versions(current: &str, latest: &str) -> Option<Ordering> {
    Some(parse_version_lenient(current)?.cmp(&parse_version_lenient(latest)?))
}

/// `current < latest`, false when unknown.
pub fn is_outdated(current: &str, latest: &str) -> bool {
    compare_versions(current, latest) == Some(Ordering::Less)
}

pub struct Enricher {
    catalog: Arc<dyn Catalog>,
    metadata: Arc<dyn MetadataSource>,
    vulns: Arc<dyn VulnSource>,
    concurrency: usize,
}

impl std::fmt::Debug for Enricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enricher")
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl Enricher {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        metadata: Arc<dyn MetadataSource>,
        vulns: Arc<dyn VulnSource>,
    ) -> Self {
        Self {
            catalog,
            metadata,
            vulns,
            concurrency: num_cpus::get().min(8),
        }
    }

    /// Pull registry metadata and vulnerabilities for one package and
    /// write the result back to the catalog.
    pub async fn enrich_package(&self, ecosystem: &str, name: &str) -> Result<(), EnrichError> {
        let purl = Purl::package(ecosystem, name);
        let now = crate::catalog::now_epoch();

        if let Some(meta) = self.metadata.package_info(ecosystem, name).await? {
            let license = meta.license.as_deref().map(normalize);
            self.catalog
                .upsert_package(&Package {
                    purl: purl.to_purl_string(),
                    ecosystem: ecosystem.to_string(),
                    name: name.to_string(),
                    latest_version: meta.latest_version,
                    license: license.map(|l| l.expression),
                    description: meta.description,
                    homepage: meta.homepage,
                    repository_url: meta.repository_url,
                    enriched_at: Some(now),
                    ..Package::default()
                })
                .await?;
            debug!(ecosystem, name, "package metadata enriched");
        }

        self.sync_vulns(ecosystem, name).await
    }

    /// Refresh the vulnerability rows for one package.
    pub async fn sync_vulns(&self, ecosystem: &str, name: &str) -> Result<(), EnrichError> {
        let records = self.vulns.query(ecosystem, name).await?;
        let count = records.len();
        for record in records {
            self.catalog
                .upsert_vulnerability(&Vulnerability {
                    vuln_id: record.id,
                    ecosystem: ecosystem.to_string(),
                    package_name: name.to_string(),
                    severity: record.severity,
                    summary: record.summary,
                    fixed_version: record.fixed_version,
                    cvss_score: record.cvss_score,
                    references: if record.references.is_empty() {
                        None
                    } else {
                        Some(record.references.join("\n"))
                    },
                    source: Some("osv".to_string()),
                    ..Vulnerability::default()
                })
                .await?;
        }

        self.catalog
            .upsert_package(&Package {
                purl: Purl::package(ecosystem, name).to_purl_string(),
                ecosystem: ecosystem.to_string(),
                name: name.to_string(),
                vulns_synced_at: Some(crate::catalog::now_epoch()),
                ..Package::default()
            })
            .await?;
        debug!(ecosystem, name, count, "vulnerabilities synced");
        Ok(())
    }

    /// Enrich many packages with bounded concurrency. Failures are logged
    /// per package, never fatal to the batch.
    pub async fn enrich_batch(&self, targets: Vec<(String, String)>) {
        futures::stream::iter(targets)
            .for_each_concurrent(self.concurrency, |(ecosystem, name)| async move {
                if let Err(e) = self.enrich_package(&ecosystem, &name).await {
                    warn!(%ecosystem, %name, error = %e, "enrichment failed");
                }
            })
            .await;
    }

    /// Latest known version for an outdated check, enriching on demand
    /// when the catalog has nothing yet.
    pub async fn latest_version(
        &self,
        ecosystem: &str,
        name: &str,
    ) -> Result<Option<String>, EnrichError> {
        let purl = Purl::package(ecosystem, name).to_purl_string();
        if let Some(pkg) = self.catalog.get_package(&purl).await? {
            if pkg.latest_version.is_some() {
                return Ok(pkg.latest_version);
            }
        }
        if let Some(meta) = self.metadata.package_info(ecosystem, name).await? {
            if meta.latest_version.is_some() {
                self.catalog
                    .upsert_package(&Package {
                        purl,
                        ecosystem: ecosystem.to_string(),
                        name: name.to_string(),
                        latest_version: meta.latest_version.clone(),
                        ..Package::default()
                    })
                    .await?;
                return Ok(meta.latest_version);
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tempfile::tempdir;

    use crate::catalog::open_sqlite;

    use super::*;

    struct FixedMeta(UpstreamMetadata);

    #[async_trait]
    impl MetadataSource for FixedMeta {
        async fn package_info(
            &self,
            _ecosystem: &str,
            _name: &str,
        ) -> Result<Option<UpstreamMetadata>, EnrichError> {
            Ok(Some(self.0.clone()))
        }
    }

    struct FixedVulns(Vec<VulnRecord>);

    #[async_trait]
    impl VulnSource for FixedVulns {
        async fn query(
            &self,
            _ecosystem: &str,
            _name: &str,
        ) -> Result<Vec<VulnRecord>, EnrichError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_lenient_version_parse() {
        assert_eq!(
            parse_version_lenient("1.2").unwrap(),
            semver::Version::new(1, 2, 0)
        );
        assert_eq!(
            parse_version_lenient("v2").unwrap(),
            semver::Version::new(2, 0, 0)
        );
        assert!(parse_version_lenient("1.0.0-beta.1").is_some());
        assert!(parse_version_lenient("not a version").is_none());
    }

    #[test]
    fn test_outdated_comparison() {
        assert!(is_outdated("1.2.3", "1.3.0"));
        assert!(!is_outdated("1.3.0", "1.3.0"));
        assert!(!is_outdated("2.0.0", "1.3.0"));
        assert!(is_outdated("1.0.0-beta.1", "1.0.0"));
        // Unknowns never count as outdated.
        assert!(!is_outdated("garbage", "1.0.0"));
    }

    #[tokio::test]
    async fn test_enrich_writes_back() {
        let dir = tempdir().unwrap();
        let catalog: Arc<dyn Catalog> =
            Arc::new(open_sqlite(&dir.path().join("c.db")).await.unwrap());

        let enricher = Enricher::new(
            Arc::clone(&catalog),
            Arc::new(FixedMeta(UpstreamMetadata {
                latest_version: Some("1.3.0".to_string()),
                description: Some("String left pad".to_string()),
                license: Some("MIT OR GPL-2.0-only".to_string()),
                homepage: None,
                repository_url: None,
            })),
            Arc::new(FixedVulns(vec![VulnRecord {
                id: "GHSA-1".to_string(),
                summary: Some("bad".to_string()),
                severity: Some("LOW".to_string()),
                cvss_score: None,
                fixed_version: Some("1.3.0".to_string()),
                references: vec!["https://example.com".to_string()],
            }])),
        );

        enricher.enrich_package("npm", "left-pad").await.unwrap();

        let pkg = catalog
            .get_package("pkg:npm/left-pad")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pkg.latest_version.as_deref(), Some("1.3.0"));
        assert_eq!(pkg.license.as_deref(), Some("MIT OR GPL-2.0-only"));
        assert!(pkg.enriched_at.is_some());
        assert!(pkg.vulns_synced_at.is_some());

        let vulns = catalog.vulnerabilities("npm", "left-pad").await.unwrap();
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].source.as_deref(), Some("osv"));
    }
}
