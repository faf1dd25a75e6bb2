//! Registry metadata and vulnerability query interfaces.

use async_trait::async_trait;
use serde::Deserialize;

use super::EnrichError;

/// Canonical metadata a registry reports for a package.
#[derive(Debug, Clone, Default)]
pub struct UpstreamMetadata {
    pub latest_version: Option<String>,
    pub description: Option<String>,
    pub license: Option<String>,
    pub homepage: Option<String>,
    pub repository_url: Option<String>,
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// `Ok(None)` when the ecosystem has no metadata endpoint here or the
    /// package does not exist.
    async fn package_info(
        &self,
        ecosystem: &str,
        name: &str,
    ) -> Result<Option<UpstreamMetadata>, EnrichError>;
}

#[derive(Debug, Clone)]
pub struct VulnRecord {
    pub id: String,
    pub summary: Option<String>,
    pub severity: Option<String>,
    pub cvss_score: Option<f64>,
    pub fixed_version: Option<String>,
    pub references: Vec<String>,
}

#[async_trait]
pub trait VulnSource: Send + Sync {
    async fn query(&self, ecosystem: &str, name: &str) -> Result<Vec<VulnRecord>, EnrichError>;
}

/// A source that reports nothing; used when vulnerability sync is off.
#[derive(Debug, Default)]
pub struct NoVulnSource;

#[async_trait]
impl VulnSource for NoVulnSource {
    async fn query(&self, _ecosystem: &str, _name: &str) -> Result<Vec<VulnRecord>, EnrichError> {
        Ok(Vec::new())
    }
}

// npm registry document, reduced to the fields we read.

#[derive(Debug, Deserialize)]
struct NpmDoc {
    #[serde(rename = "dist-tags", default)]
    dist_tags: NpmDistTags,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    license: Option<serde_json::Value>,
    #[serde(default)]
    homepage: Option<String>,
    #[serde(default)]
    repository: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct NpmDistTags {
    #[serde(default)]
    latest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CratesDoc {
    #[serde(rename = "crate")]
    krate: CratesCrate,
    #[serde(default)]
    versions: Vec<CratesVersion>,
}

#[derive(Debug, Deserialize)]
struct CratesCrate {
    #[serde(default)]
    max_stable_version: Option<String>,
    #[serde(default)]
    max_version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    homepage: Option<String>,
    #[serde(default)]
    repository: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CratesVersion {
    #[serde(default)]
    license: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PypiDoc {
    info: PypiInfo,
}

#[derive(Debug, Deserialize)]
struct PypiInfo {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    license: Option<String>,
    #[serde(default)]
    home_page: Option<String>,
    #[serde(default)]
    project_urls: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct GemDoc {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    info: Option<String>,
    #[serde(default)]
    licenses: Option<Vec<String>>,
    #[serde(default)]
    homepage_uri: Option<String>,
    #[serde(default)]
    source_code_uri: Option<String>,
}

/// Live registry JSON endpoints for the ecosystems with first-class
/// adapters. Base URLs are injectable for tests.
pub struct RegistrySource {
    client: reqwest::Client,
    npm_base: String,
    crates_base: String,
    pypi_base: String,
    gem_base: String,
}

impl std::fmt::Debug for RegistrySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrySource").finish()
    }
}

impl RegistrySource {
    pub fn new() -> Result<Self, EnrichError> {
        let client = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            npm_base: "https://registry.npmjs.org".to_string(),
            crates_base: "https://crates.io".to_string(),
            pypi_base: "https://pypi.org".to_string(),
            gem_base: "https://rubygems.org".to_string(),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_bases(base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            npm_base: base.to_string(),
            crates_base: base.to_string(),
            pypi_base: base.to_string(),
            gem_base: base.to_string(),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
    ) -> Result<Option<T>, EnrichError> {
        let resp = self.client.get(url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status()?;
        Ok(Some(resp.json().await?))
    }
}

/// npm licenses are a string or a `{ "type": … }` object, historically
/// even an array of those.
fn npm_license_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => {
            map.get("type").and_then(|t| t.as_str()).map(str::to_string)
        }
        serde_json::Value::Array(items) => {
            let types: Vec<String> = items.iter().filter_map(npm_license_string).collect();
            if types.is_empty() {
                None
            } else {
                Some(types.join(" OR "))
            }
        }
        _ => None,
    }
}

fn npm_repository_url(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => {
            map.get("url").and_then(|u| u.as_str()).map(str::to_string)
        }
        _ => None,
    }
}

#[async_trait]
impl MetadataSource for RegistrySource {
    async fn package_info(
        &self,
        ecosystem: &str,
        name: &str,
    ) -> Result<Option<UpstreamMetadata>, EnrichError> {
        match ecosystem {
            "npm" => {
                let Some(doc) = self
                    .get_json::<NpmDoc>(&format!("{}/{name}", self.npm_base))
                    .await?
                else {
                    return Ok(None);
                };
                Ok(Some(UpstreamMetadata {
                    latest_version: doc.dist_tags.latest,
                    description: doc.description,
                    license: doc.license.as_ref().and_then(npm_license_string),
                    homepage: doc.homepage,
                    repository_url: doc.repository.as_ref().and_then(npm_repository_url),
                }))
            }
            "cargo" => {
                let Some(doc) = self
                    .get_json::<CratesDoc>(&format!("{}/api/v1/crates/{name}", self.crates_base))
                    .await?
                else {
                    return Ok(None);
                };
                Ok(Some(UpstreamMetadata {
                    latest_version: doc.krate.max_stable_version.or(doc.krate.max_version),
                    description: doc.krate.description,
                    license: doc.versions.first().and_then(|v| v.license.clone()),
                    homepage: doc.krate.homepage,
                    repository_url: doc.krate.repository,
                }))
            }
            "pypi" => {
                let Some(doc) = self
                    .get_json::<PypiDoc>(&format!("{}/pypi/{name}/json", self.pypi_base))
                    .await?
                else {
                    return Ok(None);
                };
                let repository = doc.info.project_urls.as_ref().and_then(|urls| {
                    ["Source", "Repository", "Source Code", "Homepage"]
                        .iter()
                        .find_map(|k| urls.get(*k))
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                });
                Ok(Some(UpstreamMetadata {
                    latest_version: doc.info.version,
                    description: doc.info.summary,
                    license: doc.info.license.filter(|l| !l.is_empty()),
                    homepage: doc.info.home_page.filter(|h| !h.is_empty()),
                    repository_url: repository,
                }))
            }
            "gem" => {
                let Some(doc) = self
                    .get_json::<GemDoc>(&format!("{}/api/v1/gems/{name}.json", self.gem_base))
                    .await?
                else {
                    return Ok(None);
                };
                Ok(Some(UpstreamMetadata {
                    latest_version: doc.version,
                    description: doc.info,
                    license: doc
                        .licenses
                        .filter(|l| !l.is_empty())
                        .map(|l| l.join(" OR ")),
                    homepage: doc.homepage_uri.filter(|h| !h.is_empty()),
                    repository_url: doc.source_code_uri.filter(|s| !s.is_empty()),
                }))
            }
            _ => Ok(None),
        }
    }
}

// OSV query API, reduced to the fields we keep.

#[derive(Debug, Default, Deserialize)]
struct OsvResponse {
    #[serde(default)]
    vulns: Vec<OsvVuln>,
}

#[derive(Debug, Deserialize)]
struct OsvVuln {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    severity: Vec<OsvSeverity>,
    #[serde(default)]
    affected: Vec<OsvAffected>,
    #[serde(default)]
    references: Vec<OsvReference>,
    #[serde(default)]
    database_specific: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OsvSeverity {
    #[serde(default)]
    score: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OsvAffected {
    #[serde(default)]
    ranges: Vec<OsvRange>,
}

#[derive(Debug, Default, Deserialize)]
struct OsvRange {
    #[serde(default)]
    events: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct OsvReference {
    #[serde(default)]
    url: Option<String>,
}

/// The OSV.dev query endpoint.
pub struct OsvSource {
    client: reqwest::Client,
    base: String,
}

impl std::fmt::Debug for OsvSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OsvSource").finish()
    }
}

impl OsvSource {
    pub fn new() -> Result<Self, EnrichError> {
        let client = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base: "https://api.osv.dev".to_string(),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_base(base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.to_string(),
        }
    }

    /// OSV uses its own ecosystem labels.
    fn osv_ecosystem(ecosystem: &str) -> Option<&'static str> {
        match ecosystem {
            "npm" => Some("npm"),
            "cargo" => Some("crates.io"),
            "pypi" => Some("PyPI"),
            "gem" => Some("RubyGems"),
            "go" => Some("Go"),
            "hex" => Some("Hex"),
            "pub" => Some("Pub"),
            "maven" => Some("Maven"),
            "nuget" => Some("NuGet"),
            "composer" => Some("Packagist"),
            _ => None,
        }
    }
}

fn osv_fixed_version(vuln: &OsvVuln) -> Option<String> {
    vuln.affected
        .iter()
        .flat_map(|a| a.ranges.iter())
        .flat_map(|r| r.events.iter())
        .find_map(|e| e.get("fixed").and_then(|f| f.as_str()).map(str::to_string))
}

fn osv_severity(vuln: &OsvVuln) -> Option<String> {
    vuln.database_specific
        .as_ref()
        .and_then(|d| d.get("severity"))
        .and_then(|s| s.as_str())
        .map(str::to_string)
}

fn osv_cvss(vuln: &OsvVuln) -> Option<f64> {
    // OSV carries CVSS vectors, not scores; some records embed a numeric
    // score string instead, which is all we can keep opaquely.
    vuln.severity
        .iter()
        .find_map(|s| s.score.as_deref().and_then(|s| s.parse::<f64>().ok()))
}

#[async_trait]
impl VulnSource for OsvSource {
    async fn query(&self, ecosystem: &str, name: &str) -> Result<Vec<VulnRecord>, EnrichError> {
        let Some(osv_eco) = Self::osv_ecosystem(ecosystem) else {
            return Ok(Vec::new());
        };
        let body = serde_json::json!({
            "package": { "name": name, "ecosystem": osv_eco }
        });
        let resp: OsvResponse = self
            .client
            .post(format!("{}/v1/query", self.base))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp
            .vulns
            .iter()
            .map(|v| VulnRecord {
                id: v.id.clone(),
                summary: v.summary.clone(),
                severity: osv_severity(v),
                cvss_score: osv_cvss(v),
                fixed_version: osv_fixed_version(v),
                references: v
                    .references
                    .iter()
                    .filter_map(|r| r.url.clone())
                    .collect(),
            })
            .collect())
    }
}
