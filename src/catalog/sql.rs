//! Backend-agnostic query layer.
//!
//! [`SqlCatalog`] implements the [`Catalog`] trait over a boxed [`SqlConn`]
//! executor. All SQL text is built here; the backends only move parameters
//! and rows across their driver boundary.

use async_trait::async_trait;

use super::schema;
use super::{
    now_epoch, Artifact, CacheStats, CachedArtifact, Catalog, CatalogError, Dialect, Package,
    SortBy, Version, Vulnerability,
};

/// A dynamically-typed SQL parameter or result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

/// One result row, cells in SELECT order.
#[derive(Debug, Clone)]
pub struct SqlRow(Vec<SqlValue>);

impl SqlRow {
    pub fn new(cells: Vec<SqlValue>) -> Self {
        Self(cells)
    }

    fn cell(&self, idx: usize) -> Result<&SqlValue, CatalogError> {
        self.0
            .get(idx)
            .ok_or_else(|| CatalogError::Decode(format!("missing column {idx}")))
    }

    pub fn get_i64(&self, idx: usize) -> Result<i64, CatalogError> {
        match self.cell(idx)? {
            SqlValue::Int(v) => Ok(*v),
            SqlValue::Bool(v) => Ok(i64::from(*v)),
            other => Err(CatalogError::Decode(format!(
                "column {idx}: expected integer, got {other:?}"
            ))),
        }
    }

    pub fn get_opt_i64(&self, idx: usize) -> Result<Option<i64>, CatalogError> {
        match self.cell(idx)? {
            SqlValue::Null => Ok(None),
            _ => self.get_i64(idx).map(Some),
        }
    }

    pub fn get_text(&self, idx: usize) -> Result<String, CatalogError> {
        match self.cell(idx)? {
            SqlValue::Text(v) => Ok(v.clone()),
            other => Err(CatalogError::Decode(format!(
                "column {idx}: expected text, got {other:?}"
            ))),
        }
    }

    pub fn get_opt_text(&self, idx: usize) -> Result<Option<String>, CatalogError> {
        match self.cell(idx)? {
            SqlValue::Null => Ok(None),
            _ => self.get_text(idx).map(Some),
        }
    }

    pub fn get_bool(&self, idx: usize) -> Result<bool, CatalogError> {
        match self.cell(idx)? {
            SqlValue::Bool(v) => Ok(*v),
            SqlValue::Int(v) => Ok(*v != 0),
            other => Err(CatalogError::Decode(format!(
                "column {idx}: expected boolean, got {other:?}"
            ))),
        }
    }

    /// A nullable boolean; columns added by migration are NULL for rows
    /// that predate them.
    pub fn get_bool_or(&self, idx: usize, default: bool) -> Result<bool, CatalogError> {
        match self.cell(idx)? {
            SqlValue::Null => Ok(default),
            _ => self.get_bool(idx),
        }
    }

    pub fn get_opt_f64(&self, idx: usize) -> Result<Option<f64>, CatalogError> {
        match self.cell(idx)? {
            SqlValue::Null => Ok(None),
            SqlValue::Real(v) => Ok(Some(*v)),
            SqlValue::Int(v) => Ok(Some(*v as f64)),
            other => Err(CatalogError::Decode(format!(
                "column {idx}: expected real, got {other:?}"
            ))),
        }
    }
}

/// Minimal executor contract a backend must provide.
///
/// `execute` maps unique-constraint violations to
/// [`CatalogError::Conflict`]; everything else propagates verbatim.
#[async_trait]
pub trait SqlConn: Send + Sync {
    fn dialect(&self) -> Dialect;
    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64, CatalogError>;
    async fn query(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<SqlRow>, CatalogError>;
}

/// Numbered-placeholder builder so query text and parameter lists cannot
/// drift apart.
struct Params {
    dialect: Dialect,
    values: Vec<SqlValue>,
}

impl Params {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    fn bind(&mut self, value: impl Into<SqlValue>) -> String {
        self.values.push(value.into());
        self.dialect.placeholder(self.values.len())
    }

    fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}

const PACKAGE_COLS: &str = "purl, ecosystem, name, latest_version, license, description, \
     homepage, repository_url, registry_url, enriched_at, vulns_synced_at, created_at, updated_at";

const VERSION_COLS: &str =
    "purl, package_purl, version, integrity, published_at, yanked, license, enriched_at, \
     created_at, updated_at";

const ARTIFACT_COLS: &str =
    "version_purl, filename, upstream_url, storage_path, content_hash, size, content_type, \
     fetched_at, hit_count, last_accessed_at, created_at, updated_at";

const VULN_COLS: &str = "vuln_id, ecosystem, package_name, severity, summary, fixed_version, \
     cvss_score, refs, source, updated_at";

fn package_from_row(row: &SqlRow) -> Result<Package, CatalogError> {
    Ok(Package {
        purl: row.get_text(0)?,
        ecosystem: row.get_text(1)?,
        name: row.get_text(2)?,
        latest_version: row.get_opt_text(3)?,
        license: row.get_opt_text(4)?,
        description: row.get_opt_text(5)?,
        homepage: row.get_opt_text(6)?,
        repository_url: row.get_opt_text(7)?,
        registry_url: row.get_opt_text(8)?,
        enriched_at: row.get_opt_i64(9)?,
        vulns_synced_at: row.get_opt_i64(10)?,
        created_at: row.get_i64(11)?,
        updated_at: row.get_i64(12)?,
    })
}

fn version_from_row(row: &SqlRow) -> Result<Version, CatalogError> {
    Ok(Version {
        purl: row.get_text(0)?,
        package_purl: row.get_text(1)?,
        version: row.get_text(2)?,
        integrity: row.get_opt_text(3)?,
        published_at: row.get_opt_i64(4)?,
        yanked: row.get_bool_or(5, false)?,
        license: row.get_opt_text(6)?,
        enriched_at: row.get_opt_i64(7)?,
        created_at: row.get_i64(8)?,
        updated_at: row.get_i64(9)?,
    })
}

fn artifact_from_row(row: &SqlRow) -> Result<Artifact, CatalogError> {
    Ok(Artifact {
        version_purl: row.get_text(0)?,
        filename: row.get_text(1)?,
        upstream_url: row.get_opt_text(2)?,
        storage_path: row.get_opt_text(3)?,
        content_hash: row.get_opt_text(4)?,
        size: row.get_opt_i64(5)?,
        content_type: row.get_opt_text(6)?,
        fetched_at: row.get_opt_i64(7)?,
        hit_count: row.get_i64(8)?,
        last_accessed_at: row.get_opt_i64(9)?,
        created_at: row.get_i64(10)?,
        updated_at: row.get_i64(11)?,
    })
}

fn vuln_from_row(row: &SqlRow) -> Result<Vulnerability, CatalogError> {
    Ok(Vulnerability {
        vuln_id: row.get_text(0)?,
        ecosystem: row.get_text(1)?,
        package_name: row.get_text(2)?,
        severity: row.get_opt_text(3)?,
        summary: row.get_opt_text(4)?,
        fixed_version: row.get_opt_text(5)?,
        cvss_score: row.get_opt_f64(6)?,
        references: row.get_opt_text(7)?,
        source: row.get_opt_text(8)?,
        updated_at: row.get_i64(9)?,
    })
}

/// The catalog over any [`SqlConn`] backend.
pub struct SqlCatalog {
    conn: Box<dyn SqlConn>,
}

impl std::fmt::Debug for SqlCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlCatalog")
            .field("dialect", &self.conn.dialect())
            .finish()
    }
}

impl SqlCatalog {
    /// Wrap a backend and bring its schema up to date.
    pub async fn open(conn: Box<dyn SqlConn>) -> Result<Self, CatalogError> {
        schema::migrate(conn.as_ref()).await?;
        Ok(Self { conn })
    }

    fn params(&self) -> Params {
        Params::new(self.conn.dialect())
    }

    async fn query_one<T>(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
        map: fn(&SqlRow) -> Result<T, CatalogError>,
    ) -> Result<Option<T>, CatalogError> {
        let rows = self.conn.query(sql, params).await?;
        rows.first().map(map).transpose()
    }

    async fn query_all<T>(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
        map: fn(&SqlRow) -> Result<T, CatalogError>,
    ) -> Result<Vec<T>, CatalogError> {
        let rows = self.conn.query(sql, params).await?;
        rows.iter().map(map).collect()
    }
}

#[async_trait]
impl Catalog for SqlCatalog {
    async fn get_package(&self, purl: &str) -> Result<Option<Package>, CatalogError> {
        let mut p = self.params();
        let sql = format!(
            "SELECT {PACKAGE_COLS} FROM packages WHERE purl = {}",
            p.bind(purl)
        );
        self.query_one(&sql, p.into_values(), package_from_row).await
    }

    async fn get_package_by_name(
        &self,
        ecosystem: &str,
        name: &str,
    ) -> Result<Option<Package>, CatalogError> {
        let mut p = self.params();
        let sql = format!(
            "SELECT {PACKAGE_COLS} FROM packages WHERE ecosystem = {} AND name = {}",
            p.bind(ecosystem),
            p.bind(name)
        );
        self.query_one(&sql, p.into_values(), package_from_row).await
    }

    async fn upsert_package(&self, pkg: &Package) -> Result<(), CatalogError> {
        let now = now_epoch();
        let created = if pkg.created_at != 0 {
            pkg.created_at
        } else {
            now
        };
        let mut p = self.params();
        let sql = format!(
            "INSERT INTO packages ({PACKAGE_COLS})
             VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})
             ON CONFLICT (purl) DO UPDATE SET
                latest_version = COALESCE(excluded.latest_version, packages.latest_version),
                license = COALESCE(excluded.license, packages.license),
                description = COALESCE(excluded.description, packages.description),
                homepage = COALESCE(excluded.homepage, packages.homepage),
                repository_url = COALESCE(excluded.repository_url, packages.repository_url),
                registry_url = COALESCE(excluded.registry_url, packages.registry_url),
                enriched_at = COALESCE(excluded.enriched_at, packages.enriched_at),
                vulns_synced_at = COALESCE(excluded.vulns_synced_at, packages.vulns_synced_at),
                updated_at = excluded.updated_at",
            p.bind(pkg.purl.as_str()),
            p.bind(pkg.ecosystem.as_str()),
            p.bind(pkg.name.as_str()),
            p.bind(pkg.latest_version.clone()),
            p.bind(pkg.license.clone()),
            p.bind(pkg.description.clone()),
            p.bind(pkg.homepage.clone()),
            p.bind(pkg.repository_url.clone()),
            p.bind(pkg.registry_url.clone()),
            p.bind(pkg.enriched_at),
            p.bind(pkg.vulns_synced_at),
            p.bind(created),
            p.bind(now),
        );
        self.conn.execute(&sql, p.into_values()).await?;
        Ok(())
    }

    async fn get_version(&self, purl: &str) -> Result<Option<Version>, CatalogError> {
        let mut p = self.params();
        let sql = format!(
            "SELECT {VERSION_COLS} FROM versions WHERE purl = {}",
            p.bind(purl)
        );
        self.query_one(&sql, p.into_values(), version_from_row).await
    }

    async fn list_versions(&self, package_purl: &str) -> Result<Vec<Version>, CatalogError> {
        let mut p = self.params();
        let sql = format!(
            "SELECT {VERSION_COLS} FROM versions WHERE package_purl = {}
             ORDER BY created_at DESC",
            p.bind(package_purl)
        );
        self.query_all(&sql, p.into_values(), version_from_row).await
    }

    async fn upsert_version(&self, version: &Version) -> Result<(), CatalogError> {
        let now = now_epoch();
        let created = if version.created_at != 0 {
            version.created_at
        } else {
            now
        };
        let mut p = self.params();
        let sql = format!(
            "INSERT INTO versions ({VERSION_COLS})
             VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {})
             ON CONFLICT (purl) DO UPDATE SET
                integrity = COALESCE(excluded.integrity, versions.integrity),
                published_at = COALESCE(excluded.published_at, versions.published_at),
                yanked = excluded.yanked,
                license = COALESCE(excluded.license, versions.license),
                enriched_at = COALESCE(excluded.enriched_at, versions.enriched_at),
                updated_at = excluded.updated_at",
            p.bind(version.purl.as_str()),
            p.bind(version.package_purl.as_str()),
            p.bind(version.version.as_str()),
            p.bind(version.integrity.clone()),
            p.bind(version.published_at),
            p.bind(version.yanked),
            p.bind(version.license.clone()),
            p.bind(version.enriched_at),
            p.bind(created),
            p.bind(now),
        );
        self.conn.execute(&sql, p.into_values()).await?;
        Ok(())
    }

    async fn get_artifact(
        &self,
        version_purl: &str,
        filename: &str,
    ) -> Result<Option<Artifact>, CatalogError> {
        let mut p = self.params();
        let sql = format!(
            "SELECT {ARTIFACT_COLS} FROM artifacts WHERE version_purl = {} AND filename = {}",
            p.bind(version_purl),
            p.bind(filename)
        );
        self.query_one(&sql, p.into_values(), artifact_from_row)
            .await
    }

    async fn get_artifact_by_path(
        &self,
        storage_path: &str,
    ) -> Result<Option<Artifact>, CatalogError> {
        let mut p = self.params();
        let sql = format!(
            "SELECT {ARTIFACT_COLS} FROM artifacts WHERE storage_path = {}",
            p.bind(storage_path)
        );
        self.query_one(&sql, p.into_values(), artifact_from_row)
            .await
    }

    async fn list_artifacts(&self, version_purl: &str) -> Result<Vec<Artifact>, CatalogError> {
        let mut p = self.params();
        let sql = format!(
            "SELECT {ARTIFACT_COLS} FROM artifacts WHERE version_purl = {} ORDER BY filename",
            p.bind(version_purl)
        );
        self.query_all(&sql, p.into_values(), artifact_from_row)
            .await
    }

    async fn upsert_artifact(&self, artifact: &Artifact) -> Result<(), CatalogError> {
        let now = now_epoch();
        let created = if artifact.created_at != 0 {
            artifact.created_at
        } else {
            now
        };
        // Cache fields are deliberately absent from the conflict update:
        // only mark_artifact_cached / clear_artifact transition them.
        let mut p = self.params();
        let sql = format!(
            "INSERT INTO artifacts (version_purl, filename, upstream_url, hit_count,
                                    created_at, updated_at)
             VALUES ({}, {}, {}, 0, {}, {})
             ON CONFLICT (version_purl, filename) DO UPDATE SET
                upstream_url = COALESCE(excluded.upstream_url, artifacts.upstream_url),
                updated_at = excluded.updated_at",
            p.bind(artifact.version_purl.as_str()),
            p.bind(artifact.filename.as_str()),
            p.bind(artifact.upstream_url.clone()),
            p.bind(created),
            p.bind(now),
        );
        self.conn.execute(&sql, p.into_values()).await?;
        Ok(())
    }

    async fn mark_artifact_cached(
        &self,
        version_purl: &str,
        filename: &str,
        storage_path: &str,
        content_hash: &str,
        size: i64,
        content_type: Option<&str>,
    ) -> Result<(), CatalogError> {
        let now = now_epoch();
        let mut p = self.params();
        let sql = format!(
            "UPDATE artifacts SET
                storage_path = {},
                content_hash = {},
                size = {},
                content_type = COALESCE({}, content_type),
                fetched_at = {},
                updated_at = {}
             WHERE version_purl = {} AND filename = {}",
            p.bind(storage_path),
            p.bind(content_hash),
            p.bind(size),
            p.bind(content_type.map(str::to_string)),
            p.bind(now),
            p.bind(now),
            p.bind(version_purl),
            p.bind(filename),
        );
        let affected = self.conn.execute(&sql, p.into_values()).await?;
        if affected == 0 {
            return Err(CatalogError::Backend(format!(
                "no artifact row for {version_purl} / {filename}"
            )));
        }
        Ok(())
    }

    async fn record_hit(&self, version_purl: &str, filename: &str) -> Result<(), CatalogError> {
        let now = now_epoch();
        let mut p = self.params();
        let sql = format!(
            "UPDATE artifacts SET hit_count = hit_count + 1, last_accessed_at = {}, updated_at = {}
             WHERE version_purl = {} AND filename = {}",
            p.bind(now),
            p.bind(now),
            p.bind(version_purl),
            p.bind(filename),
        );
        self.conn.execute(&sql, p.into_values()).await?;
        Ok(())
    }

    async fn clear_artifact(
        &self,
        version_purl: &str,
        filename: &str,
    ) -> Result<(), CatalogError> {
        let now = now_epoch();
        let mut p = self.params();
        let sql = format!(
            "UPDATE artifacts SET
                storage_path = NULL,
                content_hash = NULL,
                size = NULL,
                fetched_at = NULL,
                updated_at = {}
             WHERE version_purl = {} AND filename = {}",
            p.bind(now),
            p.bind(version_purl),
            p.bind(filename),
        );
        self.conn.execute(&sql, p.into_values()).await?;
        Ok(())
    }

    async fn cache_stats(&self) -> Result<CacheStats, CatalogError> {
        let sql = "SELECT
                (SELECT COUNT(*) FROM artifacts WHERE storage_path IS NOT NULL),
                (SELECT CAST(COALESCE(SUM(size), 0) AS BIGINT) FROM artifacts
                    WHERE storage_path IS NOT NULL),
                (SELECT COUNT(*) FROM packages),
                (SELECT COUNT(*) FROM versions)";
        let rows = self.conn.query(sql, Vec::new()).await?;
        let row = rows
            .first()
            .ok_or_else(|| CatalogError::Decode("empty stats result".to_string()))?;
        Ok(CacheStats {
            cached_artifacts: row.get_i64(0)?,
            total_size_bytes: row.get_i64(1)?,
            packages: row.get_i64(2)?,
            versions: row.get_i64(3)?,
        })
    }

    async fn lru_artifacts(&self, limit: i64) -> Result<Vec<Artifact>, CatalogError> {
        let order = self.conn.dialect().order_nulls_first("last_accessed_at");
        let mut p = self.params();
        let sql = format!(
            "SELECT {ARTIFACT_COLS} FROM artifacts WHERE storage_path IS NOT NULL
             ORDER BY {order} LIMIT {}",
            p.bind(limit)
        );
        self.query_all(&sql, p.into_values(), artifact_from_row)
            .await
    }

    async fn popular(&self, limit: i64) -> Result<Vec<Artifact>, CatalogError> {
        let mut p = self.params();
        let sql = format!(
            "SELECT {ARTIFACT_COLS} FROM artifacts WHERE storage_path IS NOT NULL
             ORDER BY hit_count DESC LIMIT {}",
            p.bind(limit)
        );
        self.query_all(&sql, p.into_values(), artifact_from_row)
            .await
    }

    async fn recent(&self, limit: i64) -> Result<Vec<Artifact>, CatalogError> {
        let mut p = self.params();
        let sql = format!(
            "SELECT {ARTIFACT_COLS} FROM artifacts WHERE storage_path IS NOT NULL
             ORDER BY fetched_at DESC LIMIT {}",
            p.bind(limit)
        );
        self.query_all(&sql, p.into_values(), artifact_from_row)
            .await
    }

    async fn search(
        &self,
        pattern: &str,
        ecosystem: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Package>, CatalogError> {
        let mut p = self.params();
        let like = format!("%{pattern}%");
        let mut sql = format!(
            "SELECT {PACKAGE_COLS} FROM packages WHERE name LIKE {}",
            p.bind(like)
        );
        if let Some(eco) = ecosystem {
            sql.push_str(&format!(" AND ecosystem = {}", p.bind(eco)));
        }
        sql.push_str(&format!(
            " ORDER BY name LIMIT {} OFFSET {}",
            p.bind(limit),
            p.bind(offset)
        ));
        self.query_all(&sql, p.into_values(), package_from_row).await
    }

    async fn list_cached(
        &self,
        ecosystem: Option<&str>,
        sort: SortBy,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CachedArtifact>, CatalogError> {
        let order = match sort {
            SortBy::Hits => "a.hit_count DESC, p.name ASC".to_string(),
            SortBy::Name => "p.name ASC, v.version ASC".to_string(),
            SortBy::Size => self.conn.dialect().order_desc_nulls_last("a.size"),
            SortBy::CachedAt => self.conn.dialect().order_desc_nulls_last("a.fetched_at"),
            SortBy::Ecosystem => "p.ecosystem ASC, p.name ASC".to_string(),
            SortBy::Vulns => "vuln_count DESC, p.name ASC".to_string(),
        };
        let mut p = self.params();
        let mut filter = String::new();
        if let Some(eco) = ecosystem {
            filter = format!(" AND p.ecosystem = {}", p.bind(eco));
        }
        let sql = format!(
            "SELECT p.ecosystem, p.name, v.version, a.filename, a.size, a.hit_count,
                    a.fetched_at, a.content_hash,
                    (SELECT COUNT(*) FROM vulnerabilities vu
                        WHERE vu.ecosystem = p.ecosystem AND vu.package_name = p.name) AS vuln_count
             FROM artifacts a
             JOIN versions v ON v.purl = a.version_purl
             JOIN packages p ON p.purl = v.package_purl
             WHERE a.storage_path IS NOT NULL{filter}
             ORDER BY {order} LIMIT {} OFFSET {}",
            p.bind(limit),
            p.bind(offset)
        );
        let rows = self.conn.query(&sql, p.into_values()).await?;
        rows.iter()
            .map(|row| {
                Ok(CachedArtifact {
                    ecosystem: row.get_text(0)?,
                    name: row.get_text(1)?,
                    version: row.get_text(2)?,
                    filename: row.get_text(3)?,
                    size: row.get_opt_i64(4)?,
                    hit_count: row.get_i64(5)?,
                    fetched_at: row.get_opt_i64(6)?,
                    content_hash: row.get_opt_text(7)?,
                    vuln_count: row.get_i64(8)?,
                })
            })
            .collect()
    }

    async fn upsert_vulnerability(&self, vuln: &Vulnerability) -> Result<(), CatalogError> {
        let now = now_epoch();
        let mut p = self.params();
        let sql = format!(
            "INSERT INTO vulnerabilities ({VULN_COLS})
             VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {})
             ON CONFLICT (vuln_id, ecosystem, package_name) DO UPDATE SET
                severity = excluded.severity,
                summary = excluded.summary,
                fixed_version = excluded.fixed_version,
                cvss_score = excluded.cvss_score,
                refs = excluded.refs,
                source = COALESCE(excluded.source, vulnerabilities.source),
                updated_at = excluded.updated_at",
            p.bind(vuln.vuln_id.as_str()),
            p.bind(vuln.ecosystem.as_str()),
            p.bind(vuln.package_name.as_str()),
            p.bind(vuln.severity.clone()),
            p.bind(vuln.summary.clone()),
            p.bind(vuln.fixed_version.clone()),
            p.bind(vuln.cvss_score),
            p.bind(vuln.references.clone()),
            p.bind(vuln.source.clone()),
            p.bind(now),
        );
        self.conn.execute(&sql, p.into_values()).await?;
        Ok(())
    }

    async fn vulnerabilities(
        &self,
        ecosystem: &str,
        name: &str,
    ) -> Result<Vec<Vulnerability>, CatalogError> {
        let mut p = self.params();
        let sql = format!(
            "SELECT {VULN_COLS} FROM vulnerabilities
             WHERE ecosystem = {} AND package_name = {} ORDER BY vuln_id",
            p.bind(ecosystem),
            p.bind(name)
        );
        self.query_all(&sql, p.into_values(), vuln_from_row).await
    }

    async fn schema_version(&self) -> Result<String, CatalogError> {
        let mut p = self.params();
        let sql = format!(
            "SELECT value FROM schema_meta WHERE key = {}",
            p.bind("schema_version")
        );
        let rows = self.conn.query(&sql, p.into_values()).await?;
        rows.first()
            .ok_or_else(|| CatalogError::Backend("schema_meta has no version row".to_string()))?
            .get_text(0)
    }
}
