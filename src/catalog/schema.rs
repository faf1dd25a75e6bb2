//! Schema creation and additive migration.
//!
//! Fresh databases get the full current schema. Pre-existing databases are
//! migrated by adding missing columns as nullable, leaving data untouched.
//! Running the migration twice is a no-op.

use tracing::debug;

use super::sql::{SqlConn, SqlValue};
use super::{CatalogError, Dialect, SCHEMA_VERSION};

/// Columns added after the initial schema shipped. Each is created
/// nullable so old rows stay valid.
const ADDED_COLUMNS: &[(&str, &str, ColumnKind)] = &[
    ("packages", "registry_url", ColumnKind::Text),
    ("packages", "enriched_at", ColumnKind::BigInt),
    ("packages", "vulns_synced_at", ColumnKind::BigInt),
    ("versions", "integrity", ColumnKind::Text),
    ("versions", "yanked", ColumnKind::Boolean),
    ("versions", "enriched_at", ColumnKind::BigInt),
    ("vulnerabilities", "source", ColumnKind::Text),
];

#[derive(Debug, Clone, Copy)]
enum ColumnKind {
    Text,
    BigInt,
    Boolean,
}

impl ColumnKind {
    fn sql_type(self, dialect: Dialect) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::BigInt => dialect.big_int(),
            Self::Boolean => dialect.boolean(),
        }
    }
}

fn create_statements(d: Dialect) -> Vec<String> {
    let big = d.big_int();
    let boolean = d.boolean();
    let real = d.real();

    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS packages (
                purl TEXT PRIMARY KEY,
                ecosystem TEXT NOT NULL,
                name TEXT NOT NULL,
                latest_version TEXT,
                license TEXT,
                description TEXT,
                homepage TEXT,
                repository_url TEXT,
                registry_url TEXT,
                enriched_at {big},
                vulns_synced_at {big},
                created_at {big} NOT NULL,
                updated_at {big} NOT NULL,
                UNIQUE (ecosystem, name)
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS versions (
                purl TEXT PRIMARY KEY,
                package_purl TEXT NOT NULL,
                version TEXT NOT NULL,
                integrity TEXT,
                published_at {big},
                yanked {boolean} NOT NULL DEFAULT FALSE,
                license TEXT,
                enriched_at {big},
                created_at {big} NOT NULL,
                updated_at {big} NOT NULL
            )"
        ),
        "CREATE INDEX IF NOT EXISTS idx_versions_package ON versions(package_purl)".to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS artifacts (
                version_purl TEXT NOT NULL,
                filename TEXT NOT NULL,
                upstream_url TEXT,
                storage_path TEXT,
                content_hash TEXT,
                size {big},
                content_type TEXT,
                fetched_at {big},
                hit_count {big} NOT NULL DEFAULT 0,
                last_accessed_at {big},
                created_at {big} NOT NULL,
                updated_at {big} NOT NULL,
                PRIMARY KEY (version_purl, filename)
            )"
        ),
        // Uniqueness only among cached rows; cleared rows keep their NULL.
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_artifacts_storage_path
            ON artifacts(storage_path) WHERE storage_path IS NOT NULL"
            .to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS vulnerabilities (
                vuln_id TEXT NOT NULL,
                ecosystem TEXT NOT NULL,
                package_name TEXT NOT NULL,
                severity TEXT,
                summary TEXT,
                fixed_version TEXT,
                cvss_score {real},
                refs TEXT,
                source TEXT,
                updated_at {big} NOT NULL,
                PRIMARY KEY (vuln_id, ecosystem, package_name)
            )"
        ),
        "CREATE INDEX IF NOT EXISTS idx_vulns_package
            ON vulnerabilities(ecosystem, package_name)"
            .to_string(),
        "CREATE TABLE IF NOT EXISTS schema_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )"
        .to_string(),
    ]
}

async fn column_exists(
    conn: &dyn SqlConn,
    table: &str,
    column: &str,
) -> Result<bool, CatalogError> {
    let (sql, params) = match conn.dialect() {
        Dialect::Sqlite => (
            format!("SELECT count(*) FROM pragma_table_info('{table}') WHERE name = ?1"),
            vec![SqlValue::Text(column.to_string())],
        ),
        Dialect::Postgres => (
            "SELECT count(*) FROM information_schema.columns
             WHERE table_name = $1 AND column_name = $2"
                .to_string(),
            vec![
                SqlValue::Text(table.to_string()),
                SqlValue::Text(column.to_string()),
            ],
        ),
    };
    let rows = conn.query(&sql, params).await?;
    let count = rows
        .first()
        .ok_or_else(|| CatalogError::Decode("empty column-count result".to_string()))?
        .get_i64(0)?;
    Ok(count > 0)
}

/// Create missing tables, add missing columns, stamp the schema version.
pub(super) async fn migrate(conn: &dyn SqlConn) -> Result<(), CatalogError> {
    let d = conn.dialect();

    for stmt in create_statements(d) {
        conn.execute(&stmt, Vec::new()).await?;
    }

    for &(table, column, kind) in ADDED_COLUMNS {
        if !column_exists(conn, table, column).await? {
            debug!(table, column, "adding missing catalog column");
            let sql = format!(
                "ALTER TABLE {table} ADD COLUMN {column} {}",
                kind.sql_type(d)
            );
            conn.execute(&sql, Vec::new()).await?;
        }
    }

    let sql = format!(
        "INSERT INTO schema_meta (key, value) VALUES ({}, {})
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        d.placeholder(1),
        d.placeholder(2)
    );
    conn.execute(
        &sql,
        vec![
            SqlValue::Text("schema_version".to_string()),
            SqlValue::Text(SCHEMA_VERSION.to_string()),
        ],
    )
    .await?;

    Ok(())
}
