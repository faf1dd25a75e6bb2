//! Embedded SQLite backend.
//!
//! rusqlite is synchronous, so every statement runs on the blocking pool
//! behind a shared connection. WAL keeps concurrent readers off the
//! writers' backs; the busy timeout covers the rest.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::Connection;

use super::sql::{SqlCatalog, SqlConn, SqlRow, SqlValue};
use super::{CatalogError, Dialect};

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Int(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            Self::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            Self::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Self::Bool(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
        })
    }
}

struct SqliteConn {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteConn {
    fn open(path: &Path) -> Result<Self, CatalogError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CatalogError::Backend(format!("creating {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        // WAL so readers never block the cache-fill writer; the busy
        // timeout absorbs writer collisions from concurrent requests.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, CatalogError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, CatalogError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| CatalogError::Backend("connection lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| CatalogError::Backend(format!("blocking task failed: {e}")))?
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn cell_from_value(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(v) => SqlValue::Int(v),
        Value::Real(v) => SqlValue::Real(v),
        Value::Text(v) => SqlValue::Text(v),
        // No blob columns in the schema; surfaced as NULL rather than lying.
        Value::Blob(_) => SqlValue::Null,
    }
}

#[async_trait]
impl SqlConn for SqliteConn {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64, CatalogError> {
        let sql = sql.to_string();
        self.run(move |conn| {
            match conn.execute(&sql, rusqlite::params_from_iter(params.iter())) {
                Ok(n) => Ok(n as u64),
                Err(e) if is_unique_violation(&e) => Err(CatalogError::Conflict(e.to_string())),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn query(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<SqlRow>, CatalogError> {
        let sql = sql.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let ncols = stmt.column_count();
            let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut cells = Vec::with_capacity(ncols);
                for i in 0..ncols {
                    let value: Value = row.get(i)?;
                    cells.push(cell_from_value(value));
                }
                out.push(SqlRow::new(cells));
            }
            Ok(out)
        })
        .await
    }
}

/// Open (creating if necessary) an embedded catalog at `path` and migrate
/// its schema.
pub async fn open_sqlite(path: &Path) -> Result<SqlCatalog, CatalogError> {
    let conn = SqliteConn::open(path)?;
    SqlCatalog::open(Box::new(conn)).await
}
