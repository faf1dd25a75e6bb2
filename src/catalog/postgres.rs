//! Client/server Postgres backend.

use async_trait::async_trait;
use bytes::BytesMut;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};
use tracing::error;

use super::sql::{SqlCatalog, SqlConn, SqlRow, SqlValue};
use super::{CatalogError, Dialect};

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            Self::Null => Ok(IsNull::Yes),
            Self::Int(v) => v.to_sql(ty, out),
            Self::Real(v) => v.to_sql(ty, out),
            Self::Text(v) => v.to_sql(ty, out),
            Self::Bool(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // The variant carries the effective type; mismatches surface from
        // the delegated to_sql call.
        true
    }

    to_sql_checked!();
}

struct PostgresConn {
    client: Client,
}

fn convert_row(row: &Row) -> Result<SqlRow, CatalogError> {
    let mut cells = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let cell = if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx)?
                .map(|v| SqlValue::Int(i64::from(v)))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx)?
                .map(|v| SqlValue::Int(i64::from(v)))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::Int)
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(idx)?
                .map(|v| SqlValue::Real(f64::from(v)))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::Real)
        } else if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Bool)
        } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
        {
            row.try_get::<_, Option<String>>(idx)?.map(SqlValue::Text)
        } else {
            return Err(CatalogError::Decode(format!(
                "unsupported column type {ty} at index {idx}"
            )));
        };
        cells.push(cell.unwrap_or(SqlValue::Null));
    }
    Ok(SqlRow::new(cells))
}

fn param_refs(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

fn map_pg_error(err: tokio_postgres::Error) -> CatalogError {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        CatalogError::Conflict(err.to_string())
    } else {
        CatalogError::Postgres(err)
    }
}

#[async_trait]
impl SqlConn for PostgresConn {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64, CatalogError> {
        self.client
            .execute(sql, &param_refs(&params))
            .await
            .map_err(map_pg_error)
    }

    async fn query(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<SqlRow>, CatalogError> {
        let rows = self
            .client
            .query(sql, &param_refs(&params))
            .await
            .map_err(map_pg_error)?;
        rows.iter().map(convert_row).collect()
    }
}

/// Connect to a Postgres catalog (`postgres://…` URL) and migrate its
/// schema. The driver's connection task is spawned onto the runtime.
pub async fn connect_postgres(url: &str) -> Result<SqlCatalog, CatalogError> {
    let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(error = %e, "postgres connection terminated");
        }
    });
    SqlCatalog::open(Box::new(PostgresConn { client })).await
}
