//! PostgreSQL backend.
//!
//! Each datasource holds a single-connection pool. Placeholders are rendered
//! as `$n`; text columns are returned as raw bytes for charset decoding.
//! `NUMERIC` and other types without a native mapping must be cast in SQL.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use folio_core::{
    Backend, BackendKind, BoundQuery, Connection, DatasourceSpec, PlaceholderStyle, RawCell,
    RawRows, SqlDriver, Value,
};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Executor, Postgres, Row, Statement, TypeInfo};
use tracing::{debug, info};

use crate::error::ConnectorError;
use crate::sql::{as_integer, bytes_cell, cell, connection_url, unsupported};

pub struct PostgresBackend;

#[async_trait]
impl Backend for PostgresBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    async fn connect(&self, spec: &DatasourceSpec) -> anyhow::Result<Box<dyn Connection>> {
        let url = connection_url(spec, SqlDriver::Postgres)?;
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))?;
        info!("Connected to PostgreSQL datasource");
        Ok(Box::new(PostgresConnection { pool }))
    }
}

struct PostgresConnection {
    pool: PgPool,
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn execute(&mut self, query: &BoundQuery) -> anyhow::Result<RawRows> {
        let (sql, binds) = query.positional(PlaceholderStyle::Dollar);
        debug!("PostgreSQL query: {} ({} binds)", sql, binds.len());

        let mut q = sqlx::query(&sql);
        for value in binds {
            q = bind_value(q, value);
        }
        let rows: Vec<PgRow> = q.fetch_all(&self.pool).await.map_err(ConnectorError::from)?;

        let columns: Vec<RawCell> = match rows.first() {
            Some(row) => row.columns().iter().map(column_name).collect(),
            None => {
                let statement = (&self.pool)
                    .prepare(sql.as_str())
                    .await
                    .map_err(ConnectorError::from)?;
                statement.columns().iter().map(column_name).collect()
            }
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut cells = Vec::with_capacity(columns.len());
            for idx in 0..row.len() {
                cells.push(decode_cell(row, idx)?);
            }
            out.push(cells);
        }

        Ok(RawRows { columns, rows: out })
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

fn column_name<C: Column>(column: &C) -> RawCell {
    RawCell::Value(Value::text(column.name()))
}

fn bind_value(
    q: Query<'_, Postgres, PgArguments>,
    value: Value,
) -> Query<'_, Postgres, PgArguments> {
    match value {
        Value::Null => q.bind(None::<String>),
        Value::Bool(b) => q.bind(b),
        Value::Number(n) => match as_integer(n) {
            Some(i) => q.bind(i),
            None => q.bind(n),
        },
        Value::Date(d) => q.bind(d),
        Value::DateTime(dt) => q.bind(dt),
        Value::Text(s) => q.bind(s),
    }
}

fn decode_cell(row: &PgRow, idx: usize) -> Result<RawCell, ConnectorError> {
    let column = &row.columns()[idx];
    let decoded = match column.type_info().name() {
        "INT2" => cell(row.try_get::<Option<i16>, _>(idx)?, |v| {
            Value::Number(f64::from(v))
        }),
        "INT4" => cell(row.try_get::<Option<i32>, _>(idx)?, |v| {
            Value::Number(f64::from(v))
        }),
        "INT8" => cell(row.try_get::<Option<i64>, _>(idx)?, |v| {
            Value::Number(v as f64)
        }),
        "FLOAT4" => cell(row.try_get::<Option<f32>, _>(idx)?, |v| {
            Value::Number(f64::from(v))
        }),
        "FLOAT8" => cell(row.try_get::<Option<f64>, _>(idx)?, Value::Number),
        "BOOL" => cell(row.try_get::<Option<bool>, _>(idx)?, Value::Bool),
        "DATE" => cell(row.try_get::<Option<NaiveDate>, _>(idx)?, Value::Date),
        "TIMESTAMP" => cell(
            row.try_get::<Option<NaiveDateTime>, _>(idx)?,
            Value::DateTime,
        ),
        "TIMESTAMPTZ" => cell(row.try_get::<Option<DateTime<Utc>>, _>(idx)?, |v| {
            Value::DateTime(v.naive_utc())
        }),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" | "UNKNOWN" => {
            bytes_cell(row.try_get_unchecked::<Option<Vec<u8>>, _>(idx)?)
        }
        other => return Err(unsupported(other, column.name())),
    };
    Ok(decoded)
}
