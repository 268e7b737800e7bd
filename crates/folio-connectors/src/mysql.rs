//! MySQL backend.
//!
//! Placeholders are rendered as `?`, one bind per occurrence. `DECIMAL` and
//! text columns come back as raw bytes; decimals keep their exact text form.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use folio_core::{
    Backend, BackendKind, BoundQuery, Connection, DatasourceSpec, PlaceholderStyle, RawCell,
    RawRows, SqlDriver, Value,
};
use sqlx::mysql::{MySqlArguments, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Executor, MySql, Row, Statement, TypeInfo};
use tracing::{debug, info};

use crate::error::ConnectorError;
use crate::sql::{as_integer, bytes_cell, cell, connection_url, unsupported};

pub struct MysqlBackend;

#[async_trait]
impl Backend for MysqlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mysql
    }

    async fn connect(&self, spec: &DatasourceSpec) -> anyhow::Result<Box<dyn Connection>> {
        let url = connection_url(spec, SqlDriver::Mysql)?;
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))?;
        info!("Connected to MySQL datasource");
        Ok(Box::new(MysqlConnection { pool }))
    }
}

struct MysqlConnection {
    pool: MySqlPool,
}

#[async_trait]
impl Connection for MysqlConnection {
    async fn execute(&mut self, query: &BoundQuery) -> anyhow::Result<RawRows> {
        let (sql, binds) = query.positional(PlaceholderStyle::Question);
        debug!("MySQL query: {} ({} binds)", sql, binds.len());

        let mut q = sqlx::query(&sql);
        for value in binds {
            q = bind_value(q, value);
        }
        let rows: Vec<MySqlRow> = q.fetch_all(&self.pool).await.map_err(ConnectorError::from)?;

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
    q: Query<'_, MySql, MySqlArguments>,
    value: Value,
) -> Query<'_, MySql, MySqlArguments> {
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

fn decode_cell(row: &MySqlRow, idx: usize) -> Result<RawCell, ConnectorError> {
    let column = &row.columns()[idx];
    let type_name = column.type_info().name();

    if type_name.ends_with(" UNSIGNED") {
        return Ok(cell(row.try_get::<Option<u64>, _>(idx)?, |v| {
            Value::Number(v as f64)
        }));
    }

    let decoded = match type_name {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            cell(row.try_get_unchecked::<Option<i64>, _>(idx)?, |v| {
                Value::Number(v as f64)
            })
        }
        "BOOLEAN" => cell(row.try_get::<Option<bool>, _>(idx)?, Value::Bool),
        "FLOAT" => cell(row.try_get::<Option<f32>, _>(idx)?, |v| {
            Value::Number(f64::from(v))
        }),
        "DOUBLE" => cell(row.try_get::<Option<f64>, _>(idx)?, Value::Number),
        "DATE" => cell(row.try_get::<Option<NaiveDate>, _>(idx)?, Value::Date),
        "DATETIME" | "TIMESTAMP" => cell(
            row.try_get::<Option<NaiveDateTime>, _>(idx)?,
            Value::DateTime,
        ),
        "DECIMAL" | "CHAR" | "VARCHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT"
        | "ENUM" | "SET" | "JSON" | "NULL" => {
            bytes_cell(row.try_get_unchecked::<Option<Vec<u8>>, _>(idx)?)
        }
        other => return Err(unsupported(other, column.name())),
    };
    Ok(decoded)
}
