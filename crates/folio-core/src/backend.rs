//! Connection backends: the capability interface every datasource variant
//! is reached through.
//!
//! A [`Backend`] turns a [`DatasourceSpec`] into a live [`Connection`]; the
//! connection executes bound queries and returns raw rows. Raw text may come
//! back as undecoded bytes, which the engine decodes with the datasource's
//! charset before the rows enter the value model.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::datasource::DatasourceSpec;
use crate::encoding::Charset;
use crate::error::{FolioError, Result};
use crate::params::BoundQuery;
use crate::result_set::{ResultSnapshot, Schema};
use crate::value::Value;

/// Which backend implementation serves a datasource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Postgres,
    Mysql,
    Odbc,
    Csv,
    Xml,
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Postgres => "postgres",
            BackendKind::Mysql => "mysql",
            BackendKind::Odbc => "odbc",
            BackendKind::Csv => "csv",
            BackendKind::Xml => "xml",
            BackendKind::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cell as produced by a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum RawCell {
    Null,
    /// Text in the datasource's own encoding.
    Bytes(Vec<u8>),
    Value(Value),
}

/// Fully materialized backend output. `columns` is the header row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRows {
    pub columns: Vec<RawCell>,
    pub rows: Vec<Vec<RawCell>>,
}

impl RawRows {
    /// Decode into a snapshot using `charset` for byte cells.
    ///
    /// A header cell without text becomes `column_<n>` (1-based).
    pub fn decode(self, charset: Charset) -> Result<ResultSnapshot> {
        let columns: Vec<String> = self
            .columns
            .into_iter()
            .enumerate()
            .map(|(i, cell)| match decode_cell(cell, charset) {
                Value::Null => format!("column_{}", i + 1),
                v => v.to_string(),
            })
            .collect();
        let rows = self
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(|c| decode_cell(c, charset)).collect())
            .collect();
        ResultSnapshot::new(Schema::new(columns), rows)
    }
}

fn decode_cell(cell: RawCell, charset: Charset) -> Value {
    match cell {
        RawCell::Null => Value::Null,
        RawCell::Bytes(bytes) => Value::Text(charset.decode(&bytes)),
        RawCell::Value(v) => v,
    }
}

/// Opens connections for one kind of datasource.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn connect(&self, spec: &DatasourceSpec) -> anyhow::Result<Box<dyn Connection>>;
}

/// A live, exclusively owned connection to a datasource.
#[async_trait]
pub trait Connection: Send {
    /// Run a query to completion and return every row.
    async fn execute(&mut self, query: &BoundQuery) -> anyhow::Result<RawRows>;

    async fn close(&mut self) -> anyhow::Result<()>;
}

/// Backends available to report contexts, keyed by kind.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<BackendKind, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        let mut registry = Self::default();
        for backend in backends {
            registry.install(backend);
        }
        registry
    }

    /// Install a backend, replacing any previous one of the same kind.
    pub fn install(&mut self, backend: Arc<dyn Backend>) {
        self.backends.insert(backend.kind(), backend);
    }

    pub fn get(&self, kind: BackendKind) -> Option<&Arc<dyn Backend>> {
        self.backends.get(&kind)
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.backends.keys().copied().collect()
    }

    pub(crate) fn require(&self, kind: BackendKind, datasource: &str) -> Result<&Arc<dyn Backend>> {
        self.get(kind).ok_or_else(|| FolioError::ConnectionError {
            datasource: datasource.to_string(),
            message: format!("no backend installed for {} datasources", kind),
        })
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
