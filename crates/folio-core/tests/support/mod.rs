//! Stub backends shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use folio_core::{
    Backend, BackendKind, BackendRegistry, BoundQuery, Connection, DatasourceSpec, EngineConfig,
    MemoryTable, RawCell, RawRows, ReportContext, SqlDriver, Value,
};

/// Serves named tables and counts every execution.
///
/// Memory datasources use their own tables; any other spec is served from
/// `tables`, so one instance can stand in for a SQL database.
pub struct TableBackend {
    pub kind: BackendKind,
    pub tables: Arc<BTreeMap<String, MemoryTable>>,
    pub executions: Arc<AtomicUsize>,
    pub connects: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

impl TableBackend {
    pub fn new(kind: BackendKind, tables: BTreeMap<String, MemoryTable>) -> Self {
        Self {
            kind,
            tables: Arc::new(tables),
            executions: Arc::new(AtomicUsize::new(0)),
            connects: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for TableBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn connect(&self, spec: &DatasourceSpec) -> anyhow::Result<Box<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let tables = match spec {
            DatasourceSpec::Memory { tables } => Arc::clone(tables),
            _ => Arc::clone(&self.tables),
        };
        Ok(Box::new(TableConnection {
            tables,
            executions: Arc::clone(&self.executions),
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct TableConnection {
    tables: Arc<BTreeMap<String, MemoryTable>>,
    executions: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Connection for TableConnection {
    async fn execute(&mut self, query: &BoundQuery) -> anyhow::Result<RawRows> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let name = query.inline();
        let table = self
            .tables
            .get(name.trim())
            .ok_or_else(|| anyhow::anyhow!("no such table '{}'", name))?;
        Ok(RawRows {
            columns: table
                .columns
                .iter()
                .map(|c| RawCell::Bytes(c.as_bytes().to_vec()))
                .collect(),
            rows: table
                .rows
                .iter()
                .map(|r| r.iter().cloned().map(RawCell::Value).collect())
                .collect(),
        })
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connects, then never finishes a query.
pub struct HangingBackend;

#[async_trait]
impl Backend for HangingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    async fn connect(&self, _spec: &DatasourceSpec) -> anyhow::Result<Box<dyn Connection>> {
        Ok(Box::new(HangingConnection))
    }
}

struct HangingConnection;

#[async_trait]
impl Connection for HangingConnection {
    async fn execute(&mut self, _query: &BoundQuery) -> anyhow::Result<RawRows> {
        std::future::pending::<()>().await;
        Ok(RawRows::default())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Refuses every connection.
pub struct RefusingBackend {
    pub attempts: Arc<AtomicUsize>,
}

impl RefusingBackend {
    pub fn new() -> Self {
        Self {
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Backend for RefusingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mysql
    }

    async fn connect(&self, _spec: &DatasourceSpec) -> anyhow::Result<Box<dyn Connection>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("connection refused (os error 111)")
    }
}

// ----------------------------------------------------------------------------
// Builders
// ----------------------------------------------------------------------------

pub fn n(v: f64) -> Value {
    Value::Number(v)
}

pub fn t(s: &str) -> Value {
    Value::text(s)
}

pub fn table(columns: &[&str], rows: Vec<Vec<Value>>) -> MemoryTable {
    MemoryTable::new(columns.iter().map(|c| c.to_string()).collect(), rows)
}

pub fn tables(entries: Vec<(&str, MemoryTable)>) -> BTreeMap<String, MemoryTable> {
    entries
        .into_iter()
        .map(|(name, t)| (name.to_string(), t))
        .collect()
}

pub fn memory(entries: Vec<(&str, MemoryTable)>) -> DatasourceSpec {
    DatasourceSpec::Memory {
        tables: Arc::new(tables(entries)),
    }
}

pub fn postgres(host: &str) -> DatasourceSpec {
    DatasourceSpec::SqlNetwork {
        driver: SqlDriver::Postgres,
        host: host.to_string(),
        port: None,
        user: "report".to_string(),
        password: "secret".to_string(),
        database: "sales".to_string(),
    }
}

pub fn mysql(host: &str) -> DatasourceSpec {
    DatasourceSpec::SqlNetwork {
        driver: SqlDriver::Mysql,
        host: host.to_string(),
        port: Some(3306),
        user: "report".to_string(),
        password: "secret".to_string(),
        database: "legacy".to_string(),
    }
}

pub fn registry(backends: Vec<Arc<dyn Backend>>) -> Arc<BackendRegistry> {
    Arc::new(BackendRegistry::new(backends))
}

/// A context with a memory backend, returning the backend for call counting.
pub fn memory_context() -> (ReportContext, Arc<TableBackend>) {
    let backend = Arc::new(TableBackend::new(BackendKind::Memory, BTreeMap::new()));
    let ctx = ReportContext::new(
        registry(vec![backend.clone() as Arc<dyn Backend>]),
        EngineConfig::default(),
    );
    (ctx, backend)
}
