//! In-memory array tables.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use folio_core::{
    Backend, BackendKind, BoundQuery, Connection, DatasourceSpec, MemoryTable, RawCell, RawRows,
};

use crate::error::ConnectorError;

/// Serves the tables carried by a memory datasource. The query text is the
/// table name.
pub struct MemoryBackend;

#[async_trait]
impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn connect(&self, spec: &DatasourceSpec) -> anyhow::Result<Box<dyn Connection>> {
        match spec {
            DatasourceSpec::Memory { tables } => Ok(Box::new(MemoryConnection {
                tables: Arc::clone(tables),
            })),
            other => Err(ConnectorError::UnsupportedSpec(format!(
                "memory backend cannot serve {} datasources",
                other.kind()
            ))
            .into()),
        }
    }
}

struct MemoryConnection {
    tables: Arc<BTreeMap<String, MemoryTable>>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, query: &BoundQuery) -> anyhow::Result<RawRows> {
        let name = query.inline();
        let table = self
            .tables
            .get(name.trim())
            .ok_or_else(|| ConnectorError::TableNotFound(name.trim().to_string()))?;
        Ok(RawRows {
            columns: table
                .columns
                .iter()
                .map(|c| RawCell::Value(folio_core::Value::text(c.as_str())))
                .collect(),
            rows: table
                .rows
                .iter()
                .map(|row| row.iter().cloned().map(RawCell::Value).collect())
                .collect(),
        })
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
