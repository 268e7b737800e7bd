//! Shared plumbing for file-backed datasources.
//!
//! The "query" of a file datasource is a path. Relative paths resolve against
//! the datasource base directory; the whole file is read and parsed per query.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use folio_core::{BoundQuery, Connection, RawRows};
use tracing::debug;

use crate::error::ConnectorError;

pub(crate) type Parser = fn(&[u8]) -> Result<RawRows, ConnectorError>;

pub(crate) fn resolve_path(base_dir: Option<&Path>, query: &str) -> PathBuf {
    let path = PathBuf::from(query.trim());
    match base_dir {
        Some(base) if path.is_relative() => base.join(path),
        _ => path,
    }
}

pub(crate) struct FileConnection {
    base_dir: Option<PathBuf>,
    parse: Parser,
}

impl FileConnection {
    pub(crate) fn new(base_dir: Option<PathBuf>, parse: Parser) -> Self {
        Self { base_dir, parse }
    }
}

#[async_trait]
impl Connection for FileConnection {
    async fn execute(&mut self, query: &BoundQuery) -> anyhow::Result<RawRows> {
        let path = resolve_path(self.base_dir.as_deref(), &query.inline());
        debug!("Reading {}", path.display());
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ConnectorError::FileUnreadable(format!("{}: {}", path.display(), e)))?;
        let rows = (self.parse)(&bytes)
            .map_err(|e| anyhow::anyhow!(e).context(format!("parsing {}", path.display())))?;
        Ok(rows)
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
