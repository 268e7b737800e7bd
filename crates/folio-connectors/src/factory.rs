//! Backend registry construction and datasource resolution by URI scheme.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use folio_core::{Backend, BackendRegistry, DatasourceSpec, FileFormat, SqlDriver};
use tracing::info;

use crate::csv_file::CsvBackend;
use crate::memory::MemoryBackend;
use crate::mysql::MysqlBackend;
use crate::postgres::PostgresBackend;
use crate::xml::XmlBackend;

/// Every bundled backend: PostgreSQL, MySQL, CSV, XML and in-memory tables.
pub fn default_registry() -> BackendRegistry {
    BackendRegistry::new(vec![
        Arc::new(PostgresBackend) as Arc<dyn Backend>,
        Arc::new(MysqlBackend),
        Arc::new(CsvBackend),
        Arc::new(XmlBackend),
        Arc::new(MemoryBackend),
    ])
}

/// Turns a datasource URI into a [`DatasourceSpec`].
pub trait SpecFactory: Send + Sync {
    /// Returns `true` if this factory can handle the given URI.
    fn can_handle(&self, uri: &str) -> bool;

    fn build(&self, uri: &str) -> Result<DatasourceSpec>;
}

/// Iterates factories in order and delegates to the first one that can
/// handle a URI.
pub struct SpecResolver {
    factories: Vec<Arc<dyn SpecFactory>>,
}

impl SpecResolver {
    pub fn new(factories: Vec<Arc<dyn SpecFactory>>) -> Self {
        Self { factories }
    }

    pub fn resolve(&self, uri: &str) -> Result<DatasourceSpec> {
        for factory in &self.factories {
            if factory.can_handle(uri) {
                let spec = factory.build(uri)?;
                info!("Resolved datasource URI as {} datasource", spec.kind());
                return Ok(spec);
            }
        }
        anyhow::bail!("Unsupported datasource URI format: {}", uri);
    }
}

impl Default for SpecResolver {
    fn default() -> Self {
        Self::new(vec![
            Arc::new(SqlFactory(SqlDriver::Postgres)) as Arc<dyn SpecFactory>,
            Arc::new(SqlFactory(SqlDriver::Mysql)),
            Arc::new(FileFactory(FileFormat::Csv)),
            Arc::new(FileFactory(FileFormat::Xml)),
        ])
    }
}

// ---------------------------------------------------------------------------
// Built-in factory implementations
// ---------------------------------------------------------------------------

/// `postgres://`, `postgresql://` and `mysql://` URLs, used as given.
pub struct SqlFactory(pub SqlDriver);

impl SpecFactory for SqlFactory {
    fn can_handle(&self, uri: &str) -> bool {
        match self.0 {
            SqlDriver::Postgres => {
                uri.starts_with("postgres://") || uri.starts_with("postgresql://")
            }
            SqlDriver::Mysql => uri.starts_with("mysql://"),
        }
    }

    fn build(&self, uri: &str) -> Result<DatasourceSpec> {
        url::Url::parse(uri)?;
        Ok(DatasourceSpec::ConnectionString {
            driver: self.0,
            conn: uri.to_string(),
        })
    }
}

/// `csv:<dir>` and `xml:<dir>`; an empty directory leaves paths unresolved.
pub struct FileFactory(pub FileFormat);

impl FileFactory {
    fn prefix(&self) -> &'static str {
        match self.0 {
            FileFormat::Csv => "csv:",
            FileFormat::Xml => "xml:",
        }
    }
}

impl SpecFactory for FileFactory {
    fn can_handle(&self, uri: &str) -> bool {
        uri.starts_with(self.prefix())
    }

    fn build(&self, uri: &str) -> Result<DatasourceSpec> {
        let dir = uri[self.prefix().len()..].trim();
        let dir = dir.strip_prefix("//").unwrap_or(dir);
        Ok(DatasourceSpec::File {
            format: self.0,
            base_dir: (!dir.is_empty()).then(|| PathBuf::from(dir)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::BackendKind;

    #[test]
    fn test_default_registry_has_bundled_backends() {
        let registry = default_registry();
        for kind in [
            BackendKind::Postgres,
            BackendKind::Mysql,
            BackendKind::Csv,
            BackendKind::Xml,
            BackendKind::Memory,
        ] {
            assert!(registry.get(kind).is_some(), "missing {}", kind);
        }
        assert!(registry.get(BackendKind::Odbc).is_none());
    }

    #[test]
    fn test_resolve_sql_urls() {
        let resolver = SpecResolver::default();
        match resolver.resolve("postgresql://report@db/sales").unwrap() {
            DatasourceSpec::ConnectionString { driver, conn } => {
                assert_eq!(driver, SqlDriver::Postgres);
                assert_eq!(conn, "postgresql://report@db/sales");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            resolver.resolve("mysql://root@localhost/shop").unwrap().kind(),
            BackendKind::Mysql
        );
    }

    #[test]
    fn test_resolve_file_uris() {
        let resolver = SpecResolver::default();
        match resolver.resolve("csv:///data/exports").unwrap() {
            DatasourceSpec::File { format, base_dir } => {
                assert_eq!(format, FileFormat::Csv);
                assert_eq!(base_dir, Some(PathBuf::from("/data/exports")));
            }
            other => panic!("unexpected {:?}", other),
        }
        match resolver.resolve("xml:").unwrap() {
            DatasourceSpec::File { format, base_dir } => {
                assert_eq!(format, FileFormat::Xml);
                assert_eq!(base_dir, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_uri() {
        let err = SpecResolver::default()
            .resolve("odbc:WAREHOUSE")
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported datasource URI"));
    }
}
