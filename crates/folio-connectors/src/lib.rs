//! Folio Connectors - bundled datasource backends
//!
//! This crate provides backends for:
//! - PostgreSQL and MySQL (via sqlx)
//! - CSV files
//! - XML files
//! - In-memory array tables

pub mod csv_file;
pub mod error;
pub mod factory;
mod file;
pub mod memory;
pub mod mysql;
pub mod postgres;
pub mod sql;
pub mod xml;

pub use csv_file::{parse_csv, CsvBackend};
pub use error::ConnectorError;
pub use factory::{default_registry, FileFactory, SpecFactory, SpecResolver, SqlFactory};
pub use memory::MemoryBackend;
pub use mysql::MysqlBackend;
pub use postgres::PostgresBackend;
pub use sql::connection_url;
pub use xml::{parse_xml, XmlBackend};
