//! Typed errors for the connectors crate.

use std::fmt;

/// Errors raised by the bundled backends.
#[derive(Debug)]
pub enum ConnectorError {
    /// Failed to establish a connection to the datasource.
    ConnectionFailed(String),
    /// The requested table does not exist.
    TableNotFound(String),
    /// A file could not be read.
    FileUnreadable(String),
    /// Source data is not in the expected format.
    MalformedData(String),
    /// A column type the backend cannot convert.
    UnsupportedType(String),
    /// The datasource spec is not one this backend serves.
    UnsupportedSpec(String),
    /// A query against the datasource failed.
    QueryFailed(String),
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            ConnectorError::TableNotFound(msg) => write!(f, "table not found: {}", msg),
            ConnectorError::FileUnreadable(msg) => write!(f, "cannot read file: {}", msg),
            ConnectorError::MalformedData(msg) => write!(f, "malformed data: {}", msg),
            ConnectorError::UnsupportedType(msg) => write!(f, "unsupported column type: {}", msg),
            ConnectorError::UnsupportedSpec(msg) => write!(f, "unsupported datasource: {}", msg),
            ConnectorError::QueryFailed(msg) => write!(f, "query failed: {}", msg),
        }
    }
}

impl std::error::Error for ConnectorError {}

impl From<sqlx::Error> for ConnectorError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => ConnectorError::ConnectionFailed(e.to_string()),
            other => ConnectorError::QueryFailed(other.to_string()),
        }
    }
}

impl From<csv::Error> for ConnectorError {
    fn from(e: csv::Error) -> Self {
        ConnectorError::MalformedData(e.to_string())
    }
}

impl From<quick_xml::Error> for ConnectorError {
    fn from(e: quick_xml::Error) -> Self {
        ConnectorError::MalformedData(e.to_string())
    }
}
