//! Typed errors for report construction and execution.

use std::fmt;

use thiserror::Error;

/// The kind of named entity a lookup or registration refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Datasource,
    Query,
    ResultSet,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Datasource => write!(f, "datasource"),
            EntityKind::Query => write!(f, "query"),
            EntityKind::ResultSet => write!(f, "result set"),
        }
    }
}

/// Errors produced by the registry, catalog, correlator, cache and engine.
#[derive(Debug, Clone, Error)]
pub enum FolioError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: EntityKind, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: EntityKind, name: String },

    #[error("result set '{follower}' already follows '{leader}'")]
    AlreadyLinked { follower: String, leader: String },

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Backend connect or execute failure, carrying the backend diagnostic.
    #[error("datasource '{datasource}': {message}")]
    ConnectionError { datasource: String, message: String },

    #[error("linking '{follower}' under '{leader}' would create a cycle")]
    CycleDetected { leader: String, follower: String },

    #[error("field '{field}' not found in result set '{result}'")]
    FieldNotFound { result: String, field: String },

    #[error("query '{query}' references unbound parameter ':{name}'")]
    UnboundParameter { query: String, name: String },

    #[error("query on datasource '{datasource}' was cancelled")]
    Cancelled { datasource: String },

    /// Cursor access to a result set whose query (or one of its leaders) failed.
    #[error("result set '{result}' is unavailable: {reason}")]
    SubtreeFailed { result: String, reason: String },
}

impl FolioError {
    pub fn not_found(kind: EntityKind, name: impl Into<String>) -> Self {
        FolioError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn already_exists(kind: EntityKind, name: impl Into<String>) -> Self {
        FolioError::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    /// Structural errors describe a malformed report and are never retried
    /// or isolated by the failure policy.
    pub fn is_structural(&self) -> bool {
        !matches!(
            self,
            FolioError::ConnectionError { .. }
                | FolioError::Cancelled { .. }
                | FolioError::SubtreeFailed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FolioError>;
