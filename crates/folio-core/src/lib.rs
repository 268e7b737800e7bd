//! Folio Core - query execution and result-set correlation for reports
//!
//! This crate owns the pieces a report run needs before anything is rendered:
//! - a registry of named datasources, connected lazily through pluggable backends
//! - a catalog of named queries with `:name` placeholders
//! - a leader/follower forest over result sets and the composite cursor that walks it
//! - a bounded LRU cache of materialized result sets, shareable across contexts

pub mod backend;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod context;
pub mod correlator;
pub mod cursor;
pub mod datasource;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod params;
pub mod result_set;
pub mod value;

pub use backend::{Backend, BackendKind, BackendRegistry, Connection, RawCell, RawRows};
pub use cache::{CacheKey, CacheOutcome, QueryCache};
pub use catalog::{Query, QueryCatalog, QueryHandle};
pub use config::{EngineConfig, FailurePolicy};
pub use context::ReportContext;
pub use correlator::{Correlator, Link, LinkKind};
pub use cursor::{CompositeCursor, CompositeRow};
pub use datasource::{
    CancelHandle, DatasourceRegistry, DatasourceSpec, FileFormat, MemoryTable, SqlDriver,
};
pub use encoding::Charset;
pub use engine::{Execution, FailureCause, QueryFailure};
pub use error::{EntityKind, FolioError, Result};
pub use metrics::EngineMetrics;
pub use params::{BoundQuery, ParamMap, PlaceholderStyle, QueryTemplate};
pub use result_set::{Position, ResultSet, ResultSnapshot, Schema};
pub use value::{JoinKey, Value};
