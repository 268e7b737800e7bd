//! Datasource registry and connection lifecycle.
//!
//! A datasource is registered with a [`DatasourceSpec`] and connected lazily
//! the first time one of its queries runs. Each datasource exclusively owns its
//! connection; the registry closes them all when the report context is closed.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::backend::{BackendKind, BackendRegistry, Connection};
use crate::encoding::Charset;
use crate::error::{EntityKind, FolioError, Result};
use crate::params::BoundQuery;
use crate::result_set::ResultSnapshot;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDriver {
    Postgres,
    Mysql,
}

impl SqlDriver {
    pub fn scheme(&self) -> &'static str {
        match self {
            SqlDriver::Postgres => "postgres",
            SqlDriver::Mysql => "mysql",
        }
    }

    fn kind(&self) -> BackendKind {
        match self {
            SqlDriver::Postgres => BackendKind::Postgres,
            SqlDriver::Mysql => BackendKind::Mysql,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Xml,
}

/// A named in-memory table served by the memory backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl MemoryTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }
}

/// How to reach a datasource.
#[derive(Debug, Clone)]
pub enum DatasourceSpec {
    SqlNetwork {
        driver: SqlDriver,
        host: String,
        port: Option<u16>,
        user: String,
        password: String,
        database: String,
    },
    /// A driver URL such as `postgres://user:pw@host/db`.
    ConnectionString { driver: SqlDriver, conn: String },
    Odbc {
        source: String,
        user: String,
        password: String,
    },
    /// Queries are file paths, resolved against `base_dir` when relative.
    File {
        format: FileFormat,
        base_dir: Option<PathBuf>,
    },
    /// Queries are table names.
    Memory {
        tables: Arc<BTreeMap<String, MemoryTable>>,
    },
}

impl DatasourceSpec {
    pub fn kind(&self) -> BackendKind {
        match self {
            DatasourceSpec::SqlNetwork { driver, .. } => driver.kind(),
            DatasourceSpec::ConnectionString { driver, .. } => driver.kind(),
            DatasourceSpec::Odbc { .. } => BackendKind::Odbc,
            DatasourceSpec::File { format, .. } => match format {
                FileFormat::Csv => BackendKind::Csv,
                FileFormat::Xml => BackendKind::Xml,
            },
            DatasourceSpec::Memory { .. } => BackendKind::Memory,
        }
    }

    /// Shape checks only; nothing is contacted.
    pub fn validate(&self) -> Result<()> {
        match self {
            DatasourceSpec::SqlNetwork {
                host,
                user,
                database,
                ..
            } => {
                require_non_empty("host", host)?;
                require_non_empty("user", user)?;
                require_non_empty("database", database)?;
            }
            DatasourceSpec::ConnectionString { conn, .. } => {
                require_non_empty("connection string", conn)?;
            }
            DatasourceSpec::Odbc { source, .. } => {
                require_non_empty("ODBC source", source)?;
            }
            DatasourceSpec::File { .. } => {}
            DatasourceSpec::Memory { tables } => {
                for (name, table) in tables.iter() {
                    require_non_empty("table name", name)?;
                    if let Some(i) = table.rows.iter().position(|r| r.len() != table.columns.len())
                    {
                        return Err(FolioError::InvalidParameters(format!(
                            "table '{}' row {} has {} values but {} columns",
                            name,
                            i,
                            table.rows[i].len(),
                            table.columns.len()
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Stable description of where rows come from, with credentials removed.
    fn locator(&self) -> String {
        match self {
            DatasourceSpec::SqlNetwork {
                driver,
                host,
                port,
                user,
                database,
                ..
            } => match port {
                Some(p) => format!("{}://{}@{}:{}/{}", driver.scheme(), user, host, p, database),
                None => format!("{}://{}@{}/{}", driver.scheme(), user, host, database),
            },
            DatasourceSpec::ConnectionString { driver, conn } => {
                format!("{}|{}", driver.scheme(), redact_connection_string(conn))
            }
            DatasourceSpec::Odbc { source, user, .. } => format!("odbc://{}@{}", user, source),
            DatasourceSpec::File { format, base_dir } => {
                let fmt = match format {
                    FileFormat::Csv => "csv",
                    FileFormat::Xml => "xml",
                };
                match base_dir {
                    Some(dir) => format!("{}:{}", fmt, dir.display()),
                    None => format!("{}:", fmt),
                }
            }
            DatasourceSpec::Memory { .. } => "memory".to_string(),
        }
    }
}

fn require_non_empty(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(FolioError::InvalidParameters(format!("{} must not be empty", what)));
    }
    Ok(())
}

/// Strip the password from a URL-style or `key=value` connection string.
pub(crate) fn redact_connection_string(conn: &str) -> String {
    if let Ok(mut url) = Url::parse(conn) {
        if url.password().is_some() && url.set_password(None).is_ok() {
            return url.to_string();
        }
        if url.has_host() {
            return url.to_string();
        }
    }
    conn.split_whitespace()
        .map(|part| {
            let lower = part.to_ascii_lowercase();
            if lower.starts_with("password=") || lower.starts_with("pwd=") {
                let key = &part[..part.find('=').unwrap_or(0)];
                format!("{}=***", key)
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cancels whatever is running on one datasource.
///
/// Cloneable and `Send`; the handle stays valid across passes.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    datasource: String,
    token: Arc<Mutex<CancellationToken>>,
}

impl CancelHandle {
    pub fn datasource(&self) -> &str {
        &self.datasource
    }

    /// Abort in-flight work. The connection is closed at the datasource's next use.
    pub fn cancel(&self) {
        info!("Cancelling queries on datasource '{}'", self.datasource);
        lock_token(&self.token).cancel();
    }
}

fn lock_token(slot: &Mutex<CancellationToken>) -> std::sync::MutexGuard<'_, CancellationToken> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) struct Datasource {
    name: String,
    spec: DatasourceSpec,
    charset: Charset,
    instance_id: Uuid,
    connection: Option<Box<dyn Connection>>,
    /// Set when connecting failed during the current pass.
    connect_failure: Option<String>,
    token: Arc<Mutex<CancellationToken>>,
}

impl Datasource {
    fn new(name: String, spec: DatasourceSpec) -> Self {
        Self {
            name,
            spec,
            charset: Charset::default(),
            instance_id: Uuid::new_v4(),
            connection: None,
            connect_failure: None,
            token: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    pub(crate) fn spec(&self) -> &DatasourceSpec {
        &self.spec
    }

    pub(crate) fn kind(&self) -> BackendKind {
        self.spec.kind()
    }

    pub(crate) fn charset(&self) -> Charset {
        self.charset
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Cache identity: locator, charset and, for in-memory data, the instance.
    pub(crate) fn identity(&self) -> String {
        let mut id = format!("{}#{}", self.spec.locator(), self.charset.name());
        if let DatasourceSpec::Memory { .. } = self.spec {
            id.push('#');
            id.push_str(&self.instance_id.to_string());
        }
        id
    }

    /// A cancel that arrived while idle closes the connection before re-arming.
    async fn begin_pass(&mut self) {
        self.connect_failure = None;
        if lock_token(&self.token).is_cancelled() {
            self.close().await;
            *lock_token(&self.token) = CancellationToken::new();
        }
    }

    fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            datasource: self.name.clone(),
            token: Arc::clone(&self.token),
        }
    }

    fn connection_error(&self, message: impl Into<String>) -> FolioError {
        FolioError::ConnectionError {
            datasource: self.name.clone(),
            message: message.into(),
        }
    }

    /// Run one bound query, connecting first if needed.
    pub(crate) async fn execute(
        &mut self,
        backends: &BackendRegistry,
        query: &BoundQuery,
        timeout: Option<Duration>,
    ) -> Result<ResultSnapshot> {
        if let Some(reason) = &self.connect_failure {
            return Err(self.connection_error(reason.clone()));
        }
        let token = lock_token(&self.token).clone();
        if token.is_cancelled() {
            self.close().await;
            return Err(FolioError::Cancelled {
                datasource: self.name.clone(),
            });
        }

        if self.connection.is_none() {
            let backend = Arc::clone(backends.require(self.kind(), &self.name)?);
            info!("Connecting datasource '{}' ({})", self.name, self.kind());
            let connected = tokio::select! {
                _ = token.cancelled() => None,
                result = backend.connect(&self.spec) => Some(result),
            };
            match connected {
                None => {
                    return Err(FolioError::Cancelled {
                        datasource: self.name.clone(),
                    })
                }
                Some(Ok(conn)) => self.connection = Some(conn),
                Some(Err(e)) => {
                    let message = format!("{:#}", e);
                    warn!("Failed to connect datasource '{}': {}", self.name, message);
                    self.connect_failure = Some(message.clone());
                    return Err(self.connection_error(message));
                }
            }
        }

        let Some(conn) = self.connection.as_mut() else {
            return Err(self.connection_error("connection unavailable"));
        };
        debug!("Executing on '{}': {}", self.name, query.raw());
        let outcome = tokio::select! {
            _ = token.cancelled() => Outcome::Cancelled,
            result = run_with_timeout(conn.as_mut(), query, timeout) => match result {
                Some(r) => Outcome::Done(r),
                None => Outcome::TimedOut,
            },
        };

        match outcome {
            Outcome::Done(Ok(raw)) => raw.decode(self.charset),
            Outcome::Done(Err(e)) => Err(self.connection_error(format!("{:#}", e))),
            Outcome::Cancelled => {
                warn!("Query on datasource '{}' cancelled; dropping connection", self.name);
                self.connection = None;
                Err(FolioError::Cancelled {
                    datasource: self.name.clone(),
                })
            }
            Outcome::TimedOut => {
                let limit = timeout.unwrap_or_default();
                warn!("Query on datasource '{}' timed out after {:?}", self.name, limit);
                self.connection = None;
                Err(self.connection_error(format!("timed out after {}s", limit.as_secs_f64())))
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            match conn.close().await {
                Ok(()) => info!("Closed datasource '{}'", self.name),
                Err(e) => warn!("Error closing datasource '{}': {:#}", self.name, e),
            }
        }
    }
}

enum Outcome {
    Done(anyhow::Result<crate::backend::RawRows>),
    Cancelled,
    TimedOut,
}

async fn run_with_timeout(
    conn: &mut dyn Connection,
    query: &BoundQuery,
    timeout: Option<Duration>,
) -> Option<anyhow::Result<crate::backend::RawRows>> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, conn.execute(query)).await.ok(),
        None => Some(conn.execute(query).await),
    }
}

/// Named datasources of one report context.
#[derive(Default)]
pub struct DatasourceRegistry {
    sources: HashMap<String, Datasource>,
    order: Vec<String>,
}

impl DatasourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a datasource. A failed registration leaves the registry unchanged.
    pub fn register(&mut self, name: &str, spec: DatasourceSpec) -> Result<()> {
        require_non_empty("datasource name", name)?;
        if self.sources.contains_key(name) {
            return Err(FolioError::already_exists(EntityKind::Datasource, name));
        }
        spec.validate()?;
        info!("Registered datasource '{}' ({})", name, spec.kind());
        self.sources
            .insert(name.to_string(), Datasource::new(name.to_string(), spec));
        self.order.push(name.to_string());
        Ok(())
    }

    pub fn set_encoding(&mut self, name: &str, label: &str) -> Result<()> {
        let source = self
            .sources
            .get_mut(name)
            .ok_or_else(|| FolioError::not_found(EntityKind::Datasource, name))?;
        let charset = Charset::for_label(label)?;
        debug!("Datasource '{}' encoding set to {}", name, charset.name());
        source.charset = charset;
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Datasource names in registration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn spec(&self, name: &str) -> Option<&DatasourceSpec> {
        self.sources.get(name).map(|s| s.spec())
    }

    pub fn charset(&self, name: &str) -> Option<Charset> {
        self.sources.get(name).map(|s| s.charset())
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.sources.get(name).is_some_and(|s| s.is_connected())
    }

    pub fn cancel_handle(&self, name: &str) -> Result<CancelHandle> {
        self.sources
            .get(name)
            .map(|s| s.cancel_handle())
            .ok_or_else(|| FolioError::not_found(EntityKind::Datasource, name))
    }

    pub(crate) fn get(&self, name: &str) -> Result<&Datasource> {
        self.sources
            .get(name)
            .ok_or_else(|| FolioError::not_found(EntityKind::Datasource, name))
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Result<&mut Datasource> {
        self.sources
            .get_mut(name)
            .ok_or_else(|| FolioError::not_found(EntityKind::Datasource, name))
    }

    /// Start a new execution pass: forget connect failures, re-arm cancelled tokens.
    pub(crate) async fn begin_pass(&mut self) {
        for source in self.sources.values_mut() {
            source.begin_pass().await;
        }
    }

    pub async fn close_all(&mut self) {
        for name in &self.order {
            if let Some(source) = self.sources.get_mut(name) {
                source.close().await;
            }
        }
    }
}

impl std::fmt::Debug for DatasourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasourceRegistry")
            .field("sources", &self.order)
            .finish()
    }
}
