//! The report context: everything one report execution owns.

use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::BackendRegistry;
use crate::cache::QueryCache;
use crate::catalog::{QueryCatalog, QueryHandle};
use crate::config::EngineConfig;
use crate::correlator::Correlator;
use crate::datasource::{CancelHandle, DatasourceRegistry, DatasourceSpec};
use crate::error::{EntityKind, FolioError, Result};
use crate::metrics::EngineMetrics;
use crate::params::ParamMap;
use crate::value::Value;

/// Owns the datasources, queries, links and parameters of one report.
///
/// Backends, the query cache and metrics are shared handles, so several
/// contexts (possibly on different tasks) can reuse one cache.
#[derive(Debug)]
pub struct ReportContext {
    pub(crate) datasources: DatasourceRegistry,
    pub(crate) catalog: QueryCatalog,
    pub(crate) correlator: Correlator,
    pub(crate) params: ParamMap,
    pub(crate) primary: Option<String>,
    pub(crate) config: EngineConfig,
    pub(crate) backends: Arc<BackendRegistry>,
    pub(crate) cache: Arc<QueryCache>,
    pub(crate) metrics: Arc<EngineMetrics>,
}

impl ReportContext {
    /// A context with its own cache sized from `config`.
    pub fn new(backends: Arc<BackendRegistry>, config: EngineConfig) -> Self {
        let metrics = Arc::new(EngineMetrics::new());
        let cache = Arc::new(QueryCache::with_metrics(
            config.query_cache_size,
            Arc::clone(&metrics),
        ));
        Self::with_shared(backends, cache, metrics, config)
    }

    /// A context sharing an existing cache and metrics handle.
    pub fn with_shared(
        backends: Arc<BackendRegistry>,
        cache: Arc<QueryCache>,
        metrics: Arc<EngineMetrics>,
        config: EngineConfig,
    ) -> Self {
        Self {
            datasources: DatasourceRegistry::new(),
            catalog: QueryCatalog::new(),
            correlator: Correlator::new(),
            params: ParamMap::new(),
            primary: None,
            config,
            backends,
            cache,
            metrics,
        }
    }

    // ------------------------------------------------------------------
    // Datasources
    // ------------------------------------------------------------------

    /// Register a datasource. Relative file base directories resolve against
    /// the configured data directory.
    pub fn register_datasource(&mut self, name: &str, spec: DatasourceSpec) -> Result<()> {
        let spec = match (spec, &self.config.data_dir) {
            (DatasourceSpec::File { format, base_dir }, Some(data_dir)) => {
                let base_dir = match base_dir {
                    Some(dir) if dir.is_absolute() => dir,
                    Some(dir) => data_dir.join(dir),
                    None => data_dir.clone(),
                };
                DatasourceSpec::File {
                    format,
                    base_dir: Some(base_dir),
                }
            }
            (spec, _) => spec,
        };
        self.datasources.register(name, spec)
    }

    pub fn set_encoding(&mut self, datasource: &str, charset: &str) -> Result<()> {
        self.datasources.set_encoding(datasource, charset)
    }

    pub fn cancel_handle(&self, datasource: &str) -> Result<CancelHandle> {
        self.datasources.cancel_handle(datasource)
    }

    pub fn datasources(&self) -> &DatasourceRegistry {
        &self.datasources
    }

    // ------------------------------------------------------------------
    // Queries and parameters
    // ------------------------------------------------------------------

    pub fn add_query(
        &mut self,
        datasource: &str,
        text: &str,
        result_name: &str,
    ) -> Result<QueryHandle> {
        self.catalog
            .add_query(&self.datasources, datasource, text, result_name)
    }

    /// Set a report parameter, replacing any previous value.
    pub fn set_parameter(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        if name.trim().is_empty() || name.starts_with(':') {
            return Err(FolioError::InvalidParameters(format!(
                "invalid parameter name '{}'",
                name
            )));
        }
        let value = value.into();
        debug!("Parameter '{}' = {}", name, value.canonical());
        self.params.insert(name.to_string(), value);
        Ok(())
    }

    pub fn parameters(&self) -> &ParamMap {
        &self.params
    }

    pub fn catalog(&self) -> &QueryCatalog {
        &self.catalog
    }

    // ------------------------------------------------------------------
    // Correlation
    // ------------------------------------------------------------------

    pub fn link(&mut self, leader: &str, follower: &str) -> Result<()> {
        self.correlator.link(&self.catalog, leader, follower)
    }

    pub fn link_keyed(
        &mut self,
        leader: &str,
        leader_field: &str,
        follower: &str,
        follower_field: &str,
    ) -> Result<()> {
        self.correlator
            .link_keyed(&self.catalog, leader, leader_field, follower, follower_field)
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn set_primary(&mut self, result_name: &str) -> Result<()> {
        if !self.catalog.contains(result_name) {
            return Err(FolioError::not_found(EntityKind::ResultSet, result_name));
        }
        self.primary = Some(result_name.to_string());
        Ok(())
    }

    /// The explicit primary, or the first registered query.
    pub fn primary(&self) -> Option<&str> {
        self.primary
            .as_deref()
            .or_else(|| self.catalog.first().map(|q| q.result_name()))
    }

    // ------------------------------------------------------------------
    // Shared handles
    // ------------------------------------------------------------------

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Close every open datasource connection.
    pub async fn close(&mut self) {
        info!("Closing report context ({} datasources)", self.datasources.len());
        self.datasources.close_all().await;
    }
}
