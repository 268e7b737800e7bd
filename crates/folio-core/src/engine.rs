//! Report execution: run the primary's subtree and build the composite cursor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::{CacheKey, CacheOutcome};
use crate::catalog::QueryHandle;
use crate::config::FailurePolicy;
use crate::context::ReportContext;
use crate::cursor::CompositeCursor;
use crate::error::{FolioError, Result};
use crate::params::BoundQuery;
use crate::result_set::ResultSet;

/// Why a result set is missing from an execution.
#[derive(Debug, Clone)]
pub enum FailureCause {
    /// The query itself failed to connect or run.
    Failed(FolioError),
    /// Not executed because its leader was unavailable.
    Skipped { leader: String },
}

#[derive(Debug, Clone)]
pub struct QueryFailure {
    pub result: String,
    pub cause: FailureCause,
}

impl QueryFailure {
    pub fn reason(&self) -> String {
        match &self.cause {
            FailureCause::Failed(err) => err.to_string(),
            FailureCause::Skipped { leader } => format!("leader '{}' is unavailable", leader),
        }
    }
}

/// Outcome of one execution pass.
#[derive(Debug)]
pub struct Execution {
    pub cursor: CompositeCursor,
    /// Isolated failures, in execution order. Empty under the abort policy.
    pub failures: Vec<QueryFailure>,
}

impl Execution {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self, result: &str) -> bool {
        self.failures.iter().any(|f| f.result == result)
    }
}

impl ReportContext {
    /// Execute the primary result set and its followers.
    pub async fn execute(&mut self) -> Result<Execution> {
        let primary = self.resolve_primary()?;
        self.datasources.begin_pass().await;

        let order = self.correlator.subtree(&primary);
        let mut bound = HashMap::with_capacity(order.len());
        for name in &order {
            let query = self.catalog.by_name(name)?;
            bound.insert(name.clone(), query.template().bind(name, &self.params)?);
        }
        info!(
            "Executing report from primary '{}' ({} queries)",
            primary,
            order.len()
        );

        let mut sets: HashMap<String, std::result::Result<ResultSet, String>> = HashMap::new();
        let mut failures = Vec::new();
        let mut unavailable: HashSet<String> = HashSet::new();

        for name in &order {
            if let Some(leader) = self.correlator.leader_of(name) {
                if name != &primary && unavailable.contains(leader) {
                    let failure = QueryFailure {
                        result: name.clone(),
                        cause: FailureCause::Skipped {
                            leader: leader.to_string(),
                        },
                    };
                    sets.insert(name.clone(), Err(failure.reason()));
                    unavailable.insert(name.clone());
                    failures.push(failure);
                    continue;
                }
            }

            let Some(query) = bound.get(name) else {
                continue;
            };
            match self.run_query(name, query).await {
                Ok((rs, _)) => {
                    self.catalog
                        .remember_schema(name, Arc::clone(rs.schema()));
                    sets.insert(name.clone(), Ok(rs));
                }
                Err(err) if err.is_structural() => return Err(err),
                Err(err) => {
                    if name == &primary || self.config.failure_policy == FailurePolicy::Abort {
                        warn!("Query '{}' failed: {}", name, err);
                        return Err(err);
                    }
                    warn!("Query '{}' failed, isolating its subtree: {}", name, err);
                    sets.insert(name.clone(), Err(err.to_string()));
                    unavailable.insert(name.clone());
                    failures.push(QueryFailure {
                        result: name.clone(),
                        cause: FailureCause::Failed(err),
                    });
                }
            }
        }

        let cursor = CompositeCursor::build(
            &primary,
            &self.correlator,
            sets,
            Some(Arc::clone(&self.metrics)),
        )?;
        info!(
            "Executed report from '{}': {} failures",
            primary,
            failures.len()
        );
        Ok(Execution { cursor, failures })
    }

    /// Drop every cached result of this report, then execute.
    pub async fn refresh(&mut self) -> Result<Execution> {
        let mut keys = Vec::new();
        for (_, query) in self.catalog.iter() {
            // Queries that cannot bind have nothing cached.
            if let Ok(bound) = query.template().bind(query.result_name(), &self.params) {
                keys.push(self.cache_key(query.result_name(), &bound)?);
            }
        }
        let dropped = keys.iter().filter(|k| self.cache.invalidate(k)).count();
        info!("Refreshing report: invalidated {} cached results", dropped);
        self.execute().await
    }

    /// Run one query through the cache, outside of any composite.
    pub async fn get_or_execute(
        &mut self,
        handle: QueryHandle,
    ) -> Result<(ResultSet, CacheOutcome)> {
        let name = self.catalog.get(handle)?.result_name().to_string();
        let bound = self.bind(&name)?;
        self.datasources.begin_pass().await;
        let result = self.run_query(&name, &bound).await?;
        self.catalog
            .remember_schema(&name, Arc::clone(result.0.schema()));
        Ok(result)
    }

    /// Invalidate the cached result for the current binding and run it again.
    pub async fn refresh_query(&mut self, handle: QueryHandle) -> Result<ResultSet> {
        let name = self.catalog.get(handle)?.result_name().to_string();
        let bound = self.bind(&name)?;
        let key = self.cache_key(&name, &bound)?;
        self.cache.invalidate(&key);
        let (rs, _) = self.get_or_execute(handle).await?;
        Ok(rs)
    }

    fn resolve_primary(&self) -> Result<String> {
        self.primary().map(str::to_string).ok_or_else(|| {
            FolioError::InvalidParameters("report has no queries to execute".to_string())
        })
    }

    fn bind(&self, name: &str) -> Result<BoundQuery> {
        self.catalog
            .by_name(name)?
            .template()
            .bind(name, &self.params)
    }

    fn cache_key(&self, name: &str, bound: &BoundQuery) -> Result<CacheKey> {
        let query = self.catalog.by_name(name)?;
        let datasource = self.datasources.get(query.datasource())?;
        Ok(CacheKey::new(
            datasource.identity(),
            bound.raw(),
            bound.canonical_params(),
        ))
    }

    async fn run_query(
        &mut self,
        name: &str,
        bound: &BoundQuery,
    ) -> Result<(ResultSet, CacheOutcome)> {
        let key = self.cache_key(name, bound)?;
        let datasource = self.catalog.by_name(name)?.datasource().to_string();
        let source = self.datasources.get_mut(&datasource)?;
        let kind = source.kind();
        let backends = Arc::clone(&self.backends);
        let metrics = Arc::clone(&self.metrics);
        let timeout = self.config.query_timeout;
        let cache = Arc::clone(&self.cache);

        let (rs, outcome) = cache
            .get_or_execute(key, || async move {
                let result = source.execute(&backends, bound, timeout).await;
                metrics.record_query(kind, result.is_ok());
                result
            })
            .await?;
        info!(
            "Query '{}' on '{}': {} rows ({:?})",
            name,
            datasource,
            rs.row_count(),
            outcome
        );
        Ok((rs, outcome))
    }
}
