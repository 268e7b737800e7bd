//! Prometheus metrics for query execution, caching and correlation.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

use crate::backend::BackendKind;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct BackendLabel(pub BackendKind);

impl prometheus_client::encoding::EncodeLabelSet for BackendLabel {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("backend", self.0.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct EngineMetrics {
    pub queries_executed: Family<BackendLabel, Counter>,
    pub query_failures: Family<BackendLabel, Counter>,
    pub cache_hits: Counter,
    pub cache_misses: Counter,
    pub cache_evictions: Counter,
    pub cache_entries: Gauge,
    pub follower_repositions: Counter,
    pub registry: Arc<Registry>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let queries_executed = Family::<BackendLabel, Counter>::default();
        registry.register(
            "folio_queries_executed",
            "Queries sent to a backend, by backend kind",
            queries_executed.clone(),
        );

        let query_failures = Family::<BackendLabel, Counter>::default();
        registry.register(
            "folio_query_failures",
            "Queries that failed to connect or execute, by backend kind",
            query_failures.clone(),
        );

        let cache_hits = Counter::default();
        registry.register(
            "folio_cache_hits",
            "Result sets served from the query cache",
            cache_hits.clone(),
        );

        let cache_misses = Counter::default();
        registry.register(
            "folio_cache_misses",
            "Query cache lookups that had to execute",
            cache_misses.clone(),
        );

        let cache_evictions = Counter::default();
        registry.register(
            "folio_cache_evictions",
            "Entries discarded from the query cache",
            cache_evictions.clone(),
        );

        let cache_entries = Gauge::default();
        registry.register(
            "folio_cache_entries",
            "Result sets currently held by the query cache",
            cache_entries.clone(),
        );

        let follower_repositions = Counter::default();
        registry.register(
            "folio_follower_repositions",
            "Keyed follower repositionings",
            follower_repositions.clone(),
        );

        Self {
            queries_executed,
            query_failures,
            cache_hits,
            cache_misses,
            cache_evictions,
            cache_entries,
            follower_repositions,
            registry: Arc::new(registry),
        }
    }

    pub fn record_query(&self, kind: BackendKind, ok: bool) {
        self.queries_executed.get_or_create(&BackendLabel(kind)).inc();
        if !ok {
            self.query_failures.get_or_create(&BackendLabel(kind)).inc();
        }
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics")
            .field("cache_hits", &self.cache_hits.get())
            .field("cache_misses", &self.cache_misses.get())
            .field("cache_entries", &self.cache_entries.get())
            .finish()
    }
}
