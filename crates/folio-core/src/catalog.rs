//! Named queries and the result sets they produce.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::datasource::DatasourceRegistry;
use crate::error::{EntityKind, FolioError, Result};
use crate::params::QueryTemplate;
use crate::result_set::Schema;

/// Opaque reference to a registered query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryHandle(usize);

impl QueryHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Query {
    result_name: String,
    datasource: String,
    template: QueryTemplate,
    /// Columns seen the last time this query ran.
    schema: Option<Arc<Schema>>,
}

impl Query {
    pub fn result_name(&self) -> &str {
        &self.result_name
    }

    pub fn datasource(&self) -> &str {
        &self.datasource
    }

    pub fn template(&self) -> &QueryTemplate {
        &self.template
    }

    pub fn text(&self) -> &str {
        self.template.raw()
    }

    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.schema.as_ref()
    }
}

/// Queries of one report context, in registration order.
#[derive(Debug, Default)]
pub struct QueryCatalog {
    queries: Vec<Query>,
    by_name: HashMap<String, QueryHandle>,
}

impl QueryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `text` against `datasource` under `result_name`. Nothing runs yet.
    pub fn add_query(
        &mut self,
        datasources: &DatasourceRegistry,
        datasource: &str,
        text: &str,
        result_name: &str,
    ) -> Result<QueryHandle> {
        if result_name.trim().is_empty() {
            return Err(FolioError::InvalidParameters(
                "result name must not be empty".to_string(),
            ));
        }
        if text.trim().is_empty() {
            return Err(FolioError::InvalidParameters(format!(
                "query text for '{}' must not be empty",
                result_name
            )));
        }
        if !datasources.contains(datasource) {
            return Err(FolioError::not_found(EntityKind::Datasource, datasource));
        }
        if self.by_name.contains_key(result_name) {
            return Err(FolioError::already_exists(EntityKind::ResultSet, result_name));
        }

        let handle = QueryHandle(self.queries.len());
        self.queries.push(Query {
            result_name: result_name.to_string(),
            datasource: datasource.to_string(),
            template: QueryTemplate::parse(text),
            schema: None,
        });
        self.by_name.insert(result_name.to_string(), handle);
        info!(
            "Registered query '{}' on datasource '{}'",
            result_name, datasource
        );
        Ok(handle)
    }

    pub fn get(&self, handle: QueryHandle) -> Result<&Query> {
        self.queries
            .get(handle.0)
            .ok_or_else(|| FolioError::not_found(EntityKind::Query, format!("#{}", handle.0)))
    }

    pub fn handle_of(&self, result_name: &str) -> Result<QueryHandle> {
        self.by_name
            .get(result_name)
            .copied()
            .ok_or_else(|| FolioError::not_found(EntityKind::ResultSet, result_name))
    }

    pub fn by_name(&self, result_name: &str) -> Result<&Query> {
        let handle = self.handle_of(result_name)?;
        self.get(handle)
    }

    pub fn contains(&self, result_name: &str) -> bool {
        self.by_name.contains_key(result_name)
    }

    pub fn first(&self) -> Option<&Query> {
        self.queries.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = (QueryHandle, &Query)> {
        self.queries
            .iter()
            .enumerate()
            .map(|(i, q)| (QueryHandle(i), q))
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub(crate) fn remember_schema(&mut self, result_name: &str, schema: Arc<Schema>) {
        if let Some(handle) = self.by_name.get(result_name) {
            self.queries[handle.0].schema = Some(schema);
        }
    }
}
