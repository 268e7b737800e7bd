//! Job manifests: datasources, queries, links and parameters for one report run.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use folio_core::{BackendRegistry, EngineConfig, ReportContext, Value};
use folio_connectors::SpecResolver;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDatasource {
    pub name: String,
    /// `postgres://`, `mysql://`, `csv:<dir>` or `xml:<dir>`.
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobQuery {
    pub name: String,
    pub datasource: String,
    pub text: String,
}

/// A leader/follower link; keyed when both fields are given.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobLink {
    pub leader: String,
    pub follower: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follower_field: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub datasources: Vec<JobDatasource>,
    pub queries: Vec<JobQuery>,
    #[serde(default)]
    pub links: Vec<JobLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Job must declare at least one query")]
    NoQueries,

    #[error("Duplicate datasource '{0}'")]
    DuplicateDatasource(String),

    #[error("Duplicate query '{0}'")]
    DuplicateQuery(String),

    #[error("Query '{query}' uses unknown datasource '{datasource}'")]
    UnknownDatasource { query: String, datasource: String },

    #[error("Link references unknown query '{0}'")]
    UnknownQuery(String),

    #[error("Link {leader} -> {follower} must give both leader_field and follower_field or neither")]
    HalfKeyedLink { leader: String, follower: String },

    #[error("Primary query '{0}' is not declared")]
    UnknownPrimary(String),
}

impl Job {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Invalid job manifest")
    }

    /// Structural checks that need no datasource access.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.queries.is_empty() {
            errors.push(ValidationError::NoQueries);
        }

        let mut datasources = HashSet::new();
        for ds in &self.datasources {
            if !datasources.insert(ds.name.as_str()) {
                errors.push(ValidationError::DuplicateDatasource(ds.name.clone()));
            }
        }

        let mut queries = HashSet::new();
        for q in &self.queries {
            if !queries.insert(q.name.as_str()) {
                errors.push(ValidationError::DuplicateQuery(q.name.clone()));
            }
            if !datasources.contains(q.datasource.as_str()) {
                errors.push(ValidationError::UnknownDatasource {
                    query: q.name.clone(),
                    datasource: q.datasource.clone(),
                });
            }
        }

        for link in &self.links {
            for name in [&link.leader, &link.follower] {
                if !queries.contains(name.as_str()) {
                    errors.push(ValidationError::UnknownQuery(name.clone()));
                }
            }
            if link.leader_field.is_some() != link.follower_field.is_some() {
                errors.push(ValidationError::HalfKeyedLink {
                    leader: link.leader.clone(),
                    follower: link.follower.clone(),
                });
            }
        }

        if let Some(primary) = &self.primary {
            if !queries.contains(primary.as_str()) {
                errors.push(ValidationError::UnknownPrimary(primary.clone()));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Build a report context with everything the manifest declares.
    pub fn build_context(
        &self,
        backends: Arc<BackendRegistry>,
        config: EngineConfig,
        resolver: &SpecResolver,
    ) -> Result<ReportContext> {
        let mut ctx = ReportContext::new(backends, config);

        for ds in &self.datasources {
            let spec = resolver
                .resolve(&ds.uri)
                .with_context(|| format!("Datasource '{}'", ds.name))?;
            ctx.register_datasource(&ds.name, spec)?;
            if let Some(label) = &ds.encoding {
                ctx.set_encoding(&ds.name, label)?;
            }
        }

        for q in &self.queries {
            ctx.add_query(&q.datasource, &q.text, &q.name)?;
        }

        for link in &self.links {
            match (&link.leader_field, &link.follower_field) {
                (Some(lf), Some(ff)) => ctx.link_keyed(&link.leader, lf, &link.follower, ff)?,
                _ => ctx.link(&link.leader, &link.follower)?,
            }
        }

        if let Some(primary) = &self.primary {
            ctx.set_primary(primary)?;
        }
        for (name, value) in &self.parameters {
            ctx.set_parameter(name, value.clone())?;
        }

        Ok(ctx)
    }
}

/// Parse a `name=value` command-line parameter.
///
/// Numeric values become numbers. Anything else is typed the way a manifest
/// string parameter is, so `2024-02-01` binds as a date on either path.
pub fn parse_param(raw: &str) -> Result<(String, Value)> {
    let (name, value) = raw
        .split_once('=')
        .with_context(|| format!("Parameter '{}' must look like name=value", raw))?;
    let value = match value.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => Value::Number(n),
        _ => serde_json::from_value(serde_json::Value::String(value.to_string()))
            .with_context(|| format!("Invalid value for parameter '{}'", name.trim()))?,
    };
    Ok((name.trim().to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_connectors::default_registry;

    const MANIFEST: &str = r#"{
        "datasources": [
            {"name": "sales", "uri": "csv:/srv/exports/sales"},
            {"name": "catalog", "uri": "postgres://report@db/catalog", "encoding": "utf-8"}
        ],
        "queries": [
            {"name": "orders", "datasource": "sales", "text": "orders_:month.csv"},
            {"name": "items", "datasource": "catalog", "text": "SELECT id, label FROM items"}
        ],
        "links": [
            {"leader": "orders", "follower": "items", "leader_field": "item_id", "follower_field": "id"}
        ],
        "parameters": {"month": "2024-02", "limit": 10}
    }"#;

    #[test]
    fn test_parse_manifest() {
        let job = Job::from_json(MANIFEST).unwrap();
        assert_eq!(job.datasources.len(), 2);
        assert_eq!(job.datasources[1].encoding.as_deref(), Some("utf-8"));
        assert_eq!(job.links[0].leader_field.as_deref(), Some("item_id"));
        assert_eq!(job.primary, None);
        assert_eq!(job.parameters["limit"], Value::Number(10.0));
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_validation_collects_every_error() {
        let mut job = Job::from_json(MANIFEST).unwrap();
        job.datasources.push(job.datasources[0].clone());
        job.queries[1].datasource = "warehouse".to_string();
        job.links[0].follower_field = None;
        job.links.push(JobLink {
            leader: "orders".to_string(),
            follower: "ghost".to_string(),
            leader_field: None,
            follower_field: None,
        });
        job.primary = Some("ghost".to_string());

        let errors = job.validate().unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::DuplicateDatasource("sales".to_string()),
                ValidationError::UnknownDatasource {
                    query: "items".to_string(),
                    datasource: "warehouse".to_string(),
                },
                ValidationError::HalfKeyedLink {
                    leader: "orders".to_string(),
                    follower: "items".to_string(),
                },
                ValidationError::UnknownQuery("ghost".to_string()),
                ValidationError::UnknownPrimary("ghost".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_job_is_invalid() {
        let job = Job::from_json(r#"{"datasources": [], "queries": []}"#).unwrap();
        assert_eq!(job.validate().unwrap_err(), vec![ValidationError::NoQueries]);
    }

    #[test]
    fn test_build_context_registers_everything() {
        let job = Job::from_json(MANIFEST).unwrap();
        let ctx = job
            .build_context(
                Arc::new(default_registry()),
                EngineConfig::default(),
                &SpecResolver::default(),
            )
            .unwrap();
        assert_eq!(ctx.datasources().len(), 2);
        assert_eq!(ctx.catalog().len(), 2);
        assert_eq!(ctx.primary(), Some("orders"));
        assert_eq!(ctx.correlator().leader_of("items"), Some("orders"));
        assert_eq!(ctx.parameters()["month"], Value::text("2024-02"));
    }

    #[test]
    fn test_unsupported_uri_names_the_datasource() {
        let job = Job::from_json(
            r#"{"datasources": [{"name": "dw", "uri": "odbc:WAREHOUSE"}],
                "queries": [{"name": "q", "datasource": "dw", "text": "SELECT 1"}]}"#,
        )
        .unwrap();
        let err = job
            .build_context(
                Arc::new(default_registry()),
                EngineConfig::default(),
                &SpecResolver::default(),
            )
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Datasource 'dw'"));
    }

    #[tokio::test]
    async fn test_manifest_runs_over_csv_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("orders_2024-01.csv"),
            "order_id,item_id\n1,7\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("orders_2024-02.csv"),
            "order_id,item_id\n10,1\n11,2\n12,9\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("items.csv"), "id,label\n1,A\n2,B\n").unwrap();

        let uri = format!("csv:{}", dir.path().display());
        let manifest = serde_json::json!({
            "datasources": [{"name": "files", "uri": uri}],
            "queries": [
                {"name": "orders", "datasource": "files", "text": "orders_:month.csv"},
                {"name": "items", "datasource": "files", "text": "items.csv"}
            ],
            "links": [
                {"leader": "orders", "follower": "items", "leader_field": "item_id", "follower_field": "id"}
            ],
            "parameters": {"month": "2024-01"}
        });
        let job = Job::from_json(&manifest.to_string()).unwrap();
        assert!(job.validate().is_ok());

        let mut ctx = job
            .build_context(
                Arc::new(default_registry()),
                EngineConfig::default(),
                &SpecResolver::default(),
            )
            .unwrap();
        let (name, value) = parse_param("month=2024-02").unwrap();
        ctx.set_parameter(&name, value).unwrap();

        let mut exec = ctx.execute().await.unwrap();
        assert!(exec.is_complete());
        let rows: Vec<String> = exec
            .cursor
            .collect_rows()
            .iter()
            .map(|r| serde_json::to_string(r).unwrap())
            .collect();
        assert_eq!(
            rows,
            vec![
                r#"{"orders.order_id":"10","orders.item_id":"1","items.id":"1","items.label":"A"}"#,
                r#"{"orders.order_id":"11","orders.item_id":"2","items.id":"2","items.label":"B"}"#,
                r#"{"orders.order_id":"12","orders.item_id":"9","items.id":null,"items.label":null}"#,
            ]
        );
        ctx.close().await;
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("month=2024-02").unwrap(),
            ("month".to_string(), Value::text("2024-02"))
        );
        assert_eq!(
            parse_param("limit=10").unwrap(),
            ("limit".to_string(), Value::Number(10.0))
        );
        assert!(parse_param("nonsense").is_err());
    }

    #[test]
    fn test_param_typing_matches_manifest() {
        let job = Job::from_json(
            r#"{"datasources": [], "queries": [],
                "parameters": {"day": "2024-02-01", "at": "2024-02-01 08:30:00", "region": "north"}}"#,
        )
        .unwrap();
        for (name, raw) in [
            ("day", "day=2024-02-01"),
            ("at", "at=2024-02-01 08:30:00"),
            ("region", "region=north"),
        ] {
            let (_, value) = parse_param(raw).unwrap();
            assert_eq!(value, job.parameters[name], "parameter {}", name);
        }
        assert!(matches!(job.parameters["day"], Value::Date(_)));
    }
}
