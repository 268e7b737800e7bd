//! Engine configuration from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// What an execution does when one query fails to connect or run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Mark the failed query's subtree unavailable and keep executing the rest.
    #[default]
    Isolate,
    /// Fail the whole execution on the first failure.
    Abort,
}

impl FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "isolate" => Ok(FailurePolicy::Isolate),
            "abort" => Ok(FailurePolicy::Abort),
            other => bail!("unknown failure policy '{}' (expected isolate or abort)", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum cached result sets; 0 disables the query cache.
    pub query_cache_size: usize,
    pub failure_policy: FailurePolicy,
    pub query_timeout: Option<Duration>,
    /// Fallback directory for relative file-datasource paths.
    pub data_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            query_cache_size: 32,
            failure_policy: FailurePolicy::Isolate,
            query_timeout: None,
            data_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            query_cache_size: std::env::var("FOLIO_QUERY_CACHE_SIZE")
                .unwrap_or_else(|_| "32".to_string())
                .parse()
                .context("Invalid FOLIO_QUERY_CACHE_SIZE")?,
            failure_policy: std::env::var("FOLIO_FAILURE_POLICY")
                .unwrap_or_else(|_| "isolate".to_string())
                .parse()
                .context("Invalid FOLIO_FAILURE_POLICY")?,
            query_timeout: match std::env::var("FOLIO_QUERY_TIMEOUT_SECS") {
                Ok(secs) => Some(Duration::from_secs(
                    secs.parse().context("Invalid FOLIO_QUERY_TIMEOUT_SECS")?,
                )),
                Err(_) => None,
            },
            data_dir: std::env::var("FOLIO_DATA_DIR").ok().map(PathBuf::from),
        })
    }
}
