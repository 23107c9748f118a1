//! Copy job configuration and validation.

use serde::{Deserialize, Serialize};

use crate::error::{CopyError, Result};
use crate::filter::Filter;
use crate::scheduler::DEFAULT_PARALLELISM;

/// Default whole-job timeout in seconds (one hour).
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// One SQL Server endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Encrypt connection (default: "true").
    #[serde(default = "default_true_string")]
    pub encrypt: String,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

/// Full copy job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyConfig {
    /// Source database.
    pub source: EndpointConfig,

    /// Target database.
    pub target: EndpointConfig,

    /// Schema holding the tables on both sides (default: "dbo").
    #[serde(default = "default_schema")]
    pub schema: String,

    /// SQL `LIKE` pattern selecting the tables to copy.
    pub table_filter: String,

    /// Row filter applied to every table; empty selects all rows.
    #[serde(default)]
    pub query_filter: String,

    /// Tables copied concurrently (default: 5).
    #[serde(default = "default_parallelism")]
    pub parallel: usize,

    /// Append-only progress output for non-terminal environments.
    #[serde(default)]
    pub ci: bool,

    /// Keep copying remaining tables after one fails (default: true).
    #[serde(default = "default_true")]
    pub continue_on_error: bool,

    /// Whole-job timeout in seconds (default: 3600).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl CopyConfig {
    /// Validate the configuration. The row filter is parsed here so a
    /// malformed filter fails before any database is touched.
    pub fn validate(&self) -> Result<()> {
        validate_endpoint(&self.source, "source")?;
        validate_endpoint(&self.target, "target")?;

        if self.schema.is_empty() {
            return Err(CopyError::Config("schema is required".into()));
        }
        if self.table_filter.is_empty() {
            return Err(CopyError::Config("table filter is required".into()));
        }
        if self.parallel == 0 {
            return Err(CopyError::Config("parallel must be at least 1".into()));
        }

        if self.source.host == self.target.host
            && self.source.port == self.target.port
            && self.source.database == self.target.database
        {
            return Err(CopyError::Config(
                "source and target cannot be the same database".into(),
            ));
        }

        Filter::parse(&self.query_filter)?;
        Ok(())
    }

    /// The parsed row filter.
    pub fn filter(&self) -> Result<Filter> {
        Filter::parse(&self.query_filter)
    }
}

fn validate_endpoint(endpoint: &EndpointConfig, side: &str) -> Result<()> {
    if endpoint.host.is_empty() {
        return Err(CopyError::Config(format!("{side}.host is required")));
    }
    if endpoint.database.is_empty() {
        return Err(CopyError::Config(format!("{side}.database is required")));
    }
    if endpoint.user.is_empty() {
        return Err(CopyError::Config(format!("{side}.user is required")));
    }
    Ok(())
}

fn default_port() -> u16 {
    1433
}

fn default_true_string() -> String {
    "true".to_string()
}

fn default_schema() -> String {
    "dbo".to_string()
}

fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
