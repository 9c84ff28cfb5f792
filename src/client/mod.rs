//! InfluxDB Backend
//!
//! The three backend operations the rest of the crate needs:
//!
//! - **health_check**: liveness probe with an explicit deadline
//! - **find_bucket**: bucket lookup by name (existence + authorization)
//! - **run_query**: execute Flux text and return tables of labeled records
//!
//! [`HttpBackend`] implements them against the InfluxDB 2.x HTTP API. Each call
//! builds its own HTTP client and drops it before returning, so no connection
//! outlives the operation that opened it.

mod annotated_csv;
mod error;
mod http;

pub use annotated_csv::parse_annotated_csv;
pub use error::{BackendError, BackendResult};
pub use http::{HttpBackend, HttpBackendConfig};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Where and as whom to talk to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Normalized base URL without a trailing slash (e.g. `http://localhost:8086`)
    pub base_url: String,
    /// API token sent as `Authorization: Token <token>`
    pub token: String,
}

impl Endpoint {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// A bucket as returned by the bucket lookup
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Bucket {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, rename = "orgID")]
    pub org_id: String,
}

/// A typed cell value decoded from a query response
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Long(i64),
    UnsignedLong(u64),
    Double(f64),
    Bool(bool),
    Time(DateTime<FixedOffset>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Long(v) => write!(f, "{}", v),
            Value::UnsignedLong(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Time(t) => f.write_str(&t.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

/// One record of a result table: labels in the order the backend sent them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FluxRecord {
    pub values: Vec<(String, Option<Value>)>,
}

impl FluxRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style label insertion, mostly for tests
    pub fn with(mut self, label: &str, value: impl Into<Value>) -> Self {
        self.values.push((label.to_string(), Some(value.into())));
        self
    }

    pub fn get(&self, label: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(l, _)| l == label)
            .and_then(|(_, v)| v.as_ref())
    }

    /// The `_value` column, which schema functions use for their result
    pub fn value(&self) -> Option<&Value> {
        self.get("_value")
    }
}

/// One result table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FluxTable {
    pub records: Vec<FluxRecord>,
}

/// The backend operations consumed by the probe, catalog loader and session
#[async_trait]
pub trait Backend: Send + Sync {
    /// Liveness check; must give up once `timeout` elapses
    async fn health_check(&self, endpoint: &Endpoint, timeout: Duration) -> BackendResult<()>;

    /// Look a bucket up by name; `Ok(None)` when it does not exist or is not visible
    async fn find_bucket(&self, endpoint: &Endpoint, name: &str) -> BackendResult<Option<Bucket>>;

    /// Run Flux text within an organization
    async fn run_query(
        &self,
        endpoint: &Endpoint,
        org: &str,
        query: &str,
    ) -> BackendResult<Vec<FluxTable>>;
}
