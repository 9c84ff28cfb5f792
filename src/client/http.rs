//! InfluxDB 2.x HTTP backend
//!
//! Talks to `/health`, `/api/v2/buckets` and `/api/v2/query`.

use super::annotated_csv::parse_annotated_csv;
use super::error::{BackendError, BackendResult};
use super::{Backend, Bucket, Endpoint, FluxTable};
use async_trait::async_trait;
use reqwest::{header, Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the HTTP backend
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Timeout for bucket lookups and queries, in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
        }
    }
}

/// [`Backend`] implementation over the InfluxDB 2.x REST API
#[derive(Debug, Clone, Default)]
pub struct HttpBackend {
    config: HttpBackendConfig,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }

    /// A client scoped to one operation; dropped (and its pool with it) when the call returns
    fn client(&self, timeout: Duration) -> BackendResult<Client> {
        Client::builder()
            .timeout(timeout)
            .build()
            .map_err(BackendError::Request)
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn health_check(&self, endpoint: &Endpoint, timeout: Duration) -> BackendResult<()> {
        let client = self.client(timeout)?;
        let request = client
            .get(endpoint.url("health"))
            .header(header::AUTHORIZATION, auth_header(endpoint))
            .send();

        let response = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| BackendError::Timeout)?
            .map_err(BackendError::from_reqwest)?;

        ensure_success(response).await.map(|_| ())
    }

    async fn find_bucket(&self, endpoint: &Endpoint, name: &str) -> BackendResult<Option<Bucket>> {
        let client = self.client(self.request_timeout())?;
        let response = client
            .get(endpoint.url("api/v2/buckets"))
            .header(header::AUTHORIZATION, auth_header(endpoint))
            .query(&[("name", name)])
            .send()
            .await
            .map_err(BackendError::from_reqwest)?;

        // A name filter that matches nothing is reported as 404 by some versions
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = ensure_success(response).await?;
        let buckets: BucketsResponse = response.json().await.map_err(BackendError::from_reqwest)?;

        Ok(buckets.buckets.into_iter().find(|b| b.name == name))
    }

    async fn run_query(
        &self,
        endpoint: &Endpoint,
        org: &str,
        query: &str,
    ) -> BackendResult<Vec<FluxTable>> {
        let client = self.client(self.request_timeout())?;
        let body = QueryRequest {
            query,
            kind: "flux",
            dialect: Dialect {
                header: true,
                annotations: &["datatype", "group", "default"],
            },
        };

        tracing::debug!(org = %org, query = %query, "Running Flux query");

        let response = client
            .post(endpoint.url("api/v2/query"))
            .header(header::AUTHORIZATION, auth_header(endpoint))
            .header(header::ACCEPT, "application/csv")
            .query(&[("org", org)])
            .json(&body)
            .send()
            .await
            .map_err(BackendError::from_reqwest)?;

        let response = ensure_success(response).await?;
        let text = response.text().await.map_err(BackendError::from_reqwest)?;

        parse_annotated_csv(&text)
    }
}

fn auth_header(endpoint: &Endpoint) -> String {
    format!("Token {}", endpoint.token)
}

/// Turn a non-success response into [`BackendError::Http`]
async fn ensure_success(response: Response) -> BackendResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&text)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or(text);

    Err(BackendError::Http {
        status: status.as_u16(),
        message,
    })
}

// ============================================
// Request/Response DTOs
// ============================================

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    dialect: Dialect<'a>,
}

#[derive(Debug, Serialize)]
struct Dialect<'a> {
    header: bool,
    annotations: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct BucketsResponse {
    #[serde(default)]
    buckets: Vec<Bucket>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}
