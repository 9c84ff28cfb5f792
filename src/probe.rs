//! Connection Probe
//!
//! Validates that the configured InfluxDB instance is reachable and that the
//! token can see the bucket before anything else is allowed. Checks run in
//! order and stop at the first failure:
//!
//! 1. host and token present (no network call otherwise)
//! 2. base URL normalization
//! 3. `/health` with an explicit deadline
//! 4. bucket lookup by name
//! 5. optional trivial query to confirm organization access

use crate::client::{Backend, BackendError, Endpoint};
use crate::flux::ORG_ACCESS_QUERY;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Default InfluxDB HTTP port
pub const DEFAULT_PORT: u16 = 8086;

/// Longest response body echoed back in a failure message
pub const MAX_BODY_IN_MESSAGE: usize = 120;

/// What the user entered to reach the backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub host: String,
    /// Raw port text; applied only when it parses as a positive integer
    pub port: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
}

impl ConnectionSettings {
    pub fn has_required_inputs(&self) -> bool {
        !self.host.trim().is_empty() && !self.token.trim().is_empty()
    }
}

/// Connection status shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => f.write_str("Disconnected"),
            ConnectionStatus::Connecting => f.write_str("Connecting"),
            ConnectionStatus::Connected => f.write_str("Connected"),
            ConnectionStatus::Failed(reason) => write!(f, "Fail: {}", reason),
        }
    }
}

/// Broad class of a probe failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeErrorKind {
    InputValidation,
    Connectivity,
    Authorization,
}

/// Why the probe did not reach `Connected`
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("host and token are required")]
    MissingInput,

    #[error("invalid host: {0}")]
    InvalidHost(String),

    #[error("Health fail {status}: {body}")]
    HealthStatus { status: u16, body: String },

    #[error("Health check failed: {0}")]
    Unreachable(String),

    #[error("Bucket not found or no permission")]
    BucketNotFound,

    #[error("Auth fail: {0}")]
    Unauthorized(String),
}

impl ProbeError {
    pub fn kind(&self) -> ProbeErrorKind {
        match self {
            ProbeError::MissingInput | ProbeError::InvalidHost(_) => ProbeErrorKind::InputValidation,
            ProbeError::HealthStatus { .. } | ProbeError::Unreachable(_) => {
                ProbeErrorKind::Connectivity
            }
            ProbeError::BucketNotFound | ProbeError::Unauthorized(_) => {
                ProbeErrorKind::Authorization
            }
        }
    }
}

/// Probe behaviour knobs
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Deadline for the `/health` call
    pub health_timeout: Duration,
    /// Run a trivial query after the bucket lookup
    pub verify_org_access: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            health_timeout: Duration::from_secs(8),
            verify_org_access: true,
        }
    }
}

/// Runs the connection checks and publishes status transitions
#[derive(Debug, Clone, Default)]
pub struct ConnectionProbe {
    config: ProbeConfig,
}

impl ConnectionProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Run every check; on success returns the endpoint later operations should use.
    ///
    /// `status` moves to `Connecting` once the inputs validate, then to
    /// `Connected` or `Failed`. An input validation failure goes straight to
    /// `Failed`.
    pub async fn connect(
        &self,
        backend: &dyn Backend,
        settings: &ConnectionSettings,
        status: &watch::Sender<ConnectionStatus>,
    ) -> Result<Endpoint, ProbeError> {
        let result = match validate(settings) {
            Ok(endpoint) => {
                status.send_replace(ConnectionStatus::Connecting);
                self.check(backend, settings, endpoint).await
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(endpoint) => {
                tracing::info!(url = %endpoint.base_url, bucket = %settings.bucket, "Connected");
                status.send_replace(ConnectionStatus::Connected);
            }
            Err(e) => {
                tracing::warn!(host = %settings.host, error = %e, "Connection probe failed");
                status.send_replace(ConnectionStatus::Failed(e.to_string()));
            }
        }

        result
    }

    async fn check(
        &self,
        backend: &dyn Backend,
        settings: &ConnectionSettings,
        endpoint: Endpoint,
    ) -> Result<Endpoint, ProbeError> {
        backend
            .health_check(&endpoint, self.config.health_timeout)
            .await
            .map_err(|e| match e {
                BackendError::Http { status, message } => ProbeError::HealthStatus {
                    status,
                    body: truncate(&message, MAX_BODY_IN_MESSAGE),
                },
                BackendError::Timeout => ProbeError::Unreachable(format!(
                    "timed out after {:?}",
                    self.config.health_timeout
                )),
                other => ProbeError::Unreachable(truncate(&other.to_string(), MAX_BODY_IN_MESSAGE)),
            })?;

        let bucket = backend
            .find_bucket(&endpoint, &settings.bucket)
            .await
            .map_err(|e| ProbeError::Unauthorized(e.to_string()))?;
        if bucket.is_none() {
            return Err(ProbeError::BucketNotFound);
        }

        if self.config.verify_org_access {
            backend
                .run_query(&endpoint, &settings.org, ORG_ACCESS_QUERY)
                .await
                .map_err(|e| ProbeError::Unauthorized(e.to_string()))?;
        }

        Ok(endpoint)
    }
}

/// Input validation and URL normalization, no I/O
pub fn validate(settings: &ConnectionSettings) -> Result<Endpoint, ProbeError> {
    if !settings.has_required_inputs() {
        return Err(ProbeError::MissingInput);
    }
    let base_url = build_base_url(&settings.host, &settings.port)?;
    Ok(Endpoint::new(base_url, settings.token.trim()))
}

/// Normalize a user-entered host into a base URL.
///
/// `http://` is prepended when no scheme is given. A port that parses as a
/// positive integer wins; otherwise 8086 is used unless the host already
/// names a port.
pub fn build_base_url(host: &str, port: &str) -> Result<String, ProbeError> {
    let host = host.trim();
    let text = if has_scheme(host) {
        host.to_string()
    } else {
        format!("http://{}", host)
    };

    let mut url =
        reqwest::Url::parse(&text).map_err(|e| ProbeError::InvalidHost(format!("{}: {}", host, e)))?;

    let port = match port.trim().parse::<u16>() {
        Ok(p) if p > 0 => Some(p),
        _ if !has_explicit_port(&text) => Some(DEFAULT_PORT),
        _ => None,
    };

    if let Some(port) = port {
        url.set_port(Some(port))
            .map_err(|_| ProbeError::InvalidHost(format!("{}: cannot carry a port", host)))?;
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn has_scheme(host: &str) -> bool {
    let lower = host.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Whether the authority part of `url` spells out a port
fn has_explicit_port(url: &str) -> bool {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);

    // IPv6 literals carry colons inside the brackets
    let port_part = match host_port.split_once(']') {
        Some((_, after)) => after.strip_prefix(':'),
        None => host_port.rsplit_once(':').map(|(_, p)| p),
    };

    port_part.is_some_and(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Health, MockBackend};

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            host: "localhost".into(),
            port: String::new(),
            org: "acme".into(),
            bucket: "telemetry".into(),
            token: "tkn".into(),
        }
    }

    #[test]
    fn test_base_url_defaults() {
        assert_eq!(build_base_url("localhost", "").unwrap(), "http://localhost:8086");
        assert_eq!(build_base_url("  localhost ", "abc").unwrap(), "http://localhost:8086");
        assert_eq!(build_base_url("localhost", "0").unwrap(), "http://localhost:8086");
        assert_eq!(build_base_url("localhost", "-5").unwrap(), "http://localhost:8086");
    }

    #[test]
    fn test_base_url_explicit_port() {
        assert_eq!(build_base_url("localhost", "9999").unwrap(), "http://localhost:9999");
        assert_eq!(build_base_url("localhost:9000", "").unwrap(), "http://localhost:9000");
        assert_eq!(build_base_url("localhost:9000", "9100").unwrap(), "http://localhost:9100");
        assert_eq!(build_base_url("http://db:80", "").unwrap(), "http://db");
    }

    #[test]
    fn test_base_url_schemes() {
        assert_eq!(
            build_base_url("https://influx.example.com", "").unwrap(),
            "https://influx.example.com:8086"
        );
        assert_eq!(
            build_base_url("HTTP://influx.example.com", "443").unwrap(),
            "http://influx.example.com:443"
        );
        assert_eq!(build_base_url("[::1]", "").unwrap(), "http://[::1]:8086");
        assert_eq!(build_base_url("[::1]:9000", "").unwrap(), "http://[::1]:9000");
    }

    #[test]
    fn test_base_url_invalid() {
        assert!(matches!(
            build_base_url("http://", ""),
            Err(ProbeError::InvalidHost(_))
        ));
    }

    #[test]
    fn test_has_explicit_port() {
        assert!(has_explicit_port("http://h:1"));
        assert!(has_explicit_port("http://user:pw@h:1/path"));
        assert!(!has_explicit_port("http://user:pw@h/path"));
        assert!(!has_explicit_port("http://h"));
        assert!(!has_explicit_port("http://[::1]"));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::Disconnected.to_string(), "Disconnected");
        assert_eq!(
            ConnectionStatus::Failed("host and token are required".into()).to_string(),
            "Fail: host and token are required"
        );
    }

    #[test]
    fn test_truncate() {
        let long = "x".repeat(500);
        assert_eq!(truncate(&long, MAX_BODY_IN_MESSAGE).len(), 120);
        assert_eq!(truncate("short", MAX_BODY_IN_MESSAGE), "short");
        assert_eq!(truncate("żółw", 2), "żó");
    }

    #[tokio::test]
    async fn test_missing_input_makes_no_call() {
        let backend = MockBackend::default();
        let (status, _rx) = watch::channel(ConnectionStatus::Disconnected);

        let mut s = settings();
        s.token = "  ".into();
        let err = ConnectionProbe::default()
            .connect(&backend, &s, &status)
            .await
            .unwrap_err();

        assert_eq!(err, ProbeError::MissingInput);
        assert_eq!(err.kind(), ProbeErrorKind::InputValidation);
        assert_eq!(*backend.health_checks.lock().unwrap(), 0);
        assert_eq!(
            *status.borrow(),
            ConnectionStatus::Failed("host and token are required".into())
        );
    }

    #[tokio::test]
    async fn test_connect_success() {
        let backend = MockBackend::default();
        let (status, rx) = watch::channel(ConnectionStatus::Disconnected);

        let endpoint = ConnectionProbe::default()
            .connect(&backend, &settings(), &status)
            .await
            .unwrap();

        assert_eq!(endpoint.base_url, "http://localhost:8086");
        assert_eq!(endpoint.token, "tkn");
        assert_eq!(*rx.borrow(), ConnectionStatus::Connected);
        assert_eq!(backend.queries(), vec![ORG_ACCESS_QUERY.to_string()]);
    }

    #[tokio::test]
    async fn test_status_is_connecting_during_health_check() {
        let backend = MockBackend::default();
        let (status, rx) = watch::channel(ConnectionStatus::Disconnected);
        *backend.status_watch.lock().unwrap() = Some(rx.clone());

        ConnectionProbe::default()
            .connect(&backend, &settings(), &status)
            .await
            .unwrap();

        assert_eq!(
            *backend.status_at_health.lock().unwrap(),
            vec![ConnectionStatus::Connecting]
        );
        assert_eq!(*rx.borrow(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_org_check_can_be_skipped() {
        let backend = MockBackend::default();
        let (status, _rx) = watch::channel(ConnectionStatus::Disconnected);
        let probe = ConnectionProbe::new(ProbeConfig {
            verify_org_access: false,
            ..Default::default()
        });

        probe.connect(&backend, &settings(), &status).await.unwrap();
        assert!(backend.queries().is_empty());
    }

    #[tokio::test]
    async fn test_health_failure_truncates_body() {
        let backend = MockBackend::default();
        *backend.health.lock().unwrap() = Health::Status(503, "e".repeat(300));
        let (status, _rx) = watch::channel(ConnectionStatus::Disconnected);

        let err = ConnectionProbe::default()
            .connect(&backend, &settings(), &status)
            .await
            .unwrap_err();

        match &err {
            ProbeError::HealthStatus { status, body } => {
                assert_eq!(*status, 503);
                assert_eq!(body.len(), MAX_BODY_IN_MESSAGE);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.kind(), ProbeErrorKind::Connectivity);
        assert!(!status.borrow().is_connected());
    }

    #[tokio::test]
    async fn test_health_timeout() {
        let backend = MockBackend::default();
        *backend.health.lock().unwrap() = Health::Timeout;
        let (status, _rx) = watch::channel(ConnectionStatus::Disconnected);

        let err = ConnectionProbe::default()
            .connect(&backend, &settings(), &status)
            .await
            .unwrap_err();

        assert_eq!(err, ProbeError::Unreachable("timed out after 8s".into()));
        assert_eq!(
            status.borrow().to_string(),
            "Fail: Health check failed: timed out after 8s"
        );
    }

    #[tokio::test]
    async fn test_sub_second_timeout_message() {
        let backend = MockBackend::default();
        *backend.health.lock().unwrap() = Health::Timeout;
        let (status, _rx) = watch::channel(ConnectionStatus::Disconnected);
        let probe = ConnectionProbe::new(ProbeConfig {
            health_timeout: Duration::from_millis(250),
            ..Default::default()
        });

        let err = probe.connect(&backend, &settings(), &status).await.unwrap_err();

        assert_eq!(err, ProbeError::Unreachable("timed out after 250ms".into()));
    }

    #[tokio::test]
    async fn test_bucket_missing() {
        let backend = MockBackend::default();
        *backend.bucket.lock().unwrap() = Ok(None);
        let (status, _rx) = watch::channel(ConnectionStatus::Disconnected);

        let err = ConnectionProbe::default()
            .connect(&backend, &settings(), &status)
            .await
            .unwrap_err();

        assert_eq!(err, ProbeError::BucketNotFound);
        assert_eq!(err.kind(), ProbeErrorKind::Authorization);
    }

    #[tokio::test]
    async fn test_bucket_lookup_error_is_auth_fail() {
        let backend = MockBackend::default();
        *backend.bucket.lock().unwrap() = Err("unauthorized access");
        let (status, _rx) = watch::channel(ConnectionStatus::Disconnected);

        let err = ConnectionProbe::default()
            .connect(&backend, &settings(), &status)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Auth fail: HTTP 401: unauthorized access");
    }

    #[tokio::test]
    async fn test_org_access_failure_is_auth_fail() {
        let backend = MockBackend::default();
        *backend.org_access.lock().unwrap() = Err("no org");
        let (status, _rx) = watch::channel(ConnectionStatus::Disconnected);

        let err = ConnectionProbe::default()
            .connect(&backend, &settings(), &status)
            .await
            .unwrap_err();

        assert_eq!(err, ProbeError::Unauthorized("HTTP 403: no org".into()));
    }

    #[tokio::test]
    async fn test_http_health_timeout_is_enforced() {
        use crate::client::HttpBackend;
        use tokio::net::TcpListener;

        // Accept connections but never answer
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let probe = ConnectionProbe::new(ProbeConfig {
            health_timeout: Duration::from_millis(200),
            verify_org_access: false,
        });
        let mut s = settings();
        s.host = addr.to_string();
        let (status, _rx) = watch::channel(ConnectionStatus::Disconnected);

        let err = probe
            .connect(&HttpBackend::default(), &s, &status)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ProbeErrorKind::Connectivity);
    }
}
