//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::client::HttpBackendConfig;
use crate::probe::{ConnectionSettings, ProbeConfig};
use crate::schema::DEFAULT_MAX_TAG_KEYS;
use crate::session::{QueryFailurePolicy, SessionOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "FLUX_EXPLORER_";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub probe: ProbeSection,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend connection settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub host: String,

    pub port: Option<u16>,

    #[serde(default)]
    pub org: String,

    #[serde(default)]
    pub bucket: String,

    #[serde(default)]
    pub token: String,
}

/// Connection probe and HTTP timeouts
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeSection {
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_verify_org_access")]
    pub verify_org_access: bool,
}

fn default_health_timeout() -> u64 {
    8
}

fn default_request_timeout() -> u64 {
    30
}

fn default_verify_org_access() -> bool {
    true
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            health_timeout_secs: default_health_timeout(),
            request_timeout_secs: default_request_timeout(),
            verify_org_access: default_verify_org_access(),
        }
    }
}

/// Schema discovery limits
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_max_tag_keys")]
    pub max_tag_keys: usize,
}

fn default_max_tag_keys() -> usize {
    DEFAULT_MAX_TAG_KEYS
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            max_tag_keys: default_max_tag_keys(),
        }
    }
}

/// Query execution behaviour
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryConfig {
    #[serde(default)]
    pub on_failure: QueryFailurePolicy,
}

/// Export settings
#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
}

fn default_sheet_name() -> String {
    "Data".to_string()
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            sheet_name: default_sheet_name(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths: Vec<PathBuf> = [
            dirs::config_dir().map(|p| p.join("flux-explorer").join("config.toml")),
            Some(PathBuf::from("./flux-explorer.toml")),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self::load_first(&config_paths)
    }

    /// Load the first existing, parsable file of `paths`, else environment-only config
    pub fn load_first(paths: &[PathBuf]) -> Self {
        for path in paths {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Settings handed to the connection probe
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            host: self.connection.host.clone(),
            port: self
                .connection
                .port
                .map(|p| p.to_string())
                .unwrap_or_default(),
            org: self.connection.org.clone(),
            bucket: self.connection.bucket.clone(),
            token: self.connection.token.clone(),
        }
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            health_timeout: Duration::from_secs(self.probe.health_timeout_secs),
            verify_org_access: self.probe.verify_org_access,
        }
    }

    pub fn http_config(&self) -> HttpBackendConfig {
        HttpBackendConfig {
            request_timeout_ms: self.probe.request_timeout_secs.saturating_mul(1000),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            probe: self.probe_config(),
            max_tag_keys: self.catalog.max_tag_keys,
            on_query_failure: self.query.on_failure,
            sheet_name: self.export.sheet_name.clone(),
        }
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(format!("{}{}", ENV_PREFIX, name)).ok());
    }

    /// Apply overrides from `lookup`, keyed by the variable name without prefix
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("HOST") {
            self.connection.host = host;
        }
        if let Some(port) = lookup("PORT") {
            match port.parse() {
                Ok(p) => self.connection.port = Some(p),
                Err(_) => tracing::warn!(value = %port, "Ignoring unparsable port override"),
            }
        }
        if let Some(org) = lookup("ORG") {
            self.connection.org = org;
        }
        if let Some(bucket) = lookup("BUCKET") {
            self.connection.bucket = bucket;
        }
        if let Some(token) = lookup("TOKEN") {
            self.connection.token = token;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Flux Explorer Configuration
#
# Environment variables override these settings:
# - FLUX_EXPLORER_HOST
# - FLUX_EXPLORER_PORT
# - FLUX_EXPLORER_ORG
# - FLUX_EXPLORER_BUCKET
# - FLUX_EXPLORER_TOKEN
# - FLUX_EXPLORER_LOG_LEVEL
# - FLUX_EXPLORER_LOG_FORMAT

[connection]
# InfluxDB host; http:// is assumed when no scheme is given
host = "localhost"

# Port (8086 when omitted and the host names none)
# port = 8086

# Organization and bucket to explore
org = ""
bucket = ""

# API token
token = ""

[probe]
# Deadline for the /health check (seconds)
health_timeout_secs = 8

# Deadline for bucket lookups and queries (seconds)
request_timeout_secs = 30

# Run a trivial query after the bucket lookup to confirm organization access
verify_org_access = true

[catalog]
# Tag keys expanded into value lookups
max_tag_keys = 6

[query]
# What happens to the previous preview when a query fails: keep_preview or clear_preview
on_failure = "keep_preview"

[export]
# Worksheet name for spreadsheet exports
sheet_name = "Data"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
