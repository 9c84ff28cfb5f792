//! # Flux Explorer
//!
//! Schema-driven query construction for InfluxDB 2.x: discover what a bucket
//! contains, pick measurements, fields and tag values, and get back a filtered
//! Flux query, a dense preview table, and CSV or spreadsheet exports.
//!
//! ## Modules
//!
//! - [`client`]: backend seam and the InfluxDB HTTP implementation
//! - [`probe`]: connection validation
//! - [`schema`]: catalog discovery and the filter selection model
//! - [`flux`]: time ranges, query synthesis and result tabulation
//! - [`export`]: delimited and spreadsheet writers
//! - [`session`]: ties the above together for one operator
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flux_explorer::{ConnectionSettings, HttpBackend, Session};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = ConnectionSettings {
//!         host: "localhost".into(),
//!         org: "acme".into(),
//!         bucket: "telemetry".into(),
//!         token: "my-token".into(),
//!         ..Default::default()
//!     };
//!     let session = Session::new(Arc::new(HttpBackend::default()), settings);
//!
//!     session.connect().await?;
//!     session.enter_query_mode().await?;
//!     session.select("_measurement", "cpu", true);
//!
//!     let rows = session.submit_query().await?;
//!     println!("{} rows", rows);
//!     session.export_delimited("cpu.csv".as_ref())?;
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod export;
pub mod flux;
pub mod probe;
pub mod schema;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

// Re-export top-level types for convenience
pub use client::{
    Backend, BackendError, BackendResult, Bucket, Endpoint, FluxRecord, FluxTable, HttpBackend,
    HttpBackendConfig, Value,
};

pub use config::{generate_default_config, Config, ConfigError};

pub use export::{
    default_export_file_name, export_delimited, export_spreadsheet, ExportError, ExportKind,
};

pub use flux::{build_query, Cell, PreviewTable, ResolvedRange, TimeRangeInput};

pub use probe::{
    build_base_url, ConnectionProbe, ConnectionSettings, ConnectionStatus, ProbeConfig,
    ProbeError, ProbeErrorKind,
};

pub use schema::{
    CatalogLoader, CatalogOutcome, FilterError, FilterModel, FilterOption, FilterPanel, FilterSet,
    PanelId,
};

pub use session::{
    Operation, QueryFailurePolicy, Session, SessionError, SessionEvent, SessionOptions,
};
