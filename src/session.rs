//! Session orchestration
//!
//! A [`Session`] owns everything one operator works with: connection settings
//! and status, the filter model, the time range, and the current preview. Each
//! long-running operation holds a busy guard for its duration so the same
//! operation cannot be triggered twice at once; other operations stay usable.
//!
//! State changes are published as [`SessionEvent`]s on a broadcast channel.
//! The connection status, including the transient `Connecting` state, is also
//! available as a watch channel.

use crate::client::{Backend, BackendError, Endpoint};
use crate::export::{self, ExportError, DEFAULT_SHEET_NAME};
use crate::flux::{build_query, PreviewTable, TimeRangeInput};
use crate::probe::{ConnectionProbe, ConnectionSettings, ConnectionStatus, ProbeConfig, ProbeError};
use crate::schema::{
    CatalogLoader, CatalogOutcome, FilterError, FilterModel, FilterOption, FilterPanel, FilterSet,
    PanelId, DEFAULT_MAX_TAG_KEYS,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{broadcast, watch};

const EVENT_CAPACITY: usize = 64;

/// What happens to the previous preview when a query fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryFailurePolicy {
    /// The last good preview stays visible next to the failure message
    #[default]
    KeepPreview,
    /// The preview is discarded
    ClearPreview,
}

/// Operations guarded against re-entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    LoadCatalog,
    Query,
    Export,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Connect => "connect",
            Operation::LoadCatalog => "catalog load",
            Operation::Query => "query",
            Operation::Export => "export",
        };
        f.write_str(name)
    }
}

/// Notifications published after state changes
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChanged(ConnectionStatus),
    CatalogLoaded { sets: usize, error: Option<String> },
    SelectionChanged,
    PreviewUpdated { rows: Option<usize> },
    BusyChanged { operation: Operation, busy: bool },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("A {0} is already in progress")]
    Busy(Operation),

    #[error("Not connected")]
    NotConnected,

    #[error("No filter option is selected")]
    NothingSelected,

    #[error("Fail: {0}")]
    Probe(#[from] ProbeError),

    #[error("Query fail: {0}")]
    Query(#[source] BackendError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("Export fail: {0}")]
    Export(#[from] ExportError),
}

/// Tunables for a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub probe: ProbeConfig,
    pub max_tag_keys: usize,
    pub on_query_failure: QueryFailurePolicy,
    pub sheet_name: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            probe: ProbeConfig::default(),
            max_tag_keys: DEFAULT_MAX_TAG_KEYS,
            on_query_failure: QueryFailurePolicy::default(),
            sheet_name: DEFAULT_SHEET_NAME.to_string(),
        }
    }
}

struct SessionState {
    settings: ConnectionSettings,
    /// Present only while connected
    endpoint: Option<Endpoint>,
    filters: FilterModel,
    time_range: TimeRangeInput,
    preview: Option<PreviewTable>,
    display_status: String,
}

/// One operator's exploration session
pub struct Session {
    backend: Arc<dyn Backend>,
    probe: ConnectionProbe,
    catalog: CatalogLoader,
    on_query_failure: QueryFailurePolicy,
    sheet_name: String,
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<SessionEvent>,
    busy: Mutex<HashSet<Operation>>,
    state: Mutex<SessionState>,
}

/// Marks an operation busy until dropped
struct BusyGuard<'a> {
    session: &'a Session,
    operation: Operation,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        lock(&self.session.busy).remove(&self.operation);
        self.session.emit(SessionEvent::BusyChanged {
            operation: self.operation,
            busy: false,
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    pub fn new(backend: Arc<dyn Backend>, settings: ConnectionSettings) -> Self {
        Self::with_options(backend, settings, SessionOptions::default())
    }

    pub fn with_options(
        backend: Arc<dyn Backend>,
        settings: ConnectionSettings,
        options: SessionOptions,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            backend,
            probe: ConnectionProbe::new(options.probe),
            catalog: CatalogLoader::new(options.max_tag_keys),
            on_query_failure: options.on_query_failure,
            sheet_name: options.sheet_name,
            status,
            events,
            busy: Mutex::new(HashSet::new()),
            state: Mutex::new(SessionState {
                settings,
                endpoint: None,
                filters: FilterModel::new(),
                time_range: TimeRangeInput::default(),
                preview: None,
                display_status: String::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Whether the last connect succeeded; unlike [`Session::status`] it has no intermediate state
    pub fn is_connected(&self) -> bool {
        self.state().endpoint.is_some()
    }

    pub fn display_status(&self) -> String {
        self.state().display_status.clone()
    }

    pub fn settings(&self) -> ConnectionSettings {
        self.state().settings.clone()
    }

    /// Replace the connection settings; the session is disconnected
    pub fn set_settings(&self, settings: ConnectionSettings) {
        self.state().settings = settings;
        self.disconnect();
    }

    pub fn is_busy(&self, operation: Operation) -> bool {
        lock(&self.busy).contains(&operation)
    }

    /// Probe the backend with the current settings
    pub async fn connect(&self) -> Result<(), SessionError> {
        let _guard = self.begin(Operation::Connect)?;
        let settings = {
            let mut state = self.state();
            state.endpoint = None;
            state.settings.clone()
        };

        let result = self
            .probe
            .connect(self.backend.as_ref(), &settings, &self.status)
            .await;
        let status = self.status();

        {
            let mut state = self.state();
            state.display_status = status.to_string();
            if let Ok(endpoint) = &result {
                state.endpoint = Some(endpoint.clone());
                state.filters.clear();
                state.preview = None;
            }
        }
        self.emit(SessionEvent::StatusChanged(status));

        result.map(|_| ()).map_err(SessionError::from)
    }

    /// Forget the connection, the catalog and the preview
    pub fn disconnect(&self) {
        {
            let mut state = self.state();
            state.endpoint = None;
            state.filters.clear();
            state.preview = None;
            state.display_status = ConnectionStatus::Disconnected.to_string();
        }
        self.status.send_replace(ConnectionStatus::Disconnected);
        self.emit(SessionEvent::StatusChanged(ConnectionStatus::Disconnected));
    }

    /// Load the catalog the first time query mode is entered
    pub async fn enter_query_mode(&self) -> Result<(), SessionError> {
        if self.state().filters.is_empty() {
            self.load_catalog().await?;
        }
        Ok(())
    }

    /// Rediscover the schema and replace the filter sets.
    ///
    /// Discovery failures do not fail the operation; they appear as the
    /// `load_error` set.
    pub async fn load_catalog(&self) -> Result<(), SessionError> {
        let _guard = self.begin(Operation::LoadCatalog)?;
        let (endpoint, org, bucket) = {
            let state = self.state();
            (
                state.endpoint.clone(),
                state.settings.org.clone(),
                state.settings.bucket.clone(),
            )
        };

        let outcome = match endpoint {
            Some(endpoint) => {
                self.catalog
                    .load(self.backend.as_ref(), &endpoint, &org, &bucket)
                    .await
            }
            None => CatalogOutcome::aborted("Not connected"),
        };

        let error = outcome.error_message();
        let count = outcome.sets.len();
        {
            let mut state = self.state();
            state.filters.install(outcome.sets, error.clone());
            state.display_status = match &error {
                Some(e) => format!("Schema loaded with errors: {}", e),
                None => format!("Schema loaded: {} filter sets", count),
            };
        }
        self.emit(SessionEvent::CatalogLoaded { sets: count, error });

        Ok(())
    }

    /// Query text for the current selection and time range
    pub fn current_query(&self) -> String {
        let state = self.state();
        let range = state.time_range.resolve();
        build_query(&state.settings.bucket, state.filters.sets(), &range)
    }

    /// Build, run and tabulate the query. Returns the row count.
    pub async fn submit_query(&self) -> Result<usize, SessionError> {
        let _guard = self.begin(Operation::Query)?;
        let (endpoint, org, query) = {
            let mut state = self.state();
            let endpoint = state.endpoint.clone().ok_or(SessionError::NotConnected)?;
            if !state.filters.has_selection() {
                return Err(SessionError::NothingSelected);
            }
            let range = state.time_range.resolve();
            let query = build_query(&state.settings.bucket, state.filters.sets(), &range);
            state.display_status = "Querying...".to_string();
            (endpoint, state.settings.org.clone(), query)
        };

        match self.backend.run_query(&endpoint, &org, &query).await {
            Ok(tables) => {
                let table = PreviewTable::from_tables(&tables);
                let rows = table.row_count();
                {
                    let mut state = self.state();
                    state.preview = Some(table);
                    state.display_status = format!("Query returned {} rows", rows);
                }
                tracing::info!(rows, "Query complete");
                self.emit(SessionEvent::PreviewUpdated { rows: Some(rows) });
                Ok(rows)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Query failed");
                let cleared = {
                    let mut state = self.state();
                    state.display_status = format!("Query fail: {}", e);
                    match self.on_query_failure {
                        QueryFailurePolicy::KeepPreview => false,
                        QueryFailurePolicy::ClearPreview => state.preview.take().is_some(),
                    }
                };
                if cleared {
                    self.emit(SessionEvent::PreviewUpdated { rows: None });
                }
                Err(SessionError::Query(e))
            }
        }
    }

    pub fn export_delimited(&self, path: &Path) -> Result<(), SessionError> {
        self.export_with(path, |table, path| export::export_delimited(table, path))
    }

    pub fn export_spreadsheet(&self, path: &Path) -> Result<(), SessionError> {
        let sheet_name = self.sheet_name.clone();
        self.export_with(path, move |table, path| {
            export::export_spreadsheet(table, path, &sheet_name)
        })
    }

    fn export_with(
        &self,
        path: &Path,
        write: impl FnOnce(&PreviewTable, &Path) -> Result<(), ExportError>,
    ) -> Result<(), SessionError> {
        let _guard = self.begin(Operation::Export)?;
        let table = self.state().preview.clone().unwrap_or_default();

        let result = write(&table, path);
        self.state().display_status = match &result {
            Ok(()) => format!("Exported to {}", path.display()),
            Err(e) => format!("Export fail: {}", e),
        };
        result.map_err(SessionError::from)
    }

    pub fn preview(&self) -> Option<PreviewTable> {
        self.state().preview.clone()
    }

    pub fn time_range(&self) -> TimeRangeInput {
        self.state().time_range.clone()
    }

    pub fn set_time_range(&self, range: TimeRangeInput) {
        self.state().time_range = range;
    }

    /// Connected, no query running, and something selected
    pub fn can_submit(&self) -> bool {
        let state = self.state();
        state.endpoint.is_some() && state.filters.has_selection() && !self.is_busy(Operation::Query)
    }

    /// Connected with at least one filter set
    pub fn can_add_panel(&self) -> bool {
        let state = self.state();
        state.endpoint.is_some() && !state.filters.is_empty()
    }

    /// The preview has at least one row
    pub fn can_export(&self) -> bool {
        self.state()
            .preview
            .as_ref()
            .is_some_and(|t| !t.is_empty())
    }

    pub fn filter_sets(&self) -> Vec<FilterSet> {
        self.state().filters.sets().to_vec()
    }

    pub fn available_names(&self) -> Vec<String> {
        self.state().filters.available_names().to_vec()
    }

    pub fn panels(&self) -> Vec<FilterPanel> {
        self.state().filters.panels().to_vec()
    }

    pub fn visible_options(&self, panel: PanelId) -> Vec<FilterOption> {
        self.state()
            .filters
            .visible_options(panel)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn select(&self, set_name: &str, value: &str, selected: bool) -> bool {
        let changed = self.state().filters.select(set_name, value, selected);
        if changed {
            self.emit(SessionEvent::SelectionChanged);
        }
        changed
    }

    pub fn toggle(&self, set_name: &str, value: &str) -> Option<bool> {
        let toggled = self.state().filters.toggle(set_name, value);
        if toggled.is_some() {
            self.emit(SessionEvent::SelectionChanged);
        }
        toggled
    }

    pub fn add_panel(&self) -> Result<PanelId, SessionError> {
        let mut state = self.state();
        if state.endpoint.is_none() {
            return Err(SessionError::NotConnected);
        }
        Ok(state.filters.add_panel()?)
    }

    pub fn remove_panel(&self, panel: PanelId) -> bool {
        self.state().filters.remove_panel(panel)
    }

    pub fn bind_panel(&self, panel: PanelId, name: &str) -> Result<(), SessionError> {
        Ok(self.state().filters.bind_panel(panel, name)?)
    }

    pub fn set_search_text(&self, panel: PanelId, text: &str) -> Result<(), SessionError> {
        Ok(self.state().filters.set_search_text(panel, text)?)
    }

    fn begin(&self, operation: Operation) -> Result<BusyGuard<'_>, SessionError> {
        if !lock(&self.busy).insert(operation) {
            return Err(SessionError::Busy(operation));
        }
        self.emit(SessionEvent::BusyChanged {
            operation,
            busy: true,
        });
        Ok(BusyGuard {
            session: self,
            operation,
        })
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        lock(&self.state)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
