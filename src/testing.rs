//! In-memory backend for unit tests

use crate::client::{Backend, BackendError, BackendResult, Bucket, Endpoint, FluxRecord, FluxTable};
use crate::probe::ConnectionStatus;
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::watch;
use std::time::Duration;

type Canned<T> = Result<T, &'static str>;

/// How the mock answers the liveness check
#[derive(Debug, Clone)]
pub(crate) enum Health {
    Ok,
    Status(u16, String),
    Timeout,
}

/// Answers every backend call from canned data and records the queries it saw
pub(crate) struct MockBackend {
    pub health: Mutex<Health>,
    pub bucket: Mutex<Canned<Option<&'static str>>>,
    pub org_access: Mutex<Canned<()>>,
    pub measurements: Canned<Vec<&'static str>>,
    pub fields: Canned<Vec<&'static str>>,
    pub tag_keys: Canned<Vec<String>>,
    pub tag_values: Vec<(String, Canned<Vec<&'static str>>)>,
    pub data: Mutex<Canned<Vec<FluxTable>>>,
    pub queries: Mutex<Vec<String>>,
    pub health_checks: Mutex<usize>,
    /// When set, the status seen at each health check is recorded
    pub status_watch: Mutex<Option<watch::Receiver<ConnectionStatus>>>,
    pub status_at_health: Mutex<Vec<ConnectionStatus>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            health: Mutex::new(Health::Ok),
            bucket: Mutex::new(Ok(Some("telemetry"))),
            org_access: Mutex::new(Ok(())),
            measurements: Ok(Vec::new()),
            fields: Ok(Vec::new()),
            tag_keys: Ok(Vec::new()),
            tag_values: Vec::new(),
            data: Mutex::new(Ok(Vec::new())),
            queries: Mutex::new(Vec::new()),
            health_checks: Mutex::new(0),
            status_watch: Mutex::new(None),
            status_at_health: Mutex::new(Vec::new()),
        }
    }
}

impl MockBackend {
    /// A backend with a small schema: cpu/mem, usage_idle/usage_user, host h1/h2
    pub(crate) fn with_schema() -> Self {
        Self {
            measurements: Ok(vec!["cpu", "mem"]),
            fields: Ok(vec!["usage_idle", "usage_user"]),
            tag_keys: Ok(vec!["_field".into(), "_measurement".into(), "host".into()]),
            tag_values: vec![("host".into(), Ok(vec!["h1", "h2"]))],
            ..Default::default()
        }
    }

    pub(crate) fn set_data(&self, data: Canned<Vec<FluxTable>>) {
        *self.data.lock().unwrap() = data;
    }

    pub(crate) fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub(crate) fn tag_value_lookups(&self) -> usize {
        self.queries()
            .iter()
            .filter(|q| q.contains("schema.tagValues"))
            .count()
    }
}

fn table_of<S: AsRef<str>>(values: &[S]) -> Vec<FluxTable> {
    vec![FluxTable {
        records: values
            .iter()
            .map(|v| FluxRecord::new().with("_value", v.as_ref()))
            .collect(),
    }]
}

fn answer<S: AsRef<str>>(canned: &Canned<Vec<S>>) -> BackendResult<Vec<FluxTable>> {
    match canned {
        Ok(values) => Ok(table_of(values)),
        Err(msg) => Err(BackendError::Query(msg.to_string())),
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn health_check(&self, _: &Endpoint, _: Duration) -> BackendResult<()> {
        *self.health_checks.lock().unwrap() += 1;
        if let Some(rx) = self.status_watch.lock().unwrap().as_ref() {
            let current = rx.borrow().clone();
            self.status_at_health.lock().unwrap().push(current);
        }
        let health = self.health.lock().unwrap().clone();
        match health {
            Health::Ok => Ok(()),
            Health::Status(status, message) => Err(BackendError::Http { status, message }),
            Health::Timeout => Err(BackendError::Timeout),
        }
    }

    async fn find_bucket(&self, _: &Endpoint, name: &str) -> BackendResult<Option<Bucket>> {
        let bucket = *self.bucket.lock().unwrap();
        match bucket {
            Ok(Some(known)) if known == name => Ok(Some(Bucket {
                id: "b1".into(),
                name: name.into(),
                org_id: "o1".into(),
            })),
            Ok(_) => Ok(None),
            Err(msg) => Err(BackendError::Http {
                status: 401,
                message: msg.to_string(),
            }),
        }
    }

    async fn run_query(&self, _: &Endpoint, _: &str, query: &str) -> BackendResult<Vec<FluxTable>> {
        self.queries.lock().unwrap().push(query.to_string());

        if query.contains("schema.measurements") {
            answer(&self.measurements)
        } else if query.contains("schema.fields") {
            answer(&self.fields)
        } else if query.contains("schema.tagKeys") {
            answer(&self.tag_keys)
        } else if query.contains("schema.tagValues") {
            self.tag_values
                .iter()
                .find(|(k, _)| query.contains(&format!("tag: \"{}\"", k)))
                .map(|(_, canned)| answer(canned))
                .unwrap_or_else(|| Ok(Vec::new()))
        } else if query.starts_with("buckets()") {
            let access = *self.org_access.lock().unwrap();
            access
                .map(|_| Vec::new())
                .map_err(|msg| BackendError::Http {
                    status: 403,
                    message: msg.to_string(),
                })
        } else {
            let data = self.data.lock().unwrap().clone();
            data.map_err(|msg| BackendError::Query(msg.to_string()))
        }
    }
}
