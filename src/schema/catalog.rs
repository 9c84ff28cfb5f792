//! Schema Catalog Loader
//!
//! Discovers measurements, fields, and a bounded set of tag keys with their
//! values. Each discovery step is isolated: a failure is recorded as a
//! [`StepError`] and the remaining steps still run. Steps run one after the
//! other so every error can be attributed to the step that raised it.

use super::filter::{FilterSet, FIELD_SET, MEASUREMENT_SET};
use crate::client::{Backend, BackendError, Endpoint};
use crate::flux::{fields_query, measurements_query, tag_keys_query, tag_values_query};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Instant;

/// Tag keys beyond this many are not expanded into value lookups
pub const DEFAULT_MAX_TAG_KEYS: usize = 6;

/// A failed discovery step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepError {
    /// Step label (`measurements`, `fields`, `tagKeys`, `tagValues:<key>`); empty when
    /// the whole load was refused before any step ran
    pub label: String,
    pub message: String,
}

impl StepError {
    pub fn new(label: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            label: label.into(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.label.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.label, self.message)
        }
    }
}

/// Sets discovered by one catalog load plus the errors of the steps that failed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogOutcome {
    pub sets: Vec<FilterSet>,
    pub errors: Vec<StepError>,
}

impl CatalogOutcome {
    /// A load refused before discovery (not connected, no bucket)
    pub fn aborted(message: impl fmt::Display) -> Self {
        Self {
            sets: Vec::new(),
            errors: vec![StepError::new("", message)],
        }
    }

    /// All step errors joined with `" | "` in step order, if any step failed
    pub fn error_message(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" | "),
        )
    }
}

/// Runs the discovery steps against a backend
#[derive(Debug, Clone)]
pub struct CatalogLoader {
    max_tag_keys: usize,
}

impl Default for CatalogLoader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TAG_KEYS)
    }
}

impl CatalogLoader {
    pub fn new(max_tag_keys: usize) -> Self {
        Self { max_tag_keys }
    }

    pub fn max_tag_keys(&self) -> usize {
        self.max_tag_keys
    }

    /// Discover the catalog of `bucket`.
    ///
    /// Tag keys starting with `_` (`_field`, `_measurement`, `_start`, `_stop`) are
    /// internal columns and are skipped before the fan-out limit is applied. A tag
    /// key without values produces no set.
    pub async fn load(
        &self,
        backend: &dyn Backend,
        endpoint: &Endpoint,
        org: &str,
        bucket: &str,
    ) -> CatalogOutcome {
        if bucket.trim().is_empty() {
            return CatalogOutcome::aborted("Bucket empty");
        }

        let started = Instant::now();
        let mut outcome = CatalogOutcome::default();

        match discover(backend, endpoint, org, &measurements_query(bucket)).await {
            Ok(values) => outcome.sets.push(FilterSet::new(MEASUREMENT_SET, values)),
            Err(e) => record_failure(&mut outcome, "measurements", e),
        }

        match discover(backend, endpoint, org, &fields_query(bucket)).await {
            Ok(values) => outcome.sets.push(FilterSet::new(FIELD_SET, values)),
            Err(e) => record_failure(&mut outcome, "fields", e),
        }

        match discover(backend, endpoint, org, &tag_keys_query(bucket)).await {
            Ok(keys) => {
                let keys: Vec<String> = keys
                    .into_iter()
                    .filter(|k| !k.starts_with('_'))
                    .take(self.max_tag_keys)
                    .collect();

                for key in keys {
                    let label = format!("tagValues:{}", key);
                    match discover(backend, endpoint, org, &tag_values_query(bucket, &key)).await {
                        Ok(values) if values.is_empty() => {
                            tracing::debug!(tag = %key, "Tag key has no values, skipping");
                        }
                        Ok(values) => outcome.sets.push(FilterSet::new(key, values)),
                        Err(e) => record_failure(&mut outcome, &label, e),
                    }
                }
            }
            Err(e) => record_failure(&mut outcome, "tagKeys", e),
        }

        tracing::info!(
            bucket = %bucket,
            sets = outcome.sets.len(),
            failed_steps = outcome.errors.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Schema catalog loaded"
        );

        outcome
    }
}

fn record_failure(outcome: &mut CatalogOutcome, label: &str, err: BackendError) {
    tracing::warn!(step = %label, error = %err, "Schema discovery step failed");
    outcome.errors.push(StepError::new(label, err));
}

/// Run a schema query and collect its `_value` column, deduplicated and sorted
async fn discover(
    backend: &dyn Backend,
    endpoint: &Endpoint,
    org: &str,
    query: &str,
) -> Result<Vec<String>, BackendError> {
    let tables = backend.run_query(endpoint, org, query).await?;
    let values: BTreeSet<String> = tables
        .iter()
        .flat_map(|t| t.records.iter())
        .filter_map(|r| r.value())
        .map(ToString::to_string)
        .collect();
    Ok(values.into_iter().collect())
}
