//! Schema Discovery and Selection
//!
//! - **Catalog**: discover measurements, fields, tag keys and tag values with
//!   per-step error isolation
//! - **Filter**: filter sets, selection state and panels
//!
//! Discovery results flow into the [`FilterModel`]; a failed step shows up as a
//! synthetic `load_error` set instead of a separate error channel.

mod catalog;
mod filter;

pub use catalog::{CatalogLoader, CatalogOutcome, StepError, DEFAULT_MAX_TAG_KEYS};
pub use filter::{
    FilterError, FilterModel, FilterOption, FilterPanel, FilterSet, PanelId, FIELD_SET,
    LOAD_ERROR_SET, MEASUREMENT_SET,
};
