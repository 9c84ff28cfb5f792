//! Flux Query Construction
//!
//! - **TimeRange**: resolve user time input to a canonical UTC start/stop pair
//! - **Builder**: synthesize escaped Flux text from the filter selection
//! - **Table**: fold query results into a dense preview table
//!
//! # Generated Query Shape
//!
//! ```text
//! from(bucket: "telemetry")
//! |> range(start: 2024-01-01T00:00:00Z, stop: 2024-01-02T00:00:00Z)
//! |> filter(fn: (r) => r._measurement == "cpu")
//! |> filter(fn: (r) => r._field == "usage_idle")
//! |> filter(fn: (r) => r["host"] == "web-1" or r["host"] == "web-2")
//! ```

mod builder;
mod table;
mod time_range;

pub use builder::{
    build_query, escape_string, fields_query, measurements_query, string_literal, tag_keys_query,
    tag_values_query, ORG_ACCESS_QUERY,
};
pub use table::{Cell, PreviewTable, EXCLUDED_LABELS};
pub use time_range::{
    format_instant, parse_instant, parse_time_of_day, ResolvedRange, TimeParseError,
    TimeRangeInput,
};
