//! Flux query synthesis
//!
//! Builds query text from the current filter selection and a resolved time
//! range. Every user-sourced literal goes through [`escape_string`]; that is the
//! only thing standing between a tag value and the query structure.

use super::time_range::ResolvedRange;
use crate::schema::{FilterSet, FIELD_SET, MEASUREMENT_SET};
use std::fmt::Write;

/// Escape a value for use inside a double-quoted Flux string literal.
///
/// `$` is escaped as well since `${...}` interpolates inside Flux strings.
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '$' => out.push_str("\\$"),
            _ => out.push(c),
        }
    }
    out
}

/// Quote and escape a value as a Flux string literal
pub fn string_literal(s: &str) -> String {
    format!("\"{}\"", escape_string(s))
}

/// Build the filter query for the given bucket, sets and range.
///
/// Clause order: source, range, measurement filter, field filter, then one
/// filter per remaining tag set in the order the sets appear. Sets without a
/// selected option and synthetic sets contribute nothing.
pub fn build_query(bucket: &str, sets: &[FilterSet], range: &ResolvedRange) -> String {
    let mut query = String::new();
    // Writing to a String cannot fail
    let _ = writeln!(query, "from(bucket: {})", string_literal(bucket));
    let _ = writeln!(query, "|> range(start: {}, stop: {})", range.start, range.stop);

    let measurements = selected_in(sets, MEASUREMENT_SET);
    if !measurements.is_empty() {
        push_filter(&mut query, &measurements, |v| {
            format!("r._measurement == {}", string_literal(v))
        });
    }

    let fields = selected_in(sets, FIELD_SET);
    if !fields.is_empty() {
        push_filter(&mut query, &fields, |v| {
            format!("r._field == {}", string_literal(v))
        });
    }

    for set in sets
        .iter()
        .filter(|s| !s.is_synthetic() && s.name() != MEASUREMENT_SET && s.name() != FIELD_SET)
    {
        let values: Vec<&str> = set.selected_values().collect();
        if values.is_empty() {
            continue;
        }
        let key = string_literal(set.name());
        push_filter(&mut query, &values, |v| {
            format!("r[{}] == {}", key, string_literal(v))
        });
    }

    query
}

fn selected_in<'a>(sets: &'a [FilterSet], name: &str) -> Vec<&'a str> {
    sets.iter()
        .find(|s| s.name() == name)
        .map(|s| s.selected_values().collect())
        .unwrap_or_default()
}

fn push_filter<F>(query: &mut String, values: &[&str], predicate: F)
where
    F: Fn(&str) -> String,
{
    let disjunction = values
        .iter()
        .map(|v| predicate(v))
        .collect::<Vec<_>>()
        .join(" or ");
    let _ = writeln!(query, "|> filter(fn: (r) => {})", disjunction);
}

const SCHEMA_IMPORT: &str = "import \"influxdata/influxdb/schema\"";

/// `schema.measurements` for a bucket
pub fn measurements_query(bucket: &str) -> String {
    format!(
        "{}\nschema.measurements(bucket: {})",
        SCHEMA_IMPORT,
        string_literal(bucket)
    )
}

/// `schema.fields` for a bucket
pub fn fields_query(bucket: &str) -> String {
    format!(
        "{}\nschema.fields(bucket: {})",
        SCHEMA_IMPORT,
        string_literal(bucket)
    )
}

/// `schema.tagKeys` for a bucket
pub fn tag_keys_query(bucket: &str) -> String {
    format!(
        "{}\nschema.tagKeys(bucket: {})",
        SCHEMA_IMPORT,
        string_literal(bucket)
    )
}

/// `schema.tagValues` for one tag key
pub fn tag_values_query(bucket: &str, tag: &str) -> String {
    format!(
        "{}\nschema.tagValues(bucket: {}, tag: {})",
        SCHEMA_IMPORT,
        string_literal(bucket),
        string_literal(tag)
    )
}

/// Minimal authenticated query used to confirm organization access
pub const ORG_ACCESS_QUERY: &str = "buckets() |> limit(n:1)";
