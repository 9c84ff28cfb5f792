//! Annotated CSV decoding
//!
//! Flux query responses come back as annotated CSV: one or more blocks, each
//! opened by `#datatype`, `#group` and `#default` annotation rows, followed by a
//! header row and data rows. The first column of every row is the annotation
//! column and carries no data.

use super::error::{BackendError, BackendResult};
use super::{FluxRecord, FluxTable, Value};
use chrono::DateTime;

/// Column metadata for the block currently being read
#[derive(Debug, Default)]
struct Block {
    datatypes: Vec<String>,
    defaults: Vec<String>,
    labels: Vec<String>,
}

impl Block {
    fn is_error_block(&self) -> bool {
        self.labels.len() >= 2 && self.labels[0] == "error" && self.labels[1] == "reference"
    }
}

/// Decode an annotated CSV body into result tables.
///
/// Records are split into tables on every new block and every change of the
/// `table` column.
pub fn parse_annotated_csv(body: &str) -> BackendResult<Vec<FluxTable>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut tables: Vec<FluxTable> = Vec::new();
    let mut block = Block::default();
    let mut expect_header = true;
    let mut current_table_id: Option<String> = None;

    for row in reader.records() {
        let row = row?;
        let first = row.get(0).unwrap_or_default();

        if first.starts_with('#') {
            if !expect_header {
                block = Block::default();
                expect_header = true;
            }
            let rest: Vec<String> = row.iter().skip(1).map(str::to_string).collect();
            match first {
                "#datatype" => block.datatypes = rest,
                "#default" => block.defaults = rest,
                _ => {}
            }
            continue;
        }

        if row.iter().all(str::is_empty) {
            continue;
        }

        if expect_header {
            block.labels = row.iter().skip(1).map(str::to_string).collect();
            expect_header = false;
            current_table_id = None;
            tables.push(FluxTable::default());
            continue;
        }

        let cells: Vec<&str> = row.iter().skip(1).collect();

        if block.is_error_block() {
            let message = cells.first().copied().unwrap_or_default();
            return Err(BackendError::Query(message.to_string()));
        }

        let mut record = FluxRecord::new();
        for (idx, label) in block.labels.iter().enumerate() {
            let raw = cells.get(idx).copied().unwrap_or_default();
            let raw = if raw.is_empty() {
                block.defaults.get(idx).map(String::as_str).unwrap_or_default()
            } else {
                raw
            };
            let datatype = block.datatypes.get(idx).map(String::as_str).unwrap_or("string");
            let value = decode_cell(label, datatype, raw)?;
            record.values.push((label.clone(), value));
        }

        let table_id = record.get("table").map(|v| v.to_string());
        if current_table_id.is_some() && table_id != current_table_id {
            tables.push(FluxTable::default());
        }
        current_table_id = table_id;

        if let Some(table) = tables.last_mut() {
            table.records.push(record);
        }
    }

    tables.retain(|t| !t.records.is_empty());
    Ok(tables)
}

fn decode_cell(label: &str, datatype: &str, raw: &str) -> BackendResult<Option<Value>> {
    if raw.is_empty() {
        return Ok(None);
    }

    let bad = |e: &dyn std::fmt::Display| {
        BackendError::Decode(format!("column {} ({}): {:?}: {}", label, datatype, raw, e))
    };

    let value = match datatype {
        "long" => Value::Long(raw.parse().map_err(|e| bad(&e))?),
        "unsignedLong" => Value::UnsignedLong(raw.parse().map_err(|e| bad(&e))?),
        "double" => Value::Double(raw.parse().map_err(|e| bad(&e))?),
        "boolean" => match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(bad(&"expected true or false")),
        },
        dt if dt.starts_with("dateTime") => {
            Value::Time(DateTime::parse_from_rfc3339(raw).map_err(|e| bad(&e))?)
        }
        _ => Value::String(raw.to_string()),
    };

    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_TABLES: &str = "\
#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,double,string,string,string
#group,false,false,true,true,false,false,true,true,true
#default,_result,,,,,,,,
,result,table,_start,_stop,_time,_value,_field,_measurement,host
,,0,2024-01-01T00:00:00Z,2024-01-02T00:00:00Z,2024-01-01T10:00:00Z,21.5,temp,cpu,h1
,,0,2024-01-01T00:00:00Z,2024-01-02T00:00:00Z,2024-01-01T11:00:00Z,22,temp,cpu,h1
,,1,2024-01-01T00:00:00Z,2024-01-02T00:00:00Z,2024-01-01T10:00:00Z,19.25,temp,cpu,h2

";

    #[test]
    fn test_parse_tables_and_types() {
        let tables = parse_annotated_csv(TWO_TABLES).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].records.len(), 2);
        assert_eq!(tables[1].records.len(), 1);

        let first = &tables[0].records[0];
        assert_eq!(first.get("result"), Some(&Value::String("_result".into())));
        assert_eq!(first.get("table"), Some(&Value::Long(0)));
        assert_eq!(first.value(), Some(&Value::Double(21.5)));
        assert_eq!(first.get("host"), Some(&Value::String("h1".into())));
        assert!(matches!(first.get("_time"), Some(Value::Time(_))));

        let labels: Vec<&str> = first.values.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(
            labels,
            vec!["result", "table", "_start", "_stop", "_time", "_value", "_field", "_measurement", "host"]
        );
    }

    #[test]
    fn test_multiple_blocks_with_different_columns() {
        let body = "\
#datatype,string,long,string
#group,false,false,false
#default,_result,,
,result,table,_value
,,0,cpu
,,0,mem

#datatype,string,long,string,boolean
#group,false,false,false,false
#default,_result,,,
,result,table,_field,ok
,,1,usage,true
";
        let tables = parse_annotated_csv(body).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].records[1].value(), Some(&Value::String("mem".into())));
        assert_eq!(tables[1].records[0].get("ok"), Some(&Value::Bool(true)));
        assert_eq!(tables[1].records[0].get("_value"), None);
    }

    #[test]
    fn test_empty_cell_without_default_is_null() {
        let body = "\
#datatype,string,long,double
#group,false,false,false
#default,_result,,
,result,table,_value
,,0,
";
        let tables = parse_annotated_csv(body).unwrap();
        let record = &tables[0].records[0];
        assert_eq!(record.values[2], ("_value".to_string(), None));
    }

    #[test]
    fn test_error_block() {
        let body = "\
#datatype,string,string
#group,true,true
#default,,
,error,reference
,\"failed to initialize execute state: could not find bucket \"\"nope\"\"\",897
";
        let err = parse_annotated_csv(body).unwrap_err();
        match err {
            BackendError::Query(msg) => assert!(msg.contains("could not find bucket \"nope\"")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_bad_number_is_decode_error() {
        let body = "\
#datatype,string,long,long
#group,false,false,false
#default,_result,,
,result,table,_value
,,0,abc
";
        assert!(matches!(
            parse_annotated_csv(body),
            Err(BackendError::Decode(_))
        ));
    }

    #[test]
    fn test_empty_body() {
        assert!(parse_annotated_csv("").unwrap().is_empty());
        assert!(parse_annotated_csv("\r\n").unwrap().is_empty());
    }
}
