//! Benchmarks for query synthesis and result tabulation
//!
//! Run with: cargo bench

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use flux_explorer::client::parse_annotated_csv;
use flux_explorer::flux::{build_query, PreviewTable, ResolvedRange};
use flux_explorer::schema::{FilterModel, FilterSet};
use flux_explorer::{FluxRecord, FluxTable};

fn create_model(tags: usize, values: usize) -> FilterModel {
    let mut sets = vec![
        FilterSet::new("_measurement", ["cpu", "mem", "disk"]),
        FilterSet::new("_field", ["usage_idle", "usage_user", "free"]),
    ];
    for t in 0..tags {
        sets.push(FilterSet::new(
            format!("tag{}", t),
            (0..values).map(|v| format!("value-\"{}\"\\{}", t, v)),
        ));
    }

    let mut model = FilterModel::new();
    model.install(sets, None);
    model.select("_measurement", "cpu", true);
    model.select("_field", "usage_idle", true);
    for t in 0..tags {
        for v in (0..values).step_by(2) {
            model.select(&format!("tag{}", t), &format!("value-\"{}\"\\{}", t, v), true);
        }
    }
    model
}

fn create_tables(count: usize) -> Vec<FluxTable> {
    (0..count / 100)
        .map(|t| FluxTable {
            records: (0..100)
                .map(|i| {
                    let record = FluxRecord::new()
                        .with("result", "_result")
                        .with("table", t as i64)
                        .with("_field", "usage_idle")
                        .with("_value", i as f64);
                    if i % 3 == 0 {
                        record.with(&format!("host{}", i % 7), "web-1")
                    } else {
                        record.with("region", "eu")
                    }
                })
                .collect(),
        })
        .collect()
}

fn create_csv(rows: usize) -> String {
    let mut body = String::from(
        "#datatype,string,long,dateTime:RFC3339,double,string,string\n\
         #group,false,false,false,false,true,true\n\
         #default,_result,,,,,\n\
         ,result,table,_time,_value,_field,host\n",
    );
    for i in 0..rows {
        body.push_str(&format!(
            ",,{},2024-01-01T00:00:{:02}Z,{}.5,usage_idle,web-{}\n",
            i / 50,
            i % 60,
            i,
            i % 4
        ));
    }
    body
}

fn bench_query_synthesis(c: &mut Criterion) {
    let mut group = c.benchmark_group("synthesis");
    let range = ResolvedRange::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
    );

    for (tags, values) in [(2, 10), (6, 100)] {
        let model = create_model(tags, values);
        group.bench_function(format!("build_query_{}x{}", tags, values), |b| {
            b.iter(|| build_query(black_box("telemetry"), black_box(model.sets()), &range))
        });
    }

    group.finish();
}

fn bench_tabulation(c: &mut Criterion) {
    let mut group = c.benchmark_group("tabulation");

    for size in [1000, 10000] {
        let tables = create_tables(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("from_tables_{}", size), |b| {
            b.iter(|| PreviewTable::from_tables(black_box(&tables)))
        });

        let body = create_csv(size);
        group.bench_function(format!("parse_annotated_csv_{}", size), |b| {
            b.iter(|| parse_annotated_csv(black_box(&body)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_query_synthesis, bench_tabulation);
criterion_main!(benches);
