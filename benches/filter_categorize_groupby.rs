//! Benchmarks: filter -> categorize -> groupBy+agg, sequential vs rayon-parallel sessions.
//! Run with: cargo bench

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use robin_etl::prelude::*;
use robin_etl::Table;
use serde_json::json;

fn sample_table(session: &Session, n: usize) -> Table {
    let rows = (0..n)
        .map(|i| {
            vec![
                json!(i as i64),
                json!(((i * 37) % 120) as f64 + 0.5),
                json!(format!("store_{}", i % 25)),
            ]
        })
        .collect();
    session
        .create_table_from_rows(
            rows,
            vec![
                ("id".into(), "bigint".into()),
                ("price".into(), "double".into()),
                ("store".into(), "string".into()),
            ],
        )
        .expect("create table")
}

fn pipeline() -> Pipeline {
    Pipeline::new()
        .filter(gt(col("price"), lit_f64(10.0)))
        .categorize(
            "price",
            "category",
            vec![BucketRule::gt(50.0, "High"), BucketRule::gt(10.0, "Medium")],
            "Low",
        )
        .group_by(
            &["store", "category"],
            vec![
                Aggregation::count_all(),
                Aggregation::mean("price"),
                Aggregation::stddev("price"),
            ],
        )
}

fn bench_pipeline(c: &mut Criterion, label: &str, session: &Session, n: usize) {
    let table = sample_table(session, n);
    let pipeline = pipeline();
    c.bench_function(&format!("{label}_filter_categorize_groupby_{n}"), |b| {
        b.iter(|| black_box(pipeline.run(black_box(&table)).expect("run")))
    });
}

fn bench_filter_categorize_groupby(c: &mut Criterion) {
    let sequential = Session::builder().app_name("bench").get_or_create();
    let parallel = Session::from_config(&PipelineConfig {
        parallel_threshold: Some(4_096),
        ..PipelineConfig::default()
    });
    for n in [10_000, 100_000] {
        bench_pipeline(c, "sequential", &sequential, n);
        bench_pipeline(c, "parallel", &parallel, n);
    }
}

criterion_group!(benches, bench_filter_categorize_groupby);
criterion_main!(benches);
