//! Demo: price rows -> filter -> categorize -> groupBy+count, printed as JSON lines.
//! Run with: cargo run --example etl_demo -- --verbose

use anyhow::Result;
use robin_etl::prelude::*;
use robin_etl::{JsonLinesSink, PipelineConfig};
use serde_json::json;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

/// `--verbose` shows per-stage debug logs, `--quiet` only errors.
fn log_level() -> Level {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--quiet" || a == "-q") {
        Level::ERROR
    } else if args.iter().any(|a| a == "--verbose" || a == "-v") {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

fn init_logging() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level())
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;

    let session = Session::builder()
        .app_name("etl_demo")
        .with_config(&PipelineConfig::from_env())
        .get_or_create();

    let source = JsonRowsSource::new(
        [40, 60, 70, 5, 90]
            .iter()
            .map(|p| vec![json!(p)])
            .collect(),
        vec![("price".into(), "bigint".into())],
    );

    let pipeline = Pipeline::new()
        .filter(gt(col("price"), lit_i64(10)))
        .categorize(
            "price",
            "category",
            vec![BucketRule::gt(50.0, "High"), BucketRule::gt(10.0, "Medium")],
            "Low",
        )
        .group_by(
            &["category"],
            vec![Aggregation::count_all(), Aggregation::avg("price")],
        );
    info!("plan: {}", pipeline.to_json()?);

    let mut sink = JsonLinesSink::new(std::io::stdout().lock());
    session.run_pipeline(&source, &pipeline, &mut sink)?;
    info!("{} groups written", sink.rows_written());
    Ok(())
}
