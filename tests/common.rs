//! Shared helpers for integration tests (Session and Table setup).

#![allow(dead_code)]

use robin_etl::{PipelineConfig, Session, Table};
use serde_json::json;

/// Create a Session with a descriptive app name for tests.
pub fn session() -> Session {
    Session::builder()
        .app_name("robin_etl_tests")
        .get_or_create()
}

/// A session that runs per-record work on rayon from `threshold` rows.
pub fn parallel_session(threshold: usize) -> Session {
    Session::from_config(&PipelineConfig {
        parallel_threshold: Some(threshold),
        threads: Some(4),
        ..PipelineConfig::default()
    })
}

/// Single bigint column `price`.
pub fn prices(session: &Session, prices: &[i64]) -> Table {
    session
        .create_table_from_rows(
            prices.iter().map(|p| vec![json!(p)]).collect(),
            vec![("price".into(), "bigint".into())],
        )
        .unwrap()
}

/// (region, product, amount, price) sales fixture with a null amount.
pub fn sales(session: &Session) -> Table {
    let rows = vec![
        vec![json!("east"), json!("pen"), json!(3), json!(1.5)],
        vec![json!("west"), json!("ink"), json!(1), json!(12.0)],
        vec![json!("east"), json!("ink"), json!(2), json!(11.0)],
        vec![json!("north"), json!("pad"), json!(null), json!(4.25)],
        vec![json!("west"), json!("pen"), json!(5), json!(1.75)],
        vec![json!("east"), json!("pad"), json!(7), json!(3.5)],
    ];
    session
        .create_table_from_rows(
            rows,
            vec![
                ("region".into(), "string".into()),
                ("product".into(), "string".into()),
                ("amount".into(), "bigint".into()),
                ("price".into(), "double".into()),
            ],
        )
        .unwrap()
}
