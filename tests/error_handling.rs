//! Tests for error handling behavior.
//!
//! Every failure is reported before any record is processed and carries the
//! matching `EngineError` variant.

mod common;

use common::{prices, sales, session};
use robin_etl::prelude::*;

fn test_table() -> Table {
    sales(&session())
}

#[test]
fn test_column_not_found_error() {
    let result = test_table().filter(&gt(col("cost"), lit_i64(1)));
    match result {
        Err(EngineError::Schema(msg)) => {
            assert!(msg.contains("cost"));
            assert!(msg.contains("Available columns"));
        }
        other => panic!("Expected Schema error, got: {other:?}"),
    }
}

#[test]
fn test_duplicate_derived_column() {
    let err = test_table()
        .with_column("price", &lit_i64(0))
        .unwrap_err();
    assert!(matches!(err, EngineError::Schema(_)));
    assert!(err.is_validation_error());
}

#[test]
fn test_empty_group_key() {
    let err = test_table().group_by(vec![]).unwrap_err();
    assert!(matches!(err, EngineError::EmptyGroupKey));
}

#[test]
fn test_numeric_aggregate_over_string() {
    let err = test_table()
        .group_aggregate(vec!["region"], &[Aggregation::mean("product")])
        .unwrap_err();
    assert!(matches!(err, EngineError::TypeMismatch(_)));
}

#[test]
fn test_duplicate_output_names() {
    let err = test_table()
        .group_aggregate(
            vec!["region"],
            &[Aggregation::sum("amount"), Aggregation::sum("amount")],
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Schema(_)));
}

#[test]
fn test_type_errors_in_expressions() {
    let table = test_table();
    assert!(matches!(
        table.filter(&add(col("price"), lit_i64(1))),
        Err(EngineError::TypeMismatch(_))
    ));
    assert!(matches!(
        table.with_column("bad", &add(col("region"), lit_i64(1))),
        Err(EngineError::TypeMismatch(_))
    ));
    assert!(matches!(
        table.categorize("region", "bucket", &[BucketRule::gt(1.0, "x")], "y"),
        Err(EngineError::TypeMismatch(_))
    ));
}

#[test]
fn test_unknown_function_is_unsupported() {
    let err = test_table()
        .with_column("x", &call("soundex", vec![col("region")]))
        .unwrap_err();
    assert!(matches!(err, EngineError::Unsupported(_)));
}

#[test]
fn test_case_sensitivity_setting() {
    let insensitive = prices(&session(), &[1, 2]);
    assert!(insensitive.filter(&gt(col("PRICE"), lit_i64(1))).is_ok());

    let strict = Session::builder()
        .config("etl.caseSensitive", "true")
        .get_or_create();
    let table = prices(&strict, &[1, 2]);
    assert!(matches!(
        table.filter(&gt(col("PRICE"), lit_i64(1))),
        Err(EngineError::Schema(_))
    ));
}

#[test]
fn test_bad_rows_rejected_at_creation() {
    let session = session();
    let err = session
        .create_table_from_rows(
            vec![vec![serde_json::json!("abc")]],
            vec![("price".into(), "bigint".into())],
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::TypeMismatch(_)));

    let err = session
        .create_table_from_rows(
            vec![vec![serde_json::json!(1)]],
            vec![("price".into(), "decimal(10,2)".into())],
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Unsupported(_)));
}

#[test]
fn test_column_names_differing_only_in_case() {
    let schema = vec![
        ("a".to_string(), "bigint".to_string()),
        ("A".to_string(), "string".to_string()),
    ];
    let rows = vec![vec![serde_json::json!(1), serde_json::json!("x")]];

    let err = session()
        .create_table_from_rows(rows.clone(), schema.clone())
        .unwrap_err();
    assert!(matches!(err, EngineError::Schema(_)));

    let strict = Session::builder()
        .config("etl.caseSensitive", "true")
        .get_or_create();
    let table = strict.create_table_from_rows(rows, schema).unwrap();
    assert_eq!(table.columns(), vec!["a", "A"]);
}
