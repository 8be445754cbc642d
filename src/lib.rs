//! Robin ETL - a small tabular pipeline library with a PySpark-like API.
//!
//! Records flow through `filter -> with_column -> categorize -> group_by(..).agg(..)`
//! on an in-memory row engine. Expressions are bound against the schema before any record
//! is read, so a bad column name or type fails the whole pipeline up front.
//!
//! ```
//! use robin_etl::prelude::*;
//! use serde_json::json;
//!
//! let session = Session::builder().app_name("prices").get_or_create();
//! let table = session
//!     .create_table_from_rows(
//!         [40, 60, 70, 5, 90].iter().map(|p| vec![json!(p)]).collect(),
//!         vec![("price".into(), "bigint".into())],
//!     )
//!     .unwrap();
//! let out = table
//!     .filter(&gt(col("price"), lit_i64(10)))
//!     .unwrap()
//!     .categorize(
//!         "price",
//!         "category",
//!         &[BucketRule::gt(50.0, "High"), BucketRule::gt(10.0, "Medium")],
//!         "Low",
//!     )
//!     .unwrap()
//!     .group_by(vec!["category"])
//!     .unwrap()
//!     .count()
//!     .unwrap();
//! assert_eq!(out.count(), 2);
//! ```

pub mod aggregate;
mod eval;
mod exec;
pub mod io;
pub mod pipeline;
pub mod plan;
pub mod prelude;
pub mod session;
pub mod table;
pub mod transform;

pub use aggregate::{AggFunc, Aggregation, GroupedTable, group_aggregate};
pub use io::{CollectSink, JsonLinesSink, JsonLinesSource, JsonRowsSource, TableSink, TableSource};
pub use pipeline::{Pipeline, Stage};
pub use plan::{execute_plan, expr_from_value, pipeline_from_plan};
pub use robin_etl_core::config::PipelineConfig;
pub use robin_etl_core::expr;
pub use robin_etl_core::{
    CollectedRows, CompareOp, DataType, EngineError, ExprIr, LiteralValue, StructField,
    StructType, Value,
};
pub use session::{Session, SessionBuilder};
pub use table::{Record, Table};
pub use transform::{BucketRule, Threshold};
