//! One-stop prelude for application code.
//!
//! Use `use robin_etl::prelude::*` to get the most common types and expression builders.

pub use crate::aggregate::{AggFunc, Aggregation, GroupedTable};
pub use crate::io::{CollectSink, JsonLinesSink, JsonRowsSource, TableSink, TableSource};
pub use crate::pipeline::{Pipeline, Stage};
pub use crate::session::{Session, SessionBuilder};
pub use crate::table::{Record, Table};
pub use crate::transform::{BucketRule, Threshold};
pub use robin_etl_core::expr::{
    add, and_, between, call, col, div, eq, ge, gt, is_not_null, is_null, le, lit_bool, lit_f64,
    lit_i64, lit_null, lit_str, lt, mul, ne, not_, or_, sub, when,
};
pub use robin_etl_core::{
    CompareOp, DataType, EngineError, ExprIr, PipelineConfig, StructField, StructType, Value,
};
