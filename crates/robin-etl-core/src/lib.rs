//! robin-etl core: shared types, config, and error (no execution engine).

pub mod config;
pub mod error;
pub mod expr;
pub mod schema;
pub mod value;

pub use config::PipelineConfig;
pub use error::EngineError;
pub use expr::{CompareOp, ExprIr, LiteralValue};
pub use schema::{DataType, StructField, StructType};
pub use value::{CollectedRows, Value};
