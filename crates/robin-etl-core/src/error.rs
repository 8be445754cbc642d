//! Engine error type shared by every stage.
//!
//! All variants except `Json` and `Io` are raised while binding expressions or
//! validating a pipeline against a schema, before any record is scanned.

use thiserror::Error;

/// Unified error type for robin-etl operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing column, colliding column name, or a row that does not fit its schema.
    #[error("schema error: {0}")]
    Schema(String),
    /// `group_by` was called without any grouping column.
    #[error("group_by requires at least one grouping column")]
    EmptyGroupKey,
    /// Operand or aggregate applied to a value of the wrong type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    /// Unknown function name or dtype string.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Malformed JSON plan step.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Column lookup failure, listing what is available.
    pub fn column_not_found(name: &str, available: &[&str]) -> Self {
        EngineError::Schema(format!(
            "Column '{}' not found. Available columns: [{}]. Check spelling and case sensitivity (etl.caseSensitive).",
            name,
            available.join(", ")
        ))
    }

    pub fn duplicate_column(name: &str) -> Self {
        EngineError::Schema(format!("column '{name}' already exists"))
    }

    /// True for the errors a pipeline reports before touching data.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            EngineError::Schema(_)
                | EngineError::EmptyGroupKey
                | EngineError::TypeMismatch(_)
                | EngineError::Unsupported(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_not_found_lists_available_columns() {
        let err = EngineError::column_not_found("prcie", &["price", "category"]);
        let msg = err.to_string();
        assert!(msg.starts_with("schema error: Column 'prcie' not found"));
        assert!(msg.contains("[price, category]"));
        assert!(err.is_validation_error());
    }

    #[test]
    fn io_and_json_errors_convert() {
        let io: EngineError = std::io::Error::other("disk gone").into();
        assert!(matches!(io, EngineError::Io(_)));
        assert!(!io.is_validation_error());

        let json: EngineError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(json.to_string().starts_with("json error:"));
    }

    #[test]
    fn empty_group_key_message() {
        assert_eq!(
            EngineError::EmptyGroupKey.to_string(),
            "group_by requires at least one grouping column"
        );
    }
}
