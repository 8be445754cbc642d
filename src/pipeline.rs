//! Declarative pipelines: an ordered list of [`Stage`]s validated against a schema as a
//! whole before any record is read.
//!
//! Stages serialize as `{"op": "...", "payload": {...}}`:
//!
//! ```
//! use robin_etl::pipeline::Pipeline;
//!
//! let json = r#"[
//!     {"op": "filter", "payload": {"predicate": {"Gt": [{"Column": "price"}, {"Lit": {"I64": 10}}]}}},
//!     {"op": "limit", "payload": {"n": 5}}
//! ]"#;
//! let pipeline = Pipeline::from_json(json).unwrap();
//! assert_eq!(pipeline.stages().len(), 2);
//! ```

use robin_etl_core::{EngineError, ExprIr, StructType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aggregate::{Aggregation, PreparedAggregate};
use crate::table::Table;
use crate::transform::{
    BucketRule, PreparedColumn, PreparedFilter, PreparedOrderBy, PreparedSelect,
    prepare_categorize,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "payload", rename_all = "snake_case")]
pub enum Stage {
    Filter {
        predicate: ExprIr,
    },
    WithColumn {
        name: String,
        expr: ExprIr,
    },
    Categorize {
        source: String,
        output: String,
        rules: Vec<BucketRule>,
        default_label: String,
    },
    GroupBy {
        columns: Vec<String>,
        aggregations: Vec<Aggregation>,
    },
    Select {
        columns: Vec<String>,
    },
    OrderBy {
        columns: Vec<String>,
        #[serde(default)]
        ascending: Vec<bool>,
    },
    Limit {
        n: usize,
    },
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Filter { .. } => "filter",
            Stage::WithColumn { .. } => "with_column",
            Stage::Categorize { .. } => "categorize",
            Stage::GroupBy { .. } => "group_by",
            Stage::Select { .. } => "select",
            Stage::OrderBy { .. } => "order_by",
            Stage::Limit { .. } => "limit",
        }
    }
}

enum PreparedStage {
    Filter(PreparedFilter),
    Column(PreparedColumn),
    Aggregate(PreparedAggregate),
    Select(PreparedSelect),
    OrderBy(PreparedOrderBy),
    Limit(usize),
}

impl PreparedStage {
    fn execute(&self, table: &Table) -> Table {
        match self {
            PreparedStage::Filter(s) => s.execute(table),
            PreparedStage::Column(s) => s.execute(table),
            PreparedStage::Aggregate(s) => s.execute(table),
            PreparedStage::Select(s) => s.execute(table),
            PreparedStage::OrderBy(s) => s.execute(table),
            PreparedStage::Limit(n) => crate::transform::limit(table, *n),
        }
    }
}

/// An ordered list of stages. Build with the chaining methods or deserialize from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_stages(stages: Vec<Stage>) -> Self {
        Pipeline { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn push(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn filter(self, predicate: ExprIr) -> Self {
        self.push(Stage::Filter { predicate })
    }

    pub fn with_column(self, name: &str, expr: ExprIr) -> Self {
        self.push(Stage::WithColumn {
            name: name.to_string(),
            expr,
        })
    }

    pub fn categorize(
        self,
        source: &str,
        output: &str,
        rules: Vec<BucketRule>,
        default_label: &str,
    ) -> Self {
        self.push(Stage::Categorize {
            source: source.to_string(),
            output: output.to_string(),
            rules,
            default_label: default_label.to_string(),
        })
    }

    pub fn group_by(self, columns: &[&str], aggregations: Vec<Aggregation>) -> Self {
        self.push(Stage::GroupBy {
            columns: to_strings(columns),
            aggregations,
        })
    }

    pub fn select(self, columns: &[&str]) -> Self {
        self.push(Stage::Select {
            columns: to_strings(columns),
        })
    }

    pub fn order_by(self, columns: &[&str], ascending: Vec<bool>) -> Self {
        self.push(Stage::OrderBy {
            columns: to_strings(columns),
            ascending,
        })
    }

    pub fn limit(self, n: usize) -> Self {
        self.push(Stage::Limit { n })
    }

    pub fn from_json(s: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(self)?)
    }

    fn prepare(
        &self,
        schema: &StructType,
        case_sensitive: bool,
    ) -> Result<(Vec<PreparedStage>, StructType), EngineError> {
        let mut current = schema.clone();
        let mut prepared = Vec::with_capacity(self.stages.len());
        for (i, stage) in self.stages.iter().enumerate() {
            let step = prepare_stage(stage, &current, case_sensitive).inspect_err(|e| {
                debug!("pipeline stage {i} ({}) rejected: {e}", stage.name());
            })?;
            match &step {
                PreparedStage::Column(s) => current = s.output_schema().clone(),
                PreparedStage::Aggregate(s) => current = s.output_schema().clone(),
                PreparedStage::Select(s) => current = s.output_schema().clone(),
                PreparedStage::Filter(_) | PreparedStage::OrderBy(_) | PreparedStage::Limit(_) => {}
            }
            prepared.push(step);
        }
        Ok((prepared, current))
    }

    /// Check every stage against `schema` in order and return the final output schema.
    /// No data is touched.
    pub fn validate(&self, schema: &StructType, case_sensitive: bool) -> Result<StructType, EngineError> {
        self.prepare(schema, case_sensitive).map(|(_, out)| out)
    }

    /// Validate the whole pipeline against `table`'s schema, then apply each stage.
    pub fn run(&self, table: &Table) -> Result<Table, EngineError> {
        let (stages, _) = self.prepare(&table.schema, table.ctx.case_sensitive)?;
        info!(
            "running pipeline: {} stages over {} rows",
            stages.len(),
            table.count()
        );
        let mut current = table.clone();
        for (stage, declared) in stages.iter().zip(&self.stages) {
            current = stage.execute(&current);
            debug!("{} -> {} rows", declared.name(), current.count());
        }
        Ok(current)
    }
}

fn prepare_stage(
    stage: &Stage,
    schema: &StructType,
    case_sensitive: bool,
) -> Result<PreparedStage, EngineError> {
    let step = match stage {
        Stage::Filter { predicate } => {
            PreparedStage::Filter(PreparedFilter::prepare(schema, predicate, case_sensitive)?)
        }
        Stage::WithColumn { name, expr } => {
            PreparedStage::Column(PreparedColumn::prepare(schema, name, expr, case_sensitive)?)
        }
        Stage::Categorize {
            source,
            output,
            rules,
            default_label,
        } => PreparedStage::Column(prepare_categorize(
            schema,
            source,
            output,
            rules,
            default_label,
            case_sensitive,
        )?),
        Stage::GroupBy {
            columns,
            aggregations,
        } => PreparedStage::Aggregate(PreparedAggregate::prepare(
            schema,
            columns,
            aggregations,
            case_sensitive,
        )?),
        Stage::Select { columns } => {
            PreparedStage::Select(PreparedSelect::prepare(schema, columns, case_sensitive)?)
        }
        Stage::OrderBy { columns, ascending } => PreparedStage::OrderBy(
            PreparedOrderBy::prepare(schema, columns, ascending, case_sensitive)?,
        ),
        Stage::Limit { n } => PreparedStage::Limit(*n),
    };
    Ok(step)
}

fn to_strings(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use robin_etl_core::expr::{col, gt, lit_i64, mul};
    use robin_etl_core::{DataType, StructField, Value};
    use serde_json::json;

    fn prices() -> Table {
        let rows = [40, 60, 70, 5, 90]
            .iter()
            .map(|p| vec![json!(p)])
            .collect();
        Table::from_json_rows(rows, vec![("price".into(), "bigint".into())]).unwrap()
    }

    fn price_pipeline() -> Pipeline {
        Pipeline::new()
            .filter(gt(col("price"), lit_i64(10)))
            .categorize(
                "price",
                "category",
                vec![BucketRule::gt(50.0, "High"), BucketRule::gt(10.0, "Medium")],
                "Low",
            )
            .group_by(&["category"], vec![Aggregation::count_all()])
    }

    #[test]
    fn runs_filter_categorize_group_by() {
        let out = price_pipeline().run(&prices()).unwrap();
        assert_eq!(out.columns(), vec!["category", "count"]);
        assert_eq!(
            out.column("category").unwrap(),
            vec![Value::from("Medium"), Value::from("High")]
        );
        assert_eq!(
            out.column("count").unwrap(),
            vec![Value::Integer(1), Value::Integer(3)]
        );
    }

    #[test]
    fn validate_propagates_schema() {
        let schema = StructType::new(vec![StructField::new("price", DataType::Integer, true)]);
        let out = price_pipeline().validate(&schema, false).unwrap();
        assert_eq!(out.names(), vec!["category", "count"]);
        assert!(!out.fields()[1].nullable);
    }

    #[test]
    fn later_stage_errors_surface_before_execution() {
        let pipeline = Pipeline::new()
            .with_column("doubled", mul(col("price"), lit_i64(2)))
            .select(&["price"])
            .filter(gt(col("doubled"), lit_i64(0)));
        let err = pipeline.run(&prices()).unwrap_err();
        assert!(matches!(err, EngineError::Schema(_)));
    }

    #[test]
    fn json_round_trip() {
        let pipeline = price_pipeline().order_by(&["count"], vec![false]).limit(1);
        let text = pipeline.to_json().unwrap();
        assert!(text.contains(r#""op":"categorize""#));
        let back = Pipeline::from_json(&text).unwrap();
        assert_eq!(back, pipeline);
        let out = back.run(&prices()).unwrap();
        assert_eq!(out.value(0, "category").unwrap(), &Value::from("High"));
    }

    #[test]
    fn empty_pipeline_is_identity() {
        let table = prices();
        let out = Pipeline::new().run(&table).unwrap();
        assert_eq!(out.rows(), table.rows());
    }
}
