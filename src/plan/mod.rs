//! Plan interpreter: execute a serialized logical plan (list of ops) as a [`Pipeline`].
//!
//! A plan is a JSON array of `{"op": "...", "payload": ...}` steps:
//!
//! | op | payload |
//! |----|---------|
//! | `filter` | expression |
//! | `withColumn` | `{"name", "expr"}` |
//! | `categorize` | `{"source", "output", "rules": [{"op", "value", "label"}], "default"}` |
//! | `groupBy` | `{"group_by": [..], "aggs": [{"agg", "column", "alias"?}]}` |
//! | `select` | `[column, ..]` or `{"columns": [..]}` |
//! | `orderBy` | `{"columns": [..], "ascending": [..]?}` |
//! | `limit` | `{"n"}` |
//!
//! Expressions use the format of [`expr_from_value`]. The whole plan is translated and
//! validated against the input schema before any row is processed.

mod expr;

pub use expr::expr_from_value;

use robin_etl_core::{CompareOp, EngineError};
use serde_json::{Map, Value};
use tracing::debug;

use crate::aggregate::{AggFunc, Aggregation};
use crate::pipeline::{Pipeline, Stage};
use crate::session::Session;
use crate::table::Table;
use crate::transform::{BucketRule, Threshold};

/// Execute a logical plan: build the initial table from `(data, schema)`, then apply each op.
///
/// - `data`: rows as `Vec<Vec<Value>>` (each inner vec is one row; order matches schema).
/// - `schema`: list of `(column_name, dtype_string)` e.g. `[("id", "bigint"), ("name", "string")]`.
/// - `plan`: list of `{"op": "...", "payload": ...}` objects.
pub fn execute_plan(
    session: &Session,
    data: Vec<Vec<Value>>,
    schema: Vec<(String, String)>,
    plan: &[Value],
) -> Result<Table, EngineError> {
    let pipeline = pipeline_from_plan(plan)?;
    let table = session.create_table_from_rows(data, schema)?;
    pipeline.run(&table)
}

/// Translate plan steps into a [`Pipeline`] without touching data.
pub fn pipeline_from_plan(plan: &[Value]) -> Result<Pipeline, EngineError> {
    let mut stages = Vec::with_capacity(plan.len());
    for (i, op_value) in plan.iter().enumerate() {
        let op_obj = op_value
            .as_object()
            .ok_or_else(|| invalid("each plan step must be a JSON object"))?;
        let op_name = op_obj
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("each plan step must have 'op' string"))?;
        let payload = op_obj.get("payload").unwrap_or(&Value::Null);
        debug!("plan step {i}: {op_name}");
        stages.push(stage_from_op(op_name, payload)?);
    }
    Ok(Pipeline::from_stages(stages))
}

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidPlan(msg.into())
}

fn stage_from_op(op_name: &str, payload: &Value) -> Result<Stage, EngineError> {
    let stage = match op_name {
        "filter" => Stage::Filter {
            predicate: expr_from_value(payload)?,
        },
        "withColumn" | "with_column" => {
            let obj = object(payload, op_name)?;
            let name = str_field(obj, "name", "withColumn must have 'name'")?;
            let expr_val = obj
                .get("expr")
                .ok_or_else(|| invalid("withColumn must have 'expr'"))?;
            Stage::WithColumn {
                name,
                expr: expr_from_value(expr_val)?,
            }
        }
        "categorize" => categorize_stage(object(payload, op_name)?)?,
        "groupBy" | "group_by" => {
            let obj = object(payload, op_name)?;
            let columns = string_array(obj.get("group_by"), "groupBy must have 'group_by' array")?;
            let aggs = obj.get("aggs").and_then(Value::as_array).ok_or_else(|| {
                invalid(
                    "groupBy payload must include 'aggs' array (e.g. [{\"agg\": \"sum\", \"column\": \"b\"}])",
                )
            })?;
            Stage::GroupBy {
                columns,
                aggregations: parse_aggs(aggs)?,
            }
        }
        "select" => {
            let columns = match payload {
                Value::Object(obj) => obj.get("columns"),
                other => Some(other),
            };
            let columns = string_array(columns, "select payload must be a list of column names")?;
            if columns.is_empty() {
                return Err(invalid("select payload must be non-empty array"));
            }
            Stage::Select { columns }
        }
        "orderBy" | "order_by" => {
            let obj = object(payload, op_name)?;
            let columns =
                string_array(obj.get("columns"), "orderBy payload must have 'columns' array")?;
            let ascending = match obj.get("ascending") {
                None | Some(Value::Null) => Vec::new(),
                Some(v) => v
                    .as_array()
                    .ok_or_else(|| invalid("orderBy 'ascending' must be an array of booleans"))?
                    .iter()
                    .map(|b| {
                        b.as_bool().ok_or_else(|| {
                            invalid(format!("orderBy 'ascending' entries must be booleans, got {b}"))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            };
            Stage::OrderBy { columns, ascending }
        }
        "limit" => {
            let n = payload
                .get("n")
                .and_then(Value::as_u64)
                .ok_or_else(|| invalid("limit payload must have 'n' number"))?;
            Stage::Limit { n: n as usize }
        }
        other => return Err(EngineError::Unsupported(format!("plan op '{other}'"))),
    };
    Ok(stage)
}

fn object<'a>(payload: &'a Value, op_name: &str) -> Result<&'a Map<String, Value>, EngineError> {
    payload
        .as_object()
        .ok_or_else(|| invalid(format!("{op_name} payload must be an object")))
}

fn str_field(obj: &Map<String, Value>, key: &str, msg: &str) -> Result<String, EngineError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| invalid(msg))
}

fn string_array(v: Option<&Value>, msg: &str) -> Result<Vec<String>, EngineError> {
    v.and_then(Value::as_array)
        .ok_or_else(|| invalid(msg))?
        .iter()
        .map(|s| s.as_str().map(str::to_string).ok_or_else(|| invalid(msg)))
        .collect()
}

fn categorize_stage(obj: &Map<String, Value>) -> Result<Stage, EngineError> {
    let source = str_field(obj, "source", "categorize must have 'source'")?;
    let output = str_field(obj, "output", "categorize must have 'output'")?;
    let default_label = obj
        .get("default")
        .or_else(|| obj.get("default_label"))
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("categorize must have 'default' label"))?
        .to_string();
    let rules = obj
        .get("rules")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("categorize must have 'rules' array"))?
        .iter()
        .map(|rule| {
            let op = rule
                .get("op")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("categorize rule must have 'op' string"))?;
            let op = CompareOp::parse(op)
                .ok_or_else(|| invalid(format!("unknown categorize rule op '{op}'")))?;
            let threshold: Threshold = rule
                .get("value")
                .or_else(|| rule.get("threshold"))
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .ok_or_else(|| invalid("categorize rule must have numeric 'value'"))?;
            let label = rule
                .get("label")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("categorize rule must have 'label' string"))?;
            Ok(BucketRule::new(op, threshold, label))
        })
        .collect::<Result<Vec<_>, EngineError>>()?;
    Ok(Stage::Categorize {
        source,
        output,
        rules,
        default_label,
    })
}

fn parse_aggs(aggs: &[Value]) -> Result<Vec<Aggregation>, EngineError> {
    aggs.iter()
        .map(|a| {
            let obj = a
                .as_object()
                .ok_or_else(|| invalid("each agg must be an object"))?;
            let agg = obj
                .get("agg")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("agg must have 'agg' string"))?;
            let func = AggFunc::parse(agg)
                .ok_or_else(|| EngineError::Unsupported(format!("aggregate '{agg}'")))?;
            let column = obj.get("column").and_then(Value::as_str);
            let mut out = Aggregation::new(func, column);
            if let Some(alias) = obj.get("alias").and_then(Value::as_str) {
                out = out.alias(alias);
            }
            Ok(out)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use robin_etl_core::Value as Cell;
    use serde_json::json;

    fn sample_plan() -> Vec<Value> {
        vec![
            json!({"op": "filter", "payload": {"op": "gt", "left": {"col": "price"}, "right": {"lit": 10}}}),
            json!({"op": "categorize", "payload": {
                "source": "price", "output": "category",
                "rules": [{"op": "gt", "value": 50, "label": "High"},
                          {"op": ">", "value": 10, "label": "Medium"}],
                "default": "Low"
            }}),
            json!({"op": "groupBy", "payload": {
                "group_by": ["category"],
                "aggs": [{"agg": "count"}, {"agg": "avg", "column": "price", "alias": "avg_price"}]
            }}),
            json!({"op": "orderBy", "payload": {"columns": ["category"]}}),
        ]
    }

    #[test]
    fn execute_plan_end_to_end() {
        let session = Session::builder().app_name("plan-test").get_or_create();
        let data = [40, 60, 70, 5, 90].iter().map(|p| vec![json!(p)]).collect();
        let out = execute_plan(
            &session,
            data,
            vec![("price".into(), "bigint".into())],
            &sample_plan(),
        )
        .unwrap();
        assert_eq!(out.columns(), vec!["category", "count", "avg_price"]);
        assert_eq!(
            out.column("category").unwrap(),
            vec![Cell::from("High"), Cell::from("Medium")]
        );
        assert_eq!(out.value(0, "count").unwrap(), &Cell::Integer(3));
        assert_eq!(out.value(1, "avg_price").unwrap(), &Cell::Double(40.0));
    }

    #[test]
    fn malformed_steps_are_invalid_plans() {
        for step in [
            json!("filter"),
            json!({"payload": {}}),
            json!({"op": "withColumn", "payload": {"expr": {"lit": 1}}}),
            json!({"op": "groupBy", "payload": {"group_by": ["a"]}}),
            json!({"op": "limit", "payload": {}}),
            json!({"op": "select", "payload": []}),
            json!({"op": "orderBy", "payload": {"columns": ["a", "b"], "ascending": [null, false]}}),
            json!({"op": "orderBy", "payload": {"columns": ["a"], "ascending": "desc"}}),
        ] {
            assert!(
                matches!(pipeline_from_plan(&[step.clone()]), Err(EngineError::InvalidPlan(_))),
                "{step}"
            );
        }
        assert!(matches!(
            pipeline_from_plan(&[json!({"op": "join", "payload": {}})]),
            Err(EngineError::Unsupported(_))
        ));
    }

    #[test]
    fn categorize_thresholds_keep_integer_precision() {
        let step = |value: Value| {
            json!({"op": "categorize", "payload": {
                "source": "price", "output": "category",
                "rules": [{"op": ">", "value": value, "label": "High"}],
                "default": "Low"
            }})
        };
        let pipeline = pipeline_from_plan(&[step(json!(9_007_199_254_740_993_i64))]).unwrap();
        match &pipeline.stages()[0] {
            Stage::Categorize { rules, .. } => {
                assert_eq!(rules[0].threshold, Threshold::Integer(9_007_199_254_740_993));
            }
            other => panic!("unexpected stage {other:?}"),
        }
        assert!(pipeline_from_plan(&[step(json!(12.5))]).is_ok());
        assert!(pipeline_from_plan(&[step(json!("Infinity"))]).is_ok());
        assert!(matches!(
            pipeline_from_plan(&[step(json!("ten"))]),
            Err(EngineError::InvalidPlan(_))
        ));
    }

    #[test]
    fn order_by_directions_stay_aligned_with_columns() {
        let plan = [json!({"op": "orderBy", "payload": {"columns": ["a", "b"], "ascending": [true, false]}})];
        assert_eq!(
            pipeline_from_plan(&plan).unwrap().stages(),
            [Stage::OrderBy {
                columns: vec!["a".into(), "b".into()],
                ascending: vec![true, false],
            }]
        );
        let plan = [json!({"op": "orderBy", "payload": {"columns": ["a"]}})];
        assert_eq!(
            pipeline_from_plan(&plan).unwrap().stages(),
            [Stage::OrderBy {
                columns: vec!["a".into()],
                ascending: vec![],
            }]
        );
    }

    #[test]
    fn plan_errors_do_not_build_a_table() {
        let session = Session::builder().get_or_create();
        let plan = [json!({"op": "filter", "payload": {"op": "gt", "left": {"col": "missing"}, "right": {"lit": 1}}})];
        let err = execute_plan(
            &session,
            vec![vec![json!(1)]],
            vec![("price".into(), "bigint".into())],
            &plan,
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
