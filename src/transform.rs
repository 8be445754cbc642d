//! Record-level stages: filter, with_column, categorize, select, order_by, limit.
//!
//! Each stage is split into a `prepare` step that works on the schema alone (so a whole
//! pipeline can be validated before any data is scanned) and an `execute` step.

use robin_etl_core::expr::{col, lit_f64, lit_i64, lit_str};
use robin_etl_core::{CompareOp, DataType, EngineError, ExprIr, StructField, StructType};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::eval::{BoundExpr, bind};
use crate::table::{Record, Table};

/// Right-hand side of a categorize rule. Integer thresholds compare exactly against
/// integer columns; non-finite doubles serialize as `"NaN"`, `"Infinity"`, `"-Infinity"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ThresholdRepr", into = "ThresholdRepr")]
pub enum Threshold {
    Integer(i64),
    Double(f64),
}

impl Threshold {
    fn to_expr(self) -> ExprIr {
        match self {
            Threshold::Integer(n) => lit_i64(n),
            Threshold::Double(d) => lit_f64(d),
        }
    }
}

impl From<i64> for Threshold {
    fn from(n: i64) -> Self {
        Threshold::Integer(n)
    }
}

impl From<f64> for Threshold {
    fn from(d: f64) -> Self {
        Threshold::Double(d)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ThresholdRepr {
    Integer(i64),
    Double(f64),
    Named(String),
}

impl From<Threshold> for ThresholdRepr {
    fn from(t: Threshold) -> Self {
        match t {
            Threshold::Integer(n) => ThresholdRepr::Integer(n),
            Threshold::Double(d) if d.is_finite() => ThresholdRepr::Double(d),
            Threshold::Double(d) if d.is_nan() => ThresholdRepr::Named("NaN".into()),
            Threshold::Double(d) if d > 0.0 => ThresholdRepr::Named("Infinity".into()),
            Threshold::Double(_) => ThresholdRepr::Named("-Infinity".into()),
        }
    }
}

impl TryFrom<ThresholdRepr> for Threshold {
    type Error = String;

    fn try_from(repr: ThresholdRepr) -> Result<Self, Self::Error> {
        match repr {
            ThresholdRepr::Integer(n) => Ok(Threshold::Integer(n)),
            ThresholdRepr::Double(d) => Ok(Threshold::Double(d)),
            ThresholdRepr::Named(name) => match name.as_str() {
                "NaN" => Ok(Threshold::Double(f64::NAN)),
                "Infinity" => Ok(Threshold::Double(f64::INFINITY)),
                "-Infinity" => Ok(Threshold::Double(f64::NEG_INFINITY)),
                other => Err(format!("categorize threshold must be a number, got '{other}'")),
            },
        }
    }
}

/// One `(predicate, label)` pair of a categorize rule list: `source <op> threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketRule {
    pub op: CompareOp,
    pub threshold: Threshold,
    pub label: String,
}

impl BucketRule {
    pub fn new(op: CompareOp, threshold: impl Into<Threshold>, label: impl Into<String>) -> Self {
        BucketRule {
            op,
            threshold: threshold.into(),
            label: label.into(),
        }
    }

    pub fn gt(threshold: impl Into<Threshold>, label: impl Into<String>) -> Self {
        Self::new(CompareOp::Gt, threshold, label)
    }

    pub fn ge(threshold: impl Into<Threshold>, label: impl Into<String>) -> Self {
        Self::new(CompareOp::Ge, threshold, label)
    }

    pub fn lt(threshold: impl Into<Threshold>, label: impl Into<String>) -> Self {
        Self::new(CompareOp::Lt, threshold, label)
    }

    pub fn le(threshold: impl Into<Threshold>, label: impl Into<String>) -> Self {
        Self::new(CompareOp::Le, threshold, label)
    }

    pub fn eq(threshold: impl Into<Threshold>, label: impl Into<String>) -> Self {
        Self::new(CompareOp::Eq, threshold, label)
    }
}

pub(crate) struct PreparedFilter {
    predicate: BoundExpr,
}

impl PreparedFilter {
    pub(crate) fn prepare(
        schema: &StructType,
        predicate: &ExprIr,
        case_sensitive: bool,
    ) -> Result<Self, EngineError> {
        let predicate = bind(predicate, schema, case_sensitive)?;
        match predicate.data_type() {
            None | Some(DataType::Boolean) => Ok(PreparedFilter { predicate }),
            Some(other) => Err(EngineError::TypeMismatch(format!(
                "filter predicate must be Boolean, got {other}"
            ))),
        }
    }

    pub(crate) fn execute(&self, table: &Table) -> Table {
        let keep = table
            .ctx
            .map(&table.rows, |r| self.predicate.is_true(r.values()));
        let rows: Vec<Record> = table
            .rows
            .iter()
            .zip(keep)
            .filter(|(_, keep)| *keep)
            .map(|(r, _)| r.clone())
            .collect();
        debug!("filter kept {} of {} rows", rows.len(), table.count());
        Table::from_parts(table.schema.clone(), rows, table.ctx.clone())
    }
}

/// A derived column: `with_column` and `categorize` both end up here.
pub(crate) struct PreparedColumn {
    output_schema: StructType,
    expr: BoundExpr,
}

impl PreparedColumn {
    pub(crate) fn prepare(
        schema: &StructType,
        name: &str,
        expr: &ExprIr,
        case_sensitive: bool,
    ) -> Result<Self, EngineError> {
        if schema.index_of(name, case_sensitive).is_some() {
            return Err(EngineError::duplicate_column(name));
        }
        let expr = bind(expr, schema, case_sensitive)?;
        let data_type = expr.data_type().ok_or_else(|| {
            EngineError::TypeMismatch(format!(
                "cannot infer a type for derived column '{name}' from an always-null expression"
            ))
        })?;
        let field = StructField::new(name, data_type, expr.nullable());
        let output_schema = schema.with_field(field, case_sensitive)?;
        Ok(PreparedColumn {
            output_schema,
            expr,
        })
    }

    pub(crate) fn output_schema(&self) -> &StructType {
        &self.output_schema
    }

    pub(crate) fn execute(&self, table: &Table) -> Table {
        let rows = table
            .ctx
            .map(&table.rows, |r| r.with_appended(self.expr.eval(r.values())));
        if let Some(field) = self.output_schema.fields().last() {
            debug!("derived column '{}' over {} rows", field.name, rows.len());
        }
        Table::from_parts(self.output_schema.clone(), rows, table.ctx.clone())
    }
}

/// Translate ordered threshold rules into a `when` chain over `source`, first match wins.
pub(crate) fn prepare_categorize(
    schema: &StructType,
    source: &str,
    output: &str,
    rules: &[BucketRule],
    default_label: &str,
    case_sensitive: bool,
) -> Result<PreparedColumn, EngineError> {
    let idx = schema.resolve(source, case_sensitive)?;
    let field = &schema.fields()[idx];
    if !field.data_type.is_numeric() {
        return Err(EngineError::TypeMismatch(format!(
            "categorize source '{}' must be numeric, got {}",
            field.name, field.data_type
        )));
    }
    let source_ref = col(&field.name);
    let expr = rules
        .iter()
        .rev()
        .fold(lit_str(default_label), |otherwise, rule| ExprIr::When {
            condition: Box::new(rule.op.apply(source_ref.clone(), rule.threshold.to_expr())),
            then_expr: Box::new(lit_str(&rule.label)),
            otherwise: Box::new(otherwise),
        });
    PreparedColumn::prepare(schema, output, &expr, case_sensitive)
}

pub(crate) struct PreparedSelect {
    output_schema: StructType,
    indices: Vec<usize>,
}

impl PreparedSelect {
    pub(crate) fn prepare<S: AsRef<str>>(
        schema: &StructType,
        columns: &[S],
        case_sensitive: bool,
    ) -> Result<Self, EngineError> {
        let mut indices = Vec::with_capacity(columns.len());
        for name in columns {
            let idx = schema.resolve(name.as_ref(), case_sensitive)?;
            if indices.contains(&idx) {
                return Err(EngineError::Schema(format!(
                    "column '{}' selected more than once",
                    name.as_ref()
                )));
            }
            indices.push(idx);
        }
        let fields = indices
            .iter()
            .map(|&i| schema.fields()[i].clone())
            .collect();
        Ok(PreparedSelect {
            output_schema: StructType::new(fields),
            indices,
        })
    }

    pub(crate) fn output_schema(&self) -> &StructType {
        &self.output_schema
    }

    pub(crate) fn execute(&self, table: &Table) -> Table {
        let rows = table.ctx.map(&table.rows, |r| {
            Record::new(
                self.indices
                    .iter()
                    .map(|&i| r.values()[i].clone())
                    .collect(),
            )
        });
        Table::from_parts(self.output_schema.clone(), rows, table.ctx.clone())
    }
}

pub(crate) struct PreparedOrderBy {
    keys: Vec<(usize, bool)>,
}

impl PreparedOrderBy {
    pub(crate) fn prepare<S: AsRef<str>>(
        schema: &StructType,
        columns: &[S],
        ascending: &[bool],
        case_sensitive: bool,
    ) -> Result<Self, EngineError> {
        let keys = columns
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let idx = schema.resolve(name.as_ref(), case_sensitive)?;
                Ok((idx, ascending.get(i).copied().unwrap_or(true)))
            })
            .collect::<Result<Vec<_>, EngineError>>()?;
        Ok(PreparedOrderBy { keys })
    }

    /// Stable sort; ascending puts nulls first, descending puts them last.
    pub(crate) fn execute(&self, table: &Table) -> Table {
        let mut rows: Vec<Record> = table.rows.as_ref().clone();
        rows.sort_by(|a, b| {
            self.keys
                .iter()
                .map(|&(idx, asc)| {
                    let ord = a.values()[idx].sort_cmp(&b.values()[idx]);
                    if asc { ord } else { ord.reverse() }
                })
                .find(|ord| ord.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Table::from_parts(table.schema.clone(), rows, table.ctx.clone())
    }
}

/// Keep only records where `predicate` is true.
pub fn filter(table: &Table, predicate: &ExprIr) -> Result<Table, EngineError> {
    Ok(PreparedFilter::prepare(&table.schema, predicate, table.ctx.case_sensitive)?.execute(table))
}

/// Append column `name` computed per record by `expr`. Fails if `name` already exists.
pub fn with_column(table: &Table, name: &str, expr: &ExprIr) -> Result<Table, EngineError> {
    Ok(PreparedColumn::prepare(&table.schema, name, expr, table.ctx.case_sensitive)?.execute(table))
}

/// Append string column `output`: the label of the first rule `source` satisfies, else
/// `default_label`. A null `source` value receives the default label.
pub fn categorize(
    table: &Table,
    source: &str,
    output: &str,
    rules: &[BucketRule],
    default_label: &str,
) -> Result<Table, EngineError> {
    let prepared = prepare_categorize(
        &table.schema,
        source,
        output,
        rules,
        default_label,
        table.ctx.case_sensitive,
    )?;
    Ok(prepared.execute(table))
}

pub fn select(table: &Table, columns: &[&str]) -> Result<Table, EngineError> {
    Ok(PreparedSelect::prepare(&table.schema, columns, table.ctx.case_sensitive)?.execute(table))
}

pub fn order_by(table: &Table, columns: &[&str], ascending: &[bool]) -> Result<Table, EngineError> {
    let prepared =
        PreparedOrderBy::prepare(&table.schema, columns, ascending, table.ctx.case_sensitive)?;
    Ok(prepared.execute(table))
}

pub fn limit(table: &Table, n: usize) -> Table {
    let rows = table.rows.iter().take(n).cloned().collect();
    Table::from_parts(table.schema.clone(), rows, table.ctx.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use robin_etl_core::Value;
    use robin_etl_core::expr::{gt, lit_i64, mul};

    fn prices(values: &[Option<i64>]) -> Table {
        let schema = StructType::new(vec![StructField::new("price", DataType::Integer, true)]);
        let rows = values
            .iter()
            .map(|v| Record::new(vec![Value::from(*v)]))
            .collect();
        Table::new(schema, rows).unwrap()
    }

    #[test]
    fn filter_keeps_matching_rows_in_order() {
        let table = prices(&[Some(40), Some(5), None, Some(90)]);
        let out = filter(&table, &gt(col("price"), lit_i64(10))).unwrap();
        assert_eq!(
            out.column("price").unwrap(),
            vec![Value::Integer(40), Value::Integer(90)]
        );
    }

    #[test]
    fn filter_rejects_non_boolean_predicate() {
        let table = prices(&[Some(1)]);
        let err = filter(&table, &col("price")).unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch(_)));
    }

    #[test]
    fn with_column_appends_and_rejects_collisions() {
        let table = prices(&[Some(2), None]);
        let out = with_column(&table, "doubled", &mul(col("price"), lit_i64(2))).unwrap();
        assert_eq!(out.columns(), vec!["price", "doubled"]);
        assert_eq!(
            out.column("doubled").unwrap(),
            vec![Value::Integer(4), Value::Null]
        );
        assert!(out.schema().fields()[1].nullable);

        let err = with_column(&table, "PRICE", &lit_i64(1)).unwrap_err();
        assert!(matches!(err, EngineError::Schema(_)));
    }

    #[test]
    fn categorize_is_first_match_wins() {
        let table = prices(&[Some(60), Some(20), Some(5), None]);
        let rules = [BucketRule::gt(50.0, "High"), BucketRule::gt(10.0, "Medium")];
        let out = categorize(&table, "price", "category", &rules, "Low").unwrap();
        assert_eq!(
            out.column("category").unwrap(),
            vec![
                Value::from("High"),
                Value::from("Medium"),
                Value::from("Low"),
                Value::from("Low"),
            ]
        );
        assert!(!out.schema().fields()[1].nullable);

        let reversed = [BucketRule::gt(10.0, "Medium"), BucketRule::gt(50.0, "High")];
        let out = categorize(&table, "price", "category", &reversed, "Low").unwrap();
        assert_eq!(out.value(0, "category").unwrap(), &Value::from("Medium"));
    }

    #[test]
    fn integer_thresholds_compare_exactly() {
        let big = 9_007_199_254_740_992_i64;
        let table = prices(&[Some(big + 1), Some(big)]);
        let rules = [BucketRule::gt(big, "High")];
        let out = categorize(&table, "price", "category", &rules, "Low").unwrap();
        assert_eq!(
            out.column("category").unwrap(),
            vec![Value::from("High"), Value::from("Low")]
        );
    }

    #[test]
    fn thresholds_keep_their_json_form() {
        let rules = vec![
            BucketRule::gt(10_i64, "a"),
            BucketRule::gt(2.5, "b"),
            BucketRule::lt(f64::NEG_INFINITY, "c"),
            BucketRule::eq(f64::NAN, "d"),
        ];
        let text = serde_json::to_string(&rules).unwrap();
        assert!(text.contains(r#""threshold":10,"#), "{text}");
        assert!(text.contains(r#""threshold":2.5,"#), "{text}");
        assert!(text.contains(r#""threshold":"-Infinity""#), "{text}");
        assert!(text.contains(r#""threshold":"NaN""#), "{text}");

        let back: Vec<BucketRule> = serde_json::from_str(&text).unwrap();
        assert_eq!(back[..3], rules[..3]);
        assert!(matches!(back[3].threshold, Threshold::Double(d) if d.is_nan()));

        let bad = r#"{"op": "gt", "threshold": "ten", "label": "x"}"#;
        assert!(serde_json::from_str::<BucketRule>(bad).is_err());
    }

    #[test]
    fn categorize_validates_source_and_output() {
        let table = prices(&[Some(1)]);
        let rules = [BucketRule::gt(0.0, "pos")];
        assert!(matches!(
            categorize(&table, "cost", "bucket", &rules, "neg"),
            Err(EngineError::Schema(_))
        ));
        assert!(matches!(
            categorize(&table, "price", "price", &rules, "neg"),
            Err(EngineError::Schema(_))
        ));
        let labelled = categorize(&table, "price", "bucket", &rules, "neg").unwrap();
        assert!(matches!(
            categorize(&labelled, "bucket", "again", &rules, "neg"),
            Err(EngineError::TypeMismatch(_))
        ));
    }

    #[test]
    fn order_by_is_stable_with_nulls_first_ascending() {
        let table = prices(&[Some(3), None, Some(1), Some(3)]);
        let asc = order_by(&table, &["price"], &[]).unwrap();
        assert_eq!(
            asc.column("price").unwrap(),
            vec![
                Value::Null,
                Value::Integer(1),
                Value::Integer(3),
                Value::Integer(3)
            ]
        );
        let desc = order_by(&table, &["price"], &[false]).unwrap();
        assert_eq!(desc.column("price").unwrap().last(), Some(&Value::Null));
    }

    #[test]
    fn select_and_limit() {
        let table = with_column(&prices(&[Some(1), Some(2)]), "flag", &lit_i64(0)).unwrap();
        let out = select(&table, &["flag"]).unwrap();
        assert_eq!(out.columns(), vec!["flag"]);
        assert!(select(&table, &["flag", "FLAG"]).is_err());
        assert_eq!(limit(&table, 1).count(), 1);
        assert_eq!(limit(&table, 10).count(), 2);
    }
}
