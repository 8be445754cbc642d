//! Grouped aggregation (`group_by(...).agg(...)`).
//!
//! Groups appear in the output in order of first appearance of their key. Every group's
//! values are folded in input order, so the parallel path produces the same bits as the
//! sequential one.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDateTime;
use robin_etl_core::{DataType, EngineError, StructField, StructType, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::table::{Record, Table};

/// Aggregate function. Aliases follow PySpark: `avg` is `mean`, `stddev` is `stddev_samp`,
/// `variance` is `var_samp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Count,
    CountDistinct,
    Sum,
    #[serde(alias = "avg")]
    Mean,
    Min,
    Max,
    #[serde(alias = "stddev")]
    StddevSamp,
    StddevPop,
    #[serde(alias = "variance")]
    VarSamp,
    VarPop,
}

impl AggFunc {
    pub fn parse(s: &str) -> Option<AggFunc> {
        let f = match s.trim().to_ascii_lowercase().as_str() {
            "count" => AggFunc::Count,
            "count_distinct" | "countdistinct" => AggFunc::CountDistinct,
            "sum" => AggFunc::Sum,
            "mean" | "avg" => AggFunc::Mean,
            "min" => AggFunc::Min,
            "max" => AggFunc::Max,
            "stddev" | "stddev_samp" | "std" => AggFunc::StddevSamp,
            "stddev_pop" => AggFunc::StddevPop,
            "variance" | "var_samp" => AggFunc::VarSamp,
            "var_pop" => AggFunc::VarPop,
            _ => return None,
        };
        Some(f)
    }

    /// Name used in default output column names, e.g. `avg(price)`.
    pub fn sql_name(self) -> &'static str {
        match self {
            AggFunc::Count | AggFunc::CountDistinct => "count",
            AggFunc::Sum => "sum",
            AggFunc::Mean => "avg",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::StddevSamp => "stddev_samp",
            AggFunc::StddevPop => "stddev_pop",
            AggFunc::VarSamp => "var_samp",
            AggFunc::VarPop => "var_pop",
        }
    }

    fn requires_numeric(self) -> bool {
        matches!(
            self,
            AggFunc::Sum
                | AggFunc::Mean
                | AggFunc::StddevSamp
                | AggFunc::StddevPop
                | AggFunc::VarSamp
                | AggFunc::VarPop
        )
    }
}

/// One aggregate of a `group_by`: a function, its input column (none for `count(*)`), and
/// an optional output alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    #[serde(rename = "agg")]
    pub func: AggFunc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Aggregation {
    pub fn new(func: AggFunc, column: Option<&str>) -> Self {
        Aggregation {
            func,
            column: column.map(str::to_string),
            alias: None,
        }
    }

    /// `count(*)`: rows per group.
    pub fn count_all() -> Self {
        Self::new(AggFunc::Count, None)
    }

    /// Non-null values of `column` per group.
    pub fn count(column: &str) -> Self {
        Self::new(AggFunc::Count, Some(column))
    }

    pub fn count_distinct(column: &str) -> Self {
        Self::new(AggFunc::CountDistinct, Some(column))
    }

    pub fn sum(column: &str) -> Self {
        Self::new(AggFunc::Sum, Some(column))
    }

    pub fn mean(column: &str) -> Self {
        Self::new(AggFunc::Mean, Some(column))
    }

    pub fn avg(column: &str) -> Self {
        Self::mean(column)
    }

    pub fn min(column: &str) -> Self {
        Self::new(AggFunc::Min, Some(column))
    }

    pub fn max(column: &str) -> Self {
        Self::new(AggFunc::Max, Some(column))
    }

    /// Sample standard deviation (n - 1). NaN for a single value.
    pub fn stddev(column: &str) -> Self {
        Self::new(AggFunc::StddevSamp, Some(column))
    }

    pub fn stddev_pop(column: &str) -> Self {
        Self::new(AggFunc::StddevPop, Some(column))
    }

    pub fn variance(column: &str) -> Self {
        Self::new(AggFunc::VarSamp, Some(column))
    }

    pub fn var_pop(column: &str) -> Self {
        Self::new(AggFunc::VarPop, Some(column))
    }

    pub fn alias(mut self, name: &str) -> Self {
        self.alias = Some(name.to_string());
        self
    }

    /// `*` as the column of `count` means `count(*)`.
    fn input_column(&self) -> Option<&str> {
        self.column.as_deref().filter(|c| *c != "*")
    }

    /// Output column name: the alias, else `count` for `count(*)`, else `fn(column)`.
    pub fn output_name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match (self.func, self.input_column()) {
            (AggFunc::Count, None) => "count".to_string(),
            (AggFunc::CountDistinct, Some(c)) => format!("count(DISTINCT {c})"),
            (f, Some(c)) => format!("{}({c})", f.sql_name()),
            (f, None) => f.sql_name().to_string(),
        }
    }
}

/// Hashable form of a group-key value. Doubles compare by normalized bits, so `-0.0`
/// groups with `0.0` and all NaNs form one group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Null,
    Integer(i64),
    Double(u64),
    String(String),
    Boolean(bool),
    Timestamp(NaiveDateTime),
}

impl From<&Value> for KeyPart {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => KeyPart::Null,
            Value::Integer(i) => KeyPart::Integer(*i),
            Value::Double(d) => KeyPart::Double(normalized_bits(*d)),
            Value::String(s) => KeyPart::String(s.clone()),
            Value::Boolean(b) => KeyPart::Boolean(*b),
            Value::Timestamp(t) => KeyPart::Timestamp(*t),
        }
    }
}

fn normalized_bits(d: f64) -> u64 {
    if d.is_nan() {
        f64::NAN.to_bits()
    } else if d == 0.0 {
        0.0f64.to_bits()
    } else {
        d.to_bits()
    }
}

#[derive(Debug, Clone)]
struct PreparedAgg {
    func: AggFunc,
    /// `None` for `count(*)`.
    input: Option<usize>,
    input_type: Option<DataType>,
}

/// A validated `group_by(...).agg(...)`, ready to run against tables of one schema.
pub(crate) struct PreparedAggregate {
    keys: Vec<usize>,
    aggs: Vec<PreparedAgg>,
    output_schema: StructType,
}

impl PreparedAggregate {
    pub(crate) fn prepare<S: AsRef<str>>(
        schema: &StructType,
        keys: &[S],
        aggregations: &[Aggregation],
        case_sensitive: bool,
    ) -> Result<Self, EngineError> {
        let keys = resolve_keys(schema, keys, case_sensitive)?;
        let mut fields: Vec<StructField> =
            keys.iter().map(|&i| schema.fields()[i].clone()).collect();
        let mut aggs = Vec::with_capacity(aggregations.len());
        for agg in aggregations {
            let input = match agg.input_column() {
                Some(name) => Some(schema.resolve(name, case_sensitive)?),
                None if agg.func == AggFunc::Count => None,
                None => {
                    return Err(EngineError::InvalidPlan(format!(
                        "aggregate '{}' requires an input column",
                        agg.func.sql_name()
                    )));
                }
            };
            let input_field = input.map(|i| &schema.fields()[i]);
            if let Some(field) = input_field
                .filter(|f| agg.func.requires_numeric() && !f.data_type.is_numeric())
            {
                return Err(EngineError::TypeMismatch(format!(
                    "{}({}) requires a numeric column, got {}",
                    agg.func.sql_name(),
                    field.name,
                    field.data_type
                )));
            }
            let input_type = input_field.map(|f| f.data_type);
            let (data_type, nullable) = match agg.func {
                AggFunc::Count | AggFunc::CountDistinct => (DataType::Integer, false),
                AggFunc::Sum | AggFunc::Min | AggFunc::Max => {
                    (input_type.unwrap_or(DataType::Integer), true)
                }
                _ => (DataType::Double, true),
            };
            fields.push(StructField::new(agg.output_name(), data_type, nullable));
            aggs.push(PreparedAgg {
                func: agg.func,
                input,
                input_type,
            });
        }
        let output_schema = StructType::new(fields);
        output_schema.check_unique_names(case_sensitive)?;
        Ok(PreparedAggregate {
            keys,
            aggs,
            output_schema,
        })
    }

    pub(crate) fn output_schema(&self) -> &StructType {
        &self.output_schema
    }

    pub(crate) fn execute(&self, table: &Table) -> Table {
        let rows = table.rows.as_slice();
        let keys = table.ctx.map(rows, |r| {
            self.keys
                .iter()
                .map(|&i| KeyPart::from(&r.values()[i]))
                .collect::<Vec<_>>()
        });

        let mut index: HashMap<Vec<KeyPart>, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (row, key) in keys.into_iter().enumerate() {
            let next = groups.len();
            let g = *index.entry(key).or_insert(next);
            if g == next {
                groups.push(Vec::new());
            }
            groups[g].push(row);
        }

        let out = table.ctx.map_sized(rows.len(), &groups, |members| {
            let first = &rows[members[0]];
            let mut values: Vec<Value> =
                self.keys.iter().map(|&i| first.values()[i].clone()).collect();
            values.extend(self.aggs.iter().map(|agg| fold(agg, rows, members)));
            Record::new(values)
        });
        debug!(
            "group_by produced {} groups from {} rows",
            out.len(),
            rows.len()
        );
        Table::from_parts(self.output_schema.clone(), out, table.ctx.clone())
    }
}

fn resolve_keys<S: AsRef<str>>(
    schema: &StructType,
    keys: &[S],
    case_sensitive: bool,
) -> Result<Vec<usize>, EngineError> {
    if keys.is_empty() {
        return Err(EngineError::EmptyGroupKey);
    }
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let idx = schema.resolve(key.as_ref(), case_sensitive)?;
        if out.contains(&idx) {
            return Err(EngineError::duplicate_column(key.as_ref()));
        }
        out.push(idx);
    }
    Ok(out)
}

/// Welford's online mean/variance.
#[derive(Debug, Default, Clone, Copy)]
struct Welford {
    n: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    fn push(&mut self, x: f64) {
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn variance(&self, sample: bool) -> Value {
        match self.n {
            0 => Value::Null,
            n => {
                let denom = if sample { n - 1 } else { n };
                Value::Double(self.m2 / denom as f64)
            }
        }
    }
}

fn fold(agg: &PreparedAgg, rows: &[Record], members: &[usize]) -> Value {
    let Some(input) = agg.input else {
        return Value::Integer(members.len() as i64);
    };
    let values = members
        .iter()
        .map(|&r| &rows[r].values()[input])
        .filter(|v| !v.is_null());

    match agg.func {
        AggFunc::Count => Value::Integer(values.count() as i64),
        AggFunc::CountDistinct => {
            Value::Integer(values.map(KeyPart::from).collect::<HashSet<_>>().len() as i64)
        }
        AggFunc::Sum if agg.input_type == Some(DataType::Integer) => values
            .filter_map(Value::as_i64)
            .reduce(i64::wrapping_add)
            .map_or(Value::Null, Value::Integer),
        AggFunc::Sum => values
            .filter_map(Value::as_f64)
            .reduce(|a, b| a + b)
            .map_or(Value::Null, Value::Double),
        AggFunc::Mean => {
            let (n, total) = values
                .filter_map(Value::as_f64)
                .fold((0u64, 0.0), |(n, s), x| (n + 1, s + x));
            if n == 0 {
                Value::Null
            } else {
                Value::Double(total / n as f64)
            }
        }
        AggFunc::Min => extreme(values, std::cmp::Ordering::Less),
        AggFunc::Max => extreme(values, std::cmp::Ordering::Greater),
        AggFunc::StddevSamp | AggFunc::StddevPop | AggFunc::VarSamp | AggFunc::VarPop => {
            let mut w = Welford::default();
            values.filter_map(Value::as_f64).for_each(|x| w.push(x));
            let sample = matches!(agg.func, AggFunc::StddevSamp | AggFunc::VarSamp);
            match (agg.func, w.variance(sample)) {
                (AggFunc::StddevSamp | AggFunc::StddevPop, Value::Double(v)) => {
                    Value::Double(v.sqrt())
                }
                (_, v) => v,
            }
        }
    }
}

/// First value that no later value beats in direction `wanted`.
fn extreme<'a>(values: impl Iterator<Item = &'a Value>, wanted: std::cmp::Ordering) -> Value {
    values
        .fold(None::<&Value>, |best, v| match best {
            Some(b) if v.compare(b) != Some(wanted) => Some(b),
            _ => Some(v),
        })
        .cloned()
        .unwrap_or(Value::Null)
}

/// A table grouped by key columns; finish it with [`agg`](Self::agg) or a shortcut.
#[derive(Debug, Clone)]
pub struct GroupedTable {
    table: Table,
    keys: Vec<String>,
}

impl GroupedTable {
    pub(crate) fn new(table: &Table, keys: &[&str]) -> Result<Self, EngineError> {
        resolve_keys(&table.schema, keys, table.ctx.case_sensitive)?;
        Ok(GroupedTable {
            table: table.clone(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
        })
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// One row per distinct key, key columns first, then one column per aggregation.
    pub fn agg(&self, aggregations: &[Aggregation]) -> Result<Table, EngineError> {
        let prepared = PreparedAggregate::prepare(
            &self.table.schema,
            &self.keys,
            aggregations,
            self.table.ctx.case_sensitive,
        )?;
        Ok(prepared.execute(&self.table))
    }

    pub fn count(&self) -> Result<Table, EngineError> {
        self.agg(&[Aggregation::count_all()])
    }

    pub fn sum(&self, column: &str) -> Result<Table, EngineError> {
        self.agg(&[Aggregation::sum(column)])
    }

    pub fn mean(&self, column: &str) -> Result<Table, EngineError> {
        self.agg(&[Aggregation::mean(column)])
    }

    pub fn avg(&self, column: &str) -> Result<Table, EngineError> {
        self.mean(column)
    }

    pub fn min(&self, column: &str) -> Result<Table, EngineError> {
        self.agg(&[Aggregation::min(column)])
    }

    pub fn max(&self, column: &str) -> Result<Table, EngineError> {
        self.agg(&[Aggregation::max(column)])
    }

    pub fn stddev(&self, column: &str) -> Result<Table, EngineError> {
        self.agg(&[Aggregation::stddev(column)])
    }
}

/// `table.group_by(columns)?.agg(aggregations)` as a free function.
pub fn group_aggregate(
    table: &Table,
    columns: &[&str],
    aggregations: &[Aggregation],
) -> Result<Table, EngineError> {
    GroupedTable::new(table, columns)?.agg(aggregations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sales() -> Table {
        let rows = vec![
            vec![json!("east"), json!(2), json!(1.5)],
            vec![json!("west"), json!(4), json!(null)],
            vec![json!("east"), json!(6), json!(2.5)],
            vec![json!(null), json!(null), json!(0.0)],
            vec![json!("west"), json!(8), json!(-0.0)],
        ];
        let schema = vec![
            ("region".to_string(), "string".to_string()),
            ("amount".to_string(), "bigint".to_string()),
            ("score".to_string(), "double".to_string()),
        ];
        Table::from_json_rows(rows, schema).unwrap()
    }

    #[test]
    fn groups_in_first_appearance_order_with_null_key() {
        let out = sales()
            .group_by(vec!["region"])
            .unwrap()
            .agg(&[Aggregation::count_all(), Aggregation::sum("amount")])
            .unwrap();
        assert_eq!(out.columns(), vec!["region", "count", "sum(amount)"]);
        assert_eq!(
            out.column("region").unwrap(),
            vec![Value::from("east"), Value::from("west"), Value::Null]
        );
        assert_eq!(
            out.column("count").unwrap(),
            vec![Value::Integer(2), Value::Integer(2), Value::Integer(1)]
        );
        assert_eq!(
            out.column("sum(amount)").unwrap(),
            vec![Value::Integer(8), Value::Integer(12), Value::Null]
        );
    }

    #[test]
    fn mean_min_max_and_counts_skip_nulls() {
        let out = sales()
            .group_aggregate(
                vec!["region"],
                &[
                    Aggregation::avg("score"),
                    Aggregation::min("amount").alias("lo"),
                    Aggregation::max("amount").alias("hi"),
                    Aggregation::count("score"),
                ],
            )
            .unwrap();
        assert_eq!(out.value(0, "avg(score)").unwrap(), &Value::Double(2.0));
        assert_eq!(out.value(1, "avg(score)").unwrap(), &Value::Double(0.0));
        assert_eq!(out.value(1, "lo").unwrap(), &Value::Integer(4));
        assert_eq!(out.value(1, "hi").unwrap(), &Value::Integer(8));
        assert_eq!(out.value(1, "count(score)").unwrap(), &Value::Integer(1));
        assert_eq!(out.value(2, "lo").unwrap(), &Value::Null);
    }

    #[test]
    fn signed_zeros_share_a_group() {
        let out = sales().group_by(vec!["score"]).unwrap().count().unwrap();
        assert_eq!(out.count(), 4);
        assert_eq!(out.value(3, "count").unwrap(), &Value::Integer(2));
    }

    #[test]
    fn welford_matches_known_values() {
        let rows = [2, 4, 4, 4, 5, 5, 7, 9]
            .iter()
            .map(|v| vec![json!("a"), json!(v)])
            .chain(std::iter::once(vec![json!("b"), json!(3)]))
            .collect();
        let schema = vec![
            ("k".to_string(), "string".to_string()),
            ("v".to_string(), "double".to_string()),
        ];
        let table = Table::from_json_rows(rows, schema).unwrap();
        let out = table
            .group_aggregate(
                vec!["k"],
                &[
                    Aggregation::stddev("v"),
                    Aggregation::stddev_pop("v"),
                    Aggregation::variance("v"),
                    Aggregation::var_pop("v"),
                ],
            )
            .unwrap();
        let get = |row, name| out.value(row, name).unwrap().as_f64().unwrap();
        assert!((get(0, "stddev_samp(v)") - 2.138_089_935_299_395).abs() < 1e-12);
        assert!((get(0, "stddev_pop(v)") - 2.0).abs() < 1e-12);
        assert!((get(0, "var_samp(v)") - 32.0 / 7.0).abs() < 1e-12);
        assert!((get(0, "var_pop(v)") - 4.0).abs() < 1e-12);
        assert!(get(1, "stddev_samp(v)").is_nan());
        assert_eq!(get(1, "stddev_pop(v)"), 0.0);
    }

    #[test]
    fn count_distinct_ignores_nulls() {
        let out = sales()
            .group_aggregate(vec!["amount"], &[Aggregation::count_distinct("region")])
            .unwrap();
        assert_eq!(out.columns(), vec!["amount", "count(DISTINCT region)"]);
        assert_eq!(out.value(3, "count(DISTINCT region)").unwrap(), &Value::Integer(0));
    }

    #[test]
    fn empty_input_yields_no_groups() {
        let empty = sales().filter(&robin_etl_core::expr::lit_bool(false)).unwrap();
        let out = empty.group_by(vec!["region"]).unwrap().count().unwrap();
        assert!(out.is_empty());
        assert_eq!(out.columns(), vec!["region", "count"]);
    }

    #[test]
    fn validation_errors() {
        let table = sales();
        assert!(matches!(
            table.group_by(vec![]),
            Err(EngineError::EmptyGroupKey)
        ));
        assert!(matches!(
            table.group_by(vec!["nope"]),
            Err(EngineError::Schema(_))
        ));
        assert!(matches!(
            table.group_aggregate(vec!["region"], &[Aggregation::sum("region")]),
            Err(EngineError::TypeMismatch(_))
        ));
        assert!(matches!(
            table.group_aggregate(
                vec!["region"],
                &[Aggregation::sum("amount").alias("Region")]
            ),
            Err(EngineError::Schema(_))
        ));
    }

    #[test]
    fn aggregation_deserializes_plan_shape() {
        let agg: Aggregation =
            serde_json::from_value(json!({"agg": "avg", "column": "amount"})).unwrap();
        assert_eq!(agg, Aggregation::mean("amount"));
        let star: Aggregation =
            serde_json::from_value(json!({"agg": "count", "column": "*"})).unwrap();
        assert_eq!(star.output_name(), "count");
    }
}
