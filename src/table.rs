//! The in-memory table: a schema plus an ordered sequence of records.
//!
//! Tables are immutable; every stage returns a fresh table that shares the
//! execution context (case sensitivity, parallelism) of its input.

use std::collections::HashMap;
use std::sync::Arc;

use robin_etl_core::{CollectedRows, DataType, EngineError, ExprIr, StructType, Value};
use serde_json::Value as JsonValue;

use crate::aggregate::{Aggregation, GroupedTable};
use crate::exec::ExecContext;
use crate::transform::{self, BucketRule};

/// One row. Values are positional and aligned with the owning table's schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Record { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub(crate) fn with_appended(&self, value: Value) -> Record {
        let mut values = Vec::with_capacity(self.values.len() + 1);
        values.extend_from_slice(&self.values);
        values.push(value);
        Record { values }
    }
}

impl From<Vec<Value>> for Record {
    fn from(values: Vec<Value>) -> Self {
        Record::new(values)
    }
}

/// Table - main tabular data structure.
#[derive(Debug, Clone)]
pub struct Table {
    pub(crate) schema: StructType,
    pub(crate) rows: Arc<Vec<Record>>,
    pub(crate) ctx: Arc<ExecContext>,
}

impl Table {
    /// Build a table, checking that every record fits `schema`.
    ///
    /// Integers stored in a `double` column are widened; any other type mismatch, wrong
    /// record width, or null in a non-nullable field is rejected.
    pub fn new(schema: StructType, rows: Vec<Record>) -> Result<Self, EngineError> {
        Self::with_context(schema, rows, Arc::new(ExecContext::default()))
    }

    pub(crate) fn with_context(
        schema: StructType,
        rows: Vec<Record>,
        ctx: Arc<ExecContext>,
    ) -> Result<Self, EngineError> {
        schema.check_unique_names(ctx.case_sensitive)?;
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| conform_record(&schema, i, row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Table {
            schema,
            rows: Arc::new(rows),
            ctx,
        })
    }

    /// Stage output whose records were produced against `schema` by a bound expression.
    pub(crate) fn from_parts(schema: StructType, rows: Vec<Record>, ctx: Arc<ExecContext>) -> Self {
        Table {
            schema,
            rows: Arc::new(rows),
            ctx,
        }
    }

    /// An empty table with the given schema.
    pub fn empty(schema: StructType) -> Self {
        Table::from_parts(schema, Vec::new(), Arc::new(ExecContext::default()))
    }

    /// Build from JSON rows and `(name, dtype)` pairs, e.g. `[("price", "bigint")]`.
    /// All fields are nullable.
    pub fn from_json_rows(
        rows: Vec<Vec<JsonValue>>,
        schema: Vec<(String, String)>,
    ) -> Result<Self, EngineError> {
        Self::from_json_rows_with_context(rows, schema, Arc::new(ExecContext::default()))
    }

    pub(crate) fn from_json_rows_with_context(
        rows: Vec<Vec<JsonValue>>,
        schema: Vec<(String, String)>,
        ctx: Arc<ExecContext>,
    ) -> Result<Self, EngineError> {
        let schema = StructType::from_pairs(&schema, ctx.case_sensitive)?;
        let records = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                if row.len() != schema.len() {
                    return Err(width_error(i, row.len(), schema.len()));
                }
                row.iter()
                    .zip(schema.fields())
                    .map(|(v, f)| Value::from_json(v, f.data_type))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Record::new)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Table::with_context(schema, records, ctx)
    }

    pub fn schema(&self) -> &StructType {
        &self.schema
    }

    /// Column names in schema order.
    pub fn columns(&self) -> Vec<String> {
        self.schema.fields().iter().map(|f| f.name.clone()).collect()
    }

    /// Number of records.
    pub fn count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.ctx.case_sensitive
    }

    /// Resolve a logical column name to the actual column name in the schema.
    pub fn resolve_column_name(&self, name: &str) -> Result<String, EngineError> {
        let idx = self.schema.resolve(name, self.ctx.case_sensitive)?;
        Ok(self.schema.fields()[idx].name.clone())
    }

    /// Cell at `row` in column `name`.
    pub fn value(&self, row: usize, name: &str) -> Result<&Value, EngineError> {
        let idx = self.schema.resolve(name, self.ctx.case_sensitive)?;
        self.rows
            .get(row)
            .and_then(|r| r.get(idx))
            .ok_or_else(|| {
                EngineError::Schema(format!(
                    "row {row} out of range for table with {} rows",
                    self.rows.len()
                ))
            })
    }

    /// All values of column `name`, in row order.
    pub fn column(&self, name: &str) -> Result<Vec<Value>, EngineError> {
        let idx = self.schema.resolve(name, self.ctx.case_sensitive)?;
        Ok(self.rows.iter().map(|r| r.values[idx].clone()).collect())
    }

    /// Records as name -> value maps.
    pub fn records_as_maps(&self) -> Vec<HashMap<String, Value>> {
        self.rows
            .iter()
            .map(|r| {
                self.schema
                    .fields()
                    .iter()
                    .zip(r.values())
                    .map(|(f, v)| (f.name.clone(), v.clone()))
                    .collect()
            })
            .collect()
    }

    /// Collect as rows of column-name -> JSON value. For use by language bindings.
    pub fn collect_as_json_rows(&self) -> CollectedRows {
        self.rows
            .iter()
            .map(|r| {
                self.schema
                    .fields()
                    .iter()
                    .zip(r.values())
                    .map(|(f, v)| (f.name.clone(), v.to_json()))
                    .collect()
            })
            .collect()
    }

    /// Rows as a JSON array of objects with keys in schema order.
    pub fn to_json_rows(&self) -> Result<String, EngineError> {
        let rows: Vec<JsonValue> = self.rows.iter().map(|r| self.record_to_json(r)).collect();
        Ok(serde_json::to_string(&rows)?)
    }

    pub(crate) fn record_to_json(&self, record: &Record) -> JsonValue {
        let obj: serde_json::Map<String, JsonValue> = self
            .schema
            .fields()
            .iter()
            .zip(record.values())
            .map(|(f, v)| (f.name.clone(), v.to_json()))
            .collect();
        JsonValue::Object(obj)
    }

    /// Keep only records where `predicate` is true.
    pub fn filter(&self, predicate: &ExprIr) -> Result<Table, EngineError> {
        transform::filter(self, predicate)
    }

    /// Append a derived column computed per record by `expr`.
    pub fn with_column(&self, name: &str, expr: &ExprIr) -> Result<Table, EngineError> {
        transform::with_column(self, name, expr)
    }

    /// Append a string column labelling `source` by the first matching rule.
    pub fn categorize(
        &self,
        source: &str,
        output: &str,
        rules: &[BucketRule],
        default_label: &str,
    ) -> Result<Table, EngineError> {
        transform::categorize(self, source, output, rules, default_label)
    }

    /// Group by one or more columns. The result is aggregated with [`GroupedTable::agg`].
    pub fn group_by(&self, columns: Vec<&str>) -> Result<GroupedTable, EngineError> {
        GroupedTable::new(self, &columns)
    }

    /// `group_by(columns)` followed by `agg(aggregations)`.
    pub fn group_aggregate(
        &self,
        columns: Vec<&str>,
        aggregations: &[Aggregation],
    ) -> Result<Table, EngineError> {
        self.group_by(columns)?.agg(aggregations)
    }

    pub fn select(&self, columns: Vec<&str>) -> Result<Table, EngineError> {
        transform::select(self, &columns)
    }

    /// Stable sort. `ascending` is padded with `true` (or truncated) to match `columns`.
    pub fn order_by(&self, columns: Vec<&str>, ascending: Vec<bool>) -> Result<Table, EngineError> {
        transform::order_by(self, &columns, &ascending)
    }

    pub fn limit(&self, n: usize) -> Table {
        transform::limit(self, n)
    }
}

fn width_error(row: usize, got: usize, expected: usize) -> EngineError {
    EngineError::Schema(format!(
        "row {row} has {got} values but the schema has {expected} columns"
    ))
}

fn conform_record(schema: &StructType, row: usize, record: Record) -> Result<Record, EngineError> {
    if record.len() != schema.len() {
        return Err(width_error(row, record.len(), schema.len()));
    }
    let values = record
        .into_values()
        .into_iter()
        .zip(schema.fields())
        .map(|(value, field)| match (value, field.data_type) {
            (Value::Null, _) if !field.nullable => Err(EngineError::Schema(format!(
                "row {row}: null in non-nullable column '{}'",
                field.name
            ))),
            (Value::Integer(i), DataType::Double) => Ok(Value::Double(i as f64)),
            (value, declared) => match value.data_type() {
                None => Ok(value),
                Some(actual) if actual == declared => Ok(value),
                Some(actual) => Err(EngineError::TypeMismatch(format!(
                    "row {row}: column '{}' is {declared} but got {actual} value {value}",
                    field.name
                ))),
            },
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Record::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use robin_etl_core::StructField;
    use serde_json::json;

    fn price_schema() -> StructType {
        StructType::new(vec![
            StructField::new("item", DataType::String, false),
            StructField::new("price", DataType::Double, true),
        ])
    }

    #[test]
    fn new_widens_integers_into_double_columns() {
        let table = Table::new(
            price_schema(),
            vec![vec![Value::from("tea"), Value::Integer(3)].into()],
        )
        .unwrap();
        assert_eq!(table.value(0, "price").unwrap(), &Value::Double(3.0));
    }

    #[test]
    fn new_rejects_bad_records() {
        let short = Table::new(price_schema(), vec![vec![Value::from("tea")].into()]);
        assert!(matches!(short, Err(EngineError::Schema(_))));

        let null_key = Table::new(
            price_schema(),
            vec![vec![Value::Null, Value::Double(1.0)].into()],
        );
        assert!(matches!(null_key, Err(EngineError::Schema(_))));

        let wrong_type = Table::new(
            price_schema(),
            vec![vec![Value::from("tea"), Value::from("cheap")].into()],
        );
        assert!(matches!(wrong_type, Err(EngineError::TypeMismatch(_))));
    }

    #[test]
    fn from_json_rows_builds_nullable_schema() {
        let table = Table::from_json_rows(
            vec![vec![json!(1), json!("a")], vec![json!(2), json!(null)]],
            vec![
                ("id".to_string(), "bigint".to_string()),
                ("tag".to_string(), "string".to_string()),
            ],
        )
        .unwrap();
        assert_eq!(table.count(), 2);
        assert_eq!(table.columns(), vec!["id", "tag"]);
        assert!(table.schema().fields().iter().all(|f| f.nullable));
        assert_eq!(table.value(1, "TAG").unwrap(), &Value::Null);
        assert_eq!(table.resolve_column_name("ID").unwrap(), "id");
    }

    #[test]
    fn json_output_keeps_schema_order() {
        let table = Table::new(
            price_schema(),
            vec![vec![Value::from("tea"), Value::Double(2.5)].into()],
        )
        .unwrap();
        assert_eq!(
            table.to_json_rows().unwrap(),
            r#"[{"item":"tea","price":2.5}]"#
        );
        let rows = table.collect_as_json_rows();
        assert_eq!(rows[0]["price"], json!(2.5));
        assert_eq!(table.records_as_maps()[0]["item"], Value::from("tea"));
    }

    #[test]
    fn value_out_of_range_is_an_error() {
        let table = Table::empty(price_schema());
        assert!(table.is_empty());
        assert!(table.value(0, "price").is_err());
        assert!(table.column("price").unwrap().is_empty());
    }
}
