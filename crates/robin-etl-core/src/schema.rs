use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Double,
    String,
    Boolean,
    Timestamp,
}

impl DataType {
    /// Parse a Spark-style dtype string such as `bigint`, `double`, or `timestamp`.
    pub fn parse(s: &str) -> Result<DataType, EngineError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" | "bigint" | "long" | "smallint" | "tinyint" | "int64" => {
                Ok(DataType::Integer)
            }
            "double" | "float" | "real" | "float64" => Ok(DataType::Double),
            "string" | "str" | "varchar" | "text" => Ok(DataType::String),
            "boolean" | "bool" => Ok(DataType::Boolean),
            "timestamp" | "datetime" => Ok(DataType::Timestamp),
            other => Err(EngineError::Unsupported(format!("dtype '{other}'"))),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Double)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Integer => "bigint",
            DataType::Double => "double",
            DataType::String => "string",
            DataType::Boolean => "boolean",
            DataType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl StructField {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        StructField {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructType {
    fields: Vec<StructField>,
}

impl StructType {
    pub fn new(fields: Vec<StructField>) -> Self {
        StructType { fields }
    }

    /// Build a nullable schema from `(name, dtype)` pairs, e.g. `("price", "bigint")`.
    /// Names must be unique under the given case rule.
    pub fn from_pairs(pairs: &[(String, String)], case_sensitive: bool) -> Result<Self, EngineError> {
        let fields = pairs
            .iter()
            .map(|(name, ty)| Ok(StructField::new(name.clone(), DataType::parse(ty)?, true)))
            .collect::<Result<Vec<_>, EngineError>>()?;
        let schema = StructType::new(fields);
        schema.check_unique_names(case_sensitive)?;
        Ok(schema)
    }

    pub fn fields(&self) -> &[StructField] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&StructField> {
        self.fields.get(index)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Position of `name`, matching case-insensitively unless `case_sensitive`.
    pub fn index_of(&self, name: &str, case_sensitive: bool) -> Option<usize> {
        if case_sensitive {
            self.fields.iter().position(|f| f.name == name)
        } else {
            self.fields
                .iter()
                .position(|f| f.name.eq_ignore_ascii_case(name))
        }
    }

    /// Like [`index_of`](Self::index_of) but returns a schema error listing the available columns.
    pub fn resolve(&self, name: &str, case_sensitive: bool) -> Result<usize, EngineError> {
        self.index_of(name, case_sensitive)
            .ok_or_else(|| EngineError::column_not_found(name, &self.names()))
    }

    /// Append a field, rejecting a name that already exists.
    pub fn with_field(&self, field: StructField, case_sensitive: bool) -> Result<Self, EngineError> {
        if self.index_of(&field.name, case_sensitive).is_some() {
            return Err(EngineError::duplicate_column(&field.name));
        }
        let mut fields = self.fields.clone();
        fields.push(field);
        Ok(StructType { fields })
    }

    /// Fails if two fields share a name under the given case rule.
    pub fn check_unique_names(&self, case_sensitive: bool) -> Result<(), EngineError> {
        for (i, field) in self.fields.iter().enumerate() {
            if self.index_of(&field.name, case_sensitive) != Some(i) {
                return Err(EngineError::Schema(format!(
                    "duplicate column name '{}' in schema",
                    field.name
                )));
            }
        }
        Ok(())
    }

    /// Serialize the schema to a JSON string (array of field objects with name, data_type, nullable).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize the schema to a pretty-printed JSON string.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
