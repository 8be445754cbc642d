//! Where tables come from and where they go.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use robin_etl_core::EngineError;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::session::Session;
use crate::table::Table;

/// Produces a table under a session's settings.
pub trait TableSource {
    fn read(&self, session: &Session) -> Result<Table, EngineError>;
}

/// Receives the final table of a pipeline.
pub trait TableSink {
    fn write(&mut self, table: &Table) -> Result<(), EngineError>;
}

/// In-memory rows (one JSON array per row, schema order) with a declared `(name, dtype)` schema.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRowsSource {
    rows: Vec<Vec<JsonValue>>,
    schema: Vec<(String, String)>,
}

impl JsonRowsSource {
    pub fn new(rows: Vec<Vec<JsonValue>>, schema: Vec<(String, String)>) -> Self {
        JsonRowsSource { rows, schema }
    }

    /// Parse a JSON array of row arrays, e.g. `[[1, "a"], [2, "b"]]`.
    pub fn from_json_str(s: &str, schema: Vec<(String, String)>) -> Result<Self, EngineError> {
        Ok(JsonRowsSource::new(serde_json::from_str(s)?, schema))
    }
}

impl TableSource for JsonRowsSource {
    fn read(&self, session: &Session) -> Result<Table, EngineError> {
        session.create_table_from_rows(self.rows.clone(), self.schema.clone())
    }
}

/// A file of JSON objects, one per line, keyed by column name. Missing keys read as null;
/// blank lines are skipped.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: PathBuf,
    schema: Vec<(String, String)>,
}

impl JsonLinesSource {
    pub fn new(path: impl AsRef<Path>, schema: Vec<(String, String)>) -> Self {
        JsonLinesSource {
            path: path.as_ref().to_path_buf(),
            schema,
        }
    }
}

impl TableSource for JsonLinesSource {
    fn read(&self, session: &Session) -> Result<Table, EngineError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut rows = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let obj: serde_json::Map<String, JsonValue> = serde_json::from_str(&line)?;
            let row = self
                .schema
                .iter()
                .map(|(name, _)| obj.get(name).cloned().unwrap_or(JsonValue::Null))
                .collect();
            rows.push(row);
        }
        debug!("read {} rows from {}", rows.len(), self.path.display());
        session.create_table_from_rows(rows, self.schema.clone())
    }
}

/// Keeps the last table written to it.
#[derive(Debug, Default)]
pub struct CollectSink {
    table: Option<Table>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self) -> Option<&Table> {
        self.table.as_ref()
    }

    pub fn into_table(self) -> Option<Table> {
        self.table
    }
}

impl TableSink for CollectSink {
    fn write(&mut self, table: &Table) -> Result<(), EngineError> {
        self.table = Some(table.clone());
        Ok(())
    }
}

/// Writes one JSON object per record, keys in schema order.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    rows_written: usize,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink {
            writer,
            rows_written: 0,
        }
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesSink<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        Ok(JsonLinesSink::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> TableSink for JsonLinesSink<W> {
    fn write(&mut self, table: &Table) -> Result<(), EngineError> {
        for record in table.rows() {
            serde_json::to_writer(&mut self.writer, &table.record_to_json(record))?;
            self.writer.write_all(b"\n")?;
            self.rows_written += 1;
        }
        self.writer.flush()?;
        debug!("wrote {} rows as JSON lines", table.count());
        Ok(())
    }
}
