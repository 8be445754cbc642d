use std::collections::HashMap;
use std::sync::Arc;

use robin_etl_core::{EngineError, PipelineConfig, StructType};
use serde_json::Value as JsonValue;
use tracing::info;

use crate::exec::ExecContext;
use crate::io::{TableSink, TableSource};
use crate::pipeline::Pipeline;
use crate::table::{Record, Table};

/// Builder for creating a [`Session`] with configuration options.
#[derive(Debug, Default)]
pub struct SessionBuilder {
    app_name: Option<String>,
    config: HashMap<String, String>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    /// Set one config key, e.g. `config("etl.caseSensitive", "true")`.
    pub fn config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Merge every setting of `config` into the builder.
    pub fn with_config(mut self, config: &PipelineConfig) -> Self {
        self.config.extend(config.to_session_config());
        self
    }

    pub fn get_or_create(self) -> Session {
        Session::new(self.app_name, self.config)
    }
}

/// Main entry point for creating tables and running pipelines.
///
/// Tables created by a session share its execution settings: column-name case sensitivity
/// and the parallelism threshold.
#[derive(Debug, Clone)]
pub struct Session {
    app_name: Option<String>,
    config: HashMap<String, String>,
    pipeline_config: PipelineConfig,
    ctx: Arc<ExecContext>,
}

impl Session {
    pub fn new(app_name: Option<String>, config: HashMap<String, String>) -> Self {
        let pipeline_config = PipelineConfig::from_session_config(&config);
        info!(
            "session {} created (case_sensitive={}, parallel_threshold={:?})",
            app_name.as_deref().unwrap_or("<unnamed>"),
            pipeline_config.case_sensitive,
            pipeline_config.parallel_threshold
        );
        Session {
            app_name,
            config,
            ctx: ExecContext::from_config(&pipeline_config),
            pipeline_config,
        }
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::builder().with_config(config).get_or_create()
    }

    pub fn app_name(&self) -> Option<&str> {
        self.app_name.as_deref()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.pipeline_config
    }

    /// Raw config value as passed to the builder.
    pub fn get_config(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.pipeline_config.case_sensitive
    }

    /// Create a table from records, checking each one against `schema`.
    pub fn create_table(&self, schema: StructType, rows: Vec<Record>) -> Result<Table, EngineError> {
        Table::with_context(schema, rows, self.ctx.clone())
    }

    /// Create a table from JSON rows and `(name, dtype)` pairs such as `("price", "bigint")`.
    ///
    /// # Example
    /// ```
    /// use robin_etl::session::Session;
    /// use serde_json::json;
    ///
    /// let session = Session::builder().app_name("test").get_or_create();
    /// let table = session
    ///     .create_table_from_rows(
    ///         vec![vec![json!(1), json!("Alice")], vec![json!(2), json!("Bob")]],
    ///         vec![("id".into(), "bigint".into()), ("name".into(), "string".into())],
    ///     )
    ///     .unwrap();
    /// assert_eq!(table.count(), 2);
    /// ```
    pub fn create_table_from_rows(
        &self,
        rows: Vec<Vec<JsonValue>>,
        schema: Vec<(String, String)>,
    ) -> Result<Table, EngineError> {
        Table::from_json_rows_with_context(rows, schema, self.ctx.clone())
    }

    /// Load a table from `source` under this session's settings.
    pub fn read(&self, source: &dyn TableSource) -> Result<Table, EngineError> {
        source.read(self)
    }

    /// See [`crate::plan::execute_plan`].
    pub fn execute_plan(
        &self,
        data: Vec<Vec<JsonValue>>,
        schema: Vec<(String, String)>,
        plan: &[JsonValue],
    ) -> Result<Table, EngineError> {
        crate::plan::execute_plan(self, data, schema, plan)
    }

    /// Read `source`, run `pipeline`, and hand the result to `sink`.
    pub fn run_pipeline(
        &self,
        source: &dyn TableSource,
        pipeline: &Pipeline,
        sink: &mut dyn TableSink,
    ) -> Result<(), EngineError> {
        let table = self.read(source)?;
        let out = pipeline.run(&table)?;
        sink.write(&out)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::builder().get_or_create()
    }
}
