//! Session configuration.
//!
//! Build a [`PipelineConfig`] from code, from the environment (`ROBIN_ETL_*`), or from
//! the string key/value map a session carries, then hand it to a session builder.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const ENV_CASE_SENSITIVE: &str = "ROBIN_ETL_CASE_SENSITIVE";
pub const ENV_PARALLEL_THRESHOLD: &str = "ROBIN_ETL_PARALLEL_THRESHOLD";
pub const ENV_THREADS: &str = "ROBIN_ETL_THREADS";

pub const KEY_CASE_SENSITIVE: &str = "etl.caseSensitive";
pub const KEY_PARALLEL_THRESHOLD: &str = "etl.parallelThreshold";
pub const KEY_THREADS: &str = "etl.threads";

/// Execution settings shared by every table created from one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Match column names exactly. Defaults to false (PySpark `spark.sql.caseSensitive`).
    pub case_sensitive: bool,
    /// Row count from which per-record work runs on the rayon pool; `None` keeps everything sequential.
    pub parallel_threshold: Option<usize>,
    /// Size of a dedicated thread pool; `None` uses rayon's global pool.
    pub threads: Option<usize>,
    /// Extra keys carried into the session config unchanged.
    pub extra: HashMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            case_sensitive: false,
            parallel_threshold: None,
            threads: None,
            extra: HashMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Read `ROBIN_ETL_CASE_SENSITIVE`, `ROBIN_ETL_PARALLEL_THRESHOLD`, and `ROBIN_ETL_THREADS`.
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = PipelineConfig::default();
        if let Some(v) = lookup(ENV_CASE_SENSITIVE).and_then(|s| parse_bool(&s)) {
            config.case_sensitive = v;
        }
        config.parallel_threshold = lookup(ENV_PARALLEL_THRESHOLD).and_then(|s| s.trim().parse().ok());
        config.threads = lookup(ENV_THREADS)
            .and_then(|s| s.trim().parse().ok())
            .filter(|&n: &usize| n > 0);
        config
    }

    /// Rebuild a config from a session's key/value map. Unknown keys land in `extra`.
    pub fn from_session_config(map: &HashMap<String, String>) -> Self {
        let mut config = PipelineConfig::default();
        for (key, value) in map {
            match key.as_str() {
                KEY_CASE_SENSITIVE => {
                    config.case_sensitive = parse_bool(value).unwrap_or(false);
                }
                KEY_PARALLEL_THRESHOLD => config.parallel_threshold = value.trim().parse().ok(),
                KEY_THREADS => {
                    config.threads = value.trim().parse().ok().filter(|&n: &usize| n > 0);
                }
                _ => {
                    config.extra.insert(key.clone(), value.clone());
                }
            }
        }
        config
    }

    /// Flatten into the key/value form a session builder accepts.
    pub fn to_session_config(&self) -> HashMap<String, String> {
        let mut map = self.extra.clone();
        map.insert(KEY_CASE_SENSITIVE.to_string(), self.case_sensitive.to_string());
        if let Some(n) = self.parallel_threshold {
            map.insert(KEY_PARALLEL_THRESHOLD.to_string(), n.to_string());
        }
        if let Some(n) = self.threads {
            map.insert(KEY_THREADS.to_string(), n.to_string());
        }
        map
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
