//! Per-record work scheduling: sequential below the configured threshold, rayon above it.

use std::sync::{Arc, OnceLock};

use rayon::prelude::*;
use robin_etl_core::PipelineConfig;
use tracing::warn;

/// Execution context shared by every table produced from one session.
#[derive(Debug)]
pub(crate) struct ExecContext {
    pub(crate) case_sensitive: bool,
    parallel_threshold: Option<usize>,
    threads: Option<usize>,
    pool: OnceLock<Option<rayon::ThreadPool>>,
}

impl ExecContext {
    pub(crate) fn from_config(config: &PipelineConfig) -> Arc<Self> {
        Arc::new(ExecContext {
            case_sensitive: config.case_sensitive,
            parallel_threshold: config.parallel_threshold,
            threads: config.threads,
            pool: OnceLock::new(),
        })
    }

    pub(crate) fn is_parallel(&self, len: usize) -> bool {
        self.parallel_threshold.is_some_and(|t| len >= t)
    }

    /// Map `f` over `items`, preserving input order in the output.
    pub(crate) fn map<I, T, F>(&self, items: &[I], f: F) -> Vec<T>
    where
        I: Sync,
        T: Send,
        F: Fn(&I) -> T + Sync + Send,
    {
        self.map_sized(items.len(), items, f)
    }

    /// Like [`map`](Self::map), but decides on parallelism from `work` (e.g. the row count
    /// behind a list of groups) instead of `items.len()`.
    pub(crate) fn map_sized<I, T, F>(&self, work: usize, items: &[I], f: F) -> Vec<T>
    where
        I: Sync,
        T: Send,
        F: Fn(&I) -> T + Sync + Send,
    {
        if !self.is_parallel(work) {
            return items.iter().map(f).collect();
        }
        match self.dedicated_pool() {
            Some(pool) => pool.install(|| items.par_iter().map(&f).collect()),
            None => items.par_iter().map(&f).collect(),
        }
    }

    fn dedicated_pool(&self) -> Option<&rayon::ThreadPool> {
        self.pool
            .get_or_init(|| {
                let threads = self.threads?;
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .inspect_err(|e| {
                        warn!("falling back to the global rayon pool: {e}");
                    })
                    .ok()
            })
            .as_ref()
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        ExecContext {
            case_sensitive: false,
            parallel_threshold: None,
            threads: None,
            pool: OnceLock::new(),
        }
    }
}
