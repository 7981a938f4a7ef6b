//! Bounded concurrent execution of independent specs

use super::errors::{EngineError, Result};
use crate::driver::{Executor, RunOptions, RunOutput};
use crate::spec::Spec;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Outcome of one spec run by a [`ParallelRunner`]
#[derive(Debug)]
pub struct PoolResult {
    /// Module name of the spec
    pub module: String,
    /// Run outcome
    pub result: Result<RunOutput>,
}

impl PoolResult {
    /// Returns true when the run succeeded
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs specs concurrently, at most `max_parallel` at a time
#[derive(Debug, Clone)]
pub struct ParallelRunner {
    executor: Arc<Executor>,
    max_parallel: usize,
}

impl ParallelRunner {
    /// Runner over `executor`. A limit of 0 is treated as 1.
    #[must_use]
    pub fn new(executor: Arc<Executor>, max_parallel: usize) -> Self {
        Self {
            executor,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Concurrency limit
    #[must_use]
    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Runs every spec, returning results in input order.
    ///
    /// All runs share `opts`, so cancelling its token stops them all.
    pub async fn run_all(&self, specs: Vec<Spec>, opts: &RunOptions) -> Vec<PoolResult> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        tracing::info!(
            specs = specs.len(),
            max_parallel = self.max_parallel,
            "Starting parallel run"
        );

        let mut handles = Vec::with_capacity(specs.len());
        for spec in specs {
            let semaphore = Arc::clone(&semaphore);
            let executor = Arc::clone(&self.executor);
            let opts = opts.clone();
            let module = spec.meta().module_name.clone();
            let handle = tokio::spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => executor.run(&spec, &opts).await,
                    Err(_) => Err(EngineError::Canceled),
                };
                PoolResult {
                    module: spec.meta().module_name.clone(),
                    result,
                }
            });
            handles.push((module, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (module, handle) in handles {
            let result = handle.await.unwrap_or_else(|e| PoolResult {
                module,
                result: Err(EngineError::InternalInvariant(format!(
                    "spec task failed: {e}"
                ))),
            });
            results.push(result);
        }
        results
    }
}
