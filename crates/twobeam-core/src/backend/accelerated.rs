//! Shared-memory parallel backend using Rayon.

use super::{BackendError, ExecutionBackend};
use crate::deviation::CellSample;
use crate::domain::BackendKind;
use crate::integrator::ColumnOutcome;
use rayon::prelude::*;

pub struct AcceleratedBackend {
    pool: Option<rayon::ThreadPool>,
    num_threads: usize,
}

impl AcceleratedBackend {
    /// Runs on the global Rayon pool.
    pub fn new() -> Self {
        Self {
            pool: None,
            num_threads: rayon::current_num_threads(),
        }
    }

    /// Runs on a dedicated pool of `num_threads` workers.
    pub fn with_threads(num_threads: usize) -> Result<Self, BackendError> {
        if num_threads == 0 {
            return Err(BackendError::ZeroThreads);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|source| BackendError::ThreadPool {
                threads: num_threads,
                source,
            })?;
        Ok(Self {
            pool: Some(pool),
            num_threads,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    fn par_map<T: Send>(&self, count: usize, task: &(dyn Fn(usize) -> T + Send + Sync)) -> Vec<T> {
        let run = || -> Vec<T> { (0..count).into_par_iter().map(task).collect() };
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}

impl Default for AcceleratedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionBackend for AcceleratedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Accelerated
    }

    fn description(&self) -> String {
        format!("accelerated ({} threads)", self.num_threads)
    }

    fn map_cells(
        &self,
        count: usize,
        task: &(dyn Fn(usize) -> CellSample + Send + Sync),
    ) -> Vec<CellSample> {
        self.par_map(count, task)
    }

    fn map_columns(
        &self,
        count: usize,
        task: &(dyn Fn(usize) -> ColumnOutcome + Send + Sync),
    ) -> Vec<ColumnOutcome> {
        self.par_map(count, task)
    }
}
