//! Execution backends for the two data-parallel phases of a simulation.
//!
//! Deviation-field cells and image columns are independent work items. The
//! physics in [`crate::deviation`] and [`crate::integrator`] is written as pure
//! per-item functions and a backend only decides how those items are scheduled.
//! Every backend must return results in index order.

mod accelerated;
mod reference;

pub use accelerated::AcceleratedBackend;
pub use reference::ReferenceBackend;

use crate::deviation::CellSample;
use crate::domain::BackendKind;
use crate::integrator::ColumnOutcome;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("thread count must be at least 1")]
    ZeroThreads,
    #[error("{backend} backend does not take a thread count")]
    ThreadsUnsupported { backend: BackendKind },
    #[error("failed to build worker pool with {threads} threads: {source}")]
    ThreadPool {
        threads: usize,
        #[source]
        source: rayon::ThreadPoolBuildError,
    },
}

pub trait ExecutionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Human-readable description for logs, e.g. worker count.
    fn description(&self) -> String;

    /// Evaluates `task(0) .. task(count - 1)` and returns the samples in index order.
    fn map_cells(
        &self,
        count: usize,
        task: &(dyn Fn(usize) -> CellSample + Send + Sync),
    ) -> Vec<CellSample>;

    /// Integrates `task(0) .. task(count - 1)` and returns the outcomes in index order.
    fn map_columns(
        &self,
        count: usize,
        task: &(dyn Fn(usize) -> ColumnOutcome + Send + Sync),
    ) -> Vec<ColumnOutcome>;
}

/// Builds the backend for `kind`. `threads` pins the accelerated worker pool;
/// `None` uses the global pool.
pub fn create_backend(
    kind: BackendKind,
    threads: Option<usize>,
) -> Result<Box<dyn ExecutionBackend>, BackendError> {
    match (kind, threads) {
        (BackendKind::Reference, None) => Ok(Box::new(ReferenceBackend)),
        (BackendKind::Reference, Some(_)) => {
            Err(BackendError::ThreadsUnsupported { backend: kind })
        }
        (BackendKind::Accelerated, None) => Ok(Box::new(AcceleratedBackend::new())),
        (BackendKind::Accelerated, Some(threads)) => {
            Ok(Box::new(AcceleratedBackend::with_threads(threads)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BackendError, ExecutionBackend, create_backend};
    use crate::deviation::CellSample;
    use crate::domain::BackendKind;
    use crate::integrator::NumericalInstabilityError;
    use crate::numerics::BeamAmplitudes;

    fn cell(index: usize) -> CellSample {
        CellSample {
            value: (index as f64).sqrt(),
            regularized: index % 7 == 0,
        }
    }

    fn check_ordering(backend: &dyn ExecutionBackend) {
        let cells = backend.map_cells(1000, &cell);
        assert_eq!(cells.len(), 1000);
        for (index, sample) in cells.iter().enumerate() {
            assert_eq!(*sample, cell(index));
        }

        let columns = backend.map_columns(64, &|index| {
            if index == 9 {
                Err(NumericalInstabilityError {
                    x: 1,
                    y: 1,
                    slice: 3,
                })
            } else {
                Ok(BeamAmplitudes::entry_surface())
            }
        });
        assert_eq!(columns.len(), 64);
        assert!(columns[9].is_err());
        assert_eq!(columns.iter().filter(|outcome| outcome.is_ok()).count(), 63);
    }

    #[test]
    fn every_backend_preserves_index_order() {
        for kind in [BackendKind::Reference, BackendKind::Accelerated] {
            let backend = create_backend(kind, None).expect("backend should build");
            assert_eq!(backend.kind(), kind);
            check_ordering(backend.as_ref());
        }

        let pinned =
            create_backend(BackendKind::Accelerated, Some(2)).expect("pinned pool should build");
        assert!(pinned.description().contains('2'));
        check_ordering(pinned.as_ref());
    }

    #[test]
    fn thread_count_is_rejected_where_it_makes_no_sense() {
        assert!(matches!(
            create_backend(BackendKind::Accelerated, Some(0)),
            Err(BackendError::ZeroThreads)
        ));
        assert!(matches!(
            create_backend(BackendKind::Reference, Some(4)),
            Err(BackendError::ThreadsUnsupported { .. })
        ));
    }

    #[test]
    fn empty_work_yields_empty_results() {
        let backend = create_backend(BackendKind::Accelerated, None).expect("backend should build");
        assert!(backend.map_cells(0, &cell).is_empty());
    }
}
