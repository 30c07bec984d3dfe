use super::ExecutionBackend;
use crate::deviation::CellSample;
use crate::domain::BackendKind;
use crate::integrator::ColumnOutcome;

/// Single-threaded backend; the baseline the accelerated backend is checked against.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceBackend;

impl ExecutionBackend for ReferenceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Reference
    }

    fn description(&self) -> String {
        "reference (sequential)".to_string()
    }

    fn map_cells(
        &self,
        count: usize,
        task: &(dyn Fn(usize) -> CellSample + Send + Sync),
    ) -> Vec<CellSample> {
        (0..count).map(task).collect()
    }

    fn map_columns(
        &self,
        count: usize,
        task: &(dyn Fn(usize) -> ColumnOutcome + Send + Sync),
    ) -> Vec<ColumnOutcome> {
        (0..count).map(task).collect()
    }
}
