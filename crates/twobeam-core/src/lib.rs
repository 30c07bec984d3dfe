pub mod backend;
pub mod deviation;
pub mod domain;
pub mod geometry;
pub mod integrator;
pub mod numerics;
pub mod simulation;

pub use backend::{AcceleratedBackend, ExecutionBackend, ReferenceBackend, create_backend};
pub use domain::{BackendKind, SimError, SimErrorCategory, SimResult, SimulationConfig};
pub use geometry::ResolvedGeometry;
pub use integrator::{NumericalInstabilityError, SimulationImages};
pub use simulation::{
    ImageComparison, SimulationOutput, compare_images, resolve_geometry, run_simulation,
    run_simulation_with_backend,
};
