//! End-to-end simulation: config → geometry → deviation field → images.

use crate::backend::{BackendError, ExecutionBackend, create_backend};
use crate::deviation::DeviationSynthesizer;
use crate::domain::{BackendKind, SimError, SimResult, SimulationConfig};
use crate::geometry::ResolvedGeometry;
use crate::integrator::{ColumnIntegrator, SimulationImages};
use crate::numerics::{GeometryError, NumericTolerance, compare_with_tolerance};
use std::time::{Duration, Instant};

/// Largest deviation-field cross-section, in cells, a run may allocate.
pub const MAX_FIELD_CELLS: usize = 250_000_000;
/// Largest image, in pixels (columns), a run may integrate.
pub const MAX_IMAGE_PIXELS: usize = 50_000_000;

impl From<GeometryError> for SimError {
    fn from(error: GeometryError) -> Self {
        match &error {
            GeometryError::DegenerateVector { .. } => {
                SimError::input_validation("INPUT.DEGENERATE_VECTOR", error.to_string())
            }
            GeometryError::UnresolvableGeometry { .. } => {
                SimError::input_validation("INPUT.UNRESOLVABLE_GEOMETRY", error.to_string())
            }
        }
    }
}

impl From<BackendError> for SimError {
    fn from(error: BackendError) -> Self {
        match &error {
            BackendError::ThreadPool { .. } => {
                SimError::io_system("IO.THREAD_POOL", error.to_string())
            }
            BackendError::ZeroThreads | BackendError::ThreadsUnsupported { .. } => {
                SimError::input_validation("INPUT.BACKEND_THREADS", error.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PhaseTimings {
    pub geometry: Duration,
    pub deviation_field: Duration,
    pub integration: Duration,
}

impl PhaseTimings {
    pub fn total(&self) -> Duration {
        self.geometry + self.deviation_field + self.integration
    }
}

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub geometry: ResolvedGeometry,
    pub images: SimulationImages,
    pub backend: BackendKind,
    /// Deviation-field cells evaluated on the core floor radius.
    pub regularized_cells: usize,
    /// Largest |β'| in the cross-section (nm⁻¹).
    pub field_max_abs: f64,
    /// Gaussian blur width for downstream rendering; never applied here.
    pub blur_sigma_px: f64,
    pub timings: PhaseTimings,
}

/// Validates `config` and resolves its geometry, rejecting volumes too large to run.
pub fn resolve_geometry(config: &SimulationConfig) -> SimResult<ResolvedGeometry> {
    config.validate()?;
    let geometry = ResolvedGeometry::resolve(config)?;

    let volume = geometry.volume;
    if volume.field_cells() > MAX_FIELD_CELLS || volume.image_pixels() > MAX_IMAGE_PIXELS {
        return Err(SimError::computation(
            "COMPUTE.VOLUME_TOO_LARGE",
            format!(
                "simulation volume {}x{}x{} exceeds the limits of {MAX_FIELD_CELLS} field cells and {MAX_IMAGE_PIXELS} image pixels",
                volume.x_pixels, volume.y_pixels, volume.z_slices
            ),
        ));
    }
    Ok(geometry)
}

/// Runs `config` on the backend it names.
pub fn run_simulation(config: &SimulationConfig) -> SimResult<SimulationOutput> {
    let backend = create_backend(config.backend, None)?;
    run_simulation_with_backend(config, backend.as_ref())
}

pub fn run_simulation_with_backend(
    config: &SimulationConfig,
    backend: &dyn ExecutionBackend,
) -> SimResult<SimulationOutput> {
    let started = Instant::now();
    let geometry = resolve_geometry(config)?;
    let mut timings = PhaseTimings {
        geometry: started.elapsed(),
        ..PhaseTimings::default()
    };

    tracing::info!(
        backend = %backend.description(),
        x_pixels = geometry.volume.x_pixels,
        y_pixels = geometry.volume.y_pixels,
        z_slices = geometry.volume.z_slices,
        column_slices = geometry.volume.column_slices,
        "starting two-beam simulation"
    );

    let started = Instant::now();
    let field = DeviationSynthesizer::new(&geometry, config).synthesize(backend);
    timings.deviation_field = started.elapsed();
    let field_max_abs = field.max_abs();
    tracing::debug!(
        elapsed_ms = timings.deviation_field.as_millis() as u64,
        field_max_abs,
        "deviation field ready"
    );

    let started = Instant::now();
    let images = ColumnIntegrator::new(&geometry, config, &field).integrate_image(backend);
    timings.integration = started.elapsed();

    if let Some(first) = images.failures().first() {
        tracing::warn!(
            failed_columns = images.failures().len(),
            failed_ratio = images.failed_ratio(),
            first_failure = %first,
            "some columns became numerically unstable and are marked NaN"
        );
    }
    tracing::info!(
        elapsed_ms = timings.total().as_millis() as u64,
        regularized_cells = field.regularized_cells(),
        "two-beam simulation finished"
    );

    Ok(SimulationOutput {
        geometry,
        images,
        backend: backend.kind(),
        regularized_cells: field.regularized_cells(),
        field_max_abs,
        blur_sigma_px: config.blur_sigma_px(),
        timings,
    })
}

/// Pixel-wise agreement of two image pairs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageComparison {
    pub compared: usize,
    pub mismatches: usize,
    pub max_abs_diff: f64,
}

impl ImageComparison {
    pub fn passes(&self) -> bool {
        self.mismatches == 0
    }
}

/// Compares bright- and dark-field images pixel by pixel. Images of different
/// shapes never match.
pub fn compare_images(
    baseline: &SimulationImages,
    candidate: &SimulationImages,
    tolerance: NumericTolerance,
) -> ImageComparison {
    if baseline.x_pixels() != candidate.x_pixels() || baseline.y_pixels() != candidate.y_pixels()
    {
        return ImageComparison {
            compared: 0,
            mismatches: 1,
            max_abs_diff: f64::INFINITY,
        };
    }

    let mut comparison = ImageComparison {
        compared: 0,
        mismatches: 0,
        max_abs_diff: 0.0,
    };
    for (lhs, rhs) in [
        (baseline.bright_field(), candidate.bright_field()),
        (baseline.dark_field(), candidate.dark_field()),
    ] {
        for x in 0..baseline.x_pixels() {
            for y in 0..baseline.y_pixels() {
                let result = compare_with_tolerance(lhs[(x, y)], rhs[(x, y)], tolerance);
                comparison.compared += 1;
                comparison.max_abs_diff = comparison.max_abs_diff.max(result.abs_diff);
                if !result.passes {
                    comparison.mismatches += 1;
                }
            }
        }
    }
    comparison
}
