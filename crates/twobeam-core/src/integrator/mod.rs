//! Column-by-column integration of the two-beam equations.
//!
//! Each image pixel (x, y) is the exit-surface state of a column through the
//! foil. The column samples the cross-section field at depth
//! `k(j) = j + (z_slices - column_slices)/2 - Y·shift`, where `Y` is the pixel
//! offset from the image centre along y and `shift` the per-row depth shift of
//! the inclined line.

use crate::backend::ExecutionBackend;
use crate::deviation::DeviationField;
use crate::domain::SimulationConfig;
use crate::geometry::ResolvedGeometry;
use crate::numerics::{BeamAmplitudes, ExtinctionDistances, TwoBeamStepper};
use faer::Mat;

/// A column whose amplitudes stopped being finite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("column ({x}, {y}) produced non-finite amplitudes at slice {slice}")]
pub struct NumericalInstabilityError {
    pub x: usize,
    pub y: usize,
    pub slice: usize,
}

pub type ColumnOutcome = Result<BeamAmplitudes, NumericalInstabilityError>;

/// Integrates one column of `slices` steps from the entry surface.
///
/// `deviation(j)` is the effective deviation parameter (nm⁻¹) at the
/// fractional slice index `j`; each RK4 step reads it at `j`, `j + 0.5` and
/// `j + 1`.
pub fn integrate_column(
    stepper: &TwoBeamStepper,
    slices: usize,
    pixel: (usize, usize),
    deviation: impl Fn(f64) -> f64,
) -> ColumnOutcome {
    let mut state = BeamAmplitudes::entry_surface();
    let mut start = deviation(0.0);
    for slice in 0..slices {
        let j = slice as f64;
        let mid = deviation(j + 0.5);
        let end = deviation(j + 1.0);
        state = stepper.step(state, start, mid, end);
        if !state.is_finite() {
            return Err(NumericalInstabilityError {
                x: pixel.0,
                y: pixel.1,
                slice,
            });
        }
        start = end;
    }
    Ok(state)
}

/// Maps image pixels onto lines through a [`DeviationField`].
#[derive(Debug, Clone, Copy)]
pub struct ColumnIntegrator<'a> {
    field: &'a DeviationField,
    stepper: TwoBeamStepper,
    deviation_parameter: f64,
    x_pixels: usize,
    y_pixels: usize,
    column_slices: usize,
    entry_depth: f64,
    depth_shift_per_row: f64,
}

impl<'a> ColumnIntegrator<'a> {
    pub fn new(
        geometry: &ResolvedGeometry,
        config: &SimulationConfig,
        field: &'a DeviationField,
    ) -> Self {
        let extinction = ExtinctionDistances {
            real_nm: config.material.extinction_distance_nm,
            imag_nm: config.material.extinction_distance_imag_nm,
            absorption_nm: config.material.absorption_length_nm,
        };
        let volume = geometry.volume;
        Self {
            field,
            stepper: TwoBeamStepper::new(extinction, config.step_nm()),
            deviation_parameter: config.imaging.deviation_parameter,
            x_pixels: volume.x_pixels,
            y_pixels: volume.y_pixels,
            column_slices: volume.column_slices,
            entry_depth: (volume.z_slices as f64 - volume.column_slices as f64) / 2.0,
            depth_shift_per_row: geometry.depth_shift_per_row(),
        }
    }

    pub fn image_pixels(&self) -> usize {
        self.x_pixels * self.y_pixels
    }

    /// Fractional cross-section depth read by row `y` at slice `j`.
    pub fn field_depth(&self, y: usize, j: f64) -> f64 {
        let offset = y as f64 + 0.5 - self.y_pixels as f64 / 2.0;
        j + self.entry_depth - offset * self.depth_shift_per_row
    }

    pub fn integrate_pixel(&self, x: usize, y: usize) -> ColumnOutcome {
        integrate_column(&self.stepper, self.column_slices, (x, y), |j| {
            self.deviation_parameter + self.field.sample(x, self.field_depth(y, j))
        })
    }

    /// Integrates every pixel on `backend`. Columns are numbered x-major.
    pub fn integrate_image(&self, backend: &dyn ExecutionBackend) -> SimulationImages {
        let y_pixels = self.y_pixels;
        let outcomes = backend.map_columns(self.image_pixels(), &|index| {
            self.integrate_pixel(index / y_pixels, index % y_pixels)
        });
        SimulationImages::from_outcomes(self.x_pixels, y_pixels, &outcomes)
    }
}

/// Bright- and dark-field intensities indexed (x, y). Failed columns hold NaN
/// in both images and are listed in [`SimulationImages::failures`].
#[derive(Debug, Clone)]
pub struct SimulationImages {
    bright_field: Mat<f64>,
    dark_field: Mat<f64>,
    failures: Vec<NumericalInstabilityError>,
}

impl SimulationImages {
    pub fn from_outcomes(x_pixels: usize, y_pixels: usize, outcomes: &[ColumnOutcome]) -> Self {
        let intensity = |x: usize, y: usize, pick: fn(&BeamAmplitudes) -> f64| {
            match &outcomes[x * y_pixels + y] {
                Ok(amplitudes) => pick(amplitudes),
                Err(_) => f64::NAN,
            }
        };
        let bright_field = Mat::from_fn(x_pixels, y_pixels, |x, y| {
            intensity(x, y, BeamAmplitudes::bright_field)
        });
        let dark_field = Mat::from_fn(x_pixels, y_pixels, |x, y| {
            intensity(x, y, BeamAmplitudes::dark_field)
        });
        let failures = outcomes
            .iter()
            .filter_map(|outcome| outcome.err())
            .collect();

        Self {
            bright_field,
            dark_field,
            failures,
        }
    }

    pub fn x_pixels(&self) -> usize {
        self.bright_field.nrows()
    }

    pub fn y_pixels(&self) -> usize {
        self.bright_field.ncols()
    }

    pub fn bright_field(&self) -> &Mat<f64> {
        &self.bright_field
    }

    pub fn dark_field(&self) -> &Mat<f64> {
        &self.dark_field
    }

    pub fn failures(&self) -> &[NumericalInstabilityError] {
        &self.failures
    }

    pub fn is_failed(&self, x: usize, y: usize) -> bool {
        self.bright_field[(x, y)].is_nan()
    }

    pub fn failed_ratio(&self) -> f64 {
        let pixels = self.x_pixels() * self.y_pixels();
        if pixels == 0 {
            return 0.0;
        }
        self.failures.len() as f64 / pixels as f64
    }

    pub fn failure_mask(&self) -> Vec<Vec<bool>> {
        (0..self.x_pixels())
            .map(|x| (0..self.y_pixels()).map(|y| self.is_failed(x, y)).collect())
            .collect()
    }

    pub fn bright_field_rows(&self) -> Vec<Vec<f64>> {
        matrix_rows(&self.bright_field)
    }

    pub fn dark_field_rows(&self) -> Vec<Vec<f64>> {
        matrix_rows(&self.dark_field)
    }
}

fn matrix_rows(matrix: &Mat<f64>) -> Vec<Vec<f64>> {
    (0..matrix.nrows())
        .map(|row| (0..matrix.ncols()).map(|col| matrix[(row, col)]).collect())
        .collect()
}
