//! Local deviation-parameter field of a straight dislocation.
//!
//! Dilatational contributions to the image are ignored, so the strain enters
//! only as a local change of the deviation parameter: `β' = d(g·R)/dz`, the
//! derivative of the isotropic displacement field R along the beam. Because R
//! does not vary along the line, β' is evaluated once over a generalized
//! cross-section (x, depth) and every image column reads its own line through
//! it.

use crate::backend::ExecutionBackend;
use crate::domain::SimulationConfig;
use crate::geometry::ResolvedGeometry;
use crate::numerics::vector::{GEOMETRY_EPSILON, Mat3, Vec3, mat_vec, norm};
use faer::Mat;
use std::f64::consts::PI;

/// Isotropic displacement-gradient evaluator in the dislocation frame.
///
/// The in-plane basis is (e1, e2, line) with e1 along the edge component of
/// the Burgers vector and e2 = line × e1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DislocationStrain {
    screw_nm: f64,
    edge_nm: f64,
    edge_axis: [f64; 2],
    normal_axis: [f64; 2],
    g_edge: f64,
    g_normal: f64,
    g_line: f64,
    beam_edge: f64,
    beam_normal: f64,
    poisson_ratio: f64,
}

impl DislocationStrain {
    /// All vectors are given in the dislocation frame (z along the line):
    /// Burgers vector in nm, g in nm⁻¹ and the unit beam direction.
    pub fn from_dislocation_frame(
        burgers_nm: Vec3,
        g_per_nm: Vec3,
        beam: Vec3,
        poisson_ratio: f64,
    ) -> Self {
        let edge_nm = burgers_nm[0].hypot(burgers_nm[1]);
        let edge_axis = if edge_nm > GEOMETRY_EPSILON {
            [burgers_nm[0] / edge_nm, burgers_nm[1] / edge_nm]
        } else {
            // pure screw: any in-plane axis works, take dislocation x
            [1.0, 0.0]
        };
        let normal_axis = [-edge_axis[1], edge_axis[0]];

        Self {
            screw_nm: burgers_nm[2],
            edge_nm,
            edge_axis,
            normal_axis,
            g_edge: g_per_nm[0] * edge_axis[0] + g_per_nm[1] * edge_axis[1],
            g_normal: g_per_nm[0] * normal_axis[0] + g_per_nm[1] * normal_axis[1],
            g_line: g_per_nm[2],
            beam_edge: beam[0] * edge_axis[0] + beam[1] * edge_axis[1],
            beam_normal: beam[0] * normal_axis[0] + beam[1] * normal_axis[1],
            poisson_ratio,
        }
    }

    pub fn new(geometry: &ResolvedGeometry, poisson_ratio: f64) -> Self {
        let frame = &geometry.dislocation_frame;
        Self::from_dislocation_frame(
            frame.to_frame(geometry.vectors.burgers_nm),
            frame.to_frame(geometry.vectors.g_per_nm),
            geometry.beam_in_dislocation_frame(),
            poisson_ratio,
        )
    }

    /// In-plane coordinates (along e1, along e2) of a dislocation-frame position.
    pub fn in_plane(&self, position_nm: Vec3) -> (f64, f64) {
        (
            position_nm[0] * self.edge_axis[0] + position_nm[1] * self.edge_axis[1],
            position_nm[0] * self.normal_axis[0] + position_nm[1] * self.normal_axis[1],
        )
    }

    /// `d(g·R)/dw` at in-plane offset (p, q) from the line, in nm⁻¹.
    ///
    /// Edge part (b along e1):
    /// `R1 = b/2π [θ + pq / (2(1-ν)r²)]`,
    /// `R2 = -b/2π [(1-2ν)/(4(1-ν)) ln r² + (p²-q²) / (4(1-ν)r²)]`;
    /// screw part: `R3 = b θ / 2π`.
    pub fn deviation_at(&self, p: f64, q: f64) -> f64 {
        let nu = self.poisson_ratio;
        let r2 = p * p + q * q;
        let r4 = r2 * r2;
        let edge = self.edge_nm / (2.0 * PI);
        let screw = self.screw_nm / (2.0 * PI);
        let one_minus_nu = 1.0 - nu;

        let d1_dp = edge * (-q / r2 + q * (q * q - p * p) / (2.0 * one_minus_nu * r4));
        let d1_dq = edge * (p / r2 + p * (p * p - q * q) / (2.0 * one_minus_nu * r4));
        let d2_dp = -edge
            * ((1.0 - 2.0 * nu) * p / (2.0 * one_minus_nu * r2) + p * q * q / (one_minus_nu * r4));
        let d2_dq = -edge
            * ((1.0 - 2.0 * nu) * q / (2.0 * one_minus_nu * r2) - p * p * q / (one_minus_nu * r4));
        let d3_dp = -screw * q / r2;
        let d3_dq = screw * p / r2;

        let (wp, wq) = (self.beam_edge, self.beam_normal);
        self.g_edge * (d1_dp * wp + d1_dq * wq)
            + self.g_normal * (d2_dp * wp + d2_dq * wq)
            + self.g_line * (d3_dp * wp + d3_dq * wq)
    }
}

/// One evaluated cross-section cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSample {
    pub value: f64,
    /// The cell was inside the core floor radius and evaluated on it instead.
    pub regularized: bool,
}

/// Per-cell evaluator for the generalized cross-section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviationSynthesizer {
    strain: DislocationStrain,
    to_dislocation: Mat3,
    x_pixels: usize,
    z_slices: usize,
    step_fraction: f64,
    pixel_scale_nm: f64,
    floor_radius_nm: Option<f64>,
}

impl DeviationSynthesizer {
    pub fn new(geometry: &ResolvedGeometry, config: &SimulationConfig) -> Self {
        let floor_radius_nm = config
            .sampling
            .core_regularization
            .floor_radius_nm(norm(geometry.vectors.burgers_nm));
        Self {
            strain: DislocationStrain::new(geometry, config.material.poisson_ratio),
            to_dislocation: geometry.simulation_to_dislocation(),
            x_pixels: geometry.volume.x_pixels,
            z_slices: geometry.volume.z_slices,
            step_fraction: geometry.step_fraction,
            pixel_scale_nm: geometry.pixel_scale_nm,
            floor_radius_nm,
        }
    }

    pub fn floor_radius_nm(&self) -> Option<f64> {
        self.floor_radius_nm
    }

    /// Cell centre in the simulation frame (nm), relative to the point where
    /// the line crosses the cross-section.
    pub fn cell_position_nm(&self, x: usize, k: usize) -> Vec3 {
        let offset_x = x as f64 + 0.5 - self.x_pixels as f64 / 2.0;
        let depth = (k as f64 - self.z_slices as f64 / 2.0) * self.step_fraction;
        [
            offset_x * self.pixel_scale_nm,
            0.0,
            depth * self.pixel_scale_nm,
        ]
    }

    pub fn evaluate_cell(&self, x: usize, k: usize) -> CellSample {
        let position = mat_vec(&self.to_dislocation, self.cell_position_nm(x, k));
        let (mut p, mut q) = self.strain.in_plane(position);
        let mut regularized = false;

        if let Some(floor) = self.floor_radius_nm {
            let radius = p.hypot(q);
            if radius < floor {
                regularized = true;
                if radius > 0.0 {
                    p *= floor / radius;
                    q *= floor / radius;
                } else {
                    p = floor;
                    q = 0.0;
                }
            }
        }

        CellSample {
            value: self.strain.deviation_at(p, q),
            regularized,
        }
    }

    /// Evaluates every cell of the (x, depth) cross-section on `backend`.
    pub fn synthesize(&self, backend: &dyn ExecutionBackend) -> DeviationField {
        let depth = self.z_slices + 1;
        let samples = backend.map_cells(self.x_pixels * depth, &|index| {
            self.evaluate_cell(index / depth, index % depth)
        });
        let field = DeviationField::from_samples(self.x_pixels, depth, &samples);

        if field.regularized_cells() > 0 {
            tracing::warn!(
                regularized_cells = field.regularized_cells(),
                floor_radius_nm = ?self.floor_radius_nm,
                "deviation-field cells inside the core were evaluated on the floor radius"
            );
        }
        field
    }
}

/// Deviation-parameter perturbation over the generalized cross-section,
/// indexed by (x pixel, depth step), in nm⁻¹. Read-only once built.
#[derive(Debug, Clone)]
pub struct DeviationField {
    values: Mat<f64>,
    regularized_cells: usize,
}

impl DeviationField {
    /// Samples are ordered x-major: index = x · depth + k.
    pub fn from_samples(x_pixels: usize, depth: usize, samples: &[CellSample]) -> Self {
        let values = Mat::from_fn(x_pixels, depth, |x, k| samples[x * depth + k].value);
        let regularized_cells = samples.iter().filter(|sample| sample.regularized).count();
        Self {
            values,
            regularized_cells,
        }
    }

    pub fn from_fn(x_pixels: usize, depth: usize, value: impl FnMut(usize, usize) -> f64) -> Self {
        Self {
            values: Mat::from_fn(x_pixels, depth, value),
            regularized_cells: 0,
        }
    }

    /// A perfect crystal: no perturbation anywhere.
    pub fn zeros(x_pixels: usize, depth: usize) -> Self {
        Self::from_fn(x_pixels, depth, |_, _| 0.0)
    }

    pub fn x_pixels(&self) -> usize {
        self.values.nrows()
    }

    pub fn depth(&self) -> usize {
        self.values.ncols()
    }

    pub fn regularized_cells(&self) -> usize {
        self.regularized_cells
    }

    pub fn value(&self, x: usize, k: usize) -> f64 {
        self.values[(x, k)]
    }

    /// Value at a fractional depth index, linearly interpolated and clamped
    /// to the field.
    pub fn sample(&self, x: usize, depth: f64) -> f64 {
        let last = self.depth() - 1;
        let clamped = depth.clamp(0.0, last as f64);
        let lower = clamped.floor() as usize;
        let fraction = clamped - lower as f64;
        let lower_value = self.values[(x, lower)];
        if fraction == 0.0 {
            return lower_value;
        }
        let upper_value = self.values[(x, (lower + 1).min(last))];
        lower_value + (upper_value - lower_value) * fraction
    }

    pub fn max_abs(&self) -> f64 {
        let mut max: f64 = 0.0;
        for x in 0..self.x_pixels() {
            for k in 0..self.depth() {
                max = max.max(self.values[(x, k)].abs());
            }
        }
        max
    }
}
