//! Resolution of the raw crystallographic inputs into unit vectors, the
//! crystal↔simulation↔dislocation frames and the simulation-volume extents.
//!
//! Simulation frame: x ⊥ line direction in the image plane, y = z × x, z along
//! the beam (into the image). Dislocation frame: x shared with the simulation
//! frame, z along the line, y = line × x.

use crate::domain::SimulationConfig;
use crate::numerics::vector::{
    AxisSource, FallbackCandidate, GEOMETRY_EPSILON, GeometryError, Mat3, OrthonormalFrame, Vec3,
    cross, dot, mat_mul, negate, norm, normalize, scale,
};
use serde::Serialize;

/// Normalized and consistently oriented inputs, in the crystal frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedVectors {
    pub beam: Vec3,
    pub foil_normal: Vec3,
    pub line: Vec3,
    /// Burgers vector in nm (lattice units × lattice parameter).
    pub burgers_nm: Vec3,
    /// g-vector in nm⁻¹ (Miller indices / lattice parameter).
    pub g_per_nm: Vec3,
    pub flipped_normal: bool,
    pub flipped_line: bool,
}

impl OrientedVectors {
    /// Normalizes beam, normal and line, then flips the normal and the
    /// (line, Burgers vector) pair so both point to the same side of the foil
    /// as the beam.
    pub fn from_config(config: &SimulationConfig) -> Result<Self, GeometryError> {
        let lattice = config.material.lattice_parameter_nm;
        let beam = normalize(config.imaging.beam_direction, "beam direction")?;
        let mut foil_normal = normalize(config.imaging.foil_normal, "foil normal")?;
        let mut line = normalize(config.dislocation.line_direction, "line direction")?;
        let mut burgers = config.dislocation.burgers_vector;
        normalize(burgers, "burgers vector")?;
        normalize(config.imaging.g_vector, "g-vector")?;

        let flipped_normal = dot(foil_normal, beam) < 0.0;
        if flipped_normal {
            foil_normal = negate(foil_normal);
        }
        let flipped_line = dot(line, beam) < 0.0;
        if flipped_line {
            line = negate(line);
            burgers = negate(burgers);
        }

        Ok(Self {
            beam,
            foil_normal,
            line,
            burgers_nm: scale(burgers, lattice),
            g_per_nm: scale(config.imaging.g_vector, 1.0 / lattice),
            flipped_normal,
            flipped_line,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeBranch {
    /// Line lies in the foil plane (line ⊥ beam).
    InPlane,
    /// Line along the beam; the image carries no strain contrast.
    ParallelToBeam,
    Inclined,
}

impl VolumeBranch {
    pub fn is_degenerate(self) -> bool {
        !matches!(self, Self::Inclined)
    }
}

/// Integer extents of the simulation volume, in pixels and slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationVolume {
    pub x_pixels: usize,
    pub y_pixels: usize,
    /// Depth extent of the generalized cross-section, in integration steps.
    pub z_slices: usize,
    /// Integration steps through the foil for one image column.
    pub column_slices: usize,
    pub branch: VolumeBranch,
}

impl SimulationVolume {
    /// Extents from already pixel-scaled padding and thickness.
    ///
    /// The x extent is even so the line sits on the boundary between the two
    /// central pixel columns. Inclined lines need extra y to capture their full
    /// projected length, and extra depth so every column finds its segment of
    /// the cross-section.
    pub fn from_scaled(
        padding_px: f64,
        thickness_px: f64,
        step_fraction: f64,
        phi: f64,
        branch: VolumeBranch,
    ) -> Self {
        let x_pixels = round_to_count(padding_px).saturating_mul(2);
        let column_slices = round_to_count(thickness_px / step_fraction);

        let (y_pixels, z_slices) = match branch {
            VolumeBranch::InPlane | VolumeBranch::ParallelToBeam => (x_pixels, column_slices),
            VolumeBranch::Inclined => {
                let tan_phi = phi.tan();
                let y_pixels = round_to_count(thickness_px * tan_phi).saturating_add(x_pixels);
                let z_slices =
                    round_to_count((thickness_px + y_pixels as f64 / tan_phi) / step_fraction);
                (y_pixels, z_slices)
            }
        };

        Self {
            x_pixels,
            y_pixels,
            z_slices,
            column_slices,
            branch,
        }
    }

    /// Saturates at `usize::MAX` so oversized volumes can still be rejected.
    pub fn image_pixels(&self) -> usize {
        self.x_pixels.saturating_mul(self.y_pixels)
    }

    /// Rows of the deviation field: one more than `z_slices` so the last
    /// integration step has an end sample.
    pub fn field_depth(&self) -> usize {
        self.z_slices.saturating_add(1)
    }

    pub fn field_cells(&self) -> usize {
        self.x_pixels.saturating_mul(self.field_depth())
    }
}

/// Rounds to the nearest count; `as` saturates values beyond `usize::MAX`.
fn round_to_count(value: f64) -> usize {
    (value + 0.5).floor().max(0.0) as usize
}

/// A g or b direction projected into the simulation frame and scaled to a
/// fixed on-image length for overlay drawing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationVector {
    pub components: Vec3,
    /// The vector points along the beam and is drawn as a dot.
    pub end_on: bool,
}

impl AnnotationVector {
    fn project(frame: &OrthonormalFrame, crystal_vector: Vec3, length_px: f64) -> Self {
        let projected = frame.to_frame(crystal_vector);
        let components = scale(projected, length_px / norm(projected));
        let end_on = components[0].abs() + components[1].abs() < 1.0e-9 * length_px;
        Self { components, end_on }
    }

    /// Arrow offset as `[column, row]` image coordinates: simulation x points
    /// up the image, simulation y along increasing columns.
    pub fn image_offset(&self) -> [f64; 2] {
        [self.components[1], -self.components[0]]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAnnotation {
    pub g_vector: AnnotationVector,
    pub burgers_vector: AnnotationVector,
    pub length_px: f64,
    /// Arrow origin, `[column, row]`.
    pub anchor_px: [f64; 2],
}

/// Everything downstream stages need to know about the geometry of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedGeometry {
    pub vectors: OrientedVectors,
    pub simulation_frame: OrthonormalFrame,
    pub dislocation_frame: OrthonormalFrame,
    /// Angle between line direction and beam (rad); 0 when they are parallel.
    pub phi: f64,
    pub volume: SimulationVolume,
    pub pixel_scale_nm: f64,
    pub step_fraction: f64,
    pub thickness_px: f64,
    pub annotation: ImageAnnotation,
}

impl ResolvedGeometry {
    pub fn resolve(config: &SimulationConfig) -> Result<Self, GeometryError> {
        let vectors = OrientedVectors::from_config(config)?;
        let cos_phi = dot(vectors.line, vectors.beam);

        let simulation_frame = OrthonormalFrame::from_axis_pair(
            ("line direction", vectors.line),
            ("beam direction", vectors.beam),
            &[
                FallbackCandidate::new("burgers vector", vectors.burgers_nm),
                FallbackCandidate::new("g-vector", vectors.g_per_nm),
            ],
        )?;

        let (branch, phi) = if (cos_phi - 1.0).abs() < GEOMETRY_EPSILON {
            (VolumeBranch::ParallelToBeam, 0.0)
        } else if cos_phi.abs() < GEOMETRY_EPSILON {
            (VolumeBranch::InPlane, cos_phi.clamp(-1.0, 1.0).acos())
        } else {
            (VolumeBranch::Inclined, cos_phi.clamp(-1.0, 1.0).acos())
        };

        if (dot(vectors.foil_normal, vectors.beam) - 1.0).abs() >= GEOMETRY_EPSILON {
            tracing::warn!(
                foil_normal = ?vectors.foil_normal,
                beam = ?vectors.beam,
                "foil normal is not along the beam; sizing the volume as for a beam-normal foil"
            );
        }

        let line = vectors.line;
        let x = simulation_frame.x();
        let dislocation_frame =
            OrthonormalFrame::from_rows(x, cross(line, x), line, simulation_frame.x_source());

        let thickness_px = config.thickness_px();
        let padding_px = config.padding_px();
        let step_fraction = config.sampling.step_fraction;
        let volume =
            SimulationVolume::from_scaled(padding_px, thickness_px, step_fraction, phi, branch);

        let length_px = padding_px / 4.0;
        let anchor = (padding_px / 2.0).floor();
        let annotation = ImageAnnotation {
            g_vector: AnnotationVector::project(&simulation_frame, vectors.g_per_nm, length_px),
            burgers_vector: AnnotationVector::project(
                &simulation_frame,
                vectors.burgers_nm,
                length_px,
            ),
            length_px,
            anchor_px: [anchor, anchor],
        };

        tracing::debug!(
            phi_deg = phi.to_degrees(),
            branch = ?branch,
            x_pixels = volume.x_pixels,
            y_pixels = volume.y_pixels,
            z_slices = volume.z_slices,
            x_axis = ?simulation_frame.x_source(),
            "resolved simulation geometry"
        );

        Ok(Self {
            vectors,
            simulation_frame,
            dislocation_frame,
            phi,
            volume,
            pixel_scale_nm: config.sampling.pixel_scale_nm,
            step_fraction,
            thickness_px,
            annotation,
        })
    }

    /// Simulation → dislocation transform (crystal → dislocation after
    /// simulation → crystal).
    pub fn simulation_to_dislocation(&self) -> Mat3 {
        mat_mul(
            &self.dislocation_frame.forward(),
            &self.simulation_frame.inverse(),
        )
    }

    /// Beam direction written in the dislocation frame.
    pub fn beam_in_dislocation_frame(&self) -> Vec3 {
        self.dislocation_frame.to_frame(self.vectors.beam)
    }

    /// Cross-section depth shift, in integration steps, per pixel of image
    /// offset along y: `cot(phi) / step`, i.e. the in-line offset scaled by
    /// `1/sin(phi)` and projected back onto the beam. Zero for the degenerate
    /// branches, whose columns map straight through.
    pub fn depth_shift_per_row(&self) -> f64 {
        if self.volume.branch.is_degenerate() {
            0.0
        } else {
            self.phi.cos() / self.phi.sin() / self.step_fraction
        }
    }

    pub fn summary(&self) -> GeometrySummary {
        GeometrySummary {
            phi_deg: self.phi.to_degrees(),
            volume: self.volume,
            x_axis_source: match self.simulation_frame.x_source() {
                AxisSource::CrossProduct => "line direction x beam direction".to_string(),
                AxisSource::Fallback(name) => name.to_string(),
            },
            beam: self.vectors.beam,
            line: self.vectors.line,
            burgers_nm: self.vectors.burgers_nm,
            g_per_nm: self.vectors.g_per_nm,
            crystal_to_simulation: self.simulation_frame.forward(),
            crystal_to_dislocation: self.dislocation_frame.forward(),
            flipped_normal: self.vectors.flipped_normal,
            flipped_line: self.vectors.flipped_line,
            annotation: self.annotation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometrySummary {
    pub phi_deg: f64,
    pub volume: SimulationVolume,
    pub x_axis_source: String,
    pub beam: Vec3,
    pub line: Vec3,
    pub burgers_nm: Vec3,
    pub g_per_nm: Vec3,
    pub crystal_to_simulation: Mat3,
    pub crystal_to_dislocation: Mat3,
    pub flipped_normal: bool,
    pub flipped_line: bool,
    pub annotation: ImageAnnotation,
}
