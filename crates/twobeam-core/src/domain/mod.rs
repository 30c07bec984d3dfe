pub mod errors;

pub use errors::{SimError, SimErrorCategory, SimResult};

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Execution backend used for the per-cell and per-column task batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Accelerated,
    Reference,
}

impl BackendKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accelerated => "accelerated",
            Self::Reference => "reference",
        }
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

impl FromStr for BackendKind {
    type Err = SimError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "accelerated" => Ok(Self::Accelerated),
            "reference" => Ok(Self::Reference),
            other => Err(SimError::input_validation(
                "INPUT.BACKEND",
                format!("unknown backend '{other}', expected 'accelerated' or 'reference'"),
            )),
        }
    }
}

/// Treatment of deviation-field cells that fall inside the dislocation core.
///
/// The isotropic displacement gradient diverges as 1/r at the line, so cells
/// closer than the floor radius are pushed radially out to it. The count of
/// such cells is reported with the field.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(
    tag = "policy",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum CoreRegularization {
    /// Floor radius as a fraction of the Burgers vector magnitude.
    BurgersFraction { fraction: f64 },
    /// Floor radius in nm.
    DistanceFloor { radius_nm: f64 },
    /// Evaluate at the exact offset; a cell on the line yields a non-finite value.
    Unregularized,
}

impl Default for CoreRegularization {
    fn default() -> Self {
        Self::BurgersFraction { fraction: 0.5 }
    }
}

impl CoreRegularization {
    pub fn floor_radius_nm(self, burgers_magnitude_nm: f64) -> Option<f64> {
        match self {
            Self::BurgersFraction { fraction } => Some(fraction * burgers_magnitude_nm),
            Self::DistanceFloor { radius_nm } => Some(radius_nm),
            Self::Unregularized => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialConfig {
    /// Real part of the extinction distance for g (nm).
    pub extinction_distance_nm: f64,
    /// Imaginary (anomalous absorption) part of the extinction distance for g (nm).
    /// Should exceed `absorption_length_nm`.
    pub extinction_distance_imag_nm: f64,
    /// Imaginary part of the 000 extinction distance, X0i (nm). Thickness
    /// fringes fade out at roughly this depth.
    pub absorption_length_nm: f64,
    pub lattice_parameter_nm: f64,
    pub poisson_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagingConfig {
    /// Electron beam direction, pointing into the image (Miller indices).
    pub beam_direction: [f64; 3],
    /// Foil normal, pointing into the image (Miller indices).
    pub foil_normal: [f64; 3],
    /// Diffraction vector (Miller indices).
    pub g_vector: [f64; 3],
    /// Nominal deviation parameter s (nm⁻¹).
    pub deviation_parameter: f64,
    pub thickness_nm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DislocationConfig {
    /// Burgers vector in lattice units.
    pub burgers_vector: [f64; 3],
    /// Line direction (Miller indices).
    pub line_direction: [f64; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingConfig {
    /// Physical length per pixel (nm). Also the depth of one slice.
    pub pixel_scale_nm: f64,
    /// Integration step as a fraction of one slice. Smaller is more accurate
    /// and proportionally slower; reduce until the image stops changing.
    pub step_fraction: f64,
    /// Margin around the dislocation (nm).
    pub padding_nm: f64,
    /// Gaussian blur sigma for the downstream blur stage (nm). Not applied here.
    pub blur_sigma_nm: f64,
    #[serde(default)]
    pub core_regularization: CoreRegularization,
}

/// Immutable input record for one simulation run. Cubic crystals only; every
/// vector is expressed in the crystal frame.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    pub material: MaterialConfig,
    pub imaging: ImagingConfig,
    pub dislocation: DislocationConfig,
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub backend: BackendKind,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            material: MaterialConfig {
                extinction_distance_nm: 70.2,
                extinction_distance_imag_nm: 1070.0,
                absorption_length_nm: 1000.0,
                lattice_parameter_nm: 0.4,
                poisson_ratio: 0.3,
            },
            imaging: ImagingConfig {
                beam_direction: [5.0, 2.0, 8.0],
                foil_normal: [5.0, 2.0, 8.0],
                g_vector: [-2.0, 0.0, 0.0],
                deviation_parameter: 0.00071,
                thickness_nm: 323.0,
            },
            dislocation: DislocationConfig {
                burgers_vector: [0.0, 0.5, -0.5],
                line_direction: [5.0, 2.0, 3.0],
            },
            sampling: SamplingConfig {
                pixel_scale_nm: 0.5,
                step_fraction: 0.1,
                padding_nm: 40.0,
                blur_sigma_nm: 2.0,
                core_regularization: CoreRegularization::default(),
            },
            backend: BackendKind::Accelerated,
        }
    }
}

impl SimulationConfig {
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Thickness in pixels (one slice is one pixel deep).
    pub fn thickness_px(&self) -> f64 {
        self.imaging.thickness_nm / self.sampling.pixel_scale_nm
    }

    pub fn padding_px(&self) -> f64 {
        self.sampling.padding_nm / self.sampling.pixel_scale_nm
    }

    pub fn blur_sigma_px(&self) -> f64 {
        self.sampling.blur_sigma_nm / self.sampling.pixel_scale_nm
    }

    /// Physical length of one integration step (nm).
    pub fn step_nm(&self) -> f64 {
        self.sampling.step_fraction * self.sampling.pixel_scale_nm
    }

    pub fn validate(&self) -> SimResult<()> {
        let material = &self.material;
        let imaging = &self.imaging;
        let sampling = &self.sampling;

        require_positive("material.extinctionDistanceNm", material.extinction_distance_nm)?;
        require_positive(
            "material.extinctionDistanceImagNm",
            material.extinction_distance_imag_nm,
        )?;
        require_positive("material.absorptionLengthNm", material.absorption_length_nm)?;
        require_positive("material.latticeParameterNm", material.lattice_parameter_nm)?;
        if !material.poisson_ratio.is_finite()
            || material.poisson_ratio <= -1.0
            || material.poisson_ratio > 0.5
        {
            return Err(SimError::input_validation(
                "INPUT.POISSON_RATIO",
                format!(
                    "material.poissonRatio must lie in (-1, 0.5], got {}",
                    material.poisson_ratio
                ),
            ));
        }

        require_finite_vector("imaging.beamDirection", imaging.beam_direction)?;
        require_finite_vector("imaging.foilNormal", imaging.foil_normal)?;
        require_finite_vector("imaging.gVector", imaging.g_vector)?;
        require_finite_vector("dislocation.burgersVector", self.dislocation.burgers_vector)?;
        require_finite_vector("dislocation.lineDirection", self.dislocation.line_direction)?;
        if !imaging.deviation_parameter.is_finite() {
            return Err(SimError::input_validation(
                "INPUT.NON_FINITE",
                format!(
                    "imaging.deviationParameter must be finite, got {}",
                    imaging.deviation_parameter
                ),
            ));
        }
        require_positive("imaging.thicknessNm", imaging.thickness_nm)?;

        require_positive("sampling.pixelScaleNm", sampling.pixel_scale_nm)?;
        require_positive("sampling.stepFraction", sampling.step_fraction)?;
        if sampling.step_fraction > 1.0 {
            return Err(SimError::input_validation(
                "INPUT.STEP_FRACTION",
                format!(
                    "sampling.stepFraction is a fraction of one slice and must be <= 1, got {}",
                    sampling.step_fraction
                ),
            ));
        }
        require_positive("sampling.paddingNm", sampling.padding_nm)?;
        if self.padding_px() < 0.5 {
            return Err(SimError::input_validation(
                "INPUT.PADDING",
                format!(
                    "sampling.paddingNm ({} nm) must cover at least half a pixel ({} nm)",
                    sampling.padding_nm,
                    0.5 * sampling.pixel_scale_nm
                ),
            ));
        }
        if !sampling.blur_sigma_nm.is_finite() || sampling.blur_sigma_nm < 0.0 {
            return Err(SimError::input_validation(
                "INPUT.BLUR_SIGMA",
                format!(
                    "sampling.blurSigmaNm must be finite and >= 0, got {}",
                    sampling.blur_sigma_nm
                ),
            ));
        }
        match sampling.core_regularization {
            CoreRegularization::BurgersFraction { fraction } => {
                require_positive("sampling.coreRegularization.fraction", fraction)?
            }
            CoreRegularization::DistanceFloor { radius_nm } => {
                require_positive("sampling.coreRegularization.radiusNm", radius_nm)?
            }
            CoreRegularization::Unregularized => {}
        }

        Ok(())
    }
}

fn require_positive(field: &str, value: f64) -> SimResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SimError::input_validation(
            "INPUT.NON_POSITIVE",
            format!("{field} must be finite and > 0, got {value}"),
        ))
    }
}

fn require_finite_vector(field: &str, value: [f64; 3]) -> SimResult<()> {
    if value.iter().all(|component| component.is_finite()) {
        Ok(())
    } else {
        Err(SimError::input_validation(
            "INPUT.NON_FINITE",
            format!("{field} must contain finite components, got {value:?}"),
        ))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read simulation config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse simulation config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl From<ConfigError> for SimError {
    fn from(error: ConfigError) -> Self {
        match &error {
            ConfigError::Read { .. } => SimError::io_system("IO.CONFIG_READ", error.to_string()),
            ConfigError::Parse { .. } => {
                SimError::input_validation("INPUT.CONFIG_PARSE", error.to_string())
            }
        }
    }
}

pub fn load_simulation_config(
    config_path: impl AsRef<Path>,
) -> Result<SimulationConfig, ConfigError> {
    let config_path = config_path.as_ref();
    let source = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
        path: config_path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&source).map_err(|source| ConfigError::Parse {
        path: config_path.to_path_buf(),
        source,
    })
}
