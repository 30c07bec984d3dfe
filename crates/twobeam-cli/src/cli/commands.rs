use super::CliError;
use anyhow::Context;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use twobeam_core::backend::create_backend;
use twobeam_core::domain::{BackendKind, SimError, SimulationConfig, load_simulation_config};
use twobeam_core::geometry::GeometrySummary;
use twobeam_core::numerics::NumericTolerance;
use twobeam_core::simulation::{
    SimulationOutput, compare_images, resolve_geometry, run_simulation_with_backend,
};

#[derive(clap::Args)]
pub(super) struct SimulateArgs {
    /// Simulation config (JSON)
    #[arg(long)]
    config: PathBuf,

    /// Backend override: accelerated or reference
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Worker threads for the accelerated backend
    #[arg(long)]
    threads: Option<usize>,

    /// Output path (default: twobeam_t=<thickness>_s=<deviation>.json)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(clap::Args)]
pub(super) struct GeometryArgs {
    /// Simulation config (JSON)
    #[arg(long)]
    config: PathBuf,
}

#[derive(clap::Args)]
pub(super) struct CheckBackendsArgs {
    /// Simulation config (JSON)
    #[arg(long)]
    config: PathBuf,

    /// Worker threads for the accelerated backend
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulationReport<'a> {
    config: &'a SimulationConfig,
    backend: BackendKind,
    geometry: GeometrySummary,
    blur_sigma_px: f64,
    regularized_cells: usize,
    field_max_abs: f64,
    failed_columns: usize,
    failed_ratio: f64,
    /// `[x, y, slice]` of each unstable column.
    failures: Vec<[usize; 3]>,
    timings_ms: TimingsReport,
    /// Indexed `[x][y]`; failed pixels serialize as null.
    bright_field: Vec<Vec<f64>>,
    dark_field: Vec<Vec<f64>>,
    failure_mask: Vec<Vec<bool>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TimingsReport {
    geometry: f64,
    deviation_field: f64,
    integration: f64,
}

impl<'a> SimulationReport<'a> {
    fn new(config: &'a SimulationConfig, output: &SimulationOutput) -> Self {
        let images = &output.images;
        Self {
            config,
            backend: output.backend,
            geometry: output.geometry.summary(),
            blur_sigma_px: output.blur_sigma_px,
            regularized_cells: output.regularized_cells,
            field_max_abs: output.field_max_abs,
            failed_columns: images.failures().len(),
            failed_ratio: images.failed_ratio(),
            failures: images
                .failures()
                .iter()
                .map(|failure| [failure.x, failure.y, failure.slice])
                .collect(),
            timings_ms: TimingsReport {
                geometry: output.timings.geometry.as_secs_f64() * 1.0e3,
                deviation_field: output.timings.deviation_field.as_secs_f64() * 1.0e3,
                integration: output.timings.integration.as_secs_f64() * 1.0e3,
            },
            bright_field: images.bright_field_rows(),
            dark_field: images.dark_field_rows(),
            failure_mask: images.failure_mask(),
        }
    }
}

pub(super) fn run_simulate_command(args: SimulateArgs) -> Result<i32, CliError> {
    let mut config = load_config(&args.config)?;
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    tracing::debug!(
        config = %args.config.display(),
        backend = %config.backend,
        threads = ?args.threads,
        "loaded simulation config"
    );
    let backend = create_backend(config.backend, args.threads).map_err(SimError::from)?;
    let output = run_simulation_with_backend(&config, backend.as_ref())?;

    let output_path = args
        .output
        .unwrap_or_else(|| default_output_path(&config));
    let report = SimulationReport::new(&config, &output);
    write_json(&output_path, &report)?;

    let volume = output.geometry.volume;
    println!(
        "Simulated {}x{} image ({} backend, {} slices per column) in {:.1} ms.",
        volume.x_pixels,
        volume.y_pixels,
        output.backend,
        volume.column_slices,
        output.timings.total().as_secs_f64() * 1.0e3
    );
    if !output.images.failures().is_empty() {
        eprintln!(
            "WARNING: [COMPUTE.UNSTABLE_COLUMNS] {} of {} columns ({:.3}%) became non-finite and are marked null.",
            output.images.failures().len(),
            volume.image_pixels(),
            output.images.failed_ratio() * 100.0
        );
    }
    println!("JSON output: {}", output_path.display());
    Ok(0)
}

pub(super) fn run_geometry_command(args: GeometryArgs) -> Result<i32, CliError> {
    let config = load_config(&args.config)?;
    let geometry = resolve_geometry(&config)?;
    let rendered = serde_json::to_string_pretty(&geometry.summary())
        .context("failed to serialize geometry summary")?;
    println!("{}", rendered);
    Ok(0)
}

pub(super) fn run_check_backends_command(args: CheckBackendsArgs) -> Result<i32, CliError> {
    let config = load_config(&args.config)?;
    let reference = create_backend(BackendKind::Reference, None).map_err(SimError::from)?;
    let accelerated =
        create_backend(BackendKind::Accelerated, args.threads).map_err(SimError::from)?;

    let baseline = run_simulation_with_backend(&config, reference.as_ref())?;
    let candidate = run_simulation_with_backend(&config, accelerated.as_ref())?;
    let comparison = compare_images(
        &baseline.images,
        &candidate.images,
        NumericTolerance::BACKEND_EQUIVALENCE,
    );

    println!(
        "Backend check: {} ({} of {} values mismatched, max |diff| = {:.3e}).",
        if comparison.passes() { "PASS" } else { "FAIL" },
        comparison.mismatches,
        comparison.compared,
        comparison.max_abs_diff
    );
    if comparison.passes() { Ok(0) } else { Ok(1) }
}

pub(super) fn run_default_config_command() -> Result<i32, CliError> {
    let rendered = serde_json::to_string_pretty(&SimulationConfig::default())
        .context("failed to serialize default config")?;
    println!("{}", rendered);
    Ok(0)
}

fn load_config(path: &Path) -> Result<SimulationConfig, CliError> {
    load_simulation_config(path).map_err(|error| CliError::Compute(SimError::from(error)))
}

fn default_output_path(config: &SimulationConfig) -> PathBuf {
    PathBuf::from(format!(
        "twobeam_t={}_s={}.json",
        config.imaging.thickness_nm, config.imaging.deviation_parameter
    ))
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<(), CliError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    let rendered = serde_json::to_string(value)
        .with_context(|| format!("failed to serialize output '{}'", path.display()))?;
    fs::write(path, rendered)
        .with_context(|| format!("failed to write output '{}'", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::default_output_path;
    use twobeam_core::domain::SimulationConfig;

    #[test]
    fn default_output_name_carries_thickness_and_deviation() {
        let path = default_output_path(&SimulationConfig::default());
        assert_eq!(path.to_string_lossy(), "twobeam_t=323_s=0.00071.json");
    }
}
