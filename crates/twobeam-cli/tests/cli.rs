use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const TINY_CONFIG: &str = r#"
{
  "material": {
    "extinctionDistanceNm": 70.2,
    "extinctionDistanceImagNm": 1070.0,
    "absorptionLengthNm": 1000.0,
    "latticeParameterNm": 0.4,
    "poissonRatio": 0.3
  },
  "imaging": {
    "beamDirection": [5.0, 2.0, 8.0],
    "foilNormal": [5.0, 2.0, 8.0],
    "gVector": [-2.0, 0.0, 0.0],
    "deviationParameter": 0.00071,
    "thicknessNm": 20.0
  },
  "dislocation": {
    "burgersVector": [0.0, 0.5, -0.5],
    "lineDirection": [5.0, 2.0, 3.0]
  },
  "sampling": {
    "pixelScaleNm": 1.0,
    "stepFraction": 0.5,
    "paddingNm": 3.0,
    "blurSigmaNm": 2.0
  }
}
"#;

fn twobeam(args: &[&str], working_dir: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_twobeam"))
        .args(args)
        .current_dir(working_dir)
        .env("RUST_LOG", "warn")
        .output()
        .expect("twobeam binary should run")
}

fn write_config(dir: &Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("config.json");
    fs::write(&path, contents).expect("config should be written");
    path
}

#[test]
fn simulate_writes_images_and_geometry() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config = write_config(temp.path(), TINY_CONFIG);
    let output_path = temp.path().join("out/images.json");

    let output = twobeam(
        &[
            "simulate",
            "--config",
            config.to_str().unwrap(),
            "--backend",
            "reference",
            "--output",
            output_path.to_str().unwrap(),
        ],
        temp.path(),
    );
    assert!(
        output.status.success(),
        "simulate should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("JSON output:"));

    let report: Value =
        serde_json::from_str(&fs::read_to_string(&output_path).expect("output should exist"))
            .expect("output should be JSON");
    assert_eq!(report["backend"], "reference");
    assert_eq!(report["failedColumns"], 0);

    let x_pixels = report["geometry"]["volume"]["xPixels"].as_u64().unwrap() as usize;
    let y_pixels = report["geometry"]["volume"]["yPixels"].as_u64().unwrap() as usize;
    let bright_field = report["brightField"].as_array().unwrap();
    assert_eq!(bright_field.len(), x_pixels);
    assert!(bright_field.iter().all(|row| row.as_array().unwrap().len() == y_pixels));
    assert_eq!(report["darkField"].as_array().unwrap().len(), x_pixels);
    assert!((report["blurSigmaPx"].as_f64().unwrap() - 2.0).abs() < 1e-12);
}

#[test]
fn simulate_defaults_output_name_from_thickness_and_deviation() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config = write_config(temp.path(), TINY_CONFIG);

    let output = twobeam(
        &["simulate", "--config", config.to_str().unwrap(), "--threads", "2"],
        temp.path(),
    );
    assert!(
        output.status.success(),
        "simulate should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(temp.path().join("twobeam_t=20_s=0.00071.json").is_file());
}

#[test]
fn geometry_prints_volume_summary() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config = write_config(temp.path(), TINY_CONFIG);

    let output = twobeam(&["geometry", "--config", config.to_str().unwrap()], temp.path());
    assert!(output.status.success());

    let summary: Value = serde_json::from_slice(&output.stdout).expect("summary should be JSON");
    assert_eq!(summary["volume"]["xPixels"], 6);
    assert_eq!(summary["volume"]["branch"], "inclined");
    assert_eq!(summary["xAxisSource"], "line direction x beam direction");
}

#[test]
fn check_backends_reports_agreement() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config = write_config(temp.path(), TINY_CONFIG);

    let output = twobeam(
        &["check-backends", "--config", config.to_str().unwrap()],
        temp.path(),
    );
    assert!(
        output.status.success(),
        "backends should agree, stdout: {}",
        String::from_utf8_lossy(&output.stdout)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("Backend check: PASS"));
}

#[test]
fn default_config_round_trips_through_simulate_input() {
    let temp = TempDir::new().expect("tempdir should be created");
    let output = twobeam(&["default-config"], temp.path());
    assert!(output.status.success());

    let config: Value = serde_json::from_slice(&output.stdout).expect("config should be JSON");
    assert_eq!(config["imaging"]["thicknessNm"], 323.0);
    assert_eq!(config["backend"], "accelerated");
    assert_eq!(config["sampling"]["coreRegularization"]["policy"], "burgersFraction");
}

#[test]
fn degenerate_g_vector_fails_with_input_validation_exit_code() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config = write_config(
        temp.path(),
        &TINY_CONFIG.replace(r#""gVector": [-2.0, 0.0, 0.0]"#, r#""gVector": [0.0, 0.0, 0.0]"#),
    );

    let output = twobeam(&["simulate", "--config", config.to_str().unwrap()], temp.path());
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR: [INPUT.DEGENERATE_VECTOR]"), "stderr: {stderr}");
    assert!(stderr.contains("FATAL EXIT CODE: 2"));
}

#[test]
fn missing_config_fails_with_io_exit_code() {
    let temp = TempDir::new().expect("tempdir should be created");
    let missing = temp.path().join("absent.json");

    let output = twobeam(&["geometry", "--config", missing.to_str().unwrap()], temp.path());
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("[IO.CONFIG_READ]"));
}

#[test]
fn unknown_backend_is_a_usage_error() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config = write_config(temp.path(), TINY_CONFIG);

    let output = twobeam(
        &["simulate", "--config", config.to_str().unwrap(), "--backend", "gpu"],
        temp.path(),
    );
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("[INPUT.CLI_USAGE]"));
}
