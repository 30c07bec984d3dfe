use twobeam_core::domain::{BackendKind, SimulationConfig};
use twobeam_core::integrator::{SimulationImages, integrate_column};
use twobeam_core::numerics::{ExtinctionDistances, TwoBeamStepper};
use twobeam_core::simulation::run_simulation;

const COLUMN_NM: f64 = 60.0;

fn extinction() -> ExtinctionDistances {
    ExtinctionDistances {
        real_nm: 70.2,
        imag_nm: 1070.0,
        absorption_nm: 1000.0,
    }
}

/// Smooth strain bump centred mid-column: `A / (1 + ((z - z0)/w)²)`.
fn lorentzian(depth_nm: f64) -> f64 {
    let amplitude = 0.05;
    let width_nm = 4.0;
    let centre_nm = 0.5 * COLUMN_NM;
    amplitude / (1.0 + ((depth_nm - centre_nm) / width_nm).powi(2))
}

fn exit_intensities(step_nm: f64) -> (f64, f64) {
    let stepper = TwoBeamStepper::new(extinction(), step_nm);
    let slices = (COLUMN_NM / step_nm).round() as usize;
    let exit = integrate_column(&stepper, slices, (0, 0), |j| 0.005 + lorentzian(j * step_nm))
        .expect("smooth column stays finite");
    (exit.bright_field(), exit.dark_field())
}

#[test]
fn halving_the_step_converges_at_high_order() {
    let steps = [0.5, 0.25, 0.125];
    let results = steps.map(exit_intensities);

    let coarse_diff = (results[0].0 - results[1].0)
        .abs()
        .max((results[0].1 - results[1].1).abs());
    let fine_diff = (results[1].0 - results[2].0)
        .abs()
        .max((results[1].1 - results[2].1).abs());

    assert!(
        coarse_diff <= 0.01 * steps[0] * steps[0],
        "coarse difference {coarse_diff:e} too large"
    );
    assert!(
        fine_diff <= coarse_diff / 3.0 || fine_diff < 1e-10,
        "fine difference {fine_diff:e} did not shrink from {coarse_diff:e}"
    );
}

#[test]
fn strain_bump_changes_the_exit_state() {
    let stepper = TwoBeamStepper::new(extinction(), 0.125);
    let slices = (COLUMN_NM / 0.125) as usize;
    let flat = integrate_column(&stepper, slices, (0, 0), |_| 0.005).expect("finite");
    let (bright, _) = exit_intensities(0.125);
    assert!((flat.bright_field() - bright).abs() > 1e-4);
}

/// Line at 45° to the beam, so every refinement keeps the columns on whole
/// field rows; columns pass at least 1 nm from the core.
fn inclined_run(step_fraction: f64) -> SimulationImages {
    let mut config = SimulationConfig::default().with_backend(BackendKind::Reference);
    config.imaging.beam_direction = [0.0, 0.0, 1.0];
    config.imaging.foil_normal = [0.0, 0.0, 1.0];
    config.imaging.thickness_nm = 20.0;
    config.dislocation.line_direction = [1.0, 0.0, 1.0];
    config.dislocation.burgers_vector = [0.5, 0.5, 0.0];
    config.sampling.pixel_scale_nm = 2.0;
    config.sampling.padding_nm = 6.0;
    config.sampling.step_fraction = step_fraction;
    run_simulation(&config)
        .expect("simulation should run")
        .images
}

fn max_image_difference(lhs: &SimulationImages, rhs: &SimulationImages) -> f64 {
    assert_eq!(lhs.x_pixels(), rhs.x_pixels());
    assert_eq!(lhs.y_pixels(), rhs.y_pixels());
    let mut max_diff: f64 = 0.0;
    for x in 0..lhs.x_pixels() {
        for y in 0..lhs.y_pixels() {
            max_diff = max_diff
                .max((lhs.bright_field()[(x, y)] - rhs.bright_field()[(x, y)]).abs())
                .max((lhs.dark_field()[(x, y)] - rhs.dark_field()[(x, y)]).abs());
        }
    }
    max_diff
}

#[test]
fn halving_the_step_fraction_converges_end_to_end() {
    let runs = [0.1, 0.05, 0.025].map(inclined_run);
    for images in &runs {
        assert!(images.failures().is_empty());
    }

    let coarse_diff = max_image_difference(&runs[0], &runs[1]);
    let fine_diff = max_image_difference(&runs[1], &runs[2]);
    assert!(coarse_diff < 0.05, "coarse difference {coarse_diff:e} too large");
    assert!(
        fine_diff <= coarse_diff / 2.0 || fine_diff < 1e-9,
        "fine difference {fine_diff:e} did not shrink from {coarse_diff:e}"
    );
}
