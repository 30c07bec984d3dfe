use twobeam_core::domain::{BackendKind, SimulationConfig};
use twobeam_core::simulation::run_simulation;

fn fine_config(burgers_vector: [f64; 3]) -> SimulationConfig {
    let mut config = SimulationConfig::default().with_backend(BackendKind::Reference);
    config.imaging.thickness_nm = 20.0;
    config.dislocation.burgers_vector = burgers_vector;
    config.sampling.pixel_scale_nm = 1.0;
    config.sampling.step_fraction = 0.05;
    config.sampling.padding_nm = 3.0;
    config
}

#[test]
fn reversing_burgers_vector_point_reflects_bright_field() {
    let forward = run_simulation(&fine_config([0.0, 0.5, -0.5])).expect("+b should run");
    let reversed = run_simulation(&fine_config([0.0, -0.5, 0.5])).expect("-b should run");

    let forward = &forward.images;
    let reversed = &reversed.images;
    assert_eq!(forward.x_pixels(), reversed.x_pixels());
    assert_eq!(forward.y_pixels(), reversed.y_pixels());

    let (x_pixels, y_pixels) = (forward.x_pixels(), forward.y_pixels());
    let mut contrast: f64 = 0.0;
    for x in 0..x_pixels {
        for y in 0..y_pixels {
            let mirrored = reversed.bright_field()[(x_pixels - 1 - x, y_pixels - 1 - y)];
            let original = forward.bright_field()[(x, y)];
            assert!(
                (original - mirrored).abs() < 1e-3,
                "pixel ({x}, {y}): {original} vs mirrored {mirrored}"
            );
            contrast = contrast.max((original - forward.bright_field()[(0, y)]).abs());
        }
    }
    // the image is not trivially uniform
    assert!(contrast > 1e-3);
}
