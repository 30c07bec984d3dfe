pub mod two_beam;
pub mod vector;

pub use two_beam::{BeamAmplitudes, ExtinctionDistances, TwoBeamStepper};
pub use vector::{
    AxisSource, FallbackCandidate, GEOMETRY_EPSILON, GeometryError, Mat3, OrthonormalFrame,
    ResolvedAxis, Vec3, cross, dot, mat_vec, norm, normalize, resolve_perpendicular_fallback,
    scale, transpose,
};

use serde::{Deserialize, Serialize};

/// Absolute/relative tolerance pair used when comparing intensity arrays.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumericTolerance {
    pub abs_tol: f64,
    pub rel_tol: f64,
    pub relative_floor: f64,
}

impl NumericTolerance {
    /// Tolerance within which every backend must reproduce the reference backend.
    pub const BACKEND_EQUIVALENCE: Self = Self {
        abs_tol: 1.0e-9,
        rel_tol: 1.0e-4,
        relative_floor: 1.0e-12,
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToleranceComparison {
    pub abs_diff: f64,
    pub rel_diff: f64,
    pub passes: bool,
}

pub fn compare_with_tolerance(
    baseline: f64,
    actual: f64,
    tolerance: NumericTolerance,
) -> ToleranceComparison {
    // NaN marks a failed column; two marks agree, a mark and a value do not.
    if baseline.is_nan() || actual.is_nan() {
        let passes = baseline.is_nan() && actual.is_nan();
        return ToleranceComparison {
            abs_diff: if passes { 0.0 } else { f64::INFINITY },
            rel_diff: if passes { 0.0 } else { f64::INFINITY },
            passes,
        };
    }

    let abs_diff = (actual - baseline).abs();
    let rel_denominator = baseline.abs().max(tolerance.relative_floor);
    let rel_diff = abs_diff / rel_denominator;
    let passes = abs_diff <= tolerance.abs_tol || abs_diff <= tolerance.rel_tol * rel_denominator;

    ToleranceComparison {
        abs_diff,
        rel_diff,
        passes,
    }
}

#[cfg(test)]
mod tests {
    use super::{NumericTolerance, compare_with_tolerance};

    #[test]
    fn tolerance_accepts_relative_or_absolute_agreement() {
        let tolerance = NumericTolerance::BACKEND_EQUIVALENCE;
        assert!(compare_with_tolerance(0.5, 0.50001, tolerance).passes);
        assert!(!compare_with_tolerance(0.5, 0.501, tolerance).passes);
        assert!(compare_with_tolerance(0.0, 1.0e-10, tolerance).passes);
    }

    #[test]
    fn nan_marks_only_match_each_other() {
        let tolerance = NumericTolerance::BACKEND_EQUIVALENCE;
        assert!(compare_with_tolerance(f64::NAN, f64::NAN, tolerance).passes);
        assert!(!compare_with_tolerance(f64::NAN, 0.3, tolerance).passes);
        assert!(!compare_with_tolerance(0.3, f64::NAN, tolerance).passes);
    }
}
