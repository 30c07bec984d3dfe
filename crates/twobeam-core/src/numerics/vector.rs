//! Three-component vector and 3×3 frame algebra.
//!
//! Vectors are plain `[f64; 3]` arrays and frames are row-major bases whose
//! rows are the frame axes written in the parent frame, so `basis · v`
//! transforms into the frame and `basisᵀ · v` transforms back out.

pub type Vec3 = [f64; 3];
pub type Mat3 = [[f64; 3]; 3];

/// Below this norm a vector has no usable direction; also the tolerance for
/// treating two unit vectors as parallel.
pub const GEOMETRY_EPSILON: f64 = 1.0e-12;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("{name} is degenerate: norm {norm:e} is below {GEOMETRY_EPSILON:e}")]
    DegenerateVector { name: &'static str, norm: f64 },
    #[error(
        "{primary} is parallel to {secondary} and every fallback direction is parallel too (tried {tried:?})"
    )]
    UnresolvableGeometry {
        primary: &'static str,
        secondary: &'static str,
        tried: Vec<&'static str>,
    },
}

pub fn dot(lhs: Vec3, rhs: Vec3) -> f64 {
    lhs[0] * rhs[0] + lhs[1] * rhs[1] + lhs[2] * rhs[2]
}

pub fn cross(lhs: Vec3, rhs: Vec3) -> Vec3 {
    [
        lhs[1] * rhs[2] - lhs[2] * rhs[1],
        lhs[2] * rhs[0] - lhs[0] * rhs[2],
        lhs[0] * rhs[1] - lhs[1] * rhs[0],
    ]
}

pub fn norm(value: Vec3) -> f64 {
    dot(value, value).sqrt()
}

pub fn scale(value: Vec3, factor: f64) -> Vec3 {
    [value[0] * factor, value[1] * factor, value[2] * factor]
}

pub fn sub(lhs: Vec3, rhs: Vec3) -> Vec3 {
    [lhs[0] - rhs[0], lhs[1] - rhs[1], lhs[2] - rhs[2]]
}

pub fn negate(value: Vec3) -> Vec3 {
    scale(value, -1.0)
}

pub fn normalize(value: Vec3, name: &'static str) -> Result<Vec3, GeometryError> {
    let length = norm(value);
    if !(length >= GEOMETRY_EPSILON) {
        return Err(GeometryError::DegenerateVector { name, norm: length });
    }
    Ok(scale(value, 1.0 / length))
}

pub fn mat_vec(matrix: &Mat3, value: Vec3) -> Vec3 {
    [
        dot(matrix[0], value),
        dot(matrix[1], value),
        dot(matrix[2], value),
    ]
}

pub fn transpose(matrix: &Mat3) -> Mat3 {
    let mut transposed = [[0.0; 3]; 3];
    for (row, values) in matrix.iter().enumerate() {
        for (col, value) in values.iter().enumerate() {
            transposed[col][row] = *value;
        }
    }
    transposed
}

pub fn mat_mul(lhs: &Mat3, rhs: &Mat3) -> Mat3 {
    let rhs_t = transpose(rhs);
    let mut product = [[0.0; 3]; 3];
    for row in 0..3 {
        for col in 0..3 {
            product[row][col] = dot(lhs[row], rhs_t[col]);
        }
    }
    product
}

/// True when two unit vectors are parallel or antiparallel.
pub fn is_parallel(lhs: Vec3, rhs: Vec3) -> bool {
    (dot(lhs, rhs).abs() - 1.0).abs() < GEOMETRY_EPSILON
}

/// A named direction tried, in order, when the primary cross product vanishes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallbackCandidate {
    pub name: &'static str,
    pub vector: Vec3,
}

impl FallbackCandidate {
    pub const fn new(name: &'static str, vector: Vec3) -> Self {
        Self { name, vector }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisSource {
    CrossProduct,
    Fallback(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedAxis {
    pub axis: Vec3,
    pub source: AxisSource,
}

/// Picks the first candidate with a usable component perpendicular to
/// `normal` (a unit vector) and returns that component, normalized.
///
/// Returns the names of every candidate tried when none qualifies.
pub fn resolve_perpendicular_fallback(
    normal: Vec3,
    candidates: &[FallbackCandidate],
) -> Result<ResolvedAxis, Vec<&'static str>> {
    let mut tried = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        tried.push(candidate.name);
        let Ok(direction) = normalize(candidate.vector, candidate.name) else {
            continue;
        };
        if is_parallel(direction, normal) {
            continue;
        }
        let perpendicular = sub(direction, scale(normal, dot(direction, normal)));
        if let Ok(axis) = normalize(perpendicular, candidate.name) {
            return Ok(ResolvedAxis {
                axis,
                source: AxisSource::Fallback(candidate.name),
            });
        }
    }
    Err(tried)
}

/// Right-handed orthonormal basis stored as rows (x, y, z) in the parent frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrthonormalFrame {
    basis: Mat3,
    x_source: AxisSource,
}

impl OrthonormalFrame {
    /// Frame with z = `secondary` and x = `primary × secondary`, both unit
    /// vectors. When they are parallel, x comes from the fallbacks in order.
    pub fn from_axis_pair(
        primary: (&'static str, Vec3),
        secondary: (&'static str, Vec3),
        fallbacks: &[FallbackCandidate],
    ) -> Result<Self, GeometryError> {
        let (primary_name, primary_axis) = primary;
        let (secondary_name, z) = secondary;

        let resolved = if is_parallel(primary_axis, z) {
            resolve_perpendicular_fallback(z, fallbacks).map_err(|tried| {
                GeometryError::UnresolvableGeometry {
                    primary: primary_name,
                    secondary: secondary_name,
                    tried,
                }
            })?
        } else {
            ResolvedAxis {
                axis: normalize(cross(primary_axis, z), primary_name)?,
                source: AxisSource::CrossProduct,
            }
        };

        let x = resolved.axis;
        let y = cross(z, x);
        Ok(Self {
            basis: [x, y, z],
            x_source: resolved.source,
        })
    }

    /// Frame from explicit rows; used when the axes are already known to be orthonormal.
    pub fn from_rows(x: Vec3, y: Vec3, z: Vec3, x_source: AxisSource) -> Self {
        Self {
            basis: [x, y, z],
            x_source,
        }
    }

    pub fn x(&self) -> Vec3 {
        self.basis[0]
    }

    pub fn y(&self) -> Vec3 {
        self.basis[1]
    }

    pub fn z(&self) -> Vec3 {
        self.basis[2]
    }

    pub fn x_source(&self) -> AxisSource {
        self.x_source
    }

    /// Parent → frame transform.
    pub fn forward(&self) -> Mat3 {
        self.basis
    }

    /// Frame → parent transform.
    pub fn inverse(&self) -> Mat3 {
        transpose(&self.basis)
    }

    pub fn to_frame(&self, value: Vec3) -> Vec3 {
        mat_vec(&self.basis, value)
    }

    pub fn from_frame(&self, value: Vec3) -> Vec3 {
        mat_vec(&self.inverse(), value)
    }

    /// Largest deviation of `basis · basisᵀ` from the identity.
    pub fn orthonormality_error(&self) -> f64 {
        let gram = mat_mul(&self.basis, &self.inverse());
        let mut worst: f64 = 0.0;
        for (row, values) in gram.iter().enumerate() {
            for (col, value) in values.iter().enumerate() {
                let expected = if row == col { 1.0 } else { 0.0 };
                worst = worst.max((value - expected).abs());
            }
        }
        worst
    }
}
