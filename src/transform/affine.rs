use nalgebra::{Matrix3, Matrix4, Point3, Vector3};
use std::fmt;

use crate::errors::GeometryError;
use crate::transform::Transform;

/// Maximum deviation of the bottom row from `[0, 0, 0, 1]`
pub const BOTTOM_ROW_TOLERANCE: f64 = 1e-5;

/// Relative determinant below which the linear part is treated as singular
const SINGULAR_TOLERANCE: f64 = 1e-9;

const HOMOGENEOUS_ROW: [f64; 4] = [0.0, 0.0, 0.0, 1.0];

/// A 4x4 homogeneous affine: a 3x3 linear part (rotation/scale/shear) and a translation.
///
/// Used both for voxel-to-world affines and for world-to-world registration transforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    matrix: Matrix4<f64>,
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineTransform {
    pub fn identity() -> Self {
        AffineTransform {
            matrix: Matrix4::identity(),
        }
    }

    pub fn translation(dx: f64, dy: f64, dz: f64) -> Self {
        AffineTransform {
            matrix: Matrix4::new_translation(&Vector3::new(dx, dy, dz)),
        }
    }

    /// Build an affine from a linear part and a translation
    pub fn from_parts(linear: &Matrix3<f64>, translation: &Vector3<f64>) -> Self {
        let mut matrix = linear.to_homogeneous();
        matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
        AffineTransform { matrix }
    }

    /// Wrap a 4x4 matrix, validating that it is a homogeneous affine.
    ///
    /// The bottom row is snapped to exactly `[0, 0, 0, 1]` once it is within
    /// [`BOTTOM_ROW_TOLERANCE`].
    pub fn from_matrix(matrix: Matrix4<f64>) -> Result<Self, GeometryError> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(GeometryError::NonFiniteAffine);
        }
        let bottom_row = [
            matrix[(3, 0)],
            matrix[(3, 1)],
            matrix[(3, 2)],
            matrix[(3, 3)],
        ];
        if !is_homogeneous_row(&bottom_row) {
            return Err(GeometryError::NotAffine {
                bottom_row,
                tolerance: BOTTOM_ROW_TOLERANCE,
            });
        }
        let mut matrix = matrix;
        for (col, &value) in HOMOGENEOUS_ROW.iter().enumerate() {
            matrix[(3, col)] = value;
        }
        Ok(AffineTransform { matrix })
    }

    /// Build from row-major values
    pub fn from_rows(rows: [[f64; 4]; 4]) -> Result<Self, GeometryError> {
        Self::from_matrix(Matrix4::from_fn(|r, c| rows[r][c]))
    }

    pub fn rows(&self) -> [[f64; 4]; 4] {
        let mut rows = [[0.0; 4]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = self.matrix[(r, c)];
            }
        }
        rows
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }

    pub fn linear(&self) -> Matrix3<f64> {
        self.matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }

    pub fn translation_part(&self) -> Vector3<f64> {
        self.matrix.fixed_view::<3, 1>(0, 3).into_owned()
    }

    /// Euclidean norms of the three linear columns, i.e. the voxel spacing of a voxel-to-world affine
    pub fn column_norms(&self) -> [f64; 3] {
        let linear = self.linear();
        [
            linear.column(0).norm(),
            linear.column(1).norm(),
            linear.column(2).norm(),
        ]
    }

    /// Determinant of the linear part
    pub fn determinant(&self) -> f64 {
        self.linear().determinant()
    }

    /// Whether the linear part is singular, relative to the column scales
    pub fn is_singular(&self) -> bool {
        let scale: f64 = self.column_norms().iter().product();
        scale == 0.0 || (self.determinant() / scale).abs() < SINGULAR_TOLERANCE
    }

    pub fn inverse(&self) -> Result<Self, GeometryError> {
        let determinant = self.determinant();
        if self.is_singular() {
            return Err(GeometryError::SingularAffine { determinant });
        }
        let matrix = self
            .matrix
            .try_inverse()
            .ok_or(GeometryError::SingularAffine { determinant })?;
        Self::from_matrix(matrix)
    }

    /// Matrix product `self * other`: `other` is applied first
    pub fn compose(&self, other: &AffineTransform) -> AffineTransform {
        AffineTransform {
            matrix: self.matrix * other.matrix,
        }
    }

    /// Largest absolute element-wise difference between two affines
    pub fn max_abs_diff(&self, other: &AffineTransform) -> f64 {
        self.matrix
            .iter()
            .zip(other.matrix.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

pub(crate) fn is_homogeneous_row(row: &[f64; 4]) -> bool {
    row.iter()
        .zip(HOMOGENEOUS_ROW.iter())
        .all(|(actual, expected)| (actual - expected).abs() <= BOTTOM_ROW_TOLERANCE)
}

impl Transform<Point3<f64>> for AffineTransform {
    fn apply(&self, point: &Point3<f64>) -> Point3<f64> {
        self.matrix.transform_point(point)
    }
}

impl Transform<Vector3<f64>> for AffineTransform {
    /// Directions ignore the translation
    fn apply(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.matrix.transform_vector(vector)
    }
}

impl fmt::Display for AffineTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.rows().iter().take(3) {
            writeln!(f, "[{:>10.4} {:>10.4} {:>10.4} {:>10.4}]", row[0], row[1], row[2], row[3])?;
        }
        write!(f, "[{:>10.4} {:>10.4} {:>10.4} {:>10.4}]", 0.0, 0.0, 0.0, 1.0)
    }
}
