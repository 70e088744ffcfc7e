use crate::transform::AffineTransform;

/// Physical voxel size along each array axis, in millimeters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spacing {
    pub mm_x: f64,
    pub mm_y: f64,
    pub mm_z: f64,
}

impl Spacing {
    pub fn new(mm_x: f64, mm_y: f64, mm_z: f64) -> Self {
        Spacing { mm_x, mm_y, mm_z }
    }
}

impl From<&AffineTransform> for Spacing {
    /// Spacing is the norm of each linear column of a voxel-to-world affine
    fn from(affine: &AffineTransform) -> Self {
        let [mm_x, mm_y, mm_z] = affine.column_norms();
        Spacing { mm_x, mm_y, mm_z }
    }
}

impl From<Spacing> for [f64; 3] {
    fn from(spacing: Spacing) -> Self {
        [spacing.mm_x, spacing.mm_y, spacing.mm_z]
    }
}
