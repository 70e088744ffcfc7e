//! Conversion between FLIRT matrices and world-space transforms.
//!
//! FLIRT's `-omat` maps the moving volume's "scaled voxel" coordinates to the
//! fixed volume's. Scaled voxel coordinates are voxel indices multiplied by
//! the voxel size, with the first axis mirrored whenever the voxel-to-world
//! affine has a positive determinant (FSL always works in a radiological frame).
use nalgebra::Matrix4;
use std::fmt;

use crate::errors::GeometryError;
use crate::transform::AffineTransform;
use crate::volume::Volume;

/// How a transform matrix file is interpreted
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TransformSpace {
    /// Maps moving world coordinates (mm) to fixed world coordinates
    World,
    /// FLIRT convention, mapping scaled voxel coordinates
    #[default]
    FslScaled,
}

impl fmt::Display for TransformSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let space_str = match self {
            TransformSpace::World => "world",
            TransformSpace::FslScaled => "fsl-scaled",
        };
        write!(f, "{space_str}")
    }
}

impl TransformSpace {
    /// The moving-to-fixed world transform described by `matrix`
    pub fn to_world(
        &self,
        matrix: &AffineTransform,
        moving: &Volume,
        fixed: &Volume,
    ) -> Result<AffineTransform, GeometryError> {
        match self {
            TransformSpace::World => Ok(*matrix),
            TransformSpace::FslScaled => fsl_to_world(matrix, moving, fixed),
        }
    }
}

/// Voxel index to FSL scaled voxel coordinates
pub fn fsl_scaled_voxel_matrix(volume: &Volume) -> Matrix4<f64> {
    let [dx, dy, dz] = volume.affine().column_norms();
    let mut matrix = Matrix4::from_diagonal(&nalgebra::Vector4::new(dx, dy, dz, 1.0));
    if volume.affine().determinant() > 0.0 {
        let nx = volume.spatial_shape()[0];
        matrix[(0, 0)] = -dx;
        matrix[(0, 3)] = (nx - 1) as f64 * dx;
    }
    matrix
}

/// World-space moving-to-fixed transform from a FLIRT matrix
pub fn fsl_to_world(
    matrix: &AffineTransform,
    moving: &Volume,
    fixed: &Volume,
) -> Result<AffineTransform, GeometryError> {
    let fixed_scaled = AffineTransform::from_matrix(fsl_scaled_voxel_matrix(fixed))?;
    let moving_scaled = AffineTransform::from_matrix(fsl_scaled_voxel_matrix(moving))?;

    let world = fixed
        .affine()
        .compose(&fixed_scaled.inverse()?)
        .compose(matrix)
        .compose(&moving_scaled)
        .compose(&moving.affine().inverse()?);
    tracing::debug!("FLIRT matrix in world coordinates:\n{}", world);
    Ok(world)
}

/// FLIRT matrix equivalent to a world-space moving-to-fixed transform
pub fn world_to_fsl(
    transform: &AffineTransform,
    moving: &Volume,
    fixed: &Volume,
) -> Result<AffineTransform, GeometryError> {
    let fixed_scaled = AffineTransform::from_matrix(fsl_scaled_voxel_matrix(fixed))?;
    let moving_scaled = AffineTransform::from_matrix(fsl_scaled_voxel_matrix(moving))?;

    Ok(fixed_scaled
        .compose(&fixed.affine().inverse()?)
        .compose(transform)
        .compose(moving.affine())
        .compose(&moving_scaled.inverse()?))
}
