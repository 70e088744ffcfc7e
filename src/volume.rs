use nalgebra::Point3;
use ndarray::{ArrayD, IxDyn};
use std::borrow::Cow;

use crate::errors::GeometryError;
use crate::metadata::Spacing;
use crate::transform::{AffineTransform, Transform};

/// Number of leading array axes that are spatial
pub const SPATIAL_AXES: usize = 3;

/// A voxel array positioned in world space.
///
/// Array axis `i < 3` is spatial and maps through column `i` of the
/// voxel-to-world affine. Any further axes (channels, time) are carried along
/// untouched. Voxel data is always held in standard layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    data: ArrayD<f32>,
    affine: AffineTransform,
}

impl Volume {
    pub fn new(data: ArrayD<f32>, affine: AffineTransform) -> Result<Self, GeometryError> {
        if data.ndim() < SPATIAL_AXES {
            return Err(GeometryError::TooFewAxes { ndim: data.ndim() });
        }
        if let Some(axis) = data.shape().iter().position(|&len| len == 0) {
            return Err(GeometryError::EmptyAxis { axis });
        }
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().into_owned()
        };
        Ok(Volume { data, affine })
    }

    /// A zero-filled volume
    pub fn zeros(shape: &[usize], affine: AffineTransform) -> Result<Self, GeometryError> {
        Self::new(ArrayD::zeros(IxDyn(shape)), affine)
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    pub fn affine(&self) -> &AffineTransform {
        &self.affine
    }

    pub fn into_parts(self) -> (ArrayD<f32>, AffineTransform) {
        (self.data, self.affine)
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    pub fn spatial_shape(&self) -> [usize; 3] {
        let shape = self.data.shape();
        [shape[0], shape[1], shape[2]]
    }

    /// Length of the channel axis, if the volume has exactly one non-spatial axis
    pub fn channels(&self) -> Option<usize> {
        match self.data.shape() {
            [_, _, _, channels] => Some(*channels),
            _ => None,
        }
    }

    pub fn spacing(&self) -> Spacing {
        Spacing::from(&self.affine)
    }

    /// World coordinate (mm) of a (possibly fractional) voxel index
    pub fn voxel_to_world(&self, index: [f64; 3]) -> Point3<f64> {
        self.affine.apply(&Point3::from(index))
    }

    /// Voxel samples in standard (row-major) order
    pub(crate) fn samples(&self) -> Cow<'_, [f32]> {
        match self.data.as_slice() {
            Some(samples) => Cow::Borrowed(samples),
            None => Cow::Owned(self.data.iter().copied().collect()),
        }
    }
}
