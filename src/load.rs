use ndarray::{ArrayD, IxDyn};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use snafu::{OptionExt, ResultExt};
use std::path::Path;

use crate::errors::volume::{DecodeSnafu, HeaderGeometrySnafu, ReadSnafu, ShapeSnafu};
use crate::errors::{GeometryError, VolumeError};
use crate::transform::AffineTransform;
use crate::volume::{Volume, SPATIAL_AXES};

/// Load a NIfTI-1 volume (`.nii` or `.nii.gz`).
///
/// Samples are decoded to `f32` with the header's scaling slope and intercept
/// applied. Images with fewer than three axes gain trailing singleton axes.
pub fn load_volume<P: AsRef<Path>>(path: P) -> Result<Volume, VolumeError> {
    let path = path.as_ref();
    let object = ReaderOptions::new()
        .read_file(path)
        .context(ReadSnafu { path })?;
    let affine = header_affine(object.header()).context(HeaderGeometrySnafu { path })?;

    let array = object
        .into_volume()
        .into_ndarray::<f32>()
        .context(DecodeSnafu { path })?;

    // Logical iteration order is row-major regardless of the on-disk layout
    let mut shape = array.shape().to_vec();
    let samples = array.iter().copied().collect::<Vec<f32>>();
    while shape.len() < SPATIAL_AXES {
        shape.push(1);
    }
    let data = ArrayD::from_shape_vec(IxDyn(&shape), samples)
        .ok()
        .context(ShapeSnafu {
            path,
            shape: shape.clone(),
        })?;

    let volume = Volume::new(data, affine).context(HeaderGeometrySnafu { path })?;
    tracing::debug!(
        "Loaded {} with shape {:?}, spacing {:?}",
        path.display(),
        volume.data().shape(),
        volume.spacing()
    );
    Ok(volume)
}

/// Voxel-to-world affine of a NIfTI header.
///
/// The sform is preferred, then the quaternion qform, then plain pixdim scaling.
pub fn header_affine(header: &NiftiHeader) -> Result<AffineTransform, GeometryError> {
    if header.sform_code > 0 {
        return AffineTransform::from_rows([
            header.srow_x.map(f64::from),
            header.srow_y.map(f64::from),
            header.srow_z.map(f64::from),
            [0.0, 0.0, 0.0, 1.0],
        ]);
    }

    let pixdim = header.pixdim.map(f64::from);
    if header.qform_code > 0 {
        return AffineTransform::from_rows(qform_rows(header, &pixdim));
    }

    AffineTransform::from_rows([
        [pixdim[1], 0.0, 0.0, 0.0],
        [0.0, pixdim[2], 0.0, 0.0],
        [0.0, 0.0, pixdim[3], 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ])
}

fn qform_rows(header: &NiftiHeader, pixdim: &[f64; 8]) -> [[f64; 4]; 4] {
    let b = f64::from(header.quatern_b);
    let c = f64::from(header.quatern_c);
    let d = f64::from(header.quatern_d);
    let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();

    let qfac = if pixdim[0] < 0.0 { -1.0 } else { 1.0 };
    let dx = pixdim[1];
    let dy = pixdim[2];
    let dz = pixdim[3] * qfac;

    [
        [
            (a * a + b * b - c * c - d * d) * dx,
            2.0 * (b * c - a * d) * dy,
            2.0 * (b * d + a * c) * dz,
            f64::from(header.quatern_x),
        ],
        [
            2.0 * (b * c + a * d) * dx,
            (a * a + c * c - b * b - d * d) * dy,
            2.0 * (c * d - a * b) * dz,
            f64::from(header.quatern_y),
        ],
        [
            2.0 * (b * d - a * c) * dx,
            2.0 * (c * d + a * b) * dy,
            (a * a + d * d - b * b - c * c) * dz,
            f64::from(header.quatern_z),
        ],
        [0.0, 0.0, 0.0, 1.0],
    ]
}
