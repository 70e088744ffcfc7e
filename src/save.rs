use nifti::writer::WriterOptions;
use nifti::NiftiHeader;
use snafu::ResultExt;
use std::path::Path;

use crate::errors::volume::{CreateDirSnafu, WriteSnafu};
use crate::errors::VolumeError;
use crate::volume::Volume;

/// NIFTI_XFORM_SCANNER_ANAT
const XFORM_SCANNER_ANAT: i16 = 1;
/// NIFTI_UNITS_MM
const UNITS_MM: u8 = 2;

/// Header describing the geometry of a volume.
///
/// Only the sform is populated; the qform code is left at zero so readers do
/// not pick up a stale quaternion.
pub fn volume_header(volume: &Volume) -> NiftiHeader {
    let rows = volume.affine().rows();
    let spacing: [f64; 3] = volume.spacing().into();
    let mut pixdim = [1.0f32; 8];
    for (target, value) in pixdim[1..4].iter_mut().zip(spacing.iter()) {
        *target = *value as f32;
    }

    NiftiHeader {
        sform_code: XFORM_SCANNER_ANAT,
        qform_code: 0,
        srow_x: rows[0].map(|v| v as f32),
        srow_y: rows[1].map(|v| v as f32),
        srow_z: rows[2].map(|v| v as f32),
        pixdim,
        xyzt_units: UNITS_MM,
        ..NiftiHeader::default()
    }
}

/// Write a volume as NIfTI-1, gzip-compressed when the path ends in `.gz`.
///
/// Missing parent directories are created.
pub fn save_volume<P: AsRef<Path>>(volume: &Volume, path: P) -> Result<(), VolumeError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context(CreateDirSnafu { path: parent })?;
    }

    let header = volume_header(volume);
    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(volume.data())
        .context(WriteSnafu { path })?;
    tracing::debug!("Saved {} with shape {:?}", path.display(), volume.data().shape());
    Ok(())
}
