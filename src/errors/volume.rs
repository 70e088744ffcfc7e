use nifti::NiftiError;
use snafu::Snafu;
use std::path::PathBuf;

use crate::errors::GeometryError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum VolumeError {
    #[snafu(display("error reading NIfTI file {}", path.display()))]
    ReadError {
        path: PathBuf,
        #[snafu(source(from(NiftiError, Box::new)))]
        source: Box<NiftiError>,
    },

    #[snafu(display("error decoding voxel data of {}", path.display()))]
    DecodeError {
        path: PathBuf,
        #[snafu(source(from(NiftiError, Box::new)))]
        source: Box<NiftiError>,
    },

    #[snafu(display("unexpected voxel array shape in {}: {:?}", path.display(), shape))]
    ShapeError { path: PathBuf, shape: Vec<usize> },

    #[snafu(display("{} has {}", path.display(), source))]
    HeaderGeometry { path: PathBuf, source: GeometryError },

    #[snafu(display("error writing NIfTI file {}", path.display()))]
    WriteError {
        path: PathBuf,
        #[snafu(source(from(NiftiError, Box::new)))]
        source: Box<NiftiError>,
    },

    #[snafu(display("failed to create directory {}", path.display()))]
    CreateDir {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },
}
