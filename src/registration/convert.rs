use snafu::{ensure, ResultExt, Snafu};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use crate::file::is_nifti_path;
use crate::registration::process::{CancelHandle, ExternalCommand, ToolError};
use crate::registration::stderr_suffix;

pub const DEFAULT_DCM2NIIX_PROGRAM: &str = "dcm2niix";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConvertError {
    #[snafu(display("could not create output directory {}", path.display()))]
    CreateOutput {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("conversion of {} failed: {}", path.display(), source))]
    ConvertTool {
        path: PathBuf,
        #[snafu(source(from(ToolError, Box::new)))]
        source: Box<ToolError>,
    },

    #[snafu(display(
        "conversion of {} failed: dcm2niix exited with {}{}",
        path.display(),
        status,
        stderr_suffix(stderr)
    ))]
    ConvertFailed {
        path: PathBuf,
        status: ExitStatus,
        stderr: String,
    },

    #[snafu(display("could not list converted volumes in {}", path.display()))]
    ListOutput {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },
}

/// DICOM series to NIfTI conversion with dcm2niix
#[derive(Debug, Clone)]
pub struct Dcm2Niix {
    pub program: PathBuf,
    pub timeout: Option<Duration>,
    pub cancel: CancelHandle,
}

impl Default for Dcm2Niix {
    fn default() -> Self {
        Dcm2Niix {
            program: PathBuf::from(DEFAULT_DCM2NIIX_PROGRAM),
            timeout: None,
            cancel: CancelHandle::new(),
        }
    }
}

impl Dcm2Niix {
    pub fn new<P: AsRef<Path>>(program: P) -> Self {
        Dcm2Niix {
            program: program.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Convert every series under `dicom_dir` into gzipped NIfTI files in
    /// `output_dir`, returning the volumes found there afterwards.
    pub fn convert<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        dicom_dir: P,
        output_dir: Q,
    ) -> Result<Vec<PathBuf>, ConvertError> {
        let dicom_dir = dicom_dir.as_ref();
        let output_dir = output_dir.as_ref();
        std::fs::create_dir_all(output_dir).context(CreateOutputSnafu { path: output_dir })?;

        tracing::info!(
            "Converting {} to NIfTI in {}",
            dicom_dir.display(),
            output_dir.display()
        );
        let output = ExternalCommand::new(&self.program)
            .args(["-z", "y", "-o"])
            .arg(output_dir)
            .arg(dicom_dir)
            .timeout(self.timeout)
            .cancel_handle(self.cancel.clone())
            .run()
            .context(ConvertToolSnafu { path: dicom_dir })?;
        ensure!(
            output.success(),
            ConvertFailedSnafu {
                path: dicom_dir,
                status: output.status,
                stderr: output.stderr,
            }
        );
        tracing::debug!("{}", output.stdout.trim());

        let volumes = find_volumes(output_dir)?;
        tracing::info!("Conversion complete: {} volume(s)", volumes.len());
        Ok(volumes)
    }
}

/// NIfTI files directly inside `dir`, sorted by name
pub fn find_volumes(dir: &Path) -> Result<Vec<PathBuf>, ConvertError> {
    let entries = std::fs::read_dir(dir).context(ListOutputSnafu { path: dir })?;
    let mut volumes = entries
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()
        .context(ListOutputSnafu { path: dir })?
        .into_iter()
        .filter(|path| path.is_file() && is_nifti_path(path))
        .collect::<Vec<_>>();
    volumes.sort();
    Ok(volumes)
}
