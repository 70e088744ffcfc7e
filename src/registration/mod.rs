use snafu::{ensure, Snafu};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

pub mod convert;
pub mod flirt;
pub mod process;

pub use convert::*;
pub use flirt::*;
pub use process::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RegistrationError {
    #[snafu(display(
        "registration of {} failed: {} exited with {}{}",
        path.display(),
        tool,
        status,
        stderr_suffix(stderr)
    ))]
    Failed {
        tool: String,
        path: PathBuf,
        status: ExitStatus,
        stderr: String,
    },

    #[snafu(display(
        "registration failed: {} exited successfully but did not write {}",
        tool,
        path.display()
    ))]
    MissingOutput { tool: String, path: PathBuf },

    #[snafu(display("registration of {} failed: {}", path.display(), source))]
    Tool {
        path: PathBuf,
        #[snafu(source(from(ToolError, Box::new)))]
        source: Box<ToolError>,
    },
}

pub(crate) fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(display("unsupported degrees of freedom {}, expected 6, 7, 9 or 12", value))]
pub struct DofError {
    value: u8,
}

/// Degrees of freedom of the registration model
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DegreesOfFreedom {
    /// Rotation and translation
    #[default]
    #[value(name = "6")]
    Rigid,
    /// Rigid plus a global scale
    #[value(name = "7")]
    GlobalRescale,
    /// Rigid plus per-axis scales
    #[value(name = "9")]
    Traditional,
    /// Full affine
    #[value(name = "12")]
    Affine,
}

impl DegreesOfFreedom {
    pub fn count(&self) -> u8 {
        match self {
            DegreesOfFreedom::Rigid => 6,
            DegreesOfFreedom::GlobalRescale => 7,
            DegreesOfFreedom::Traditional => 9,
            DegreesOfFreedom::Affine => 12,
        }
    }
}

impl TryFrom<u8> for DegreesOfFreedom {
    type Error = DofError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            6 => Ok(DegreesOfFreedom::Rigid),
            7 => Ok(DegreesOfFreedom::GlobalRescale),
            9 => Ok(DegreesOfFreedom::Traditional),
            12 => Ok(DegreesOfFreedom::Affine),
            _ => DofSnafu { value }.fail(),
        }
    }
}

impl fmt::Display for DegreesOfFreedom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.count())
    }
}

/// Similarity measure optimised during registration
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CostFunction {
    #[default]
    #[value(name = "mutualinfo")]
    MutualInfo,
    #[value(name = "normmi")]
    NormalizedMutualInfo,
    #[value(name = "corratio")]
    CorrelationRatio,
    #[value(name = "normcorr")]
    NormalizedCorrelation,
    #[value(name = "leastsq")]
    LeastSquares,
    #[value(name = "labeldiff")]
    LabelDifference,
    /// Boundary-based; needs a white matter segmentation
    #[value(name = "bbr")]
    BoundaryBased,
}

impl fmt::Display for CostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cost_str = match self {
            CostFunction::MutualInfo => "mutualinfo",
            CostFunction::NormalizedMutualInfo => "normmi",
            CostFunction::CorrelationRatio => "corratio",
            CostFunction::NormalizedCorrelation => "normcorr",
            CostFunction::LeastSquares => "leastsq",
            CostFunction::LabelDifference => "labeldiff",
            CostFunction::BoundaryBased => "bbr",
        };
        write!(f, "{cost_str}")
    }
}

/// Inputs, outputs and parameters of one registration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub fixed: PathBuf,
    pub moving: PathBuf,
    pub registered: PathBuf,
    pub transform: PathBuf,
    pub dof: DegreesOfFreedom,
    pub cost: CostFunction,
}

impl RegistrationRequest {
    /// Fail unless the tool wrote both outputs
    pub fn check_outputs(&self, tool: &str) -> Result<(), RegistrationError> {
        for path in [&self.registered, &self.transform] {
            ensure!(
                path.is_file(),
                MissingOutputSnafu {
                    tool,
                    path: path.as_path()
                }
            );
        }
        Ok(())
    }
}

/// An external program that registers a moving volume onto a fixed one,
/// writing the registered volume and a transform matrix.
pub trait RegistrationTool {
    fn name(&self) -> &str;

    /// Run the registration; a nonzero exit is a failure
    fn register(&self, request: &RegistrationRequest) -> Result<(), RegistrationError>;
}

impl<T: RegistrationTool + ?Sized> RegistrationTool for &T {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn register(&self, request: &RegistrationRequest) -> Result<(), RegistrationError> {
        (**self).register(request)
    }
}

/// Directory holding `path`, or the current directory for a bare file name
pub(crate) fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}
