use snafu::{ensure, ResultExt};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::registration::process::{CancelHandle, ExternalCommand};
use crate::registration::{
    FailedSnafu, RegistrationError, RegistrationRequest, RegistrationTool, ToolSnafu,
};

pub const DEFAULT_FLIRT_PROGRAM: &str = "flirt";

/// FSL FLIRT linear registration
#[derive(Debug, Clone)]
pub struct Flirt {
    pub program: PathBuf,
    pub timeout: Option<Duration>,
    pub cancel: CancelHandle,
}

impl Default for Flirt {
    fn default() -> Self {
        Flirt::new(DEFAULT_FLIRT_PROGRAM)
    }
}

impl Flirt {
    pub fn new<P: AsRef<Path>>(program: P) -> Self {
        Flirt {
            program: program.as_ref().to_path_buf(),
            timeout: None,
            cancel: CancelHandle::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Command line for a request
    pub fn arguments(request: &RegistrationRequest) -> Vec<OsString> {
        vec![
            "-ref".into(),
            request.fixed.clone().into_os_string(),
            "-in".into(),
            request.moving.clone().into_os_string(),
            "-out".into(),
            request.registered.clone().into_os_string(),
            "-omat".into(),
            request.transform.clone().into_os_string(),
            "-dof".into(),
            request.dof.to_string().into(),
            "-cost".into(),
            request.cost.to_string().into(),
        ]
    }

    fn command(&self, request: &RegistrationRequest) -> ExternalCommand {
        ExternalCommand::new(&self.program)
            .args(Self::arguments(request))
            .timeout(self.timeout)
            .cancel_handle(self.cancel.clone())
    }
}

impl RegistrationTool for Flirt {
    fn name(&self) -> &str {
        DEFAULT_FLIRT_PROGRAM
    }

    fn register(&self, request: &RegistrationRequest) -> Result<(), RegistrationError> {
        tracing::info!(
            "Registering {} onto {} (dof={}, cost={})",
            request.moving.display(),
            request.fixed.display(),
            request.dof,
            request.cost
        );
        let output = self
            .command(request)
            .run()
            .context(ToolSnafu {
                path: &request.moving,
            })?;

        if !output.stderr.trim().is_empty() {
            tracing::warn!("{}: {}", self.name(), output.stderr.trim());
        }
        ensure!(
            output.success(),
            FailedSnafu {
                tool: self.name(),
                path: &request.moving,
                status: output.status,
                stderr: output.stderr,
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::{CostFunction, DegreesOfFreedom, ToolError};
    use rstest::rstest;
    use tempfile::{tempdir, TempDir};

    fn request(dir: &TempDir, dof: DegreesOfFreedom, cost: CostFunction) -> RegistrationRequest {
        RegistrationRequest {
            fixed: dir.path().join("fixed.nii.gz"),
            moving: dir.path().join("moving.nii.gz"),
            registered: dir.path().join("registered.nii.gz"),
            transform: dir.path().join("transform.mat"),
            dof,
            cost,
        }
    }

    #[rstest]
    #[case(DegreesOfFreedom::Rigid, CostFunction::MutualInfo, "6", "mutualinfo")]
    #[case(DegreesOfFreedom::Affine, CostFunction::NormalizedMutualInfo, "12", "normmi")]
    #[case(DegreesOfFreedom::GlobalRescale, CostFunction::CorrelationRatio, "7", "corratio")]
    fn test_arguments(
        #[case] dof: DegreesOfFreedom,
        #[case] cost: CostFunction,
        #[case] dof_arg: &str,
        #[case] cost_arg: &str,
    ) {
        let dir = tempdir().unwrap();
        let request = request(&dir, dof, cost);
        let args = Flirt::arguments(&request);
        let args = args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>();

        assert_eq!(args[0], "-ref");
        assert_eq!(args[1], request.fixed.to_string_lossy());
        assert_eq!(args[3], request.moving.to_string_lossy());
        assert_eq!(args[5], request.registered.to_string_lossy());
        assert_eq!(args[7], request.transform.to_string_lossy());
        assert_eq!(&args[8..], &["-dof", dof_arg, "-cost", cost_arg]);
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// Write an executable shell script standing in for flirt
        pub(crate) fn fake_flirt(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("flirt");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[test]
        fn test_passes_parameters() {
            let dir = tempdir().unwrap();
            let log = dir.path().join("args.txt");
            let program = fake_flirt(dir.path(), &format!("echo \"$@\" > {}", log.display()));
            let request = request(&dir, DegreesOfFreedom::Traditional, CostFunction::LeastSquares);

            Flirt::new(program).register(&request).unwrap();
            let logged = std::fs::read_to_string(&log).unwrap();
            assert!(logged.trim_end().ends_with("-dof 9 -cost leastsq"), "{logged}");
        }

        #[test]
        fn test_nonzero_exit() {
            let dir = tempdir().unwrap();
            let program = fake_flirt(dir.path(), "echo 'Image Exception' >&2; exit 1");
            let request = request(&dir, DegreesOfFreedom::Rigid, CostFunction::MutualInfo);

            let error = Flirt::new(program).register(&request).unwrap_err();
            match error {
                RegistrationError::Failed {
                    ref status,
                    ref stderr,
                    ref path,
                    ..
                } => {
                    assert_eq!(status.code(), Some(1));
                    assert_eq!(stderr.trim(), "Image Exception");
                    assert_eq!(path, &request.moving);
                }
                ref other => panic!("unexpected error: {other}"),
            }
            assert!(error.to_string().contains("Image Exception"));
        }

        #[test]
        fn test_timeout() {
            let dir = tempdir().unwrap();
            let program = fake_flirt(dir.path(), "sleep 30");
            let request = request(&dir, DegreesOfFreedom::Rigid, CostFunction::MutualInfo);

            let error = Flirt::new(program)
                .with_timeout(Some(Duration::from_millis(200)))
                .register(&request)
                .unwrap_err();
            assert!(matches!(
                error,
                RegistrationError::Tool { ref source, .. } if matches!(**source, ToolError::Timeout { .. })
            ));
        }
    }
}
