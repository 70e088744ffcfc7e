use snafu::{ResultExt, Snafu};
use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ToolError {
    #[snafu(display("could not start {}", program.display()))]
    Spawn {
        program: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("{} did not finish within {:?} and was terminated", program.display(), timeout))]
    Timeout { program: PathBuf, timeout: Duration },

    #[snafu(display("{} was cancelled", program.display()))]
    Cancelled { program: PathBuf },

    #[snafu(display("could not wait for {}", program.display()))]
    Wait {
        program: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },
}

/// Shared flag for cooperatively cancelling a running tool
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a tool that ran to completion
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// An external program invocation with an optional timeout and cancel flag
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    program: PathBuf,
    args: Vec<OsString>,
    timeout: Option<Duration>,
    cancel: Option<CancelHandle>,
}

impl ExternalCommand {
    pub fn new<P: AsRef<Path>>(program: P) -> Self {
        ExternalCommand {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            timeout: None,
            cancel: None,
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Start the program in its own process group with captured output
    pub fn spawn(&self) -> Result<ToolTask, ToolError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        tracing::debug!("Running {} {:?}", self.program.display(), self.args);
        let mut child = command.spawn().context(SpawnSnafu {
            program: &self.program,
        })?;
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        Ok(ToolTask {
            program: self.program.clone(),
            child,
            stdout,
            stderr,
            reaped: false,
        })
    }

    /// Run to completion, honouring the timeout and cancel flag
    pub fn run(&self) -> Result<ToolOutput, ToolError> {
        self.spawn()?.wait(self.timeout, self.cancel.as_ref())
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Err(e) = reader.read_to_end(&mut buffer) {
            tracing::warn!("Could not read tool output: {}", e);
        }
        buffer
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// A running external program.
///
/// Dropping a task that has not been waited on kills its process group.
#[derive(Debug)]
pub struct ToolTask {
    program: PathBuf,
    child: Child,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    reaped: bool,
}

impl ToolTask {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Block until the program exits, the timeout expires or `cancel` is set.
    ///
    /// On expiry or cancellation the whole process group is killed and reaped.
    pub fn wait(
        mut self,
        timeout: Option<Duration>,
        cancel: Option<&CancelHandle>,
    ) -> Result<ToolOutput, ToolError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let status = self.child.try_wait().context(WaitSnafu {
                program: &self.program,
            })?;
            if let Some(status) = status {
                self.reaped = true;
                return Ok(ToolOutput {
                    status,
                    stdout: collect(self.stdout.take()),
                    stderr: collect(self.stderr.take()),
                });
            }

            if cancel.is_some_and(CancelHandle::is_cancelled) {
                self.terminate();
                return CancelledSnafu {
                    program: &self.program,
                }
                .fail();
            }
            if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
                if Instant::now() >= deadline {
                    self.terminate();
                    return TimeoutSnafu {
                        program: &self.program,
                        timeout,
                    }
                    .fail();
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Kill the process group and reap the child
    fn terminate(&mut self) {
        tracing::warn!("Terminating {} (pid {})", self.program.display(), self.child.id());
        #[cfg(unix)]
        {
            // SAFETY: killpg has no memory-safety preconditions. The child leads
            // its own group, so the group id equals its pid.
            let result = unsafe { libc::killpg(self.child.id() as libc::pid_t, libc::SIGKILL) };
            if result != 0 {
                tracing::debug!(
                    "killpg failed: {}",
                    std::io::Error::last_os_error()
                );
            }
        }
        if let Err(e) = self.child.kill() {
            tracing::debug!("kill failed: {}", e);
        }
        if let Err(e) = self.child.wait() {
            tracing::warn!("Could not reap {}: {}", self.program.display(), e);
        }
        self.reaped = true;
    }
}

impl Drop for ToolTask {
    fn drop(&mut self) {
        if !self.reaped {
            self.terminate();
        }
    }
}
