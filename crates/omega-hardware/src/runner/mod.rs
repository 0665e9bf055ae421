//! Process runner abstraction.
//!
//! Every hardware operation on the board is carried out by a command-line
//! utility (`fast-gpio`, `i2cset`, `i2cget`, `stty`). The [`ProcessRunner`]
//! trait is the seam between the engines and those utilities: it starts an
//! [`Invocation`] and hands back a [`ProcessHandle`] that resolves to the
//! utility's [`ProcessOutput`].
//!
//! Starting a process is synchronous and happens at call time, so utilities
//! start in the same order the board methods were called. Only waiting for
//! completion is asynchronous. A process that cannot be started yields a
//! handle that resolves to the spawn error; callers never see it
//! synchronously.
//!
//! Two implementations are provided:
//!
//! - [`SystemRunner`] runs the real utilities through `tokio::process`.
//! - [`MockRunner`] records invocations and replays scripted output. It
//!   backs the board's simulated mode and the test suite.

pub mod mock;
pub mod system;

use std::borrow::Cow;
use std::fmt;

use futures::FutureExt;
use futures::future::BoxFuture;
use omega_core::{Error, Result};

pub use mock::{MockRunner, MockRunnerHandle};
pub use system::SystemRunner;

/// A command line to run: program name plus arguments.
///
/// # Examples
///
/// ```
/// use omega_hardware::runner::Invocation;
///
/// let invocation = Invocation::new("fast-gpio").arg("set").arg(1).arg(0);
/// assert_eq!(invocation.to_string(), "fast-gpio set 1 0");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
}

impl Invocation {
    /// Create an invocation with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// Program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments, in order.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished utility.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Everything the utility wrote to stdout.
    pub stdout: Vec<u8>,

    /// Everything the utility wrote to stderr.
    pub stderr: Vec<u8>,

    /// Exit code, `None` when terminated by a signal.
    pub status: Option<i32>,
}

impl ProcessOutput {
    /// Successful output with the given stdout.
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: Vec::new(),
            status: Some(0),
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failure(status: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: stderr.into(),
            status: Some(status),
        }
    }

    /// Whether the utility exited with status 0.
    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout decoded lossily as UTF-8.
    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Convert a non-zero exit into [`Error::ProcessFailed`].
    pub fn into_result(self, invocation: &Invocation) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::process_failed(
                invocation.to_string(),
                self.status,
                String::from_utf8_lossy(&self.stderr).trim(),
            ))
        }
    }
}

impl From<std::process::Output> for ProcessOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            status: output.status.code(),
        }
    }
}

/// A started utility whose completion can be awaited.
pub struct ProcessHandle {
    invocation: Invocation,
    completion: BoxFuture<'static, Result<ProcessOutput>>,
}

impl ProcessHandle {
    /// Wrap a completion future.
    pub fn new<F>(invocation: Invocation, completion: F) -> Self
    where
        F: Future<Output = Result<ProcessOutput>> + Send + 'static,
    {
        Self {
            invocation,
            completion: completion.boxed(),
        }
    }

    /// A handle that is already complete.
    pub fn ready(invocation: Invocation, result: Result<ProcessOutput>) -> Self {
        Self::new(invocation, futures::future::ready(result))
    }

    /// The command line this handle is running.
    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    /// Wait for the utility to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the utility could not be started and
    /// [`Error::ProcessFailed`] if it exited with a non-zero status.
    pub async fn output(self) -> Result<ProcessOutput> {
        let output = self.completion.await?;
        output.into_result(&self.invocation)
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("invocation", &self.invocation)
            .finish_non_exhaustive()
    }
}

/// Starts command-line utilities on behalf of the board.
///
/// Implementations must be cheap to share: the board holds one runner for
/// its whole lifetime and calls it from many tasks.
pub trait ProcessRunner: Send + Sync + fmt::Debug {
    /// Start `invocation` and return a handle to its completion.
    ///
    /// Spawn failures are reported through the returned handle.
    fn spawn(&self, invocation: Invocation) -> ProcessHandle;

    /// Run `invocation` to completion, blocking the calling thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the utility cannot be started or exits with a
    /// non-zero status.
    fn run_sync(&self, invocation: Invocation) -> Result<ProcessOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_display() {
        let invocation = Invocation::new("i2cset")
            .arg("-y")
            .arg("0")
            .arg("0x20")
            .arg("0x1");
        assert_eq!(invocation.to_string(), "i2cset -y 0 0x20 0x1");
        assert_eq!(invocation.program(), "i2cset");
        assert_eq!(invocation.args().len(), 4);
    }

    #[test]
    fn test_invocation_without_args() {
        assert_eq!(Invocation::new("reboot").to_string(), "reboot");
    }

    #[test]
    fn test_output_into_result() {
        let invocation = Invocation::new("fast-gpio").arg("set").arg(3).arg(1);

        let ok = ProcessOutput::success("done").into_result(&invocation).unwrap();
        assert_eq!(ok.stdout_text(), "done");

        let err = ProcessOutput::failure(1, "bad pin\n")
            .into_result(&invocation)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "`fast-gpio set 3 1` exited with status 1: bad pin"
        );
    }

    #[tokio::test]
    async fn test_ready_handle_reports_failure() {
        let invocation = Invocation::new("i2cget");
        let handle = ProcessHandle::ready(invocation.clone(), Ok(ProcessOutput::failure(2, "")));
        assert_eq!(handle.invocation(), &invocation);
        assert!(matches!(
            handle.output().await,
            Err(Error::ProcessFailed { status: Some(2), .. })
        ));
    }
}
