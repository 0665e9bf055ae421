//! Runner backed by real operating system processes.

use std::process::Stdio;

use omega_core::{Error, Result};
use tracing::{debug, trace};

use super::{Invocation, ProcessHandle, ProcessOutput, ProcessRunner};

/// Runs utilities with `tokio::process`.
///
/// stdin is closed; stdout and stderr are captured in full.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    /// Create a new system runner.
    pub fn new() -> Self {
        Self
    }
}

impl ProcessRunner for SystemRunner {
    fn spawn(&self, invocation: Invocation) -> ProcessHandle {
        debug!("Spawning `{}`", invocation);

        let child = tokio::process::Command::new(invocation.program())
            .args(invocation.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        match child {
            Ok(child) => {
                let command = invocation.to_string();
                ProcessHandle::new(invocation, async move {
                    let output = child.wait_with_output().await?;
                    trace!("`{}` exited with {:?}", command, output.status.code());
                    Ok::<_, Error>(ProcessOutput::from(output))
                })
            }
            Err(e) => {
                let error = Error::spawn(invocation.to_string(), e);
                ProcessHandle::ready(invocation, Err(error))
            }
        }
    }

    fn run_sync(&self, invocation: Invocation) -> Result<ProcessOutput> {
        debug!("Running `{}`", invocation);

        let output = std::process::Command::new(invocation.program())
            .args(invocation.args())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::spawn(invocation.to_string(), e))?;

        ProcessOutput::from(output).into_result(&invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_missing_program_reports_spawn_error() {
        let runner = SystemRunner::new();
        let handle = runner.spawn(Invocation::new("omega-io-definitely-missing-utility"));
        assert!(matches!(handle.output().await, Err(Error::Spawn { .. })));
    }

    #[test]
    fn test_run_sync_missing_program() {
        let runner = SystemRunner::new();
        let result = runner.run_sync(Invocation::new("omega-io-definitely-missing-utility"));
        assert!(matches!(result, Err(Error::Spawn { .. })));
    }
}
