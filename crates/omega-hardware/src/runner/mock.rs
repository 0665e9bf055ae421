//! Mock runner implementation for testing and simulated boards.
//!
//! This module provides a runner that never starts a real process. It
//! records every invocation and answers with scripted output, so the board
//! can be exercised without an Omega2 attached.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use omega_core::Result;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::info;

use super::{Invocation, ProcessHandle, ProcessOutput, ProcessRunner};

/// Mock process runner.
///
/// Responses are keyed by the full command line (for example
/// `"fast-gpio -u read 3"`). A one-shot response queued with
/// [`MockRunnerHandle::respond`] is used before a standing response set with
/// [`MockRunnerHandle::respond_always`]; without either, the invocation
/// succeeds with empty output.
///
/// # Examples
///
/// ```
/// use omega_hardware::runner::{Invocation, MockRunner, ProcessOutput, ProcessRunner};
///
/// #[tokio::main]
/// async fn main() -> omega_core::Result<()> {
///     let (runner, handle) = MockRunner::new();
///     handle.respond("i2cget -y 0 0x20 0x0", ProcessOutput::success("0x2a\n"));
///
///     let invocation = Invocation::new("i2cget").arg("-y").arg(0).arg("0x20").arg("0x0");
///     let output = runner.spawn(invocation).output().await?;
///
///     assert_eq!(output.stdout_text(), "0x2a\n");
///     assert_eq!(handle.command_lines(), vec!["i2cget -y 0 0x20 0x0"]);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MockRunner {
    state: Arc<MockState>,

    /// Log each command at info level, the way a simulated board reports
    /// what it would have run.
    simulated: bool,
}

#[derive(Debug, Default)]
struct MockState {
    invocations: Mutex<Vec<Invocation>>,
    queued: Mutex<HashMap<String, VecDeque<ProcessOutput>>>,
    standing: Mutex<HashMap<String, ProcessOutput>>,
    recorded: Notify,
}

impl MockState {
    fn record(&self, invocation: &Invocation) -> ProcessOutput {
        let command = invocation.to_string();
        self.invocations.lock().push(invocation.clone());
        self.recorded.notify_waiters();

        if let Some(output) = self
            .queued
            .lock()
            .get_mut(&command)
            .and_then(VecDeque::pop_front)
        {
            return output;
        }

        self.standing
            .lock()
            .get(&command)
            .cloned()
            .unwrap_or_else(|| ProcessOutput::success(Vec::new()))
    }
}

impl MockRunner {
    /// Create a new mock runner.
    ///
    /// Returns a tuple of (MockRunner, MockRunnerHandle) where the handle
    /// scripts responses and inspects recorded invocations.
    pub fn new() -> (Self, MockRunnerHandle) {
        let state = Arc::new(MockState::default());
        let runner = Self {
            state: state.clone(),
            simulated: false,
        };
        (runner, MockRunnerHandle { state })
    }

    /// Runner for a simulated board: logs each command and succeeds with
    /// empty output.
    pub fn simulated() -> Self {
        let (mut runner, _handle) = Self::new();
        runner.simulated = true;
        runner
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new().0
    }
}

impl ProcessRunner for MockRunner {
    fn spawn(&self, invocation: Invocation) -> ProcessHandle {
        if self.simulated {
            info!("{}", invocation);
        }
        let output = self.state.record(&invocation);
        ProcessHandle::ready(invocation, Ok(output))
    }

    fn run_sync(&self, invocation: Invocation) -> Result<ProcessOutput> {
        if self.simulated {
            info!("{}", invocation);
        }
        self.state.record(&invocation).into_result(&invocation)
    }
}

/// Handle for scripting and inspecting a mock runner.
///
/// It can be cloned and shared across tasks.
#[derive(Debug, Clone)]
pub struct MockRunnerHandle {
    state: Arc<MockState>,
}

impl MockRunnerHandle {
    /// Queue a one-shot response for `command`.
    ///
    /// Several responses for the same command are used in order.
    pub fn respond(&self, command: impl Into<String>, output: ProcessOutput) {
        self.state
            .queued
            .lock()
            .entry(command.into())
            .or_default()
            .push_back(output);
    }

    /// Answer every future run of `command` with `output` once the queued
    /// responses are used up.
    pub fn respond_always(&self, command: impl Into<String>, output: ProcessOutput) {
        self.state.standing.lock().insert(command.into(), output);
    }

    /// All invocations recorded so far, in start order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.invocations.lock().clone()
    }

    /// Recorded invocations rendered as command lines.
    pub fn command_lines(&self) -> Vec<String> {
        self.state
            .invocations
            .lock()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Number of recorded invocations of exactly `command`.
    pub fn count(&self, command: &str) -> usize {
        self.state
            .invocations
            .lock()
            .iter()
            .filter(|invocation| invocation.to_string() == command)
            .count()
    }

    /// Forget every recorded invocation.
    pub fn clear(&self) {
        self.state.invocations.lock().clear();
    }

    /// Wait until at least `count` invocations have been recorded.
    pub async fn wait_for_invocations(&self, count: usize) {
        loop {
            let recorded = self.state.recorded.notified();
            if self.state.invocations.lock().len() >= count {
                return;
            }
            recorded.await;
        }
    }
}
