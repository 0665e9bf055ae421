//! Mode controller.
//!
//! Every mode change is validated against the pin's capabilities before
//! anything is spawned. A valid change issues exactly one `fast-gpio`
//! invocation; an invalid one publishes an error event and issues none.

use omega_core::constants::FAST_GPIO;
use omega_core::{Error, Mode};
use serde::Deserialize;
use tracing::error;

use crate::board::Board;
use crate::events::{BoardEvent, ErrorContext};
use crate::runner::Invocation;

/// Reply of `fast-gpio -u get-direction`.
#[derive(Debug, Deserialize)]
struct DirectionReply {
    val: String,
}

impl DirectionReply {
    fn mode(&self) -> Mode {
        if self.val.trim().eq_ignore_ascii_case("input") {
            Mode::Input
        } else {
            Mode::Output
        }
    }
}

impl Board {
    /// Set the mode of `pin`.
    ///
    /// `Input` and `Output` run `fast-gpio set-input|set-output <pin>`.
    /// `Pwm` runs `set-output` and marks the pin as PWM driven. Any mode
    /// other than `Input` stops the pin's digital read poll.
    ///
    /// `Servo`, unknown pins and modes the pin does not support publish an
    /// error event and leave the pin untouched. Failures of the utility
    /// itself are published as error events once it exits.
    pub fn set_mode(&self, pin: u8, mode: Mode) -> &Self {
        self.apply_mode(pin, mode);
        self
    }

    /// Set the mode of `pin` unless it already has it.
    ///
    /// Returns whether the pin ends up in `mode`.
    pub(crate) fn ensure_mode(&self, pin: u8, mode: Mode) -> bool {
        match self.with_pin(pin, |slot| slot.state.mode == Some(mode)) {
            Some(true) => true,
            Some(false) => self.apply_mode(pin, mode),
            None => false,
        }
    }

    /// Returns whether the change was applied.
    fn apply_mode(&self, pin: u8, mode: Mode) -> bool {
        let context = ErrorContext::Pin(pin);

        if mode == Mode::Servo {
            error!("{} doesn't support servo mode", self.name());
            self.inner
                .events
                .error(context, Error::ModeNotSupported { pin, mode });
            return false;
        }

        let applied = self.with_pin(pin, |slot| {
            if !slot.state.supports(mode) {
                return false;
            }
            slot.state.mode = Some(mode);
            slot.state.is_pwm = mode == Mode::Pwm;
            if mode != Mode::Input {
                slot.cancel_poll();
            }
            true
        });

        match applied {
            Some(true) => {
                let direction = if mode == Mode::Input {
                    "set-input"
                } else {
                    "set-output"
                };
                let invocation = Invocation::new(FAST_GPIO).arg(direction).arg(pin);
                self.run_detached(invocation, context);
                true
            }
            Some(false) => {
                self.inner
                    .events
                    .error(context, Error::ModeNotSupported { pin, mode });
                false
            }
            None => false,
        }
    }

    /// Ask the hardware for the direction of `pin`.
    ///
    /// Runs `fast-gpio -u get-direction <pin>`. When the reported
    /// direction differs from the stored mode, the mode is updated and a
    /// [`BoardEvent::PinStateChanged`] is published; a pin that is no
    /// longer an input stops its digital read poll. `handler` is then
    /// called with the pin's mode, also when the query failed (the failure
    /// is published as an error event first).
    pub fn query_pin_state<F>(&self, pin: u8, handler: F) -> &Self
    where
        F: FnOnce(Option<Mode>) + Send + 'static,
    {
        let context = ErrorContext::Pin(pin);
        if self.with_pin(pin, |_| ()).is_none() {
            handler(None);
            return self;
        }

        let invocation = Invocation::new(FAST_GPIO)
            .arg("-u")
            .arg("get-direction")
            .arg(pin);
        let process = self.inner.runner.spawn(invocation);
        let board = self.clone();

        tokio::spawn(async move {
            let reply = process.output().await.and_then(|output| {
                let reply: DirectionReply = serde_json::from_slice(&output.stdout)?;
                Ok(reply.mode())
            });

            match reply {
                Ok(mode) => {
                    let changed = board
                        .with_pin(pin, |slot| {
                            if slot.state.mode == Some(mode) {
                                return None;
                            }
                            slot.state.mode = Some(mode);
                            slot.state.is_pwm = false;
                            if mode != Mode::Input {
                                slot.cancel_poll();
                            }
                            Some(slot.state.clone())
                        })
                        .flatten();
                    if let Some(state) = changed {
                        board.inner.events.emit(BoardEvent::PinStateChanged(state));
                    }
                }
                Err(e) => board.inner.events.error(context, e),
            }

            handler(board.pin(pin).and_then(|state| state.mode));
        });

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoardConfig;
    use crate::runner::{MockRunner, MockRunnerHandle, ProcessOutput};
    use rstest::rstest;
    use tokio::sync::oneshot;

    fn board() -> (Board, MockRunnerHandle) {
        let (runner, handle) = MockRunner::new();
        let board = Board::with_runner(BoardConfig::default(), runner).unwrap();
        (board, handle)
    }

    async fn next_error(
        events: &mut tokio::sync::broadcast::Receiver<BoardEvent>,
    ) -> crate::events::ErrorEvent {
        loop {
            if let BoardEvent::Error(event) = events.recv().await.unwrap() {
                return event;
            }
        }
    }

    #[rstest]
    #[case(Mode::Input, "fast-gpio set-input 18", false)]
    #[case(Mode::Output, "fast-gpio set-output 18", false)]
    #[case(Mode::Pwm, "fast-gpio set-output 18", true)]
    #[tokio::test]
    async fn test_set_mode_issues_one_command(
        #[case] mode: Mode,
        #[case] command: &str,
        #[case] is_pwm: bool,
    ) {
        let (board, handle) = board();

        board.set_mode(18, mode);

        let state = board.pin(18).unwrap();
        assert_eq!(state.mode, Some(mode));
        assert_eq!(state.is_pwm, is_pwm);
        assert_eq!(handle.command_lines(), vec![command]);
    }

    #[tokio::test]
    async fn test_analog_alias_records_pwm() {
        let (board, handle) = board();

        board.set_mode(19, "ANALOG".parse().unwrap());

        assert_eq!(board.pin(19).unwrap().mode, Some(Mode::Pwm));
        assert_eq!(handle.command_lines(), vec!["fast-gpio set-output 19"]);
    }

    #[rstest]
    #[case(3, Mode::Servo)]
    #[case(3, Mode::Pwm)]
    #[tokio::test]
    async fn test_rejected_mode_leaves_pin_untouched(#[case] pin: u8, #[case] mode: Mode) {
        let (board, handle) = board();
        board.set_mode(pin, Mode::Output);
        handle.clear();
        let mut events = board.subscribe();

        board.set_mode(pin, mode);

        assert_eq!(board.pin(pin).unwrap().mode, Some(Mode::Output));
        assert!(handle.invocations().is_empty());
        assert_eq!(next_error(&mut events).await.context, ErrorContext::Pin(pin));
    }

    #[tokio::test]
    async fn test_unknown_pin() {
        let (board, handle) = board();
        let mut events = board.subscribe();

        board.set_mode(10, Mode::Output);

        assert!(handle.invocations().is_empty());
        let event = next_error(&mut events).await;
        assert_eq!(event.context, ErrorContext::Pin(10));
        assert_eq!(event.message, "Invalid pin: 10");
    }

    #[tokio::test]
    async fn test_ensure_mode_skips_when_already_set() {
        let (board, handle) = board();

        assert!(board.ensure_mode(5, Mode::Output));
        assert!(board.ensure_mode(5, Mode::Output));
        assert_eq!(handle.count("fast-gpio set-output 5"), 1);
    }

    #[tokio::test]
    async fn test_query_pin_state_reports_change() {
        let (board, handle) = board();
        handle.respond(
            "fast-gpio -u get-direction 4",
            ProcessOutput::success(r#"{"cmd":"Get Direction","pin":4,"val":"input"}"#),
        );
        let mut events = board.subscribe();
        let (tx, rx) = oneshot::channel();

        board.query_pin_state(4, move |mode| {
            let _ = tx.send(mode);
        });

        assert_eq!(rx.await.unwrap(), Some(Mode::Input));
        loop {
            if let BoardEvent::PinStateChanged(state) = events.recv().await.unwrap() {
                assert_eq!(state.index, 4);
                assert_eq!(state.mode, Some(Mode::Input));
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_query_pin_state_calls_handler_after_failure() {
        let (board, handle) = board();
        board.set_mode(4, Mode::Output);
        handle.respond(
            "fast-gpio -u get-direction 4",
            ProcessOutput::failure(1, "no such pin"),
        );
        let (tx, rx) = oneshot::channel();

        board.query_pin_state(4, move |mode| {
            let _ = tx.send(mode);
        });

        assert_eq!(rx.await.unwrap(), Some(Mode::Output));
    }
}
