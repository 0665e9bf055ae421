//! Digital and PWM I/O.

use std::ops::ControlFlow;
use std::sync::Arc;

use omega_core::constants::{FAST_GPIO, PWM_IDLE_LEVEL, PWM_PERIOD};
use omega_core::{Error, Mode, Result};
use serde::Deserialize;
use tracing::trace;

use crate::board::Board;
use crate::events::ErrorContext;
use crate::poll::PollHandle;
use crate::runner::Invocation;

/// Reply of `fast-gpio -u read`.
#[derive(Debug, Deserialize)]
struct ReadReply {
    val: ReadValue,
}

/// `fast-gpio` reports the level either as a number or as a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReadValue {
    Number(u32),
    Text(String),
}

/// Parse the JSON printed by `fast-gpio -u read`.
fn parse_read_reply(stdout: &str) -> Result<u32> {
    let reply: ReadReply = serde_json::from_str(stdout)?;
    match reply.val {
        ReadValue::Number(value) => Ok(value),
        ReadValue::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| Error::invalid_data(format!("GPIO value is not a number: {text:?}"))),
    }
}

impl Board {
    /// Drive `pin` to `value`.
    ///
    /// Switches the pin to `Output` first when needed, then runs
    /// `fast-gpio set <pin> <value>`.
    pub fn digital_write(&self, pin: u8, value: u32) -> &Self {
        if !self.ensure_mode(pin, Mode::Output) {
            return self;
        }

        self.with_pin(pin, |slot| slot.state.value = value);
        let invocation = Invocation::new(FAST_GPIO).arg("set").arg(pin).arg(value);
        self.run_detached(invocation, ErrorContext::Pin(pin));
        self
    }

    /// Set the PWM duty cycle of `pin`.
    ///
    /// Switches the pin to `Pwm` first when needed. A duty cycle of 0 parks
    /// the pin at its idle level with `fast-gpio set`; anything else runs
    /// `fast-gpio pwm <pin> <value> 200`.
    pub fn analog_write(&self, pin: u8, value: u32) -> &Self {
        if !self.ensure_mode(pin, Mode::Pwm) {
            return self;
        }

        self.with_pin(pin, |slot| slot.state.value = value);
        let invocation = if value == 0 {
            Invocation::new(FAST_GPIO)
                .arg("set")
                .arg(pin)
                .arg(PWM_IDLE_LEVEL)
        } else {
            Invocation::new(FAST_GPIO)
                .arg("pwm")
                .arg(pin)
                .arg(value)
                .arg(PWM_PERIOD)
        };
        self.run_detached(invocation, ErrorContext::Pin(pin));
        self
    }

    /// Alias of [`Board::analog_write`].
    pub fn pwm_write(&self, pin: u8, value: u32) -> &Self {
        self.analog_write(pin, value)
    }

    /// Poll `pin` and report level changes to `handler`.
    ///
    /// Switches the pin to `Input` first when needed, then reads it
    /// immediately and once per poll interval until the pin's mode changes,
    /// another read replaces this one, or the board shuts down.
    ///
    /// `handler` is called when a read returns a level different from the
    /// stored one, and with the stored level when a read prints nothing.
    /// Failed reads are published as error events and polling continues.
    pub fn digital_read<F>(&self, pin: u8, handler: F) -> &Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        if !self.ensure_mode(pin, Mode::Input) {
            return self;
        }

        let handler = Arc::new(handler);
        let board = Arc::downgrade(&self.inner);
        let poll = PollHandle::start(self.inner.config.digital_poll_interval(), move || {
            let board = board.upgrade().map(|inner| Board { inner });
            let handler = handler.clone();
            async move {
                match board {
                    Some(board) => {
                        board.read_digital(pin, handler.as_ref()).await;
                        ControlFlow::Continue(())
                    }
                    None => ControlFlow::Break(()),
                }
            }
        });

        self.with_pin(pin, |slot| {
            slot.cancel_poll();
            slot.poll = Some(poll);
        });
        self
    }

    /// One iteration of a digital read poll.
    async fn read_digital(&self, pin: u8, handler: &(dyn Fn(u32) + Send + Sync)) {
        let context = ErrorContext::Pin(pin);
        let invocation = Invocation::new(FAST_GPIO).arg("-u").arg("read").arg(pin);

        let output = match self.inner.runner.spawn(invocation).output().await {
            Ok(output) => output,
            Err(e) => {
                self.inner.events.error(context, e);
                return;
            }
        };

        let stdout = output.stdout_text();
        let stdout = stdout.trim();
        if stdout.is_empty() {
            if let Some(value) = self.with_pin(pin, |slot| slot.state.value) {
                handler(value);
            }
            return;
        }

        let value = match parse_read_reply(stdout) {
            Ok(value) => value,
            Err(e) => {
                self.inner.events.error(context, e);
                return;
            }
        };

        let changed = self.with_pin(pin, |slot| {
            let changed = slot.state.value != value;
            slot.state.value = value;
            changed
        });
        if changed == Some(true) {
            trace!("Pin {} changed to {}", pin, value);
            handler(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(r#"{"cmd":"Read","pin":3,"val":1}"#, 1)]
    #[case(r#"{"cmd":"Read","pin":3,"val":"0"}"#, 0)]
    #[case(r#"{"val":" 1 "}"#, 1)]
    fn test_parse_read_reply(#[case] stdout: &str, #[case] expected: u32) {
        assert_eq!(parse_read_reply(stdout).unwrap(), expected);
    }

    #[rstest]
    #[case("not json")]
    #[case(r#"{"val":"high"}"#)]
    #[case(r#"{"pin":3}"#)]
    fn test_parse_read_reply_rejects(#[case] stdout: &str) {
        assert!(parse_read_reply(stdout).is_err());
    }
}
