//! Hardware layer for the Omega2 single-board computer.
//!
//! This crate drives GPIO, PWM, I2C and UART hardware by running the
//! board's command-line utilities (`fast-gpio`, `i2cset`, `i2cget`,
//! `stty`) and keeps the per-pin and per-bus state needed to use them
//! safely from async code.
//!
//! # Overview
//!
//! - [`Board`] is the entry point. It owns the pin state store and exposes
//!   every operation as a method: mode changes, digital and PWM writes,
//!   polled digital reads, I2C writes and reads, and serial channels.
//! - [`runner`] is the seam to the operating system. [`SystemRunner`]
//!   runs the real utilities; [`MockRunner`] records invocations and
//!   replays scripted output for simulated boards and tests.
//! - [`events`] defines the [`BoardEvent`]s published to subscribers.
//!
//! Hardware operations return immediately. Their failures arrive later as
//! [`BoardEvent::Error`] events; only unsupported operations and
//! synchronous setup return an `Err` to the caller.
//!
//! # Example
//!
//! ```
//! use omega_core::Mode;
//! use omega_hardware::{Board, BoardConfig, BoardEvent};
//!
//! #[tokio::main]
//! async fn main() -> omega_core::Result<()> {
//!     let board = Board::new(BoardConfig::simulated())?;
//!     let mut events = board.subscribe();
//!
//!     assert!(matches!(events.recv().await, Ok(BoardEvent::Connect)));
//!     assert!(matches!(events.recv().await, Ok(BoardEvent::Ready)));
//!
//!     let led = board.default_led();
//!     board.set_mode(led, Mode::Output).digital_write(led, Board::LOW);
//!     assert_eq!(board.pin(led).map(|pin| pin.value), Some(Board::LOW));
//!
//!     board.shutdown();
//!     Ok(())
//! }
//! ```

pub mod board;
pub mod codec;
pub mod config;
pub mod digital;
pub mod events;
pub mod i2c;
pub mod mode;
pub mod poll;
pub mod runner;
pub mod serial;

pub use board::Board;
pub use config::BoardConfig;
pub use events::{
    BoardEvent, ErrorContext, ErrorEvent, I2cReply, ReplyHandler, ReplyKey, SerialMessage,
};
pub use i2c::{I2cOptions, I2cPayload, I2cReadArgs, I2cRequest, I2cWriteArgs, I2cWriteOp};
pub use poll::PollHandle;
pub use runner::{
    Invocation, MockRunner, MockRunnerHandle, ProcessHandle, ProcessOutput, ProcessRunner,
    SystemRunner,
};
pub use serial::SerialEncoding;
