//! I2C engine.
//!
//! Writes and reads go through `i2cset` and `i2cget` on bus 0, with every
//! address, register and data byte rendered by [`to_hex`].
//!
//! Both calling conventions of the write and read operations are explicit
//! enum variants ([`I2cWriteArgs`], [`I2cReadArgs`]) that are normalized
//! into one canonical request ([`I2cWriteOp`], [`I2cRequest`]) before
//! anything is dispatched.
//!
//! Writes are queued to one writer task per board, so every `i2cset`
//! runs in call order whether it came from a single register write or a
//! byte sequence.
//!
//! Reads wait the global poll delay set by [`Board::i2c_config`] before
//! every `i2cget`. The delay is read at the start of each iteration, so
//! reconfiguring it affects continuous reads that are already running.

use std::sync::Arc;
use std::time::Duration;

use omega_core::constants::{I2C_BUS, I2CGET, I2CSET};
use omega_core::{Result, parse_hex_bytes, to_hex};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::board::Board;
use crate::events::{BoardEvent, ErrorContext, EventHub, I2cReply, ReplyHandler, ReplyKey};
use crate::runner::{Invocation, ProcessRunner};

/// Poll delay configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2cOptions {
    /// Bus frequency in Hz; the delay is one period.
    Frequency(u32),

    /// Frequency or explicit delay. A present, non-zero frequency wins.
    Settings {
        frequency: Option<u32>,
        delay: Option<Duration>,
    },
}

impl I2cOptions {
    /// Poll delay these options describe.
    ///
    /// ```
    /// use std::time::Duration;
    /// use omega_hardware::I2cOptions;
    ///
    /// assert_eq!(I2cOptions::Frequency(100).poll_delay(), Duration::from_millis(10));
    /// assert_eq!(
    ///     I2cOptions::Settings { frequency: Some(0), delay: Some(Duration::from_millis(5)) }
    ///         .poll_delay(),
    ///     Duration::from_millis(5)
    /// );
    /// ```
    pub fn poll_delay(&self) -> Duration {
        match *self {
            Self::Frequency(hz) => period(hz),
            Self::Settings {
                frequency: Some(hz),
                ..
            } if hz > 0 => period(hz),
            Self::Settings { delay, .. } => delay.unwrap_or(Duration::ZERO),
        }
    }
}

impl From<u32> for I2cOptions {
    fn from(hz: u32) -> Self {
        Self::Frequency(hz)
    }
}

fn period(hz: u32) -> Duration {
    if hz == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(1_000_000_000 / u64::from(hz))
    }
}

/// Data written after the register in the register-first form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum I2cPayload {
    Byte(u8),
    Bytes(Vec<u8>),
}

/// Arguments of [`Board::i2c_write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum I2cWriteArgs {
    /// Register followed by its payload.
    Register { register: u8, payload: I2cPayload },

    /// One buffer whose first byte is the register.
    Buffer(Vec<u8>),
}

/// Canonical write operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum I2cWriteOp {
    /// One value to one register.
    Register { register: u8, value: u8 },

    /// Several bytes to one register, one `i2cset` each, in order.
    Sequence { register: u8, bytes: Vec<u8> },
}

impl I2cWriteArgs {
    /// Normalize into the operation to run, `None` when there is nothing
    /// to write.
    ///
    /// A buffer splits into its register and the remaining bytes, and a
    /// single remaining byte collapses into a register write, so
    /// `Buffer(vec![0x01, 0xaa])` and `(0x01, 0xaa)` are the same write.
    ///
    /// ```
    /// use omega_hardware::{I2cWriteArgs, I2cWriteOp};
    ///
    /// let op = I2cWriteArgs::Buffer(vec![0x01, 0xaa]).normalize();
    /// assert_eq!(op, I2cWriteArgs::from((0x01_u8, 0xaa_u8)).normalize());
    /// assert_eq!(op, Some(I2cWriteOp::Register { register: 0x01, value: 0xaa }));
    /// assert_eq!(I2cWriteArgs::Buffer(vec![0x01]).normalize(), None);
    /// ```
    pub fn normalize(self) -> Option<I2cWriteOp> {
        match self {
            Self::Register {
                register,
                payload: I2cPayload::Byte(value),
            } => Some(I2cWriteOp::Register { register, value }),
            Self::Register {
                register,
                payload: I2cPayload::Bytes(bytes),
            } => (!bytes.is_empty()).then_some(I2cWriteOp::Sequence { register, bytes }),
            Self::Buffer(buffer) => match buffer.split_first() {
                Some((&register, [value])) => Some(I2cWriteOp::Register {
                    register,
                    value: *value,
                }),
                Some((&register, rest)) if !rest.is_empty() => Some(I2cWriteOp::Sequence {
                    register,
                    bytes: rest.to_vec(),
                }),
                _ => None,
            },
        }
    }
}

impl From<(u8, u8)> for I2cWriteArgs {
    fn from((register, value): (u8, u8)) -> Self {
        Self::Register {
            register,
            payload: I2cPayload::Byte(value),
        }
    }
}

impl From<(u8, Vec<u8>)> for I2cWriteArgs {
    fn from((register, bytes): (u8, Vec<u8>)) -> Self {
        Self::Register {
            register,
            payload: I2cPayload::Bytes(bytes),
        }
    }
}

impl From<Vec<u8>> for I2cWriteArgs {
    fn from(buffer: Vec<u8>) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<&[u8]> for I2cWriteArgs {
    fn from(buffer: &[u8]) -> Self {
        Self::Buffer(buffer.to_vec())
    }
}

/// Arguments of [`Board::i2c_read`] and [`Board::i2c_read_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2cReadArgs {
    /// Read `register` of the device at `address`.
    Register {
        address: u8,
        register: u8,
        length: usize,
    },

    /// Read the device at `address` without naming a register.
    Address { address: u8, length: usize },
}

/// Canonical read request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cRequest {
    pub address: u8,
    pub register: Option<u8>,

    /// Number of reads a continuous request performs.
    pub length: usize,
    pub continuous: bool,
}

impl I2cRequest {
    pub fn new(args: I2cReadArgs, continuous: bool) -> Self {
        match args {
            I2cReadArgs::Register {
                address,
                register,
                length,
            } => Self {
                address,
                register: Some(register),
                length,
                continuous,
            },
            I2cReadArgs::Address { address, length } => Self {
                address,
                register: None,
                length,
                continuous,
            },
        }
    }

    /// Register actually read; 0 when none was named.
    pub fn effective_register(&self) -> u8 {
        self.register.unwrap_or(0)
    }

    /// Reply correlation key.
    pub fn key(&self) -> ReplyKey {
        ReplyKey {
            address: self.address,
            register: self.effective_register(),
        }
    }

    fn context(&self) -> ErrorContext {
        ErrorContext::I2c {
            address: self.address,
            register: self.register,
        }
    }
}

impl Board {
    /// Configure the I2C poll delay.
    ///
    /// `None` resets the delay to zero. The delay is global and applies to
    /// every read until the next call.
    pub fn i2c_config(&self, options: impl Into<Option<I2cOptions>>) -> &Self {
        let delay = options
            .into()
            .map_or(Duration::ZERO, |options| options.poll_delay());
        *self.inner.i2c_delay.lock() = delay;
        debug!("I2C poll delay set to {:?}", delay);
        self
    }

    /// Write to the device at `address`.
    ///
    /// Accepts either `(register, value)`, `(register, bytes)` or a buffer
    /// whose first byte is the register; see [`I2cWriteArgs::normalize`].
    /// A single value goes through [`Board::i2c_write_reg`]. Several bytes
    /// are written one `i2cset` at a time, in order, stopping at the first
    /// failure. Writes reach the bus in call order.
    pub fn i2c_write(&self, address: u8, args: impl Into<I2cWriteArgs>) -> &Self {
        match args.into().normalize() {
            Some(I2cWriteOp::Register { register, value }) => {
                self.i2c_write_reg(address, register, value)
            }
            Some(I2cWriteOp::Sequence { register, bytes }) => {
                self.i2c_write_sequence(address, register, bytes);
                self
            }
            None => {
                trace!("Nothing to write to i2c {}", to_hex(address));
                self
            }
        }
    }

    /// Write one value to one register.
    pub fn i2c_write_reg(&self, address: u8, register: u8, value: u8) -> &Self {
        self.i2c_write_sequence(address, register, vec![value]);
        self
    }

    fn i2c_write_sequence(&self, address: u8, register: u8, bytes: Vec<u8>) {
        let write = QueuedWrite {
            address,
            register,
            bytes,
        };
        if self.inner.i2c_writes.send(write).is_err() {
            warn!("I2C writer stopped, dropping write to {}", to_hex(address));
        }
    }

    /// Read continuously, calling `handler` with each reply.
    ///
    /// Performs `length` reads, each after the poll delay, and stops early
    /// at the first failure.
    pub fn i2c_read<F>(&self, args: I2cReadArgs, handler: F) -> &Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.start_i2c_read(I2cRequest::new(args, true), Arc::new(handler));
        self
    }

    /// Read once, after the poll delay.
    pub fn i2c_read_once<F>(&self, args: I2cReadArgs, handler: F) -> &Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.start_i2c_read(I2cRequest::new(args, false), Arc::new(handler));
        self
    }

    fn start_i2c_read(&self, request: I2cRequest, handler: ReplyHandler) {
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let mut remaining = request.length;
            loop {
                let Some(delay) = weak.upgrade().map(|inner| *inner.i2c_delay.lock()) else {
                    return;
                };
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                let Some(board) = weak.upgrade().map(|inner| Board { inner }) else {
                    return;
                };
                if let Err(e) = board.read_i2c(request, handler.clone()).await {
                    board.inner.events.error(request.context(), e);
                    return;
                }

                remaining = remaining.saturating_sub(1);
                if !request.continuous || remaining == 0 {
                    return;
                }
            }
        });
    }

    /// One `i2cget`: arm the handler, read, publish, deliver.
    async fn read_i2c(&self, request: I2cRequest, handler: ReplyHandler) -> Result<()> {
        let key = request.key();
        if self.inner.replies.arm(key, handler.clone()) {
            trace!("Replaced stale reply handler for {:?}", key);
        }

        let invocation = Invocation::new(I2CGET)
            .arg("-y")
            .arg(I2C_BUS)
            .arg(to_hex(request.address))
            .arg(to_hex(key.register));
        let data = self
            .inner
            .runner
            .spawn(invocation)
            .output()
            .await
            .and_then(|output| parse_hex_bytes(&output.stdout_text()));

        let data = match data {
            Ok(data) => data,
            Err(e) => {
                self.inner.replies.disarm(key, &handler);
                return Err(e);
            }
        };

        self.inner.events.emit(BoardEvent::I2cReply(I2cReply {
            address: key.address,
            register: key.register,
            data: data.clone(),
        }));
        if let Some(handler) = self.inner.replies.take(key) {
            handler(&data);
        }
        Ok(())
    }

    /// Alias of [`Board::i2c_config`].
    pub fn send_i2c_config(&self, options: impl Into<Option<I2cOptions>>) -> &Self {
        self.i2c_config(options)
    }

    /// Alias of [`Board::i2c_read_once`].
    pub fn send_i2c_read_request<F>(&self, args: I2cReadArgs, handler: F) -> &Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.i2c_read_once(args, handler)
    }

    /// Alias of [`Board::i2c_write`].
    pub fn send_i2c_write_request(&self, address: u8, args: impl Into<I2cWriteArgs>) -> &Self {
        self.i2c_write(address, args)
    }
}

/// Bytes waiting to be written to one register, one `i2cset` each.
#[derive(Debug)]
pub(crate) struct QueuedWrite {
    address: u8,
    register: u8,
    bytes: Vec<u8>,
}

/// Spawn the task running queued writes in order.
///
/// A failed `i2cset` is published as an error event and drops the rest of
/// its write; later writes still run. The task ends with the board.
pub(crate) fn spawn_i2c_writer(
    runner: Arc<dyn ProcessRunner>,
    events: EventHub,
) -> mpsc::UnboundedSender<QueuedWrite> {
    let (tx, mut rx) = mpsc::unbounded_channel::<QueuedWrite>();
    tokio::spawn(async move {
        while let Some(write) = rx.recv().await {
            let QueuedWrite {
                address,
                register,
                bytes,
            } = write;
            for byte in bytes {
                let invocation = i2cset(address, register, byte);
                if let Err(e) = runner.spawn(invocation).output().await {
                    let context = ErrorContext::I2c {
                        address,
                        register: Some(register),
                    };
                    events.error(context, e);
                    break;
                }
            }
        }
    });
    tx
}

fn i2cset(address: u8, register: u8, value: u8) -> Invocation {
    Invocation::new(I2CSET)
        .arg("-y")
        .arg(I2C_BUS)
        .arg(to_hex(address))
        .arg(to_hex(register))
        .arg(to_hex(value))
}
