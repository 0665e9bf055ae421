//! Board events and the I2C reply correlation table.
//!
//! Everything the board learns asynchronously is published as a
//! [`BoardEvent`] on a broadcast channel. Any number of subscribers can
//! listen through [`Board::subscribe`](crate::Board::subscribe); events sent
//! while nobody is subscribed are dropped.
//!
//! I2C reads additionally deliver their reply to the handler the caller
//! passed in. Handlers are parked in a [`ReplyTable`] keyed by
//! `(address, register)`, with at most one pending handler per key: arming
//! a key again replaces whatever handler was waiting there.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use omega_core::PinState;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Event published by the board.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum BoardEvent {
    /// The board finished construction.
    Connect,

    /// The board is ready for use. Always follows [`BoardEvent::Connect`].
    Ready,

    /// A pin's reported direction differed from the stored mode.
    PinStateChanged(PinState),

    /// A complete, terminator-delimited message arrived on a serial channel.
    SerialMessage(SerialMessage),

    /// An I2C register read completed.
    I2cReply(I2cReply),

    /// An asynchronous operation failed.
    Error(ErrorEvent),
}

/// One framed serial message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialMessage {
    /// Channel index.
    pub channel: u8,

    /// Device node of the channel.
    pub address: PathBuf,

    /// Configured baud rate.
    pub baud_rate: u32,

    /// Message bytes, terminator included.
    pub message: Bytes,

    /// When the message was framed.
    pub received_at: DateTime<Utc>,
}

impl SerialMessage {
    /// Message decoded lossily as UTF-8.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.message)
    }
}

/// Reply to an I2C register read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cReply {
    /// Device address.
    pub address: u8,

    /// Register that was read.
    pub register: u8,

    /// Bytes read.
    pub data: Vec<u8>,
}

/// What an error event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorContext {
    /// The board as a whole.
    Board,

    /// A GPIO pin.
    Pin(u8),

    /// An I2C device, and the register when one was involved.
    I2c { address: u8, register: Option<u8> },

    /// A serial channel.
    Serial(u8),
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Board => write!(f, "board"),
            Self::Pin(pin) => write!(f, "pin {pin}"),
            Self::I2c {
                address,
                register: Some(register),
            } => write!(f, "i2c {address:#04x} register {register:#04x}"),
            Self::I2c {
                address,
                register: None,
            } => write!(f, "i2c {address:#04x}"),
            Self::Serial(channel) => write!(f, "serial channel {channel}"),
        }
    }
}

/// Failure of an asynchronous operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    /// What the failed operation was acting on.
    pub context: ErrorContext,

    /// Error message.
    pub message: String,
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.message)
    }
}

/// Broadcast side of the board's event stream.
#[derive(Debug, Clone)]
pub(crate) struct EventHub {
    tx: broadcast::Sender<BoardEvent>,
}

impl EventHub {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: BoardEvent) {
        if self.tx.send(event).is_err() {
            trace!("No subscribers for board event");
        }
    }

    /// Log and publish an error.
    pub(crate) fn error(&self, context: ErrorContext, error: impl fmt::Display) {
        warn!("Error on {}: {}", context, error);
        self.emit(BoardEvent::Error(ErrorEvent {
            context,
            message: error.to_string(),
        }));
    }
}

/// Key correlating an I2C read with its reply handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplyKey {
    /// Device address.
    pub address: u8,

    /// Register, 0 when the read named none.
    pub register: u8,
}

/// Handler receiving I2C reply bytes.
pub type ReplyHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Pending I2C reply handlers, at most one per key.
#[derive(Default)]
pub(crate) struct ReplyTable {
    pending: Mutex<HashMap<ReplyKey, ReplyHandler>>,
}

impl ReplyTable {
    /// Park `handler` for `key`. Returns `true` if a stale handler was
    /// discarded.
    pub(crate) fn arm(&self, key: ReplyKey, handler: ReplyHandler) -> bool {
        self.pending.lock().insert(key, handler).is_some()
    }

    /// Remove and return the handler waiting on `key`.
    pub(crate) fn take(&self, key: ReplyKey) -> Option<ReplyHandler> {
        self.pending.lock().remove(&key)
    }

    /// Remove the handler for `key` only if it is still `handler`.
    pub(crate) fn disarm(&self, key: ReplyKey, handler: &ReplyHandler) {
        let mut pending = self.pending.lock();
        if pending
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, handler))
        {
            pending.remove(&key);
        }
    }

    /// Number of keys with a pending handler.
    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

impl fmt::Debug for ReplyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyTable")
            .field("pending", &self.len())
            .finish()
    }
}
