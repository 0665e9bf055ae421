//! Serial engine.
//!
//! A channel is a UART device node (`/dev/ttyS<channel>` by default). Opening
//! a channel sets the line speed with `stty` and opens separate read and
//! write streams on the node. Listening reads the node in a background
//! task; received bytes accumulate in the channel buffer and every complete
//! terminator-delimited message is published as a
//! [`BoardEvent::SerialMessage`].
//!
//! Writes are queued to a per-channel writer task, so they reach the device
//! in call order without blocking the caller.

use std::ffi::OsString;
use std::path::PathBuf;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use omega_core::constants::{DEFAULT_BAUD_RATE, STTY};
use omega_core::{Error, Result};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Decoder;
use tracing::{debug, trace};

use crate::board::Board;
use crate::codec::TerminatorCodec;
use crate::events::{BoardEvent, ErrorContext, EventHub, SerialMessage};
use crate::runner::Invocation;

const READ_CHUNK_SIZE: usize = 1024;

/// How [`Board::serial_write`] turns a message into bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SerialEncoding {
    #[default]
    Utf8,

    /// 7-bit ASCII; other characters are rejected.
    Ascii,

    /// Hex digits, two per byte.
    Hex,
}

impl SerialEncoding {
    /// Encode `message`.
    ///
    /// ```
    /// use omega_hardware::SerialEncoding;
    ///
    /// assert_eq!(SerialEncoding::Hex.encode("4f4b0a").unwrap(), &b"OK\n"[..]);
    /// assert!(SerialEncoding::Ascii.encode("caf\u{e9}").is_err());
    /// ```
    pub fn encode(&self, message: &str) -> Result<Bytes> {
        match self {
            Self::Utf8 => Ok(Bytes::copy_from_slice(message.as_bytes())),
            Self::Ascii if message.is_ascii() => Ok(Bytes::copy_from_slice(message.as_bytes())),
            Self::Ascii => Err(Error::invalid_data(format!(
                "Message is not ASCII: {message:?}"
            ))),
            Self::Hex => hex::decode(message.trim())
                .map(Bytes::from)
                .map_err(|e| Error::invalid_data(format!("Invalid hex message: {e}"))),
        }
    }
}

impl FromStr for SerialEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Self::Utf8),
            "ascii" => Ok(Self::Ascii),
            "hex" => Ok(Self::Hex),
            other => Err(Error::invalid_data(format!("Unknown encoding: {other}"))),
        }
    }
}

/// An open serial channel.
#[derive(Debug)]
pub(crate) struct SerialChannel {
    address: PathBuf,
    baud_rate: u32,
    framer: TerminatorCodec,
    buffer: BytesMut,

    /// Read stream, until a listener takes it.
    reader: Option<File>,
    reader_task: Option<JoinHandle<()>>,
    writer: mpsc::UnboundedSender<Bytes>,
}

impl SerialChannel {
    /// End both streams. Queued writes are still flushed.
    pub(crate) fn close(mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        debug!("Closed {}", self.address.display());
    }
}

impl Board {
    /// Device node of `channel`.
    pub fn serial_address(&self, channel: u8) -> PathBuf {
        let mut address = OsString::from(self.inner.config.serial_device_prefix.as_os_str());
        address.push(channel.to_string());
        PathBuf::from(address)
    }

    /// Open `channel` at `baud_rate` (0 selects 115200).
    ///
    /// Runs `stty -F <device> <baud>` and waits for it, then opens the
    /// device for reading and writing. Reopening a channel closes the
    /// previous streams.
    ///
    /// This call blocks the calling thread until `stty` exits and both
    /// streams are open. Only the resulting streams are asynchronous.
    ///
    /// # Errors
    ///
    /// Returns an error if `stty` fails or the device cannot be opened.
    pub fn serial_open(&self, baud_rate: u32, channel: u8) -> Result<&Self> {
        let baud_rate = if baud_rate == 0 {
            DEFAULT_BAUD_RATE
        } else {
            baud_rate
        };
        let address = self.serial_address(channel);

        self.inner.runner.run_sync(
            Invocation::new(STTY)
                .arg("-F")
                .arg(address.display())
                .arg(baud_rate),
        )?;

        let reader = std::fs::File::open(&address)?;
        let writer = std::fs::OpenOptions::new().write(true).open(&address)?;
        let writer = spawn_writer(
            File::from_std(writer),
            channel,
            self.inner.events.clone(),
        );

        let opened = SerialChannel {
            address: address.clone(),
            baud_rate,
            framer: TerminatorCodec::default(),
            buffer: BytesMut::new(),
            reader: Some(File::from_std(reader)),
            reader_task: None,
            writer,
        };

        let previous = self.inner.serial.lock().insert(channel, opened);
        if let Some(previous) = previous {
            previous.close();
        }
        debug!("Opened {} at {} baud", address.display(), baud_rate);
        Ok(self)
    }

    /// Start publishing messages received on `channel`.
    ///
    /// Messages end with `terminator` (empty selects `"\n"`). Listening
    /// again only changes the terminator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelNotOpen`] if the channel is not open.
    pub fn serial_listen(&self, terminator: impl AsRef<[u8]>, channel: u8) -> Result<&Self> {
        let mut serial = self.inner.serial.lock();
        let open = serial
            .get_mut(&channel)
            .ok_or(Error::ChannelNotOpen(channel))?;

        open.framer = TerminatorCodec::new(terminator);
        let Some(mut reader) = open.reader.take() else {
            return Ok(self);
        };

        let weak = std::sync::Arc::downgrade(&self.inner);
        let events = self.inner.events.clone();
        open.reader_task = Some(tokio::spawn(async move {
            let mut chunk = vec![0u8; READ_CHUNK_SIZE];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => {
                        debug!("Serial channel {} reached end of stream", channel);
                        break;
                    }
                    Ok(n) => match weak.upgrade() {
                        Some(inner) => {
                            Board { inner }.serial_receive(channel, &chunk[..n]);
                        }
                        None => break,
                    },
                    Err(e) => {
                        events.error(ErrorContext::Serial(channel), e);
                        break;
                    }
                }
            }
        }));

        Ok(self)
    }

    /// Append received bytes to the buffer of `channel` and publish every
    /// complete message.
    pub fn serial_receive(&self, channel: u8, chunk: &[u8]) -> &Self {
        match self.inner.serial.lock().get_mut(&channel) {
            Some(open) => open.buffer.extend_from_slice(chunk),
            None => {
                trace!("Dropping {} bytes for closed channel {}", chunk.len(), channel);
                return self;
            }
        }
        self.serial_on_message(channel)
    }

    /// Publish every complete message in the buffer of `channel`, in order.
    ///
    /// Each message is split off the buffer with its terminator; whatever
    /// follows the last terminator stays buffered.
    pub fn serial_on_message(&self, channel: u8) -> &Self {
        let mut messages = Vec::new();
        let mut failure = None;

        if let Some(open) = self.inner.serial.lock().get_mut(&channel) {
            loop {
                match open.framer.decode(&mut open.buffer) {
                    Ok(Some(message)) => messages.push(SerialMessage {
                        channel,
                        address: open.address.clone(),
                        baud_rate: open.baud_rate,
                        message,
                        received_at: Utc::now(),
                    }),
                    Ok(None) => break,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }

        for message in messages {
            self.inner.events.emit(BoardEvent::SerialMessage(message));
        }
        if let Some(e) = failure {
            self.inner.events.error(ErrorContext::Serial(channel), e);
        }
        self
    }

    /// Queue `message` for `channel`.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded or the channel is
    /// not open. Write failures are published as error events.
    pub fn serial_write(
        &self,
        message: &str,
        encoding: SerialEncoding,
        channel: u8,
    ) -> Result<&Self> {
        let bytes = encoding.encode(message)?;
        let serial = self.inner.serial.lock();
        let open = serial.get(&channel).ok_or(Error::ChannelNotOpen(channel))?;
        open.writer
            .send(bytes)
            .map_err(|_| Error::ChannelNotOpen(channel))?;
        Ok(self)
    }

    /// Close `channel`. Closing a channel that is not open does nothing.
    pub fn serial_close(&self, channel: u8) -> &Self {
        let removed = self.inner.serial.lock().remove(&channel);
        if let Some(open) = removed {
            open.close();
        }
        self
    }

    /// Whether `channel` is open.
    pub fn is_serial_open(&self, channel: u8) -> bool {
        self.inner.serial.lock().contains_key(&channel)
    }

    /// Bytes buffered on `channel` that do not yet form a message.
    pub fn serial_buffered(&self, channel: u8) -> Option<usize> {
        self.inner
            .serial
            .lock()
            .get(&channel)
            .map(|open| open.buffer.len())
    }
}

/// Spawn the task draining writes for `channel` into `file`.
fn spawn_writer(mut file: File, channel: u8, events: EventHub) -> mpsc::UnboundedSender<Bytes> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            let written = async {
                file.write_all(&bytes).await?;
                file.flush().await
            };
            if let Err(e) = written.await {
                events.error(ErrorContext::Serial(channel), e);
                break;
            }
        }
    });
    tx
}
