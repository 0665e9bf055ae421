//! The board: pin state store, lifecycle and system commands.
//!
//! A [`Board`] owns everything the engines share: the capability table,
//! one [`PinState`] per pin, the I2C poll delay, the open serial channels
//! and the event hub. The engines themselves are `impl Board` blocks in
//! the [`mode`](crate::mode), [`digital`](crate::digital),
//! [`i2c`](crate::i2c) and [`serial`](crate::serial) modules.
//!
//! `Board` is a cheap handle around shared state; clones refer to the same
//! board. All state sits behind short-lived locks that are never held
//! across an `.await`, so board methods can be called from any task.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use omega_core::constants::{BOARD_NAME, HIGH, LOW, OUPGRADE, REBOOT};
use omega_core::{CapabilityTable, Error, PinState, Result};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::config::BoardConfig;
use crate::events::{BoardEvent, ErrorContext, EventHub, ReplyTable};
use crate::i2c::{QueuedWrite, spawn_i2c_writer};
use crate::poll::PollHandle;
use crate::runner::{Invocation, MockRunner, ProcessRunner, SystemRunner};
use crate::serial::SerialChannel;

/// Runtime slot for one pin.
#[derive(Debug)]
pub(crate) struct PinSlot {
    pub(crate) state: PinState,

    /// Active digital read poll, if any.
    pub(crate) poll: Option<PollHandle>,
}

impl PinSlot {
    /// Stop the active poll, if any.
    pub(crate) fn cancel_poll(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.cancel();
        }
    }
}

pub(crate) struct BoardInner {
    pub(crate) config: BoardConfig,
    pub(crate) runner: Arc<dyn ProcessRunner>,
    pub(crate) capabilities: CapabilityTable,
    pub(crate) pins: Mutex<BTreeMap<u8, PinSlot>>,
    pub(crate) i2c_delay: Mutex<Duration>,
    pub(crate) i2c_writes: mpsc::UnboundedSender<QueuedWrite>,
    pub(crate) replies: ReplyTable,
    pub(crate) serial: Mutex<HashMap<u8, SerialChannel>>,
    pub(crate) events: EventHub,
    ready: AtomicBool,
}

/// Handle to an Omega2 board.
///
/// # Examples
///
/// ```
/// use omega_core::Mode;
/// use omega_hardware::runner::MockRunner;
/// use omega_hardware::{Board, BoardConfig};
///
/// #[tokio::main]
/// async fn main() -> omega_core::Result<()> {
///     let (runner, handle) = MockRunner::new();
///     let board = Board::with_runner(BoardConfig::default(), runner)?;
///
///     board.set_mode(44, Mode::Output).digital_write(44, Board::HIGH);
///
///     assert_eq!(
///         handle.command_lines(),
///         vec!["fast-gpio set-output 44", "fast-gpio set 44 1"]
///     );
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Board {
    pub(crate) inner: Arc<BoardInner>,
}

impl Board {
    /// Logic high.
    pub const HIGH: u32 = HIGH;

    /// Logic low.
    pub const LOW: u32 = LOW;

    /// Create a board from `config`.
    ///
    /// Runs the real utilities unless `config.simulated` is set, in which
    /// case every command is logged and answered with empty output.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin table cannot be built.
    pub fn new(config: BoardConfig) -> Result<Self> {
        if config.simulated {
            info!("Running in simulated mode");
            Self::with_runner(config, MockRunner::simulated())
        } else {
            Self::with_runner(config, SystemRunner::new())
        }
    }

    /// Create a board that runs commands through `runner`.
    ///
    /// Must be called from within a tokio runtime: [`BoardEvent::Connect`]
    /// and [`BoardEvent::Ready`] are published from a task once the
    /// scheduler next runs, so subscribers created right after construction
    /// still see them.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin table cannot be built.
    pub fn with_runner(config: BoardConfig, runner: impl ProcessRunner + 'static) -> Result<Self> {
        let capabilities = config.capabilities()?;
        let pins = capabilities
            .iter()
            .map(|pin| {
                let slot = PinSlot {
                    state: PinState::new(pin.index, pin.supported_modes.clone()),
                    poll: None,
                };
                (pin.index, slot)
            })
            .collect();

        let runner: Arc<dyn ProcessRunner> = Arc::new(runner);
        let events = EventHub::new(config.event_capacity);
        let i2c_writes = spawn_i2c_writer(runner.clone(), events.clone());

        let inner = Arc::new(BoardInner {
            events,
            config,
            runner,
            capabilities,
            pins: Mutex::new(pins),
            i2c_delay: Mutex::new(Duration::ZERO),
            i2c_writes,
            replies: ReplyTable::default(),
            serial: Mutex::new(HashMap::new()),
            ready: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            if let Some(inner) = weak.upgrade() {
                inner.ready.store(true, Ordering::SeqCst);
                inner.events.emit(BoardEvent::Connect);
                inner.events.emit(BoardEvent::Ready);
                debug!("{} ready", BOARD_NAME);
            }
        });

        Ok(Self { inner })
    }

    /// Board name.
    pub fn name(&self) -> &'static str {
        BOARD_NAME
    }

    /// Whether [`BoardEvent::Ready`] has been published.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    /// Subscribe to board events.
    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.inner.events.subscribe()
    }

    /// Configuration the board was built with.
    pub fn config(&self) -> &BoardConfig {
        &self.inner.config
    }

    /// Pin capability table.
    pub fn capabilities(&self) -> &CapabilityTable {
        &self.inner.capabilities
    }

    /// Snapshot of one pin's state.
    pub fn pin(&self, index: u8) -> Option<PinState> {
        self.inner
            .pins
            .lock()
            .get(&index)
            .map(|slot| slot.state.clone())
    }

    /// Snapshot of every pin's state, in index order.
    pub fn pins(&self) -> Vec<PinState> {
        self.inner
            .pins
            .lock()
            .values()
            .map(|slot| slot.state.clone())
            .collect()
    }

    /// Whether a digital read is polling `pin`.
    pub fn is_polling(&self, pin: u8) -> bool {
        self.inner
            .pins
            .lock()
            .get(&pin)
            .and_then(|slot| slot.poll.as_ref())
            .is_some_and(|poll| !poll.is_finished())
    }

    /// Pin of the on-board LED.
    pub fn default_led(&self) -> u8 {
        self.inner.config.default_led
    }

    /// Current I2C poll delay.
    pub fn i2c_poll_delay(&self) -> Duration {
        *self.inner.i2c_delay.lock()
    }

    /// Reboot the board.
    pub fn reboot(&self) -> &Self {
        self.run_detached(Invocation::new(REBOOT), ErrorContext::Board);
        self
    }

    /// Start a firmware upgrade.
    pub fn upgrade(&self) -> &Self {
        self.run_detached(Invocation::new(OUPGRADE), ErrorContext::Board);
        self
    }

    /// Stop every digital read poll and close every serial channel.
    pub fn shutdown(&self) {
        for slot in self.inner.pins.lock().values_mut() {
            slot.cancel_poll();
        }

        let channels: Vec<SerialChannel> = self
            .inner
            .serial
            .lock()
            .drain()
            .map(|(_, channel)| channel)
            .collect();
        for channel in channels {
            channel.close();
        }

        debug!("{} shut down", BOARD_NAME);
    }

    /// Start `invocation` and report its failure, if any, as an error event.
    pub(crate) fn run_detached(&self, invocation: Invocation, context: ErrorContext) {
        let handle = self.inner.runner.spawn(invocation);
        let events = self.inner.events.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.output().await {
                events.error(context, e);
            }
        });
    }

    /// Run `f` on the slot of `pin`, or publish an invalid pin error.
    pub(crate) fn with_pin<T>(&self, pin: u8, f: impl FnOnce(&mut PinSlot) -> T) -> Option<T> {
        let result = self.inner.pins.lock().get_mut(&pin).map(f);
        if result.is_none() {
            self.inner
                .events
                .error(ErrorContext::Pin(pin), Error::InvalidPin(pin));
        }
        result
    }

    // Operations this board has no hardware for.

    /// Not supported: the board has no analog inputs.
    pub fn analog_read(&self, _pin: u8) -> Result<u32> {
        Err(Error::unsupported("analog_read"))
    }

    /// Not supported.
    pub fn pulse_in(&self, _pin: u8) -> Result<Duration> {
        Err(Error::unsupported("pulse_in"))
    }

    /// Not supported.
    pub fn pulse_out(&self, _pin: u8, _value: u32, _width: Duration) -> Result<()> {
        Err(Error::unsupported("pulse_out"))
    }

    /// Not supported.
    pub fn servo_write(&self, _pin: u8, _angle: u32) -> Result<()> {
        Err(Error::unsupported("servo_write"))
    }

    /// Not supported.
    pub fn stepper_config(&self, _device: u8) -> Result<()> {
        Err(Error::unsupported("stepper_config"))
    }

    /// Not supported.
    pub fn stepper_step(&self, _device: u8, _steps: u32) -> Result<()> {
        Err(Error::unsupported("stepper_step"))
    }

    /// Not supported.
    pub fn send_one_wire_config(&self, _pin: u8) -> Result<()> {
        Err(Error::unsupported("send_one_wire_config"))
    }

    /// Not supported.
    pub fn send_one_wire_search(&self, _pin: u8) -> Result<Vec<u64>> {
        Err(Error::unsupported("send_one_wire_search"))
    }

    /// Not supported.
    pub fn send_one_wire_alarms_search(&self, _pin: u8) -> Result<Vec<u64>> {
        Err(Error::unsupported("send_one_wire_alarms_search"))
    }

    /// Not supported.
    pub fn send_one_wire_read(&self, _pin: u8, _device: u64, _length: usize) -> Result<Vec<u8>> {
        Err(Error::unsupported("send_one_wire_read"))
    }

    /// Not supported.
    pub fn send_one_wire_write(&self, _pin: u8, _device: u64, _data: &[u8]) -> Result<()> {
        Err(Error::unsupported("send_one_wire_write"))
    }

    /// Not supported.
    pub fn send_one_wire_write_and_read(
        &self,
        _pin: u8,
        _device: u64,
        _data: &[u8],
        _length: usize,
    ) -> Result<Vec<u8>> {
        Err(Error::unsupported("send_one_wire_write_and_read"))
    }

    /// Not supported.
    pub fn send_one_wire_reset(&self, _pin: u8) -> Result<()> {
        Err(Error::unsupported("send_one_wire_reset"))
    }

    /// Not supported.
    pub fn send_one_wire_delay(&self, _pin: u8, _delay: Duration) -> Result<()> {
        Err(Error::unsupported("send_one_wire_delay"))
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Board")
            .field("name", &self.name())
            .field("ready", &self.is_ready())
            .field("pins", &self.inner.capabilities.len())
            .field("runner", &self.inner.runner)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockRunnerHandle;
    use omega_core::Mode;

    fn board() -> (Board, MockRunnerHandle) {
        let (runner, handle) = MockRunner::new();
        let board = Board::with_runner(BoardConfig::default(), runner).unwrap();
        (board, handle)
    }

    #[tokio::test]
    async fn test_connect_then_ready() {
        let (board, _handle) = board();
        let mut events = board.subscribe();
        assert!(!board.is_ready());

        assert!(matches!(events.recv().await.unwrap(), BoardEvent::Connect));
        assert!(matches!(events.recv().await.unwrap(), BoardEvent::Ready));
        assert!(board.is_ready());
    }

    #[tokio::test]
    async fn test_one_slot_per_capability_pin() {
        let (board, _handle) = board();

        assert_eq!(board.pins().len(), board.capabilities().len());
        let led = board.pin(board.default_led()).unwrap();
        assert_eq!(led.index, 44);
        assert_eq!(led.mode, None);
        assert_eq!(led.value, 0);
        assert!(led.supports(Mode::Output));
        assert!(board.pin(10).is_none());
    }

    #[tokio::test]
    async fn test_system_commands() {
        let (board, handle) = board();

        board.reboot().upgrade();
        assert_eq!(handle.command_lines(), vec!["reboot", "oupgrade"]);
    }

    #[tokio::test]
    async fn test_failed_command_emits_board_error() {
        let (board, handle) = board();
        let mut events = board.subscribe();
        handle.respond(
            "reboot",
            crate::runner::ProcessOutput::failure(1, "permission denied"),
        );

        board.reboot();

        loop {
            match events.recv().await.unwrap() {
                BoardEvent::Error(event) => {
                    assert_eq!(event.context, ErrorContext::Board);
                    assert!(event.message.contains("permission denied"));
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_unsupported_operations_fail_fast() {
        let (board, handle) = board();

        assert!(board.analog_read(1).unwrap_err().is_unsupported());
        assert!(board.pulse_in(1).unwrap_err().is_unsupported());
        assert!(
            board
                .pulse_out(1, 1, Duration::from_micros(10))
                .unwrap_err()
                .is_unsupported()
        );
        assert!(board.servo_write(1, 90).unwrap_err().is_unsupported());
        assert!(board.stepper_config(0).unwrap_err().is_unsupported());
        assert!(board.stepper_step(0, 10).unwrap_err().is_unsupported());
        assert!(board.send_one_wire_config(1).unwrap_err().is_unsupported());
        assert!(board.send_one_wire_search(1).unwrap_err().is_unsupported());
        assert!(board.send_one_wire_reset(1).unwrap_err().is_unsupported());
        assert_eq!(
            board.analog_read(1).unwrap_err().to_string(),
            "analog_read is not yet implemented"
        );
        assert!(handle.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_debug_output() {
        let (board, _handle) = board();
        let debug = format!("{board:?}");
        assert!(debug.contains("Omega2-IO"));
    }
}
