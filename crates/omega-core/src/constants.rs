//! Board constants and the command-line utilities the board drives.

use std::time::Duration;

/// Board name reported to callers.
pub const BOARD_NAME: &str = "Omega2-IO";

/// Logic high level.
pub const HIGH: u32 = 1;

/// Logic low level.
pub const LOW: u32 = 0;

/// On-board LED pin.
pub const DEFAULT_LED_PIN: u8 = 44;

/// Interval between polled digital reads.
pub const DIGITAL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Period argument passed to `fast-gpio pwm`.
pub const PWM_PERIOD: u32 = 200;

/// Level a PWM pin is set to when its duty cycle is zero.
pub const PWM_IDLE_LEVEL: u32 = 1;

/// Default serial baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default serial message terminator.
pub const DEFAULT_MESSAGE_TERMINATOR: &[u8] = b"\n";

/// Device node prefix for serial channels (`/dev/ttyS0`, `/dev/ttyS1`, ...).
pub const SERIAL_DEVICE_PREFIX: &str = "/dev/ttyS";

/// I2C bus the Omega2 exposes to userspace.
pub const I2C_BUS: &str = "0";

/// Default capacity of the board event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// GPIO utility.
pub const FAST_GPIO: &str = "fast-gpio";

/// I2C register write utility.
pub const I2CSET: &str = "i2cset";

/// I2C register read utility.
pub const I2CGET: &str = "i2cget";

/// Terminal line configuration utility.
pub const STTY: &str = "stty";

/// System reboot command.
pub const REBOOT: &str = "reboot";

/// Firmware upgrade command.
pub const OUPGRADE: &str = "oupgrade";
