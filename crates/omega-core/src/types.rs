//! Common types shared by the capability table and the hardware engines.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Operating mode of a pin.
///
/// `ANALOG` is accepted wherever a mode is parsed or deserialized and is
/// treated as [`Mode::Pwm`]; the board has no analog inputs, so an
/// "analog" pin is always a PWM output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    /// Digital input.
    Input,

    /// Digital output.
    Output,

    /// Pulse-width modulated output.
    #[serde(alias = "ANALOG")]
    Pwm,

    /// Servo control. Never supported by this board.
    Servo,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "INPUT"),
            Self::Output => write!(f, "OUTPUT"),
            Self::Pwm => write!(f, "PWM"),
            Self::Servo => write!(f, "SERVO"),
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INPUT" => Ok(Self::Input),
            "OUTPUT" => Ok(Self::Output),
            "PWM" | "ANALOG" => Ok(Self::Pwm),
            "SERVO" => Ok(Self::Servo),
            other => Err(Error::invalid_data(format!("Unknown pin mode: {other}"))),
        }
    }
}

/// Snapshot of a pin's runtime state.
///
/// The board keeps one of these per pin for its whole lifetime. Mode
/// changes and engine reads/writes mutate it in place; subscribers receive
/// clones in pin state change events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinState {
    /// Pin index.
    pub index: u8,

    /// Current mode, `None` until the pin is first configured.
    pub mode: Option<Mode>,

    /// Last written level or duty cycle, or last observed level.
    pub value: u32,

    /// Whether the pin is driven as a PWM output.
    pub is_pwm: bool,

    /// Modes the pin supports.
    pub supported_modes: BTreeSet<Mode>,
}

impl PinState {
    /// Create the initial state for a pin.
    pub fn new(index: u8, supported_modes: BTreeSet<Mode>) -> Self {
        Self {
            index,
            mode: None,
            value: 0,
            is_pwm: false,
            supported_modes,
        }
    }

    /// Whether the pin supports `mode`.
    pub fn supports(&self, mode: Mode) -> bool {
        self.supported_modes.contains(&mode)
    }
}
