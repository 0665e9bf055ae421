//! Board configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use omega_core::constants::{
    DEFAULT_EVENT_CAPACITY, DEFAULT_LED_PIN, DIGITAL_POLL_INTERVAL, SERIAL_DEVICE_PREFIX,
};
use omega_core::{CapabilityTable, Error, PinGroups, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a [`Board`](crate::Board).
///
/// Every field has a default, so a JSON file only needs to name what it
/// changes:
///
/// ```
/// use omega_hardware::BoardConfig;
///
/// let config = BoardConfig::from_json(r#"{ "simulated": true }"#).unwrap();
/// assert!(config.simulated);
/// assert_eq!(config.digital_poll_interval_ms, 50);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Log commands instead of running them.
    pub simulated: bool,

    /// Serial device nodes are `<prefix><channel>`.
    pub serial_device_prefix: PathBuf,

    /// Period of digital read polls, in milliseconds.
    pub digital_poll_interval_ms: u64,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,

    /// Pin driven by the CLI when no pin is given.
    pub default_led: u8,

    /// Pin group table. `None` selects the built-in Omega2 table.
    pub pins: Option<PinGroups>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            simulated: false,
            serial_device_prefix: PathBuf::from(SERIAL_DEVICE_PREFIX),
            digital_poll_interval_ms: DIGITAL_POLL_INTERVAL.as_millis() as u64,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            default_led: DEFAULT_LED_PIN,
            pins: None,
        }
    }
}

impl BoardConfig {
    /// Configuration for a simulated board.
    pub fn simulated() -> Self {
        Self {
            simulated: true,
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Replace the pin group table.
    pub fn with_pins(mut self, pins: PinGroups) -> Self {
        self.pins = Some(pins);
        self
    }

    /// Replace the serial device prefix.
    pub fn with_serial_device_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.serial_device_prefix = prefix.into();
        self
    }

    /// Replace the digital read poll period.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.digital_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Digital read poll period.
    pub fn digital_poll_interval(&self) -> Duration {
        Duration::from_millis(self.digital_poll_interval_ms)
    }

    /// Build the capability table this configuration describes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the pin groups define no pins.
    pub fn capabilities(&self) -> Result<CapabilityTable> {
        let table = match &self.pins {
            Some(groups) => CapabilityTable::from_groups(groups),
            None => CapabilityTable::omega2()?,
        };
        if table.is_empty() {
            return Err(Error::config("Pin groups define no pins"));
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omega_core::Mode;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BoardConfig::default();
        assert!(!config.simulated);
        assert_eq!(config.serial_device_prefix, PathBuf::from("/dev/ttyS"));
        assert_eq!(config.digital_poll_interval(), Duration::from_millis(50));
        assert_eq!(config.event_capacity, 256);
        assert_eq!(config.default_led, 44);
        assert!(config.pins.is_none());
    }

    #[test]
    fn test_default_capabilities_are_omega2() {
        let table = BoardConfig::default().capabilities().unwrap();
        assert!(table.supports(44, Mode::Output));
        assert!(table.supports(18, Mode::Pwm));
        assert!(!table.supports(3, Mode::Pwm));
    }

    #[test]
    fn test_custom_pins_from_json() {
        let config = BoardConfig::from_json(
            r#"{
                "digital_poll_interval_ms": 10,
                "pins": {
                    "GPIO": { "pins": [1, 2], "modes": ["INPUT", "OUTPUT"] },
                    "ANALOG": { "pins": [2], "modes": ["ANALOG"] }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.digital_poll_interval(), Duration::from_millis(10));
        let table = config.capabilities().unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.supports(2, Mode::Pwm));
        assert!(!table.supports(1, Mode::Pwm));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "simulated": true, "default_led": 3 }}"#).unwrap();

        let config = BoardConfig::load(file.path()).unwrap();
        assert!(config.simulated);
        assert_eq!(config.default_led, 3);
    }

    #[test]
    fn test_empty_pin_table_is_rejected() {
        let config = BoardConfig::from_json(r#"{ "pins": {} }"#).unwrap();
        let result = config.capabilities();
        assert!(matches!(result, Err(Error::Config { .. })));

        let config = BoardConfig::default()
            .with_pins(PinGroups::new().with_group("GPIO", Vec::new(), vec![Mode::Input]));
        assert!(matches!(config.capabilities(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_invalid_json() {
        let result = BoardConfig::from_json("{ simulated: yes }");
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[test]
    fn test_builders() {
        let config = BoardConfig::simulated()
            .with_serial_device_prefix("/tmp/tty")
            .with_poll_interval(Duration::from_millis(5))
            .with_pins(PinGroups::new().with_group("GPIO", vec![7], vec![Mode::Input]));

        assert!(config.simulated);
        assert_eq!(config.serial_device_prefix, PathBuf::from("/tmp/tty"));
        assert_eq!(config.digital_poll_interval_ms, 5);
        assert!(config.capabilities().unwrap().supports(7, Mode::Input));
    }
}
