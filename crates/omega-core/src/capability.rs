//! Static pin capability table.
//!
//! Pin capabilities are configured as named groups, each listing a set of
//! pins and the modes those pins share:
//!
//! ```json
//! {
//!   "GPIO": { "pins": [0, 1, 18], "modes": ["INPUT", "OUTPUT"] },
//!   "PWM":  { "pins": [18],       "modes": ["PWM"] }
//! }
//! ```
//!
//! [`CapabilityTable::from_groups`] flattens the groups into one entry per
//! pin, unioning the modes of every group a pin belongs to. The group name
//! `ANALOG` is an alias for `PWM`.
//!
//! # Examples
//!
//! ```
//! use omega_core::{CapabilityTable, Mode, PinGroups};
//!
//! let groups: PinGroups = serde_json::from_str(
//!     r#"{"GPIO": {"pins": [18], "modes": ["INPUT", "OUTPUT"]},
//!         "PWM":  {"pins": [18], "modes": ["PWM"]}}"#,
//! ).unwrap();
//!
//! let table = CapabilityTable::from_groups(&groups);
//! assert!(table.supports(18, Mode::Pwm));
//! assert!(table.supports(18, Mode::Input));
//! assert!(groups.group("ANALOG").is_some());
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{Mode, Result};

/// Pin groups for the Omega2, embedded at build time.
const OMEGA2_PIN_GROUPS: &str = include_str!("../config/omega2-pins.json");

/// Alias group name resolved to [`PWM_GROUP`].
pub const ANALOG_GROUP: &str = "ANALOG";

/// Name of the PWM capability group.
pub const PWM_GROUP: &str = "PWM";

/// A named set of pins sharing the same modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinGroup {
    /// Pin indices in the group.
    pub pins: Vec<u8>,

    /// Modes every pin in the group supports.
    pub modes: Vec<Mode>,
}

/// Grouped capability configuration, keyed by group name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PinGroups(BTreeMap<String, PinGroup>);

impl PinGroups {
    /// Create an empty group table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The Omega2 group table.
    pub fn omega2() -> Result<Self> {
        Self::from_json(OMEGA2_PIN_GROUPS)
    }

    /// Parse a group table from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Add or replace a group.
    pub fn with_group(mut self, name: impl Into<String>, pins: Vec<u8>, modes: Vec<Mode>) -> Self {
        self.0.insert(name.into(), PinGroup { pins, modes });
        self
    }

    /// Look up a group by name, resolving `ANALOG` to `PWM`.
    pub fn group(&self, name: &str) -> Option<&PinGroup> {
        let name = if name == ANALOG_GROUP { PWM_GROUP } else { name };
        self.0.get(name)
    }

    /// Iterate over `(name, group)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PinGroup)> {
        self.0.iter().map(|(name, group)| (name.as_str(), group))
    }
}

/// Modes supported by one pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinCapability {
    /// Pin index.
    pub index: u8,

    /// Union of the modes of every group listing this pin.
    pub supported_modes: BTreeSet<Mode>,
}

/// Immutable mapping from pin index to supported modes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityTable {
    pins: BTreeMap<u8, PinCapability>,
}

impl CapabilityTable {
    /// Flatten a group table into per-pin capabilities.
    pub fn from_groups(groups: &PinGroups) -> Self {
        let mut pins: BTreeMap<u8, PinCapability> = BTreeMap::new();

        for (_, group) in groups.iter() {
            for &index in &group.pins {
                pins.entry(index)
                    .or_insert_with(|| PinCapability {
                        index,
                        supported_modes: BTreeSet::new(),
                    })
                    .supported_modes
                    .extend(group.modes.iter().copied());
            }
        }

        Self { pins }
    }

    /// The Omega2 capability table.
    pub fn omega2() -> Result<Self> {
        Ok(Self::from_groups(&PinGroups::omega2()?))
    }

    /// Capability of a pin, if the pin exists.
    pub fn get(&self, index: u8) -> Option<&PinCapability> {
        self.pins.get(&index)
    }

    /// Whether `index` supports `mode`.
    pub fn supports(&self, index: u8, mode: Mode) -> bool {
        self.get(index)
            .is_some_and(|pin| pin.supported_modes.contains(&mode))
    }

    /// Iterate over all pins in index order.
    pub fn iter(&self) -> impl Iterator<Item = &PinCapability> {
        self.pins.values()
    }

    /// Number of pins in the table.
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    /// Whether the table has no pins.
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}
