//! Core types for the omega-io hardware layer.
//!
//! This crate holds everything that does not touch the hardware: pin modes
//! and pin state, the static pin capability table, the board constants and
//! command names, hex encoding for the I2C utilities, and the shared error
//! type.

pub mod capability;
pub mod constants;
pub mod error;
pub mod hex;
pub mod types;

pub use capability::{CapabilityTable, PinCapability, PinGroup, PinGroups};
pub use error::{Error, Result};
pub use hex::{parse_hex_byte, parse_hex_bytes, to_hex};
pub use types::{Mode, PinState};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
