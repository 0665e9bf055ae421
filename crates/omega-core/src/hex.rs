//! Hexadecimal argument encoding for the I2C utilities.

use crate::{Error, Result};

/// Render a value as `0x` followed by unpadded lower-case hex digits.
///
/// # Examples
///
/// ```
/// use omega_core::to_hex;
///
/// assert_eq!(to_hex(0u32), "0x0");
/// assert_eq!(to_hex(255u32), "0xff");
/// ```
pub fn to_hex(value: impl Into<u32>) -> String {
    format!("{:#x}", value.into())
}

/// Parse one byte printed by `i2cget` (`0x1a`, `1A` or `0X1A`).
pub fn parse_hex_byte(text: &str) -> Result<u8> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);

    u8::from_str_radix(digits, 16)
        .map_err(|e| Error::invalid_data(format!("Invalid hex byte {text:?}: {e}")))
}

/// Parse whitespace separated hex bytes.
pub fn parse_hex_bytes(text: &str) -> Result<Vec<u8>> {
    text.split_whitespace().map(parse_hex_byte).collect()
}
