use std::fmt;
use std::str::FromStr;

use crate::error::{IbusError, Result};

/// Largest payload any real bus node sends
pub const MAX_PAYLOAD_LEN: usize = 20;

/// Bytes counted by the length field besides the payload (destination + checksum)
pub const LENGTH_OVERHEAD: usize = 2;

/// Smallest complete frame on the wire: source, length, destination, checksum
pub const MIN_FRAME_LEN: usize = 4;

/// One-byte bus node address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub u8);

impl Address {
    pub const BROADCAST: Address = Address(0xFF);
    pub const GLOBAL_BROADCAST: Address = Address(0xBF);

    pub fn value(self) -> u8 {
        self.0
    }
}

impl From<u8> for Address {
    fn from(value: u8) -> Self {
        Address(value)
    }
}

impl From<Address> for u8 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}", self.0)
    }
}

impl FromStr for Address {
    type Err = IbusError;

    /// Parses the two-hex-digit form used on bus traces, with or without `0x`
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.is_empty()
            || digits.len() > 2
            || !digits.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(IbusError::InvalidAddress(s.to_string()));
        }
        u8::from_str_radix(digits, 16)
            .map(Address)
            .map_err(|_| IbusError::InvalidAddress(s.to_string()))
    }
}

/// Configuration trait that must be implemented by all layer configurations
pub trait Config: Send + Sync {
    fn validate(&self) -> Result<()>;
}
