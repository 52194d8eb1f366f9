//! Data link layer: I-Bus packet codec and framing.
//!
//! A packet on the wire is
//!
//! ```text
//! SRC LEN DST DATA[0..N] CHK
//! ```
//!
//! where `LEN = N + 2` (destination and checksum bytes) and `CHK` is the XOR
//! of every byte before it. There is no delimiter; boundaries are recovered
//! from idle gaps on the line by [`framing::FrameMachine`].

pub mod framing;

use std::fmt;

use crate::error::{IbusError, Result};
use crate::types::{Address, LENGTH_OVERHEAD, MAX_PAYLOAD_LEN, MIN_FRAME_LEN};

/// XOR-folds `bytes`.
///
/// Over a frame whose last byte is a zero placeholder this yields the
/// checksum; over a complete valid frame it yields zero.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Builds the wire bytes for one packet, checksum included
pub fn encode(source: Address, destination: Address, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(IbusError::PayloadTooLong(payload.len()));
    }

    let mut frame = Vec::with_capacity(payload.len() + MIN_FRAME_LEN);
    frame.push(source.0);
    frame.push((payload.len() + LENGTH_OVERHEAD) as u8);
    frame.push(destination.0);
    frame.extend_from_slice(payload);
    frame.push(0);

    let chk = checksum(&frame);
    if let Some(last) = frame.last_mut() {
        *last = chk;
    }
    Ok(frame)
}

/// Decoded I-Bus packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub source: Address,
    pub length: u8,
    pub destination: Address,
    pub payload: Vec<u8>,
    pub checksum: u8,
}

impl Packet {
    /// Builds an outgoing packet with its length and checksum filled in
    pub fn new(source: Address, destination: Address, payload: &[u8]) -> Result<Self> {
        let frame = encode(source, destination, payload)?;
        Ok(Self {
            source,
            length: frame[1],
            destination,
            payload: payload.to_vec(),
            checksum: frame[frame.len() - 1],
        })
    }

    /// Decodes one complete frame held in memory.
    ///
    /// Only the length relationship is enforced; call
    /// [`Packet::verify_checksum`] to also check integrity.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_FRAME_LEN {
            return Err(IbusError::FrameTooShort(bytes.len()));
        }

        let length = bytes[1];
        let payload_len = bytes.len() - MIN_FRAME_LEN;
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(IbusError::PayloadTooLong(payload_len));
        }
        if usize::from(length) != payload_len + LENGTH_OVERHEAD {
            return Err(IbusError::LengthMismatch {
                length,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            source: Address(bytes[0]),
            length,
            destination: Address(bytes[2]),
            payload: bytes[3..bytes.len() - 1].to_vec(),
            checksum: bytes[bytes.len() - 1],
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.payload.len() + MIN_FRAME_LEN);
        bytes.push(self.source.0);
        bytes.push(self.length);
        bytes.push(self.destination.0);
        bytes.extend_from_slice(&self.payload);
        bytes.push(self.checksum);
        bytes
    }

    /// Checksum the sender should have put on this packet
    pub fn expected_checksum(&self) -> u8 {
        self.payload
            .iter()
            .fold(self.source.0 ^ self.length ^ self.destination.0, |acc, b| {
                acc ^ b
            })
    }

    pub fn checksum_valid(&self) -> bool {
        self.expected_checksum() == self.checksum
    }

    pub fn verify_checksum(&self) -> Result<()> {
        let expected = self.expected_checksum();
        if expected == self.checksum {
            Ok(())
        } else {
            Err(IbusError::ChecksumMismatch {
                expected,
                found: self.checksum,
            })
        }
    }
}

impl fmt::Display for Packet {
    /// Renders the packet as it appears on a bus trace: `68 04 18 01 02 77`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:02X} {}", self.source, self.length, self.destination)?;
        for byte in &self.payload {
            write!(f, " {:02X}", byte)?;
        }
        write!(f, " {:02X}", self.checksum)
    }
}

#[cfg(test)]
mod tests;
