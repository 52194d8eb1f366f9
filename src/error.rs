use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::types::MAX_PAYLOAD_LEN;

#[derive(Error, Debug)]
pub enum IbusError {
    // Physical layer errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Port error: {0}")]
    PortError(String),

    // Data link layer errors
    #[error("Payload too long: {0} bytes (max {MAX_PAYLOAD_LEN})")]
    PayloadTooLong(usize),

    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("Length byte {length:#04X} does not match frame of {actual} bytes")]
    LengthMismatch { length: u8, actual: usize },

    #[error("Checksum mismatch: expected {expected:02X}, found {found:02X}")]
    ChecksumMismatch { expected: u8, found: u8 },

    // Transport layer errors
    #[error("Send not accepted after waiting {0:?}")]
    SendNotAccepted(Duration),

    #[error("Interface closed")]
    Closed,

    // Generic errors
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

#[cfg(feature = "serial")]
impl From<serialport::Error> for IbusError {
    fn from(err: serialport::Error) -> Self {
        IbusError::PortError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IbusError>;
