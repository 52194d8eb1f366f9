//! Physical layer for the I-Bus.
//!
//! The bus is reached through a byte-oriented serial channel. The engine only
//! needs a handful of operations from it:
//! - single-byte reads that give up after a timeout
//! - writes and flush
//! - the hardware "clear to send" line, which the bus transceiver drops while
//!   another node is talking
//!
//! Two implementations are provided:
//! - [`mock::MockPhysical`], a scripted in-memory line for tests
//! - `serial::SerialPhysical` (feature `serial`), backed by the `serialport` crate
//!
//! # Examples
//!
//! ```rust
//! use libibus::physical::{mock::MockPhysical, LineSignals, PhysicalLayer};
//!
//! let mut port = MockPhysical::new();
//! port.handle().push_bytes(&[0x68, 0x03, 0x18, 0x01, 0x72]);
//!
//! port.open().unwrap();
//! assert_eq!(port.read_byte().unwrap(), Some(0x68));
//! assert!(port.line_signals().unwrap().contains(LineSignals::CTS));
//! ```

pub mod mock;
#[cfg(feature = "serial")]
pub mod serial;

use std::time::Duration;

use bitflags::bitflags;

use crate::error::{IbusError, Result};
use crate::types::Config;

bitflags! {
    /// Modem status lines reported by the serial hardware
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LineSignals: u8 {
        const CTS = 1;
        const DSR = 2;
        const RI = 4;
        const CD = 8;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Seven,
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

/// Serial line settings, fixed for the life of a port
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub read_timeout: Duration,
    pub assert_dtr: bool,
    pub flush_input_on_open: bool,
}

impl Config for SerialConfig {
    fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(IbusError::InvalidParameter("baud rate must be non-zero".into()));
        }
        if self.read_timeout.is_zero() {
            return Err(IbusError::InvalidParameter(
                "read timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::Even,
            stop_bits: StopBits::One,
            read_timeout: Duration::from_millis(500),
            assert_dtr: true,
            flush_input_on_open: true,
        }
    }
}

/// Physical layer trait that must be implemented by every bus transport
pub trait PhysicalLayer: Send {
    fn open(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;

    /// Reads one byte, returning `Ok(None)` when the read timeout elapses first
    fn read_byte(&mut self) -> Result<Option<u8>>;
    fn write_bytes(&mut self, data: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;

    fn line_signals(&mut self) -> Result<LineSignals>;
    fn set_data_terminal_ready(&mut self, level: bool) -> Result<()>;
    fn clear_input(&mut self) -> Result<()>;
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;
}
