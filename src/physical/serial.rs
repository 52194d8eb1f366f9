use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use tracing::debug;

use super::{DataBits, LineSignals, Parity, PhysicalLayer, SerialConfig, StopBits};
use crate::error::{IbusError, Result};
use crate::types::Config;

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Serial device backed physical layer
pub struct SerialPhysical {
    path: String,
    config: SerialConfig,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPhysical {
    pub fn new(path: impl Into<String>, config: SerialConfig) -> Self {
        Self {
            path: path.into(),
            config,
            port: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| IbusError::PortError(format!("{} is not open", self.path)))
    }
}

impl PhysicalLayer for SerialPhysical {
    fn open(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }
        self.config.validate()?;

        let port = serialport::new(self.path.as_str(), self.config.baud_rate)
            .data_bits(self.config.data_bits.into())
            .parity(self.config.parity.into())
            .stop_bits(self.config.stop_bits.into())
            .timeout(self.config.read_timeout)
            .open()
            .map_err(|e| IbusError::PortError(format!("{}: {e}", self.path)))?;

        debug!(path = %self.path, baud = self.config.baud_rate, "Serial port opened");
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the handle releases the device.
        self.port = None;
        Ok(())
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.port()?.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.port()?.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.port()?.flush()?;
        Ok(())
    }

    fn line_signals(&mut self) -> Result<LineSignals> {
        let port = self.port()?;
        let mut signals = LineSignals::empty();
        signals.set(LineSignals::CTS, port.read_clear_to_send()?);
        signals.set(LineSignals::DSR, port.read_data_set_ready()?);
        signals.set(LineSignals::RI, port.read_ring_indicator()?);
        signals.set(LineSignals::CD, port.read_carrier_detect()?);
        Ok(signals)
    }

    fn set_data_terminal_ready(&mut self, level: bool) -> Result<()> {
        self.port()?.write_data_terminal_ready(level)?;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.port()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.config.read_timeout = timeout;
        if let Some(port) = self.port.as_mut() {
            port.set_timeout(timeout)?;
        }
        Ok(())
    }
}
