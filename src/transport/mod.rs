pub mod access;
pub mod ibus;
pub mod scheduler;

use crate::data_link::framing::SyncOutcome;
use crate::data_link::Packet;
use crate::error::Result;
use crate::types::Address;

pub use ibus::{ChecksumPolicy, IbusConfig, IbusInterface};

/// Transport layer trait for packet-level bus access.
///
/// Implementations are shared between threads, so every operation takes
/// `&self` and serializes port access internally.
pub trait TransportLayer: Send + Sync {
    fn read_packet(&self) -> Result<Option<Packet>>;
    fn send_packet(&self, source: Address, destination: Address, payload: &[u8]) -> Result<()>;
    fn wait_for_clear_bus(&self) -> Result<SyncOutcome>;
    fn close(&self) -> Result<()>;
}
