//! Driver for the I-Bus, the half-duplex multi-drop serial bus that body
//! electronics modules use to exchange short addressed packets.
//!
//! Layers, bottom up:
//! - [`physical`]: the serial line (trait, mock, optional `serialport` backend)
//! - [`data_link`]: packet codec and the idle-gap framing state machine
//! - [`transport`]: paced sends, serialized port access and the
//!   [`IbusInterface`] engine
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use libibus::{AddressDirectory, IbusConfig, IbusInterface};
//! use libibus::physical::mock::MockPhysical;
//! use libibus::types::Address;
//!
//! let ibus = IbusInterface::with_physical(
//!     IbusConfig::default(),
//!     Arc::new(AddressDirectory::ibus_defaults()),
//!     MockPhysical::new(),
//! )
//! .unwrap();
//!
//! ibus.wait_for_clear_bus().unwrap();
//! if let Some(packet) = ibus.read_packet().unwrap() {
//!     println!("{}", packet);
//! }
//! ibus.send_packet(Address(0xF1), Address(0x68), &[0x01]).unwrap();
//! ```

// OSI Layer modules
pub mod data_link; // Packet codec and framing
pub mod physical; // Serial line
pub mod transport; // Engine, pacing and access control

// Common types and traits
pub mod directory;
pub mod error;
pub mod types;

// Re-exports for convenience
pub use data_link::Packet;
pub use directory::AddressDirectory;
pub use error::{IbusError, Result};
pub use transport::{ChecksumPolicy, IbusConfig, IbusInterface, TransportLayer};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
