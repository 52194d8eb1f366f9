//! Address directory: device names for bus addresses.
//!
//! Names are only used to make log lines readable. The assignment of
//! addresses to modules varies between vehicle models and years, so the
//! engine takes a directory as data instead of baking one in.
//!
//! A directory can be loaded from TOML:
//!
//! ```rust
//! use libibus::directory::AddressDirectory;
//! use libibus::types::Address;
//!
//! let directory = AddressDirectory::from_toml(
//!     r#"
//!     [addresses]
//!     "68" = "RAD Radio"
//!     "0x80" = "IKE Instrument Control Electronics"
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(directory.describe(Address(0x68)), "RAD Radio");
//! assert_eq!(directory.describe(Address(0x42)), "42");
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{IbusError, Result};
use crate::types::Address;

/// Reference assignments seen on E38/E39/E46-era body buses
const IBUS_DEFAULTS: &[(u8, &str)] = &[
    (0x00, "Broadcast"),
    (0x02, "Electronic Body Module"),
    (0x08, "Sunroof Control"),
    (0x12, "Digital Motor Electronics (DME)"),
    (0x18, "CDW - CDC CD-Player"),
    (0x24, "Boot Lid Control Unit"),
    (0x28, "Radio Controlled Clock"),
    (0x30, "Check Control Module"),
    (0x32, "Electronic gearbox control"),
    (0x3B, "NAV Navigation/Videomodule"),
    (0x3F, "Diagnostic"),
    (0x40, "Remote Control Central Locking (Key Fob)"),
    (0x43, "Menu Screen, Navigation - rear"),
    (0x44, "EWS Ignition, Immobiliser"),
    (0x46, "Central Information Display"),
    (0x47, "Rear Monitor Controls"),
    (0x50, "MFL Multi Functional Steering Wheel Buttons"),
    (0x51, "Mirror Memory, Left"),
    (0x52, "Convertible Folding Top Module"),
    (0x56, "Anti-Lock Braking System With ASC"),
    (0x57, "Steering Angle Sensor"),
    (0x5B, "Integrated Heating And Air Conditioning"),
    (0x60, "PDC Park Distance Control"),
    (0x65, "Electronic Fuel Pump"),
    (0x66, "Adaptive Headlight Unit"),
    (0x68, "RAD Radio"),
    (0x6A, "DSP Digital Sound Processor / Amplifier"),
    (0x6B, "Standing Heat"),
    (0x70, "Tire Pressure Control"),
    (0x72, "Seat Memory"),
    (0x73, "Sirius Radio"),
    (0x74, "Seat Occupancy Recognition Unit"),
    (0x76, "CD Changer DIN Size"),
    (0x7F, "Navigation Europe"),
    (0x80, "IKE Instrument Control Electronics"),
    (0x81, "Revolution Counter/Steering Column"),
    (0x9A, "Headlight Aim Control"),
    (0x9B, "Mirror Memory, Right"),
    (0x9C, "Convertible Soft Top"),
    (0xA0, "Rear Multi Info Display"),
    (0xA4, "Air Bag Module"),
    (0xA6, "Cruise Control"),
    (0xA7, "Auto Climate Control - Rear"),
    (0xA8, "Navigation China"),
    (0xAC, "Electronic height control"),
    (0xB0, "Speed Recognition System"),
    (0xB8, "DME (K2000 protocol)"),
    (0xBB, "Navigation Japan"),
    (0xBF, "Global Broadcast Address"),
    (0xC0, "MID Multi-Information Display Buttons"),
    (0xC8, "TEL Telephone"),
    (0xCA, "BMW Assist / Telematics Control Unit"),
    (0xD0, "Light Control Module"),
    (0xDA, "Seat Memory Second"),
    (0xE0, "Integrated Radio Information System"),
    (0xE7, "OBC TextBar, Front Display"),
    (0xE8, "Rain Light Sensor"),
    (0xEA, "Digital Sound Processor Controller"),
    (0xED, "Lights, Wipers, Seat Memory, Television"),
    (0xF0, "BMB Board Monitor Buttons, On Board Monitor Operating Part"),
    (0xF1, "Programmable Controller (Custom Unit)"),
    (0xF5, "Centre Switch Control Unit"),
    (0xFF, "Broadcast"),
];

#[derive(Debug, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    addresses: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressDirectory {
    names: BTreeMap<Address, String>,
}

impl AddressDirectory {
    /// An empty directory; every address renders as hex
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ibus_defaults() -> Self {
        IBUS_DEFAULTS
            .iter()
            .map(|&(address, name)| (Address(address), name))
            .collect()
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let file: DirectoryFile = toml::from_str(content)
            .map_err(|e| IbusError::ConfigError(format!("Failed to parse TOML: {e}")))?;

        let mut directory = Self::new();
        for (key, name) in file.addresses {
            let address = key
                .parse::<Address>()
                .map_err(|e| IbusError::ConfigError(format!("Bad directory key: {e}")))?;
            directory.insert(address, name);
        }
        Ok(directory)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| IbusError::ConfigError(format!("Failed to read directory file: {e}")))?;
        Self::from_toml(&content)
    }

    /// Adds or replaces a name, returning the previous one
    pub fn insert(&mut self, address: Address, name: impl Into<String>) -> Option<String> {
        self.names.insert(address, name.into())
    }

    pub fn name(&self, address: Address) -> Option<&str> {
        self.names.get(&address).map(String::as_str)
    }

    /// The device name, or the raw hex form for unknown addresses
    pub fn describe(&self, address: Address) -> Cow<'_, str> {
        match self.name(address) {
            Some(name) => Cow::Borrowed(name),
            None => Cow::Owned(address.to_string()),
        }
    }

    /// `source -> destination` for a log line
    pub fn route(&self, source: Address, destination: Address) -> String {
        format!("{} -> {}", self.describe(source), self.describe(destination))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(Address, S)> for AddressDirectory {
    fn from_iter<I: IntoIterator<Item = (Address, S)>>(iter: I) -> Self {
        Self {
            names: iter
                .into_iter()
                .map(|(address, name)| (address, name.into()))
                .collect(),
        }
    }
}
