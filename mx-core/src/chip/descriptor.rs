//! Chip identification data

use serde::Serialize;

/// Which side of the serial link a chip sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChipVariant {
    /// Sensor side: CSI in, serial link out
    Serializer,
    /// Host side: serial links in, CSI out
    Deserializer,
}

/// Static description of one chip model. Immutable after identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipDescriptor {
    pub name: &'static str,
    pub device_id: u8,
    pub rev_reg: u16,
    pub variant: ChipVariant,
    pub serial_links: usize,
    pub video_pipes: usize,
    pub csi_links: usize,
    pub line_faults: usize,
    /// Sub-buses with an address translation (alias) table
    pub translation_buses: usize,
}

impl ChipDescriptor {
    /// Logical pads: CSI-facing pads first, then one per serial link
    pub const fn pads(&self) -> usize {
        self.csi_links + self.serial_links
    }

    pub const fn is_deserializer(&self) -> bool {
        matches!(self.variant, ChipVariant::Deserializer)
    }
}

/// What a probe found at an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChipIdentity {
    pub name: &'static str,
    pub device_id: u8,
    pub revision: u8,
}
