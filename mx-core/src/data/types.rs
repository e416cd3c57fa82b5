//! Runtime element state
//!
//! One instance of each element is created at attach for every slot the chip
//! descriptor advertises; configuration is attached to the first N slots.
//! The structures are only mutated under the fabric's element lock.

use serde::{Deserialize, Serialize};

use super::config::{CsiConfig, LinkConfig, LinkType, PipeConfig, RemoteDeviceConfig};

/// Serial link lifecycle
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    #[default]
    Disabled,
    Enabling,
    Enabled,
    Disabling,
}

/// Remote device on the far side of a serial link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDevice {
    pub config: RemoteDeviceConfig,
    /// Device currently answers on its virtual address
    pub remapped: bool,
}

impl RemoteDevice {
    pub fn new(config: RemoteDeviceConfig) -> Self {
        let remapped = !config.needs_remap();
        Self { config, remapped }
    }

    /// Address the device is reachable at right now
    pub fn current_addr(&self) -> u8 {
        if self.remapped {
            self.config.virt_addr
        } else {
            self.config.phys_addr
        }
    }
}

#[derive(Debug, Clone)]
pub struct SerialLink {
    pub index: usize,
    pub config: Option<LinkConfig>,
    pub state: LinkState,
    pub enabled: bool,
    /// Remote device answered at its assigned address
    pub detected: bool,
    pub regulator_enabled: bool,
    pub locked: bool,
    /// Given up after the backoff ladder; cleared by an explicit enable
    pub failed: bool,
    pub remote: Option<RemoteDevice>,
    /// Pipes this link switched on, released on disable
    pub active_pipes: Vec<usize>,
    /// CSI references this link holds, released on disable
    pub csi_refs: Vec<usize>,
}

impl SerialLink {
    pub fn new(index: usize, config: Option<LinkConfig>) -> Self {
        let remote = config
            .as_ref()
            .and_then(|c| c.remote.clone())
            .map(RemoteDevice::new);
        Self {
            index,
            config,
            state: LinkState::Disabled,
            enabled: false,
            detected: false,
            regulator_enabled: false,
            locked: false,
            failed: false,
            remote,
            active_pipes: Vec::new(),
            csi_refs: Vec::new(),
        }
    }

    pub fn link_type(&self) -> LinkType {
        self.config.as_ref().map(|c| c.link_type).unwrap_or_default()
    }

    pub fn power_rail(&self) -> Option<&str> {
        self.config.as_ref().and_then(|c| c.power_rail.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct VideoPipe {
    pub index: usize,
    pub config: Option<PipeConfig>,
    pub enabled: bool,
}

impl VideoPipe {
    pub fn new(index: usize, config: Option<PipeConfig>) -> Self {
        Self {
            index,
            config,
            enabled: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CsiLink {
    pub index: usize,
    pub config: Option<CsiConfig>,
    pub enabled: bool,
    /// References held by pipes and active routes
    pub usecount: u32,
}

impl CsiLink {
    pub fn new(index: usize, config: Option<CsiConfig>) -> Self {
        Self {
            index,
            config,
            enabled: false,
            usecount: 0,
        }
    }
}

/// Line-fault monitor reading
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LineFaultStatus {
    #[default]
    Unknown,
    Normal,
    ShortToBattery,
    ShortToGround,
    Open,
    LineToLineShort,
}

impl LineFaultStatus {
    pub fn is_fault(&self) -> bool {
        !matches!(self, Self::Unknown | Self::Normal)
    }
}

#[derive(Debug, Clone)]
pub struct LineFault {
    pub index: usize,
    pub enabled: bool,
    pub status: LineFaultStatus,
}

impl LineFault {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            enabled: false,
            status: LineFaultStatus::Unknown,
        }
    }
}

/// Serializable view of one serial link
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub index: usize,
    pub state: LinkState,
    pub enabled: bool,
    pub locked: bool,
    pub detected: bool,
    pub failed: bool,
    pub remote_addr: Option<u8>,
}

/// Serializable view of one CSI link
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CsiSnapshot {
    pub index: usize,
    pub enabled: bool,
    pub usecount: u32,
}

/// Point-in-time view of a fabric, used for reports and state comparison
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FabricSnapshot {
    pub name: String,
    pub chip: String,
    pub device_id: u8,
    pub revision: u8,
    pub addr: u8,
    pub powered: bool,
    pub links: Vec<LinkSnapshot>,
    pub pipes_enabled: Vec<usize>,
    pub csi_links: Vec<CsiSnapshot>,
    pub line_faults: Vec<(usize, LineFaultStatus)>,
    pub aliases: Vec<(usize, u8, u8)>,
}

impl FabricSnapshot {
    /// Indices of links currently enabled
    pub fn enabled_links(&self) -> Vec<usize> {
        self.links.iter().filter(|l| l.enabled).map(|l| l.index).collect()
    }
}
