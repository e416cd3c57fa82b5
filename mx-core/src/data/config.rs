//! Static fabric configuration
//!
//! Everything here is consumed once at attach and re-applied verbatim at
//! resume. The structures are plain serde types so board descriptions can be
//! kept as JSON next to the integration that uses them.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::constants::timing;
use crate::error::{Result, SerdesError};

/// Serial link generation
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Gmsl1,
    #[default]
    Gmsl2,
}

/// CSI-2 physical layer
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CsiBusType {
    #[default]
    Dphy,
    Cphy,
}

/// When the CSI transmitter sends deskew calibration sequences
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeskewPolicy {
    #[default]
    Off,
    Initial,
    Periodic,
}

fn default_true() -> bool {
    true
}

fn default_rx_rate() -> u32 {
    6000
}

fn default_tx_rate() -> u32 {
    187
}

/// Device sitting on the far side of a serial link
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteDeviceConfig {
    pub name: String,
    /// Factory address the device answers on after reset
    pub phys_addr: u8,
    /// Address assigned to it on this fabric
    pub virt_addr: u8,
    /// Expected device id, checked after the remap when present
    #[serde(default)]
    pub device_id: Option<u8>,
}

impl RemoteDeviceConfig {
    pub fn needs_remap(&self) -> bool {
        self.phys_addr != self.virt_addr
    }
}

/// Per serial link configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkConfig {
    #[serde(default)]
    pub link_type: LinkType,
    /// Forward (video) rate in Mbps
    #[serde(default = "default_rx_rate")]
    pub rx_rate_mbps: u32,
    /// Reverse (control) rate in Mbps
    #[serde(default = "default_tx_rate")]
    pub tx_rate_mbps: u32,
    /// Name of the regulator powering the link, if any
    #[serde(default)]
    pub power_rail: Option<String>,
    /// Bring the link up as part of attach and resume
    #[serde(default = "default_true")]
    pub auto_enable: bool,
    #[serde(default)]
    pub remote: Option<RemoteDeviceConfig>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            link_type: LinkType::default(),
            rx_rate_mbps: default_rx_rate(),
            tx_rate_mbps: default_tx_rate(),
            power_rail: None,
            auto_enable: true,
            remote: None,
        }
    }
}

/// Where a video pipe takes its data from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PipeSource {
    /// Deserializer: pipe `pipe` of the remote serializer on serial link `link`
    Link { link: usize, pipe: usize },
    /// Serializer: CSI input port
    Csi { csi: usize },
}

/// One virtual channel / data type remapping inside a pipe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipeMap {
    pub src_vc: u8,
    pub src_dt: u8,
    pub dst_vc: u8,
    pub dst_dt: u8,
    /// CSI link the mapped stream leaves on
    pub dst_csi: usize,
}

/// Per video pipe configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipeConfig {
    pub source: PipeSource,
    #[serde(default)]
    pub maps: Vec<PipeMap>,
    /// Double-pixel mode bits per pixel, 0 when unused
    #[serde(default)]
    pub dbl_pixel_bpp: u8,
    /// Soft bpp padding range, both 0 when unused
    #[serde(default)]
    pub soft_min_bpp: u8,
    #[serde(default)]
    pub soft_max_bpp: u8,
}

impl PipeConfig {
    /// CSI links this pipe writes to, in first-use order without duplicates
    pub fn csi_targets(&self) -> Vec<usize> {
        let mut out: Vec<usize> = Vec::new();
        for map in &self.maps {
            if !out.contains(&map.dst_csi) {
                out.push(map.dst_csi);
            }
        }
        out
    }
}

/// Per CSI link configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CsiConfig {
    pub lanes: u8,
    #[serde(default)]
    pub bus_type: CsiBusType,
    pub freq_mhz: u32,
    #[serde(default)]
    pub deskew: DeskewPolicy,
}

/// Address translation entry proxying a downstream device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AliasConfig {
    pub sub_bus: usize,
    pub virt_addr: u8,
    pub phys_addr: u8,
}

/// Static pad/stream route
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RouteConfig {
    pub sink_pad: usize,
    pub sink_stream: u32,
    pub source_pad: usize,
    pub source_stream: u32,
}

/// Retry and delay knobs, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimingConfig {
    pub probe_attempts: u32,
    pub probe_interval_ms: u64,
    pub resume_probe_attempts: u32,
    pub resume_probe_interval_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub isolation_poll_ms: u64,
    pub isolation_timeout_ms: u64,
    pub lock_poll_ms: u64,
    pub lock_timeout_ms: u64,
    pub reset_pulse_ms: u64,
    pub reset_settle_ms: u64,
    pub remap_settle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            probe_attempts: timing::PROBE_ATTEMPTS,
            probe_interval_ms: timing::PROBE_INTERVAL_MS,
            resume_probe_attempts: timing::RESUME_PROBE_ATTEMPTS,
            resume_probe_interval_ms: timing::RESUME_PROBE_INTERVAL_MS,
            backoff_initial_ms: timing::BACKOFF_INITIAL_MS,
            backoff_max_ms: timing::BACKOFF_MAX_MS,
            isolation_poll_ms: timing::ISOLATION_POLL_MS,
            isolation_timeout_ms: timing::ISOLATION_TIMEOUT_MS,
            lock_poll_ms: timing::LOCK_POLL_MS,
            lock_timeout_ms: timing::LOCK_TIMEOUT_MS,
            reset_pulse_ms: timing::RESET_PULSE_MS,
            reset_settle_ms: timing::RESET_SETTLE_MS,
            remap_settle_ms: timing::REMAP_SETTLE_MS,
        }
    }
}

impl TimingConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn resume_probe_interval(&self) -> Duration {
        Duration::from_millis(self.resume_probe_interval_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn isolation_poll(&self) -> Duration {
        Duration::from_millis(self.isolation_poll_ms.max(1))
    }

    pub fn isolation_timeout(&self) -> Duration {
        Duration::from_millis(self.isolation_timeout_ms)
    }

    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn reset_pulse(&self) -> Duration {
        Duration::from_millis(self.reset_pulse_ms)
    }

    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }

    pub fn remap_settle(&self) -> Duration {
        Duration::from_millis(self.remap_settle_ms)
    }
}

/// Complete static description of one fabric (one serializer or deserializer)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FabricConfig {
    pub name: String,
    /// Address the chip is operated at
    pub addr: u8,
    /// Factory address, when it differs from `addr`
    #[serde(default)]
    pub phys_addr: Option<u8>,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    #[serde(default)]
    pub pipes: Vec<PipeConfig>,
    #[serde(default)]
    pub csi_links: Vec<CsiConfig>,
    /// Line-fault monitors enabled at attach
    #[serde(default)]
    pub line_faults: Vec<usize>,
    #[serde(default)]
    pub aliases: Vec<AliasConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub timing: TimingConfig,
}

impl FabricConfig {
    /// Factory address, falling back to the operating address
    pub fn factory_addr(&self) -> u8 {
        self.phys_addr.unwrap_or(self.addr)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// Load a fabric configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|source| SerdesError::FileIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&data)
    }

    /// Save the configuration as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| SerdesError::FileIo {
            path: path.to_path_buf(),
            source,
        })
    }
}
