//! Simulated board topologies
//!
//! A [`SimConfig`] lists the chips on a simulated bus so a board file can
//! carry its own dry-run hardware next to the fabric configuration.

use serde::{Deserialize, Serialize};

use super::{SimBus, SimDevice};
use crate::chip::{max9295, max96724};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimDeviceConfig {
    pub addr: u8,
    pub device_id: u8,
    /// Serial link the device sits behind, host side when absent
    #[serde(default)]
    pub link: Option<usize>,
    /// Transfers the device NAKs before it first answers
    #[serde(default)]
    pub not_ready: u32,
    /// Register overrides applied on top of the chip reset state
    #[serde(default)]
    pub registers: Vec<(u16, u8)>,
}

impl SimDeviceConfig {
    fn device(&self) -> SimDevice {
        self.registers
            .iter()
            .fold(SimDevice::for_chip(self.device_id), |d, &(reg, value)| d.with_register(reg, value))
            .unavailable_for(self.not_ready)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimConfig {
    #[serde(default)]
    pub devices: Vec<SimDeviceConfig>,
}

impl SimConfig {
    /// MAX96724 at 0x27 with a MAX9295 at the factory address 0x40 behind
    /// each of the first `cameras` links
    pub fn quad_deserializer(cameras: usize) -> Self {
        let mut devices = vec![SimDeviceConfig {
            addr: 0x27,
            device_id: max96724::DEVICE_ID,
            ..Default::default()
        }];
        devices.extend((0..cameras.min(4)).map(|link| SimDeviceConfig {
            addr: 0x40,
            device_id: max9295::DEVICE_ID,
            link: Some(link),
            ..Default::default()
        }));
        Self { devices }
    }

    pub fn build(&self) -> SimBus {
        let bus = SimBus::new();
        for dev in &self.devices {
            match dev.link {
                Some(link) => bus.attach_remote(link, dev.addr, dev.device()),
                None => bus.add_device(dev.addr, dev.device()),
            }
        }
        bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::ChipIo;

    #[test]
    fn test_quad_deserializer_layout() {
        let cfg = SimConfig::quad_deserializer(2);
        assert_eq!(cfg.devices.len(), 3);

        let bus = cfg.build();
        assert!(ChipIo::new(&bus, 0x27).answers());
        assert_eq!(bus.remote_addr(0), Some(0x40));
        assert_eq!(bus.remote_addr(1), Some(0x40));
        assert_eq!(bus.remote_addr(2), None);
    }

    #[test]
    fn test_register_overrides_from_json() {
        let cfg: SimConfig = serde_json::from_str(
            r#"{ "devices": [ { "addr": 39, "device_id": 162, "not_ready": 2, "registers": [[26, 0]] } ] }"#,
        )
        .unwrap();
        let bus = cfg.build();
        let io = ChipIo::new(&bus, 39);
        assert!(!io.answers());
        assert!(!io.answers());
        assert_eq!(io.read_u8(0x001A).unwrap(), 0);
    }
}
