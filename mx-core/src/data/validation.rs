//! Configuration validation
//!
//! Checks a [`FabricConfig`] against the identified chip before any element
//! is created. Every failure here is a configuration error and fatal to
//! attach.

use std::collections::HashSet;

use crate::chip::ChipDescriptor;
use crate::constants::limits;
use crate::data::{FabricConfig, PipeConfig, PipeSource};
use crate::error::{Result, SerdesError};

/// Validates that an address fits in 7 bits
pub fn validate_bus_addr(what: &str, addr: u8) -> Result<u8> {
    if addr == 0 || addr > limits::MAX_BUS_ADDR {
        return Err(SerdesError::config(format!(
            "{} address {:#04x} is not a valid 7-bit address",
            what, addr
        )));
    }
    Ok(addr)
}

fn check_index(kind: &'static str, index: usize, count: usize) -> Result<()> {
    if index >= count {
        return Err(SerdesError::invalid_index(kind, index, count));
    }
    Ok(())
}

fn validate_pipe(index: usize, pipe: &PipeConfig, desc: &ChipDescriptor, csi_count: usize) -> Result<()> {
    match pipe.source {
        PipeSource::Link { link, .. } => check_index("serial link", link, desc.serial_links)?,
        // Serializer pipes need their CSI input configured
        PipeSource::Csi { csi } => check_index("CSI link", csi, csi_count.min(desc.csi_links))?,
    }

    if pipe.maps.len() > limits::MAX_PIPE_MAPS {
        return Err(SerdesError::config(format!(
            "pipe {} has {} maps, maximum is {}",
            index,
            pipe.maps.len(),
            limits::MAX_PIPE_MAPS
        )));
    }

    for map in &pipe.maps {
        if map.src_vc > limits::MAX_VIRTUAL_CHANNEL || map.dst_vc > limits::MAX_VIRTUAL_CHANNEL {
            return Err(SerdesError::config(format!(
                "pipe {} maps virtual channel {} -> {} outside 0..={}",
                index,
                map.src_vc,
                map.dst_vc,
                limits::MAX_VIRTUAL_CHANNEL
            )));
        }
        if desc.is_deserializer()
            && (map.src_vc > limits::MAX_DESERIALIZER_VC || map.dst_vc > limits::MAX_DESERIALIZER_VC)
        {
            return Err(SerdesError::config(format!(
                "pipe {} maps virtual channel {} -> {}, {} only maps 0..={}",
                index,
                map.src_vc,
                map.dst_vc,
                desc.name,
                limits::MAX_DESERIALIZER_VC
            )));
        }
        if map.src_dt > limits::MAX_DATA_TYPE || map.dst_dt > limits::MAX_DATA_TYPE {
            return Err(SerdesError::config(format!(
                "pipe {} maps data type {:#x} -> {:#x} outside 6 bits",
                index, map.src_dt, map.dst_dt
            )));
        }
        // Maps may only target CSI links that have a configuration to program
        check_index("CSI link", map.dst_csi, csi_count)?;
    }

    if pipe.soft_min_bpp > pipe.soft_max_bpp {
        return Err(SerdesError::config(format!(
            "pipe {} soft bpp range {}..{} is inverted",
            index, pipe.soft_min_bpp, pipe.soft_max_bpp
        )));
    }

    Ok(())
}

/// Validates a fabric configuration against the chip it will drive
pub fn validate_fabric_config(config: &FabricConfig, desc: &ChipDescriptor) -> Result<()> {
    validate_bus_addr("fabric", config.addr)?;
    if let Some(phys) = config.phys_addr {
        validate_bus_addr("fabric factory", phys)?;
    }

    if config.links.len() > desc.serial_links {
        return Err(SerdesError::invalid_index("serial link", config.links.len() - 1, desc.serial_links));
    }
    if config.pipes.len() > desc.video_pipes {
        return Err(SerdesError::invalid_index("video pipe", config.pipes.len() - 1, desc.video_pipes));
    }
    if config.csi_links.len() > desc.csi_links {
        return Err(SerdesError::invalid_index("CSI link", config.csi_links.len() - 1, desc.csi_links));
    }

    let mut remote_addrs = HashSet::new();
    for (index, link) in config.links.iter().enumerate() {
        if let Some(remote) = &link.remote {
            validate_bus_addr("remote factory", remote.phys_addr)?;
            validate_bus_addr("remote virtual", remote.virt_addr)?;
            // Virtual addresses must be unique, that is the whole point of remapping
            if !remote_addrs.insert(remote.virt_addr) {
                return Err(SerdesError::config(format!(
                    "link {} remote virtual address {:#04x} is already used",
                    index, remote.virt_addr
                )));
            }
        }
    }

    for (index, pipe) in config.pipes.iter().enumerate() {
        validate_pipe(index, pipe, desc, config.csi_links.len())?;
    }

    for (index, csi) in config.csi_links.iter().enumerate() {
        if csi.lanes == 0 || csi.lanes > limits::MAX_CSI_LANES {
            return Err(SerdesError::config(format!(
                "CSI link {} lane count {} outside 1..={}",
                index,
                csi.lanes,
                limits::MAX_CSI_LANES
            )));
        }
        if csi.freq_mhz == 0 {
            return Err(SerdesError::config(format!("CSI link {} has no frequency", index)));
        }
        if csi.freq_mhz > limits::MAX_CSI_FREQ_MHZ {
            return Err(SerdesError::config(format!(
                "CSI link {} frequency {} MHz above {}",
                index,
                csi.freq_mhz,
                limits::MAX_CSI_FREQ_MHZ
            )));
        }
    }

    for &lf in &config.line_faults {
        check_index("line fault", lf, desc.line_faults)?;
    }

    let mut alias_slots = vec![0usize; desc.translation_buses];
    for alias in &config.aliases {
        check_index("translation bus", alias.sub_bus, desc.translation_buses)?;
        validate_bus_addr("alias virtual", alias.virt_addr)?;
        validate_bus_addr("alias physical", alias.phys_addr)?;
        alias_slots[alias.sub_bus] += 1;
        if alias_slots[alias.sub_bus] > limits::ALIAS_SLOTS_PER_BUS {
            return Err(SerdesError::config(format!(
                "translation bus {} has more than {} aliases",
                alias.sub_bus,
                limits::ALIAS_SLOTS_PER_BUS
            )));
        }
    }

    if config.timing.backoff_initial_ms == 0 || config.timing.backoff_initial_ms > config.timing.backoff_max_ms {
        return Err(SerdesError::config(format!(
            "backoff ladder {}..{} ms is empty",
            config.timing.backoff_initial_ms, config.timing.backoff_max_ms
        )));
    }

    let pads = desc.pads();
    for route in &config.routes {
        check_index("pad", route.sink_pad, pads)?;
        check_index("pad", route.source_pad, pads)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::{max9296, max96724};
    use crate::data::{AliasConfig, CsiConfig, LinkConfig, PipeMap, RemoteDeviceConfig};

    fn base_config() -> FabricConfig {
        FabricConfig {
            name: "des".into(),
            addr: 0x27,
            links: vec![LinkConfig::default(), LinkConfig::default()],
            csi_links: vec![CsiConfig {
                lanes: 4,
                bus_type: Default::default(),
                freq_mhz: 1500,
                deskew: Default::default(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_bus_addr() {
        assert!(validate_bus_addr("x", 0x40).is_ok());
        assert!(validate_bus_addr("x", 0x7F).is_ok());
        assert!(validate_bus_addr("x", 0x00).is_err());
        assert!(validate_bus_addr("x", 0x80).is_err());
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_fabric_config(&base_config(), &max96724::DESCRIPTOR).is_ok());
    }

    #[test]
    fn test_too_many_links() {
        let mut cfg = base_config();
        cfg.links.push(LinkConfig::default());
        let err = validate_fabric_config(&cfg, &max9296::DESCRIPTOR).unwrap_err();
        assert!(matches!(err, SerdesError::InvalidIndex { kind: "serial link", .. }));
    }

    #[test]
    fn test_duplicate_virtual_address() {
        let mut cfg = base_config();
        for link in cfg.links.iter_mut() {
            link.remote = Some(RemoteDeviceConfig {
                name: "ser".into(),
                phys_addr: 0x40,
                virt_addr: 0x42,
                device_id: None,
            });
        }
        assert!(validate_fabric_config(&cfg, &max96724::DESCRIPTOR).is_err());
    }

    #[test]
    fn test_pipe_map_targets_unconfigured_csi() {
        let mut cfg = base_config();
        cfg.pipes.push(PipeConfig {
            source: PipeSource::Link { link: 0, pipe: 0 },
            maps: vec![PipeMap { src_vc: 0, src_dt: 0x1E, dst_vc: 0, dst_dt: 0x1E, dst_csi: 1 }],
            dbl_pixel_bpp: 0,
            soft_min_bpp: 0,
            soft_max_bpp: 0,
        });
        assert!(validate_fabric_config(&cfg, &max96724::DESCRIPTOR).is_err());
    }

    #[test]
    fn test_deserializer_map_vc_limited_to_two_bits() {
        let mut cfg = base_config();
        cfg.pipes.push(PipeConfig {
            source: PipeSource::Link { link: 0, pipe: 0 },
            maps: vec![PipeMap { src_vc: 3, src_dt: 0x2C, dst_vc: 3, dst_dt: 0x2C, dst_csi: 0 }],
            dbl_pixel_bpp: 0,
            soft_min_bpp: 0,
            soft_max_bpp: 0,
        });
        assert!(validate_fabric_config(&cfg, &max96724::DESCRIPTOR).is_ok());

        cfg.pipes[0].maps[0].src_vc = 5;
        cfg.pipes[0].maps[0].dst_vc = 6;
        assert!(validate_fabric_config(&cfg, &max96724::DESCRIPTOR).unwrap_err().is_config());
        assert!(validate_fabric_config(&cfg, &max9296::DESCRIPTOR).unwrap_err().is_config());
    }

    #[test]
    fn test_csi_frequency_above_dpll_range() {
        let mut cfg = base_config();
        cfg.csi_links[0].freq_mhz = 3200;
        assert!(validate_fabric_config(&cfg, &max96724::DESCRIPTOR).unwrap_err().is_config());
        cfg.csi_links[0].freq_mhz = limits::MAX_CSI_FREQ_MHZ;
        assert!(validate_fabric_config(&cfg, &max96724::DESCRIPTOR).is_ok());
    }

    #[test]
    fn test_inverted_soft_bpp_range() {
        let mut cfg = base_config();
        cfg.pipes.push(PipeConfig {
            source: PipeSource::Link { link: 0, pipe: 0 },
            maps: Vec::new(),
            dbl_pixel_bpp: 0,
            soft_min_bpp: 12,
            soft_max_bpp: 8,
        });
        assert!(validate_fabric_config(&cfg, &max96724::DESCRIPTOR).is_err());
    }

    #[test]
    fn test_zero_backoff_rejected() {
        let mut cfg = base_config();
        cfg.timing.backoff_initial_ms = 0;
        assert!(validate_fabric_config(&cfg, &max96724::DESCRIPTOR).is_err());
    }

    #[test]
    fn test_alias_table_overflow() {
        let mut cfg = base_config();
        for virt in [0x50, 0x51, 0x52] {
            cfg.aliases.push(AliasConfig { sub_bus: 0, virt_addr: virt, phys_addr: 0x10 });
        }
        // Deserializers carry no translation buses at all
        assert!(validate_fabric_config(&cfg, &max96724::DESCRIPTOR).is_err());
    }
}
