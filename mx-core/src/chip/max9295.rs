//! MAX9295 GMSL2 serializer

use super::{
    ChipDescriptor, ChipVariant, CommonOps, CsiLinkOps, SerdesChip, SerialLinkOps, TranslationOps,
    VideoPipeOps,
};
use crate::constants::regs;
use crate::data::{CsiConfig, LinkConfig, PipeConfig, PipeSource};
use crate::error::{Result, SerdesError};
use crate::hw::ChipIo;

pub const DEVICE_ID: u8 = 0x91;

pub const DESCRIPTOR: ChipDescriptor = ChipDescriptor {
    name: "MAX9295",
    device_id: DEVICE_ID,
    rev_reg: regs::DEV_REV,
    variant: ChipVariant::Serializer,
    serial_links: 1,
    video_pipes: 4,
    csi_links: 1,
    line_faults: 0,
    translation_buses: 1,
};

/// TX/RX rate, DIS_REM_CC in bit 4
pub const REG_REG1: u16 = 0x0001;
pub const DIS_REM_CC: u8 = 1 << 4;
/// VID_TX_EN for pipes X..U in bits 7:4
pub const REG_PIPE_EN: u16 = 0x0002;
/// CTRL0: RESET_LINK in bit 6, RESET_ALL in bit 7
pub const REG_CTRL0: u16 = 0x0010;
pub const RESET_LINK: u8 = 1 << 6;
pub const RESET_ALL: u8 = 1 << 7;
/// CTRL3: LOCKED in bit 3
pub const REG_CTRL3: u16 = 0x0013;
pub const LOCKED: u8 = 1 << 3;
/// Address translation source/destination pairs
pub const REG_SRC_A: u16 = 0x0042;
pub const REG_DST_A: u16 = 0x0043;
/// Stream id per pipe, 4 apart
pub const REG_TX3_BASE: u16 = 0x0053;
/// Lane count in bits 5:4
pub const REG_MIPI_RX1: u16 = 0x0331;
/// Port B start in bit 5, CSI clock enable in bit 6
pub const REG_FRONTTOP_0: u16 = 0x0308;
/// Double-pixel enable per pipe in bits 3:0
pub const REG_FRONTTOP_10: u16 = 0x0312;
/// Soft bpp override base, min/max pair per pipe
pub const REG_SOFT_BPP_BASE: u16 = 0x031C;

#[derive(Debug, Default, Clone, Copy)]
pub struct Max9295;

impl SerdesChip for Max9295 {
    fn descriptor(&self) -> &ChipDescriptor {
        &DESCRIPTOR
    }

    fn common(&self) -> Option<&dyn CommonOps> {
        Some(self)
    }

    fn serial_link(&self) -> Option<&dyn SerialLinkOps> {
        Some(self)
    }

    fn video_pipe(&self) -> Option<&dyn VideoPipeOps> {
        Some(self)
    }

    fn csi_link(&self) -> Option<&dyn CsiLinkOps> {
        Some(self)
    }

    fn translation(&self) -> Option<&dyn TranslationOps> {
        Some(self)
    }
}

impl CommonOps for Max9295 {
    fn enable(&self, io: ChipIo<'_>) -> Result<()> {
        io.update_bits(REG_PIPE_EN, 0xF0, 0x00)
    }

    fn disable(&self, io: ChipIo<'_>) -> Result<()> {
        io.update_bits(REG_PIPE_EN, 0xF0, 0x00)
    }

    fn soft_reset(&self, io: ChipIo<'_>) -> Result<()> {
        io.update_bits(REG_CTRL0, RESET_ALL, RESET_ALL)
    }

    fn remap_reset(&self, io: ChipIo<'_>, factory_addr: u8) -> Result<()> {
        if io.addr() == factory_addr {
            return Ok(());
        }
        io.write_u8(regs::DEV_ADDR, factory_addr << 1)
    }
}

impl SerialLinkOps for Max9295 {
    fn enable(&self, io: ChipIo<'_>, _link: usize, config: &LinkConfig) -> Result<()> {
        let tx = if config.rx_rate_mbps > 3000 { 0b10 } else { 0b01 };
        let rx = if config.tx_rate_mbps > 187 { 0b01 } else { 0b00 };
        io.update_bits(REG_REG1, 0x0F, tx | (rx << 2))
    }

    fn reset(&self, io: ChipIo<'_>, _link: usize) -> Result<()> {
        io.update_bits(REG_CTRL0, RESET_LINK, RESET_LINK)?;
        io.update_bits(REG_CTRL0, RESET_LINK, 0)
    }

    fn set_remote_control(&self, io: ChipIo<'_>, _link: usize, enabled: bool) -> Result<()> {
        io.update_bits(REG_REG1, DIS_REM_CC, if enabled { 0 } else { DIS_REM_CC })
    }

    fn is_locked(&self, io: ChipIo<'_>, _link: usize) -> Result<bool> {
        Ok(io.read_u8(REG_CTRL3)? & LOCKED != 0)
    }
}

impl VideoPipeOps for Max9295 {
    fn enable(&self, io: ChipIo<'_>, pipe: usize, config: &PipeConfig) -> Result<()> {
        let PipeSource::Csi { csi } = config.source else {
            return Err(SerdesError::config(format!(
                "{} pipe {} must be sourced from a CSI port",
                DESCRIPTOR.name, pipe
            )));
        };
        let pipe16 = pipe as u16;
        io.write_u8(REG_TX3_BASE + 4 * pipe16, (pipe as u8) & 0x03)?;
        io.update_bits(REG_FRONTTOP_0, 0x20, if csi == 1 { 0x20 } else { 0x00 })?;

        let dbl = if config.dbl_pixel_bpp != 0 { 1 << pipe } else { 0 };
        io.update_bits(REG_FRONTTOP_10, 1 << pipe, dbl)?;

        if config.soft_max_bpp != 0 {
            io.write_u8(REG_SOFT_BPP_BASE + 2 * pipe16, config.soft_min_bpp)?;
            io.write_u8(REG_SOFT_BPP_BASE + 2 * pipe16 + 1, config.soft_max_bpp)?;
        }

        io.update_bits(REG_PIPE_EN, 0x10 << pipe, 0x10 << pipe)
    }

    fn disable(&self, io: ChipIo<'_>, pipe: usize) -> Result<()> {
        io.update_bits(REG_PIPE_EN, 0x10 << pipe, 0)
    }
}

impl CsiLinkOps for Max9295 {
    fn enable(&self, io: ChipIo<'_>, _csi: usize, config: &CsiConfig) -> Result<()> {
        io.update_bits(REG_MIPI_RX1, 0x30, (config.lanes.saturating_sub(1) & 0x03) << 4)?;
        io.update_bits(REG_FRONTTOP_0, 0x40, 0x40)
    }

    fn disable(&self, io: ChipIo<'_>, _csi: usize) -> Result<()> {
        io.update_bits(REG_FRONTTOP_0, 0x40, 0)
    }
}

impl TranslationOps for Max9295 {
    fn add(&self, io: ChipIo<'_>, _sub_bus: usize, slot: usize, virt: u8, phys: u8) -> Result<()> {
        let offset = 2 * slot as u16;
        io.write_u8(REG_SRC_A + offset, virt << 1)?;
        io.write_u8(REG_DST_A + offset, phys << 1)
    }

    fn remove(&self, io: ChipIo<'_>, _sub_bus: usize, slot: usize) -> Result<()> {
        let offset = 2 * slot as u16;
        io.write_u8(REG_SRC_A + offset, 0)?;
        io.write_u8(REG_DST_A + offset, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBus, SimDevice};

    #[test]
    fn test_translation_slots() {
        let bus = SimBus::new();
        bus.add_device(0x40, SimDevice::for_chip(DEVICE_ID));
        let io = ChipIo::new(&bus, 0x40);

        Max9295.add(io, 0, 1, 0x50, 0x10).unwrap();
        assert_eq!(io.read_u8(REG_SRC_A + 2).unwrap(), 0xA0);
        assert_eq!(io.read_u8(REG_DST_A + 2).unwrap(), 0x20);
        Max9295.remove(io, 0, 1).unwrap();
        assert_eq!(io.read_u8(REG_SRC_A + 2).unwrap(), 0);
    }

    #[test]
    fn test_pipe_requires_csi_source() {
        let bus = SimBus::new();
        bus.add_device(0x40, SimDevice::for_chip(DEVICE_ID));
        let cfg = PipeConfig {
            source: PipeSource::Link { link: 0, pipe: 0 },
            maps: Vec::new(),
            dbl_pixel_bpp: 0,
            soft_min_bpp: 0,
            soft_max_bpp: 0,
        };
        let err = VideoPipeOps::enable(&Max9295, ChipIo::new(&bus, 0x40), 0, &cfg).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_remap_reset_skips_factory_address() {
        let bus = SimBus::new();
        bus.add_device(0x40, SimDevice::for_chip(DEVICE_ID));
        let before = bus.write_count();
        Max9295.remap_reset(ChipIo::new(&bus, 0x40), 0x40).unwrap();
        assert_eq!(bus.write_count(), before);
    }
}
