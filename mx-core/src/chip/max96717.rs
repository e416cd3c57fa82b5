//! MAX96717 single-pipe GMSL2 serializer
//!
//! The CSI receiver has no separately controllable PHY, so the chip exposes
//! no CSI link table and CSI references on it are bookkeeping only.

use super::{
    ChipDescriptor, ChipVariant, CommonOps, SerdesChip, SerialLinkOps, TranslationOps, VideoPipeOps,
};
use crate::constants::regs;
use crate::data::{LinkConfig, PipeConfig, PipeSource};
use crate::error::{Result, SerdesError};
use crate::hw::ChipIo;

use super::max9295::{REG_CTRL0, REG_CTRL3, REG_DST_A, REG_REG1, REG_SRC_A, DIS_REM_CC, LOCKED, RESET_ALL};

pub const DEVICE_ID: u8 = 0xBF;

pub const DESCRIPTOR: ChipDescriptor = ChipDescriptor {
    name: "MAX96717",
    device_id: DEVICE_ID,
    rev_reg: regs::DEV_REV,
    variant: ChipVariant::Serializer,
    serial_links: 1,
    video_pipes: 1,
    csi_links: 1,
    line_faults: 0,
    translation_buses: 1,
};

/// VID_TX_EN_Z in bit 6
pub const REG_PIPE_EN: u16 = 0x0002;
pub const VID_TX_EN: u8 = 1 << 6;
/// Stream id of pipe Z
pub const REG_TX3_Z: u16 = 0x005B;

#[derive(Debug, Default, Clone, Copy)]
pub struct Max96717;

impl SerdesChip for Max96717 {
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

    fn translation(&self) -> Option<&dyn TranslationOps> {
        Some(self)
    }
}

impl CommonOps for Max96717 {
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

impl SerialLinkOps for Max96717 {
    fn enable(&self, io: ChipIo<'_>, _link: usize, config: &LinkConfig) -> Result<()> {
        let tx = if config.rx_rate_mbps > 3000 { 0b10 } else { 0b01 };
        io.update_bits(REG_REG1, 0x03, tx)
    }

    fn set_remote_control(&self, io: ChipIo<'_>, _link: usize, enabled: bool) -> Result<()> {
        io.update_bits(REG_REG1, DIS_REM_CC, if enabled { 0 } else { DIS_REM_CC })
    }

    fn is_locked(&self, io: ChipIo<'_>, _link: usize) -> Result<bool> {
        Ok(io.read_u8(REG_CTRL3)? & LOCKED != 0)
    }
}

impl VideoPipeOps for Max96717 {
    fn enable(&self, io: ChipIo<'_>, pipe: usize, config: &PipeConfig) -> Result<()> {
        if !matches!(config.source, PipeSource::Csi { .. }) {
            return Err(SerdesError::config(format!(
                "{} pipe {} must be sourced from a CSI port",
                DESCRIPTOR.name, pipe
            )));
        }
        io.write_u8(REG_TX3_Z, 0x02)?;
        io.update_bits(REG_PIPE_EN, VID_TX_EN, VID_TX_EN)
    }

    fn disable(&self, io: ChipIo<'_>, _pipe: usize) -> Result<()> {
        io.update_bits(REG_PIPE_EN, VID_TX_EN, 0)
    }
}

impl TranslationOps for Max96717 {
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

    #[test]
    fn test_no_csi_table() {
        assert!(Max96717.csi_link().is_none());
        assert!(Max96717.line_fault().is_none());
        assert!(Max96717.translation().is_some());
    }
}
