//! MAX9296 dual GMSL deserializer

use std::time::Duration;

use super::max96724::{dpll_code, program_maps};
use super::{
    ChipDescriptor, ChipVariant, CommonOps, CsiLinkOps, LineFaultOps, SerdesChip, SerialLinkOps,
    VideoPipeOps,
};
use crate::constants::regs;
use crate::data::{CsiConfig, DeskewPolicy, LineFaultStatus, LinkConfig, LinkType, PipeConfig, PipeSource};
use crate::error::{Result, SerdesError};
use crate::hw::ChipIo;

pub const DEVICE_ID: u8 = 0x94;

pub const DESCRIPTOR: ChipDescriptor = ChipDescriptor {
    name: "MAX9296",
    device_id: DEVICE_ID,
    rev_reg: regs::DEV_REV,
    variant: ChipVariant::Deserializer,
    serial_links: 2,
    video_pipes: 4,
    csi_links: 2,
    line_faults: 2,
    translation_buses: 0,
};

/// REG1: forward/reverse rate of link A, DIS_REM_CC in bit 4
pub const REG_REG1: u16 = 0x0001;
/// REG4: rates of link B
pub const REG_REG4: u16 = 0x0004;
pub const DIS_REM_CC: u8 = 1 << 4;
/// GMSL2 mode, link A in bit 6, link B in bit 7
pub const REG_REG6: u16 = 0x0006;
/// CTRL0: LINK_CFG in bits 1:0, RESET_ONESHOT in bit 5, RESET_ALL in bit 7
pub const REG_CTRL0: u16 = 0x0010;
pub const LINK_CFG_MASK: u8 = 0x03;
pub const RESET_ONESHOT: u8 = 1 << 5;
pub const RESET_ALL: u8 = 1 << 7;
/// Lock status of link A and link B, LOCKED in bit 3
pub const LOCK_REGS: [u16; 2] = [0x0013, 0x5009];
pub const LOCKED: u8 = 1 << 3;
/// Pipe stream select, one register per pipe
pub const REG_PIPE_SEL_BASE: u16 = 0x0050;
/// VIDEO_PIPE_EN bits 3:0
pub const REG_PIPE_EN: u16 = 0x0002;
pub const REG_LF_EN: u16 = 0x0020;
pub const REG_LF_STATUS: u16 = 0x0021;
/// Per pipe MIPI TX block, 0x40 apart
pub const REG_MIPI_TX_BASE: u16 = 0x040B;
/// Lane count of both CSI ports, bits 7:6
pub const REG_LANES: u16 = 0x044A;
/// DPLL frequency, one register per port
pub const REG_DPLL_BASE: u16 = 0x031D;
/// PHY enable bits 7:4
pub const REG_PHY_EN: u16 = 0x0332;

const LINK_LOCK_TIMEOUT: Duration = Duration::from_millis(300);

fn rate_reg(link: usize) -> u16 {
    if link == 0 {
        REG_REG1
    } else {
        REG_REG4
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Max9296;

impl SerdesChip for Max9296 {
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

    fn line_fault(&self) -> Option<&dyn LineFaultOps> {
        Some(self)
    }
}

impl CommonOps for Max9296 {
    fn enable(&self, io: ChipIo<'_>) -> Result<()> {
        io.write_u8(REG_PIPE_EN, 0x00)?;
        io.update_bits(REG_PHY_EN, 0xF0, 0x00)
    }

    fn disable(&self, io: ChipIo<'_>) -> Result<()> {
        io.write_u8(REG_PIPE_EN, 0x00)
    }

    fn soft_reset(&self, io: ChipIo<'_>) -> Result<()> {
        io.update_bits(REG_CTRL0, RESET_ALL, RESET_ALL)
    }
}

impl SerialLinkOps for Max9296 {
    fn enable(&self, io: ChipIo<'_>, link: usize, config: &LinkConfig) -> Result<()> {
        let gmsl2 = 1u8 << (6 + link);
        let mode = if config.link_type == LinkType::Gmsl2 { gmsl2 } else { 0 };
        io.update_bits(REG_REG6, gmsl2, mode)?;

        let rx = if config.rx_rate_mbps > 3000 { 0b10 } else { 0b01 };
        let tx = if config.tx_rate_mbps > 187 { 0b01 } else { 0b00 };
        io.update_bits(rate_reg(link), 0x0F, rx | (tx << 2))?;

        // Both links share LINK_CFG; enabling one keeps the other as it was
        io.update_bits(REG_CTRL0, 1 << link, 1 << link)
    }

    fn disable(&self, io: ChipIo<'_>, link: usize) -> Result<()> {
        io.update_bits(REG_CTRL0, 1 << link, 0)
    }

    fn reset(&self, io: ChipIo<'_>, _link: usize) -> Result<()> {
        io.update_bits(REG_CTRL0, RESET_ONESHOT, RESET_ONESHOT)
    }

    fn set_remote_control(&self, io: ChipIo<'_>, link: usize, enabled: bool) -> Result<()> {
        io.update_bits(rate_reg(link), DIS_REM_CC, if enabled { 0 } else { DIS_REM_CC })
    }

    fn is_locked(&self, io: ChipIo<'_>, link: usize) -> Result<bool> {
        Ok(io.read_u8(LOCK_REGS[link])? & LOCKED != 0)
    }

    fn lock_timeout(&self) -> Option<Duration> {
        Some(LINK_LOCK_TIMEOUT)
    }

    fn isolate(&self, io: ChipIo<'_>, link: usize) -> Result<()> {
        io.update_bits(REG_CTRL0, LINK_CFG_MASK | RESET_ONESHOT, (1 << link) | RESET_ONESHOT)
    }

    fn deisolate(&self, io: ChipIo<'_>, _link: usize) -> Result<()> {
        io.update_bits(REG_CTRL0, LINK_CFG_MASK | RESET_ONESHOT, LINK_CFG_MASK)
    }
}

impl VideoPipeOps for Max9296 {
    fn enable(&self, io: ChipIo<'_>, pipe: usize, config: &PipeConfig) -> Result<()> {
        let PipeSource::Link { link, pipe: src_pipe } = config.source else {
            return Err(SerdesError::config(format!(
                "{} pipe {} must be sourced from a serial link",
                DESCRIPTOR.name, pipe
            )));
        };
        // Stream id in bits 1:0, link B select in bit 4
        let sel = ((src_pipe as u8) & 0x03) | if link == 1 { 0x10 } else { 0x00 };
        io.write_u8(REG_PIPE_SEL_BASE + pipe as u16, sel)?;

        program_maps(io, |offset| REG_MIPI_TX_BASE + 0x40 * pipe as u16 + offset, config)?;
        io.update_bits(REG_PIPE_EN, 1 << pipe, 1 << pipe)
    }

    fn disable(&self, io: ChipIo<'_>, pipe: usize) -> Result<()> {
        io.update_bits(REG_PIPE_EN, 1 << pipe, 0)
    }
}

impl CsiLinkOps for Max9296 {
    fn enable(&self, io: ChipIo<'_>, csi: usize, config: &CsiConfig) -> Result<()> {
        io.update_bits(REG_LANES + 0x40 * csi as u16, 0xC0, (config.lanes.saturating_sub(1) & 0x03) << 6)?;
        let freq = dpll_code(config.freq_mhz)?;
        io.write_u8(REG_DPLL_BASE + 3 * csi as u16, freq | 0x20)?;
        if config.deskew != DeskewPolicy::Off {
            io.write_u8(REG_LANES + 0x40 * csi as u16 - 0x07, 0x80)?;
        }
        io.update_bits(REG_PHY_EN, 0x30 << (2 * csi), 0x30 << (2 * csi))
    }

    fn disable(&self, io: ChipIo<'_>, csi: usize) -> Result<()> {
        io.update_bits(REG_PHY_EN, 0x30 << (2 * csi), 0)
    }
}

impl LineFaultOps for Max9296 {
    fn enable(&self, io: ChipIo<'_>, line: usize) -> Result<()> {
        io.update_bits(REG_LF_EN, 1 << line, 1 << line)
    }

    fn disable(&self, io: ChipIo<'_>, line: usize) -> Result<()> {
        io.update_bits(REG_LF_EN, 1 << line, 0)
    }

    fn status(&self, io: ChipIo<'_>, line: usize) -> Result<LineFaultStatus> {
        let raw = io.read_u8(REG_LF_STATUS)?;
        Ok(super::max96724::decode_line_fault(raw >> (line * 4)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBus, SimDevice};

    #[test]
    fn test_isolate_forces_single_link() {
        let bus = SimBus::new();
        bus.add_device(0x48, SimDevice::for_chip(DEVICE_ID));
        let io = ChipIo::new(&bus, 0x48);

        Max9296.isolate(io, 1).unwrap();
        assert_eq!(io.read_u8(REG_CTRL0).unwrap() & LINK_CFG_MASK, 0b10);
        Max9296.deisolate(io, 1).unwrap();
        assert_eq!(io.read_u8(REG_CTRL0).unwrap() & LINK_CFG_MASK, 0b11);
    }

    #[test]
    fn test_remote_control_bit_per_link() {
        let bus = SimBus::new();
        bus.add_device(0x48, SimDevice::for_chip(DEVICE_ID));
        let io = ChipIo::new(&bus, 0x48);

        Max9296.set_remote_control(io, 1, false).unwrap();
        assert_eq!(io.read_u8(REG_REG4).unwrap() & DIS_REM_CC, DIS_REM_CC);
        assert_eq!(io.read_u8(REG_REG1).unwrap() & DIS_REM_CC, 0);
        Max9296.set_remote_control(io, 1, true).unwrap();
        assert_eq!(io.read_u8(REG_REG4).unwrap() & DIS_REM_CC, 0);
    }

    #[test]
    fn test_gmsl1_clears_mode_bit() {
        let bus = SimBus::new();
        bus.add_device(0x48, SimDevice::for_chip(DEVICE_ID).with_register(REG_REG6, 0xC0));
        let io = ChipIo::new(&bus, 0x48);

        let cfg = LinkConfig { link_type: LinkType::Gmsl1, ..Default::default() };
        SerialLinkOps::enable(&Max9296, io, 0, &cfg).unwrap();
        assert_eq!(io.read_u8(REG_REG6).unwrap(), 0x80);
    }
}
