//! MAX96724 quad GMSL2 deserializer

use std::time::Duration;

use tracing::debug;

use super::{
    ChipDescriptor, ChipVariant, CommonOps, CsiLinkOps, LineFaultOps, SerdesChip, SerialLinkOps,
    VideoPipeOps,
};
use crate::constants::{limits, regs};
use crate::data::{CsiConfig, DeskewPolicy, LineFaultStatus, LinkConfig, LinkType, PipeConfig, PipeSource};
use crate::error::{Result, SerdesError};
use crate::hw::ChipIo;

pub const DEVICE_ID: u8 = 0xA2;

pub const DESCRIPTOR: ChipDescriptor = ChipDescriptor {
    name: "MAX96724",
    device_id: DEVICE_ID,
    rev_reg: regs::DEV_REV,
    variant: ChipVariant::Deserializer,
    serial_links: 4,
    video_pipes: 4,
    csi_links: 4,
    line_faults: 4,
    translation_buses: 0,
};

/// Remote control channel disable, bit `2 * link`
pub const REG_DIS_REM_CC: u16 = 0x0003;
/// LINK_EN_A..D in bits 3:0, GMSL2_A..D in bits 7:4
pub const REG_LINK_EN: u16 = 0x0006;
pub const LINK_EN_MASK: u8 = 0x0F;
/// RX/TX rate nibbles, two links per register
pub const REG_PHY_RATE: u16 = 0x0010;
/// RESET_ALL in bit 6
pub const REG_PWR1: u16 = 0x0013;
pub const RESET_ALL: u8 = 1 << 6;
/// RESET_ONESHOT_A..D in bits 3:0
pub const REG_RESET_ONESHOT: u16 = 0x0018;
/// Per link lock status, LOCKED in bit 3
pub const LOCK_REGS: [u16; 4] = [0x001A, 0x000A, 0x000B, 0x000C];
pub const LOCKED: u8 = 1 << 3;
/// Pipe source select, one nibble per pipe
pub const REG_PIPE_SEL: u16 = 0x00F0;
/// VIDEO_PIPE_EN bits 3:0
pub const REG_PIPE_EN: u16 = 0x00F4;
/// Line-fault monitor enable bits 3:0
pub const REG_LF_EN: u16 = 0x00E0;
/// Line-fault status, one nibble per monitor
pub const REG_LF_STATUS: u16 = 0x00E1;
/// PHY enable bits 7:4
pub const REG_PHY_EN: u16 = 0x08A2;
/// Per CSI controller DPLL frequency, 100 MHz steps in bits 4:0, override in bit 5
pub const REG_DPLL_BASE: u16 = 0x0415;
/// Per pipe MIPI TX block, 0x40 apart
pub const REG_MIPI_TX_BASE: u16 = 0x090B;
/// Per CSI controller block, 0x40 apart
pub const REG_MIPI_CTRL_BASE: u16 = 0x0903;

const LINK_LOCK_TIMEOUT: Duration = Duration::from_millis(250);

fn rate_code(mbps: u32) -> u8 {
    match mbps {
        0..=3000 => 0b01,
        _ => 0b10,
    }
}

fn reverse_rate_code(mbps: u32) -> u8 {
    if mbps > 187 {
        0b01
    } else {
        0b00
    }
}

pub(crate) fn mipi_tx_reg(pipe: usize, offset: u16) -> u16 {
    REG_MIPI_TX_BASE + 0x40 * pipe as u16 + offset
}

/// Program the MIPI TX mapping block of one pipe. Shared with the MAX9296,
/// whose block has the same layout at a different base. The map registers
/// carry two VC bits; wider channels are refused before anything is written.
pub(crate) fn program_maps(io: ChipIo<'_>, reg_at: impl Fn(u16) -> u16, config: &PipeConfig) -> Result<()> {
    if let Some(map) = config
        .maps
        .iter()
        .find(|m| m.src_vc > limits::MAX_DESERIALIZER_VC || m.dst_vc > limits::MAX_DESERIALIZER_VC)
    {
        return Err(SerdesError::config(format!(
            "virtual channel {} -> {} does not fit the map registers",
            map.src_vc, map.dst_vc
        )));
    }

    let mut seq = Vec::with_capacity(2 * config.maps.len() + 6);
    let mut map_en: u16 = 0;
    let mut dest = [0u8; 4];
    for (n, map) in config.maps.iter().enumerate() {
        let n16 = n as u16;
        seq.push((reg_at(0x02 + 2 * n16), (map.src_vc << 6) | map.src_dt));
        seq.push((reg_at(0x03 + 2 * n16), (map.dst_vc << 6) | map.dst_dt));
        dest[n / 4] |= ((map.dst_csi as u8) & 0x03) << ((n % 4) * 2);
        map_en |= 1 << n;
    }
    for (i, value) in dest.iter().enumerate() {
        seq.push((reg_at(0x22 + i as u16), *value));
    }
    seq.push((reg_at(0x00), (map_en & 0xFF) as u8));
    seq.push((reg_at(0x01), (map_en >> 8) as u8));
    io.write_seq(&seq)
}

/// DPLL code for a CSI rate: 100 MHz steps in five bits
pub(crate) fn dpll_code(freq_mhz: u32) -> Result<u8> {
    if freq_mhz == 0 || freq_mhz > limits::MAX_CSI_FREQ_MHZ {
        return Err(SerdesError::config(format!(
            "CSI frequency {} MHz outside 1..={}",
            freq_mhz,
            limits::MAX_CSI_FREQ_MHZ
        )));
    }
    Ok((freq_mhz / 100) as u8)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Max96724;

impl SerdesChip for Max96724 {
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

impl CommonOps for Max96724 {
    fn enable(&self, io: ChipIo<'_>) -> Result<()> {
        // Everything starts parked: no pipes, PHYs in standby
        io.write_u8(REG_PIPE_EN, 0x00)?;
        io.update_bits(REG_PHY_EN, 0xF0, 0x00)
    }

    fn disable(&self, io: ChipIo<'_>) -> Result<()> {
        io.write_u8(REG_PIPE_EN, 0x00)?;
        io.update_bits(REG_LINK_EN, LINK_EN_MASK, 0x00)
    }

    fn soft_reset(&self, io: ChipIo<'_>) -> Result<()> {
        io.update_bits(REG_PWR1, RESET_ALL, RESET_ALL)
    }
}

impl SerialLinkOps for Max96724 {
    fn enable(&self, io: ChipIo<'_>, link: usize, config: &LinkConfig) -> Result<()> {
        if config.link_type == LinkType::Gmsl1 {
            return Err(SerdesError::NotSupported(format!(
                "{} link {} cannot run GMSL1",
                DESCRIPTOR.name, link
            )));
        }
        let reg = REG_PHY_RATE + (link / 2) as u16;
        let shift = (link % 2) * 4;
        let code = rate_code(config.rx_rate_mbps) | (reverse_rate_code(config.tx_rate_mbps) << 2);
        io.update_bits(reg, 0x0F << shift, code << shift)?;

        let bit = 1u8 << link;
        io.update_bits(REG_LINK_EN, bit | (bit << 4), bit | (bit << 4))
    }

    fn disable(&self, io: ChipIo<'_>, link: usize) -> Result<()> {
        io.update_bits(REG_LINK_EN, 1 << link, 0)
    }

    fn reset(&self, io: ChipIo<'_>, link: usize) -> Result<()> {
        io.write_u8(REG_RESET_ONESHOT, 1 << link)
    }

    fn set_remote_control(&self, io: ChipIo<'_>, link: usize, enabled: bool) -> Result<()> {
        let bit = 1u8 << (2 * link);
        io.update_bits(REG_DIS_REM_CC, bit, if enabled { 0 } else { bit })
    }

    fn is_locked(&self, io: ChipIo<'_>, link: usize) -> Result<bool> {
        Ok(io.read_u8(LOCK_REGS[link])? & LOCKED != 0)
    }

    fn lock_timeout(&self) -> Option<Duration> {
        Some(LINK_LOCK_TIMEOUT)
    }

    fn isolate(&self, io: ChipIo<'_>, link: usize) -> Result<()> {
        debug!(link, "MAX96724 isolating link");
        io.update_bits(REG_LINK_EN, LINK_EN_MASK, 1 << link)?;
        io.write_u8(REG_RESET_ONESHOT, 1 << link)
    }

    fn deisolate(&self, io: ChipIo<'_>, _link: usize) -> Result<()> {
        io.update_bits(REG_LINK_EN, LINK_EN_MASK, LINK_EN_MASK)
    }
}

impl VideoPipeOps for Max96724 {
    fn enable(&self, io: ChipIo<'_>, pipe: usize, config: &PipeConfig) -> Result<()> {
        let PipeSource::Link { link, pipe: src_pipe } = config.source else {
            return Err(SerdesError::config(format!(
                "{} pipe {} must be sourced from a serial link",
                DESCRIPTOR.name, pipe
            )));
        };
        let nibble = (((link as u8) & 0x03) << 2) | ((src_pipe as u8) & 0x03);
        let shift = (pipe % 2) * 4;
        io.update_bits(REG_PIPE_SEL + (pipe / 2) as u16, 0x0F << shift, nibble << shift)?;

        program_maps(io, |offset| mipi_tx_reg(pipe, offset), config)?;
        io.update_bits(REG_PIPE_EN, 1 << pipe, 1 << pipe)
    }

    fn disable(&self, io: ChipIo<'_>, pipe: usize) -> Result<()> {
        io.update_bits(REG_PIPE_EN, 1 << pipe, 0)?;
        io.write_u8(mipi_tx_reg(pipe, 0x00), 0)?;
        io.write_u8(mipi_tx_reg(pipe, 0x01), 0)
    }
}

impl CsiLinkOps for Max96724 {
    fn enable(&self, io: ChipIo<'_>, csi: usize, config: &CsiConfig) -> Result<()> {
        let ctrl = REG_MIPI_CTRL_BASE + 0x40 * csi as u16;
        let lanes = (config.lanes.saturating_sub(1) & 0x03) << 6;
        io.update_bits(ctrl + 0x07, 0xC0, lanes)?;

        let freq = dpll_code(config.freq_mhz)?;
        io.write_u8(REG_DPLL_BASE + 3 * csi as u16, freq | 0x20)?;

        let deskew = match config.deskew {
            DeskewPolicy::Off => 0x00,
            DeskewPolicy::Initial => 0x80,
            DeskewPolicy::Periodic => 0x81,
        };
        io.write_u8(ctrl, deskew)?;

        io.update_bits(REG_PHY_EN, 0x10 << csi, 0x10 << csi)
    }

    fn disable(&self, io: ChipIo<'_>, csi: usize) -> Result<()> {
        io.update_bits(REG_PHY_EN, 0x10 << csi, 0)
    }
}

/// Decode a 3-bit line-fault status field
pub fn decode_line_fault(raw: u8) -> LineFaultStatus {
    match raw & 0x07 {
        0b000 => LineFaultStatus::ShortToBattery,
        0b001 => LineFaultStatus::ShortToGround,
        0b010 => LineFaultStatus::Normal,
        0b011 => LineFaultStatus::Open,
        _ => LineFaultStatus::LineToLineShort,
    }
}

impl LineFaultOps for Max96724 {
    fn enable(&self, io: ChipIo<'_>, line: usize) -> Result<()> {
        io.update_bits(REG_LF_EN, 1 << line, 1 << line)
    }

    fn disable(&self, io: ChipIo<'_>, line: usize) -> Result<()> {
        io.update_bits(REG_LF_EN, 1 << line, 0)
    }

    fn status(&self, io: ChipIo<'_>, line: usize) -> Result<LineFaultStatus> {
        let raw = io.read_u8(REG_LF_STATUS + (line / 2) as u16)?;
        Ok(decode_line_fault(raw >> ((line % 2) * 4)))
    }
}
