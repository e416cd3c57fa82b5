//! Capability tables
//!
//! A chip exposes its capabilities as optional operation tables. A table
//! the chip does not provide, or a hook a table leaves at its default, means
//! the capability does not exist on that chip. Callers treat both as a
//! successful no-op, never as an error.

use std::time::Duration;

use crate::chip::ChipDescriptor;
use crate::constants::regs;
use crate::data::{CsiConfig, LineFaultStatus, LinkConfig, PipeConfig};
use crate::error::Result;
use crate::hw::ChipIo;

/// Chip-wide hooks
pub trait CommonOps: Send + Sync {
    /// Chip-specific bring-up after reset and address assignment
    fn enable(&self, _io: ChipIo<'_>) -> Result<()> {
        Ok(())
    }

    fn disable(&self, _io: ChipIo<'_>) -> Result<()> {
        Ok(())
    }

    /// Register-level reset of the whole chip
    fn soft_reset(&self, _io: ChipIo<'_>) -> Result<()> {
        Ok(())
    }

    /// Move the chip to `new_addr`. `io` is bound to the current address.
    fn remap_addr(&self, io: ChipIo<'_>, new_addr: u8) -> Result<()> {
        io.write_u8(regs::DEV_ADDR, new_addr << 1)
    }

    /// Return the chip to its factory address before power-down
    fn remap_reset(&self, _io: ChipIo<'_>, _factory_addr: u8) -> Result<()> {
        Ok(())
    }
}

/// Serial link hooks. `link` is always a valid index for the descriptor.
pub trait SerialLinkOps: Send + Sync {
    /// Program link type and PHY rates, then switch the link on
    fn enable(&self, _io: ChipIo<'_>, _link: usize, _config: &LinkConfig) -> Result<()> {
        Ok(())
    }

    fn disable(&self, _io: ChipIo<'_>, _link: usize) -> Result<()> {
        Ok(())
    }

    /// One-shot link reset
    fn reset(&self, _io: ChipIo<'_>, _link: usize) -> Result<()> {
        Ok(())
    }

    /// Remote command-channel passthrough for this link
    fn set_remote_control(&self, _io: ChipIo<'_>, _link: usize, _enabled: bool) -> Result<()> {
        Ok(())
    }

    fn is_locked(&self, _io: ChipIo<'_>, _link: usize) -> Result<bool> {
        Ok(true)
    }

    /// Chip-specific lock timeout, overriding the fabric default
    fn lock_timeout(&self) -> Option<Duration> {
        None
    }

    /// Make the link's remote devices reachable for ordinary traffic
    fn select(&self, _io: ChipIo<'_>, _link: usize) -> Result<()> {
        Ok(())
    }

    fn deselect(&self, _io: ChipIo<'_>, _link: usize) -> Result<()> {
        Ok(())
    }

    /// Force a single physical link live on the command channel
    fn isolate(&self, _io: ChipIo<'_>, _link: usize) -> Result<()> {
        Ok(())
    }

    fn deisolate(&self, _io: ChipIo<'_>, _link: usize) -> Result<()> {
        Ok(())
    }
}

pub trait VideoPipeOps: Send + Sync {
    /// Program source, maps and bpp overrides, then enable the pipe
    fn enable(&self, _io: ChipIo<'_>, _pipe: usize, _config: &PipeConfig) -> Result<()> {
        Ok(())
    }

    fn disable(&self, _io: ChipIo<'_>, _pipe: usize) -> Result<()> {
        Ok(())
    }
}

pub trait CsiLinkOps: Send + Sync {
    /// Program lanes, DPLL frequency and deskew, then power the PHY up
    fn enable(&self, _io: ChipIo<'_>, _csi: usize, _config: &CsiConfig) -> Result<()> {
        Ok(())
    }

    fn disable(&self, _io: ChipIo<'_>, _csi: usize) -> Result<()> {
        Ok(())
    }
}

pub trait LineFaultOps: Send + Sync {
    fn enable(&self, _io: ChipIo<'_>, _line: usize) -> Result<()> {
        Ok(())
    }

    fn disable(&self, _io: ChipIo<'_>, _line: usize) -> Result<()> {
        Ok(())
    }

    fn status(&self, _io: ChipIo<'_>, _line: usize) -> Result<LineFaultStatus> {
        Ok(LineFaultStatus::Unknown)
    }
}

/// Per sub-bus address translation table
pub trait TranslationOps: Send + Sync {
    fn add(&self, _io: ChipIo<'_>, _sub_bus: usize, _slot: usize, _virt: u8, _phys: u8) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _io: ChipIo<'_>, _sub_bus: usize, _slot: usize) -> Result<()> {
        Ok(())
    }
}

/// A chip model with its capability set
pub trait SerdesChip: Send + Sync {
    fn descriptor(&self) -> &ChipDescriptor;

    fn common(&self) -> Option<&dyn CommonOps> {
        None
    }

    fn serial_link(&self) -> Option<&dyn SerialLinkOps> {
        None
    }

    fn video_pipe(&self) -> Option<&dyn VideoPipeOps> {
        None
    }

    fn csi_link(&self) -> Option<&dyn CsiLinkOps> {
        None
    }

    fn line_fault(&self) -> Option<&dyn LineFaultOps> {
        None
    }

    fn translation(&self) -> Option<&dyn TranslationOps> {
        None
    }
}
