//! Register transport
//!
//! max9x chips use 16-bit register addresses and 8-bit values on a shared
//! multi-drop command bus. Transfers are addressed by 7-bit device address.

use std::sync::Arc;

use crate::constants::regs;
use crate::error::Result;

/// Addressable, byte-oriented register transport
pub trait RegisterBus: Send + Sync {
    /// Read `buf.len()` consecutive registers starting at `reg`
    fn read(&self, addr: u8, reg: u16, buf: &mut [u8]) -> Result<()>;

    /// Write `data` to consecutive registers starting at `reg`
    fn write(&self, addr: u8, reg: u16, data: &[u8]) -> Result<()>;
}

impl<T: RegisterBus + ?Sized> RegisterBus for Arc<T> {
    fn read(&self, addr: u8, reg: u16, buf: &mut [u8]) -> Result<()> {
        (**self).read(addr, reg, buf)
    }

    fn write(&self, addr: u8, reg: u16, data: &[u8]) -> Result<()> {
        (**self).write(addr, reg, data)
    }
}

/// Register access bound to one device address
#[derive(Clone, Copy)]
pub struct ChipIo<'a> {
    bus: &'a dyn RegisterBus,
    addr: u8,
}

impl<'a> ChipIo<'a> {
    pub fn new(bus: &'a dyn RegisterBus, addr: u8) -> Self {
        Self { bus, addr }
    }

    pub fn addr(&self) -> u8 {
        self.addr
    }

    /// Same bus, different device
    pub fn at(&self, addr: u8) -> ChipIo<'a> {
        Self { bus: self.bus, addr }
    }

    pub fn bus(&self) -> &'a dyn RegisterBus {
        self.bus
    }

    pub fn read_u8(&self, reg: u16) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.bus.read(self.addr, reg, &mut buf)?;
        Ok(buf[0])
    }

    pub fn write_u8(&self, reg: u16, value: u8) -> Result<()> {
        self.bus.write(self.addr, reg, &[value])
    }

    /// Read-modify-write of the bits selected by `mask`
    pub fn update_bits(&self, reg: u16, mask: u8, value: u8) -> Result<()> {
        let current = self.read_u8(reg)?;
        let next = (current & !mask) | (value & mask);
        if next != current {
            self.write_u8(reg, next)?;
        }
        Ok(())
    }

    /// Write a register sequence in order, stopping at the first failure
    pub fn write_seq(&self, seq: &[(u16, u8)]) -> Result<()> {
        for &(reg, value) in seq {
            self.write_u8(reg, value)?;
        }
        Ok(())
    }

    /// True when a device acknowledges a read of its id register
    pub fn answers(&self) -> bool {
        self.read_u8(regs::DEV_ID).is_ok()
    }
}
