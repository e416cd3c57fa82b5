//! Per-link logical transports

use std::sync::Arc;

use super::Fabric;
use crate::error::Result;
use crate::hw::RegisterBus;

/// One serial link seen as its own register bus. Every transfer is
/// bracketed by select/deselect of the link.
#[derive(Debug, Clone)]
pub struct LinkChannel {
    fabric: Arc<Fabric>,
    link: usize,
}

impl LinkChannel {
    pub fn link(&self) -> usize {
        self.link
    }

    fn selected<T>(&self, transfer: impl FnOnce(&dyn RegisterBus) -> Result<T>) -> Result<T> {
        self.fabric.select_link(self.link)?;
        let result = transfer(&**self.fabric.bus());
        let deselect = self.fabric.deselect_link(self.link);
        let value = result?;
        deselect?;
        Ok(value)
    }
}

impl RegisterBus for LinkChannel {
    fn read(&self, addr: u8, reg: u16, buf: &mut [u8]) -> Result<()> {
        self.selected(|bus| bus.read(addr, reg, buf))
    }

    fn write(&self, addr: u8, reg: u16, data: &[u8]) -> Result<()> {
        self.selected(|bus| bus.write(addr, reg, data))
    }
}

impl Fabric {
    /// Logical transport for the devices behind `link`
    pub fn channel(self: &Arc<Self>, link: usize) -> Result<LinkChannel> {
        self.check_link(link)?;
        Ok(LinkChannel {
            fabric: Arc::clone(self),
            link,
        })
    }
}
