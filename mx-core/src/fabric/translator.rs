//! Address translation
//!
//! Remote devices of the same model ship with the same factory address.
//! Each one is moved to a unique virtual address while its link is the only
//! live one. Serializers additionally carry small alias tables that proxy
//! downstream devices under another address.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use super::{Fabric, IsolationGuard, LinkIsolation};
use crate::chip::CommonOps;
use crate::constants::{limits, regs};
use crate::error::{Result, SerdesError};
use crate::hw::{ChipIo, Clock};

/// Remote device of unknown model, remapped through the default hook
pub(crate) struct GenericRemote;

impl CommonOps for GenericRemote {}

/// Move the device answering at `io` to `virt`.
///
/// Succeeds without touching the bus when something already answers at
/// `virt`. With `isolation`, the whole sequence runs with that link
/// isolated and the link is deisolated on every path.
pub fn remap(
    isolation: Option<(&dyn LinkIsolation, usize)>,
    io: ChipIo<'_>,
    virt: u8,
    hook: &dyn CommonOps,
    settle: Duration,
    clock: &dyn Clock,
) -> Result<()> {
    if io.addr() == virt {
        return Ok(());
    }

    let guard = match isolation {
        Some((owner, link)) => Some(IsolationGuard::acquire(owner, link)?),
        None => None,
    };
    let result = remap_isolated(io, virt, hook, settle, clock);
    let released = guard.map_or(Ok(()), |g| g.release());
    result?;
    released
}

fn remap_isolated(io: ChipIo<'_>, virt: u8, hook: &dyn CommonOps, settle: Duration, clock: &dyn Clock) -> Result<()> {
    let target = io.at(virt);
    if target.answers() {
        debug!(phys = io.addr(), virt, "Already at virtual address");
        return Ok(());
    }
    if !io.answers() {
        return Err(SerdesError::NotPresent { addr: io.addr() });
    }

    hook.remap_addr(io, virt)?;
    clock.sleep(settle);

    if !target.answers() {
        return Err(SerdesError::io(virt, regs::DEV_ID, "no answer after address change"));
    }
    info!(phys = io.addr(), virt, "Remapped device");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Alias {
    pub virt_addr: u8,
    pub phys_addr: u8,
}

/// Fixed-size alias slots per translation sub-bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasTable {
    buses: Vec<[Option<Alias>; limits::ALIAS_SLOTS_PER_BUS]>,
}

impl AliasTable {
    pub fn new(buses: usize) -> Self {
        Self {
            buses: vec![[None; limits::ALIAS_SLOTS_PER_BUS]; buses],
        }
    }

    pub fn buses(&self) -> usize {
        self.buses.len()
    }

    /// Slot holding `virt`, else the first empty slot
    pub fn slot_for(&self, sub_bus: usize, virt: u8) -> Option<usize> {
        let slots = self.buses.get(sub_bus)?;
        slots
            .iter()
            .position(|s| s.map_or(false, |a| a.virt_addr == virt))
            .or_else(|| slots.iter().position(Option::is_none))
    }

    pub fn find(&self, sub_bus: usize, virt: u8) -> Option<usize> {
        self.buses
            .get(sub_bus)?
            .iter()
            .position(|s| s.map_or(false, |a| a.virt_addr == virt))
    }

    pub fn get(&self, sub_bus: usize, slot: usize) -> Option<Alias> {
        self.buses.get(sub_bus).and_then(|s| s.get(slot).copied().flatten())
    }

    fn set(&mut self, sub_bus: usize, slot: usize, alias: Option<Alias>) {
        if let Some(slots) = self.buses.get_mut(sub_bus) {
            slots[slot] = alias;
        }
    }

    /// `(sub_bus, virt, phys)` for every stored alias
    pub fn entries(&self) -> Vec<(usize, u8, u8)> {
        self.buses
            .iter()
            .enumerate()
            .flat_map(|(bus, slots)| slots.iter().flatten().map(move |a| (bus, a.virt_addr, a.phys_addr)))
            .collect()
    }

    fn occupied(&self) -> Vec<(usize, usize, Alias)> {
        self.buses
            .iter()
            .enumerate()
            .flat_map(|(bus, slots)| {
                slots
                    .iter()
                    .enumerate()
                    .filter_map(move |(slot, a)| a.map(|a| (bus, slot, a)))
            })
            .collect()
    }
}

impl Fabric {
    /// Proxy `phys` on translation sub-bus `sub_bus` under `virt`
    pub fn add_alias(&self, sub_bus: usize, virt: u8, phys: u8) -> Result<()> {
        let mut table = self.aliases.lock();
        Self::check_index("translation bus", sub_bus, table.buses())?;
        let slot = table.slot_for(sub_bus, virt).ok_or_else(|| {
            SerdesError::config(format!("translation bus {} has no free alias slot for {:#04x}", sub_bus, virt))
        })?;

        if let Some(ops) = self.chip.translation() {
            ops.add(self.io(), sub_bus, slot, virt, phys)?;
        }
        table.set(sub_bus, slot, Some(Alias { virt_addr: virt, phys_addr: phys }));
        debug!(sub_bus, slot, virt, phys, "Alias added");
        Ok(())
    }

    pub fn remove_alias(&self, sub_bus: usize, virt: u8) -> Result<()> {
        let mut table = self.aliases.lock();
        Self::check_index("translation bus", sub_bus, table.buses())?;
        let slot = table.find(sub_bus, virt).ok_or(SerdesError::NotPresent { addr: virt })?;

        if let Some(ops) = self.chip.translation() {
            ops.remove(self.io(), sub_bus, slot)?;
        }
        table.set(sub_bus, slot, None);
        Ok(())
    }

    /// Clear every alias in hardware, keeping the table
    pub(crate) fn disable_aliases(&self) -> Result<()> {
        let table = self.aliases.lock();
        if let Some(ops) = self.chip.translation() {
            for (bus, slot, _) in table.occupied() {
                ops.remove(self.io(), bus, slot)?;
            }
        }
        Ok(())
    }

    /// Program every stored alias into hardware
    pub(crate) fn restore_aliases(&self) -> Result<()> {
        let table = self.aliases.lock();
        if let Some(ops) = self.chip.translation() {
            for (bus, slot, alias) in table.occupied() {
                ops.add(self.io(), bus, slot, alias.virt_addr, alias.phys_addr)?;
            }
        }
        Ok(())
    }

    /// Move the remote device of `link` to its virtual address, once
    pub(crate) fn remap_remote(&self, link: usize) -> Result<()> {
        let remote = {
            let el = self.elements.lock();
            match &el.links[link].remote {
                Some(r) if !r.remapped => r.config.clone(),
                _ => return Ok(()),
            }
        };

        remap(
            Some((self as &dyn LinkIsolation, link)),
            ChipIo::new(&**self.bus(), remote.phys_addr),
            remote.virt_addr,
            &GenericRemote,
            self.timing.remap_settle(),
            &*self.clock,
        )?;

        if let Some(expected) = remote.device_id {
            let found = ChipIo::new(&**self.bus(), remote.virt_addr).read_u8(regs::DEV_ID)?;
            if found != expected {
                return Err(SerdesError::UnknownDevice {
                    addr: remote.virt_addr,
                    device_id: found,
                });
            }
        }

        if let Some(r) = self.elements.lock().links[link].remote.as_mut() {
            r.remapped = true;
        }
        Ok(())
    }

    /// Forget completed remaps, so the next bring-up verifies them again
    pub(crate) fn forget_remaps(&self) {
        let mut el = self.elements.lock();
        for r in el.links.iter_mut().filter_map(|l| l.remote.as_mut()) {
            r.remapped = !r.config.needs_remap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::max9295;
    use crate::hw::RecordingClock;
    use crate::sim::{SimBus, SimDevice};

    #[test]
    fn test_remap_moves_device() {
        let bus = SimBus::new();
        bus.add_device(0x40, SimDevice::for_chip(max9295::DEVICE_ID));
        let clock = RecordingClock::new();

        remap(None, ChipIo::new(&bus, 0x40), 0x42, &GenericRemote, Duration::from_millis(100), &clock).unwrap();
        assert!(ChipIo::new(&bus, 0x42).answers());
        assert_eq!(clock.take(), vec![Duration::from_millis(100)]);
    }

    #[test]
    fn test_remap_is_idempotent() {
        let bus = SimBus::new();
        bus.add_device(0x40, SimDevice::for_chip(max9295::DEVICE_ID));
        let clock = RecordingClock::new();
        let io = ChipIo::new(&bus, 0x40);

        remap(None, io, 0x42, &GenericRemote, Duration::ZERO, &clock).unwrap();
        let writes = bus.write_count();
        remap(None, io, 0x42, &GenericRemote, Duration::ZERO, &clock).unwrap();
        assert_eq!(bus.write_count(), writes);
    }

    #[test]
    fn test_remap_absent_device() {
        let bus = SimBus::new();
        let clock = RecordingClock::new();
        let err = remap(None, ChipIo::new(&bus, 0x40), 0x42, &GenericRemote, Duration::ZERO, &clock).unwrap_err();
        assert!(err.is_not_present());
    }

    #[test]
    fn test_alias_slots() {
        let mut table = AliasTable::new(1);
        assert_eq!(table.slot_for(0, 0x50), Some(0));
        table.set(0, 0, Some(Alias { virt_addr: 0x50, phys_addr: 0x10 }));
        assert_eq!(table.slot_for(0, 0x51), Some(1));
        table.set(0, 1, Some(Alias { virt_addr: 0x51, phys_addr: 0x11 }));
        assert_eq!(table.slot_for(0, 0x52), None);
        // A matching entry is reused even when the table is full
        assert_eq!(table.slot_for(0, 0x51), Some(1));
        assert_eq!(table.entries(), vec![(0, 0x50, 0x10), (0, 0x51, 0x11)]);
        assert_eq!(table.slot_for(1, 0x50), None);
    }
}
