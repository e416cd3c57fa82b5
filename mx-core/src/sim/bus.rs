//! Simulated multi-drop command bus
//!
//! Devices are either on the host side of the bus or behind a serial link
//! of a deserializer. A remote device only answers while its link is live,
//! and a link is live while the corresponding bit of the deserializer's
//! link-enable register is set. Two devices answering the same address on
//! live links is recorded as a collision and fails the transfer. Every write
//! to the link-enable register also records the addresses it leaves shared.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

use crate::chip::{max9295, max9296, max96717, max96724};
use crate::constants::regs;
use crate::error::{Result, SerdesError};
use crate::hw::RegisterBus;

/// Register image of one simulated chip
#[derive(Debug, Clone)]
pub struct SimDevice {
    device_id: u8,
    regs: HashMap<u16, u8>,
    defaults: HashMap<u16, u8>,
    unavailable: u32,
    soft_reset: Option<(u16, u8)>,
    link_gate: Option<(u16, u8)>,
    failing: HashSet<u16>,
}

impl SimDevice {
    /// Bare device that only knows its id
    pub fn new(device_id: u8) -> Self {
        let mut defaults = HashMap::new();
        defaults.insert(regs::DEV_ID, device_id);
        Self {
            device_id,
            regs: defaults.clone(),
            defaults,
            unavailable: 0,
            soft_reset: None,
            link_gate: None,
            failing: HashSet::new(),
        }
    }

    /// Device preloaded with the reset state of a known chip: links
    /// enabled, lock bits set, soft reset wired up
    pub fn for_chip(device_id: u8) -> Self {
        let dev = Self::new(device_id);
        match device_id {
            max96724::DEVICE_ID => max96724::LOCK_REGS
                .iter()
                .fold(dev, |d, &reg| d.with_register(reg, max96724::LOCKED))
                .with_register(max96724::REG_LINK_EN, 0xFF)
                .with_soft_reset(max96724::REG_PWR1, max96724::RESET_ALL)
                .with_link_gate(max96724::REG_LINK_EN, max96724::LINK_EN_MASK),
            max9296::DEVICE_ID => max9296::LOCK_REGS
                .iter()
                .fold(dev, |d, &reg| d.with_register(reg, max9296::LOCKED))
                .with_register(max9296::REG_CTRL0, max9296::LINK_CFG_MASK)
                .with_register(max9296::REG_REG6, 0xC0)
                .with_soft_reset(max9296::REG_CTRL0, max9296::RESET_ALL)
                .with_link_gate(max9296::REG_CTRL0, max9296::LINK_CFG_MASK),
            max9295::DEVICE_ID | max96717::DEVICE_ID => dev
                .with_register(max9295::REG_CTRL3, max9295::LOCKED)
                .with_soft_reset(max9295::REG_CTRL0, max9295::RESET_ALL),
            _ => dev,
        }
    }

    /// Set a register in both the live image and the reset state
    pub fn with_register(mut self, reg: u16, value: u8) -> Self {
        self.regs.insert(reg, value);
        self.defaults.insert(reg, value);
        self
    }

    /// NAK the next `transfers` accesses
    pub fn unavailable_for(mut self, transfers: u32) -> Self {
        self.unavailable = transfers;
        self
    }

    /// Writing `mask` to `reg` resets the device to its factory state
    pub fn with_soft_reset(mut self, reg: u16, mask: u8) -> Self {
        self.soft_reset = Some((reg, mask));
        self
    }

    /// Bits `mask` of `reg` gate the serial links behind this device
    pub fn with_link_gate(mut self, reg: u16, mask: u8) -> Self {
        self.link_gate = Some((reg, mask));
        self
    }

    /// Writes to `reg` fail
    pub fn failing_write(mut self, reg: u16) -> Self {
        self.failing.insert(reg);
        self
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    fn reset(&mut self) {
        self.regs = self.defaults.clone();
    }
}

/// One collision: an address answered on more than one live path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collision {
    pub addr: u8,
    /// Links the colliding devices sit behind, `None` for host-side devices
    pub paths: Vec<Option<usize>>,
}

/// Logged transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BusOp {
    Read { addr: u8, reg: u16, len: usize },
    Write { addr: u8, reg: u16, data: Vec<u8> },
}

#[derive(Debug)]
struct Slot {
    link: Option<usize>,
    addr: u8,
    factory_addr: u8,
    device: SimDevice,
}

#[derive(Debug)]
struct SimState {
    slots: Vec<Slot>,
    /// Slot index of the deserializer gating the links
    gate: Option<usize>,
    powered: bool,
    log: Vec<BusOp>,
    writes: usize,
    collisions: Vec<Collision>,
}

impl SimState {
    fn live_links(&self) -> u32 {
        let Some(gate) = self.gate else {
            return u32::MAX;
        };
        let slot = &self.slots[gate];
        match slot.device.link_gate {
            Some((reg, mask)) => u32::from(slot.device.regs.get(&reg).copied().unwrap_or(0) & mask),
            None => u32::MAX,
        }
    }

    /// Record every address shared by more than one device on a live path
    fn record_live_collisions(&mut self) {
        let live = self.live_links();
        let mut by_addr: HashMap<u8, Vec<Option<usize>>> = HashMap::new();
        for slot in &self.slots {
            if slot.link.map_or(true, |l| live & (1 << l) != 0) {
                by_addr.entry(slot.addr).or_default().push(slot.link);
            }
        }
        let mut shared: Vec<Collision> = by_addr
            .into_iter()
            .filter(|(_, paths)| paths.len() > 1)
            .map(|(addr, paths)| Collision { addr, paths })
            .collect();
        shared.sort_by_key(|c| c.addr);
        for collision in shared {
            trace!(addr = collision.addr, paths = ?collision.paths, "sim live collision");
            self.collisions.push(collision);
        }
    }

    fn resolve(&mut self, addr: u8, reg: u16) -> Result<usize> {
        if !self.powered {
            return Err(SerdesError::io(addr, reg, "bus unpowered"));
        }
        let live = self.live_links();
        let hits: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.addr == addr && s.link.map_or(true, |l| live & (1 << l) != 0))
            .map(|(i, _)| i)
            .collect();

        match hits.as_slice() {
            [] => Err(SerdesError::io(addr, reg, "nak")),
            [index] => {
                let device = &mut self.slots[*index].device;
                if device.unavailable > 0 {
                    device.unavailable -= 1;
                    return Err(SerdesError::io(addr, reg, "nak"));
                }
                Ok(*index)
            }
            _ => {
                let paths = hits.iter().map(|&i| self.slots[i].link).collect();
                self.collisions.push(Collision { addr, paths });
                Err(SerdesError::io(addr, reg, "arbitration lost"))
            }
        }
    }
}

/// In-memory [`RegisterBus`]
#[derive(Debug)]
pub struct SimBus {
    state: Mutex<SimState>,
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                slots: Vec::new(),
                gate: None,
                powered: true,
                log: Vec::new(),
                writes: 0,
                collisions: Vec::new(),
            }),
        }
    }

    /// Place a device on the host side. The first device with a link gate
    /// becomes the deserializer the remote devices sit behind.
    pub fn add_device(&self, addr: u8, device: SimDevice) {
        let mut st = self.state.lock();
        if st.gate.is_none() && device.link_gate.is_some() {
            st.gate = Some(st.slots.len());
        }
        st.slots.push(Slot {
            link: None,
            addr,
            factory_addr: addr,
            device,
        });
    }

    /// Place a device behind serial link `link`
    pub fn attach_remote(&self, link: usize, addr: u8, device: SimDevice) {
        self.state.lock().slots.push(Slot {
            link: Some(link),
            addr,
            factory_addr: addr,
            device,
        });
    }

    /// Current address of the first device behind `link`
    pub fn remote_addr(&self, link: usize) -> Option<u8> {
        let st = self.state.lock();
        st.slots.iter().find(|s| s.link == Some(link)).map(|s| s.addr)
    }

    /// Peek a register without logging or gating
    pub fn register(&self, addr: u8, reg: u16) -> Option<u8> {
        let st = self.state.lock();
        st.slots
            .iter()
            .find(|s| s.addr == addr)
            .and_then(|s| s.device.regs.get(&reg).copied())
    }

    /// Poke a register without logging or gating
    pub fn set_register(&self, addr: u8, reg: u16, value: u8) {
        let mut st = self.state.lock();
        if let Some(slot) = st.slots.iter_mut().find(|s| s.addr == addr) {
            slot.device.regs.insert(reg, value);
        }
    }

    /// Make the device at `addr` NAK its next `transfers` accesses
    pub fn delay_ready(&self, addr: u8, transfers: u32) {
        let mut st = self.state.lock();
        for slot in st.slots.iter_mut().filter(|s| s.addr == addr) {
            slot.device.unavailable = transfers;
        }
    }

    /// Cut power: every device returns to its factory address and reset
    /// state and nothing answers until [`SimBus::power_on`]
    pub fn power_off(&self) {
        let mut st = self.state.lock();
        st.powered = false;
        for slot in st.slots.iter_mut() {
            slot.addr = slot.factory_addr;
            slot.device.reset();
        }
    }

    pub fn power_on(&self) {
        self.state.lock().powered = true;
    }

    pub fn is_powered(&self) -> bool {
        self.state.lock().powered
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    pub fn collisions(&self) -> Vec<Collision> {
        self.state.lock().collisions.clone()
    }

    /// Transfers so far, oldest first
    pub fn ops(&self) -> Vec<BusOp> {
        self.state.lock().log.clone()
    }

    /// Register writes addressed to `addr`, flattened to single bytes
    pub fn writes_to(&self, addr: u8) -> Vec<(u16, u8)> {
        self.state
            .lock()
            .log
            .iter()
            .filter_map(|op| match op {
                BusOp::Write { addr: a, reg, data } if *a == addr => Some(
                    data.iter()
                        .enumerate()
                        .map(|(i, v)| (reg + i as u16, *v))
                        .collect::<Vec<_>>(),
                ),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

impl RegisterBus for SimBus {
    fn read(&self, addr: u8, reg: u16, buf: &mut [u8]) -> Result<()> {
        let mut st = self.state.lock();
        st.log.push(BusOp::Read { addr, reg, len: buf.len() });
        let index = st.resolve(addr, reg)?;
        let device = &st.slots[index].device;
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = device.regs.get(&(reg + i as u16)).copied().unwrap_or(0);
        }
        trace!(addr, reg, len = buf.len(), "sim read");
        Ok(())
    }

    fn write(&self, addr: u8, reg: u16, data: &[u8]) -> Result<()> {
        let mut st = self.state.lock();
        st.log.push(BusOp::Write { addr, reg, data: data.to_vec() });
        let index = st.resolve(addr, reg)?;
        st.writes += 1;
        trace!(addr, reg, len = data.len(), "sim write");

        let gate_written = st.gate == Some(index)
            && st.slots[index]
                .device
                .link_gate
                .map_or(false, |(gate_reg, _)| (reg..reg + data.len() as u16).contains(&gate_reg));

        let slot = &mut st.slots[index];
        for (i, &value) in data.iter().enumerate() {
            let r = reg + i as u16;
            if slot.device.failing.contains(&r) {
                return Err(SerdesError::io(addr, r, "injected failure"));
            }
            if let Some((reset_reg, mask)) = slot.device.soft_reset {
                if r == reset_reg && value & mask != 0 {
                    slot.device.reset();
                    slot.addr = slot.factory_addr;
                    continue;
                }
            }
            slot.device.regs.insert(r, value);
            if r == regs::DEV_ADDR {
                slot.addr = value >> 1;
            }
        }
        if gate_written {
            st.record_live_collisions();
        }
        Ok(())
    }
}
