//! Chip identification
//!
//! Probing reads the device id register with a bounded number of retries,
//! since a chip that was just powered or reset may not acknowledge for a
//! while. The id is then resolved against a [`ChipRegistry`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{max9295, max9296, max96717, max96724, ChipIdentity, SerdesChip};
use crate::constants::regs;
use crate::error::{Result, SerdesError};
use crate::hw::{ChipIo, Clock};

/// Known chip models, looked up by device id
#[derive(Clone)]
pub struct ChipRegistry {
    chips: Vec<Arc<dyn SerdesChip>>,
}

impl ChipRegistry {
    /// Registry without any chip
    pub fn empty() -> Self {
        Self { chips: Vec::new() }
    }

    /// Add a chip model. A later registration shadows an earlier one with
    /// the same device id.
    pub fn register(&mut self, chip: Arc<dyn SerdesChip>) -> &mut Self {
        self.chips.insert(0, chip);
        self
    }

    pub fn with(mut self, chip: Arc<dyn SerdesChip>) -> Self {
        self.register(chip);
        self
    }

    pub fn lookup(&self, device_id: u8) -> Option<Arc<dyn SerdesChip>> {
        self.chips
            .iter()
            .find(|c| c.descriptor().device_id == device_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.chips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chips.is_empty()
    }
}

impl Default for ChipRegistry {
    fn default() -> Self {
        Self::empty()
            .with(Arc::new(max9295::Max9295))
            .with(Arc::new(max96717::Max96717))
            .with(Arc::new(max9296::Max9296))
            .with(Arc::new(max96724::Max96724))
    }
}

impl fmt::Debug for ChipRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.chips.iter().map(|c| c.descriptor().name))
            .finish()
    }
}

/// Read the device id, retrying up to `attempts` times `interval` apart
pub fn probe_device_id(io: ChipIo<'_>, attempts: u32, interval: Duration, clock: &dyn Clock) -> Result<u8> {
    probe_addresses(io, &[io.addr()], attempts, interval, clock).map(|(_, id)| id)
}

/// Like [`probe_device_id`], trying each of `addrs` in order on every
/// attempt. Returns the address that answered along with the id.
pub fn probe_addresses(
    io: ChipIo<'_>,
    addrs: &[u8],
    attempts: u32,
    interval: Duration,
    clock: &dyn Clock,
) -> Result<(u8, u8)> {
    let attempts = attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        for &addr in addrs {
            match io.at(addr).read_u8(regs::DEV_ID) {
                Ok(id) => {
                    debug!(addr, attempt, device_id = id, "Device id read");
                    return Ok((addr, id));
                }
                Err(e) => last_err = Some(e),
            }
        }
        if attempt < attempts {
            clock.sleep(interval);
        }
    }

    warn!(addr = io.addr(), attempts, "No device id after retries");
    Err(SerdesError::NotFound(format!(
        "no device answering at {:02x?} after {} attempts: {}",
        addrs,
        attempts,
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// Resolve an already read device id and fetch the revision
pub fn resolve(io: ChipIo<'_>, registry: &ChipRegistry, device_id: u8) -> Result<(Arc<dyn SerdesChip>, ChipIdentity)> {
    let chip = registry.lookup(device_id).ok_or(SerdesError::UnknownDevice {
        addr: io.addr(),
        device_id,
    })?;

    let desc = chip.descriptor();
    let revision = io.read_u8(desc.rev_reg)? & regs::DEV_REV_MASK;
    let identity = ChipIdentity {
        name: desc.name,
        device_id,
        revision,
    };

    info!(addr = io.addr(), chip = desc.name, revision, "Identified chip");
    Ok((chip, identity))
}

/// Probe and resolve the chip at `io`
pub fn identify(
    io: ChipIo<'_>,
    registry: &ChipRegistry,
    attempts: u32,
    interval: Duration,
    clock: &dyn Clock,
) -> Result<(Arc<dyn SerdesChip>, ChipIdentity)> {
    let device_id = probe_device_id(io, attempts, interval, clock)?;
    resolve(io, registry, device_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::RecordingClock;
    use crate::sim::{SimBus, SimDevice};

    #[test]
    fn test_default_registry_knows_all_variants() {
        let registry = ChipRegistry::default();
        assert_eq!(registry.len(), 4);
        for id in [max9295::DEVICE_ID, max9296::DEVICE_ID, max96717::DEVICE_ID, max96724::DEVICE_ID] {
            assert!(registry.lookup(id).is_some(), "missing {:#x}", id);
        }
        assert!(registry.lookup(0x00).is_none());
    }

    #[test]
    fn test_identify_reads_revision() {
        let bus = SimBus::new();
        bus.add_device(0x27, SimDevice::new(max96724::DEVICE_ID).with_register(regs::DEV_REV, 0x13));
        let clock = RecordingClock::new();

        let (chip, id) = identify(ChipIo::new(&bus, 0x27), &ChipRegistry::default(), 3, Duration::from_millis(20), &clock).unwrap();
        assert_eq!(chip.descriptor().name, "MAX96724");
        assert_eq!(id.revision, 0x3);
        assert!(clock.take().is_empty());
    }

    #[test]
    fn test_probe_retries_until_ready() {
        let bus = SimBus::new();
        bus.add_device(0x48, SimDevice::new(max9296::DEVICE_ID).unavailable_for(4));
        let clock = RecordingClock::new();

        let id = probe_device_id(ChipIo::new(&bus, 0x48), 50, Duration::from_millis(20), &clock).unwrap();
        assert_eq!(id, max9296::DEVICE_ID);
        assert_eq!(clock.take().len(), 4);
    }

    #[test]
    fn test_probe_gives_up_with_not_found() {
        let bus = SimBus::new();
        let clock = RecordingClock::new();

        let err = probe_device_id(ChipIo::new(&bus, 0x48), 50, Duration::from_millis(20), &clock).unwrap_err();
        assert!(matches!(err, SerdesError::NotFound(_)));
        // No sleep after the final attempt
        assert_eq!(clock.take().len(), 49);
    }

    #[test]
    fn test_probe_addresses_falls_back() {
        let bus = SimBus::new();
        bus.add_device(0x40, SimDevice::new(max9295::DEVICE_ID));
        let clock = RecordingClock::new();

        let (addr, id) = probe_addresses(ChipIo::new(&bus, 0x42), &[0x42, 0x40], 5, Duration::from_millis(20), &clock).unwrap();
        assert_eq!((addr, id), (0x40, max9295::DEVICE_ID));
        assert!(clock.take().is_empty());
    }

    #[test]
    fn test_unknown_id_is_config_error() {
        let bus = SimBus::new();
        bus.add_device(0x48, SimDevice::new(0x5A));
        let clock = RecordingClock::new();

        let err = identify(ChipIo::new(&bus, 0x48), &ChipRegistry::default(), 1, Duration::ZERO, &clock).err().unwrap();
        assert!(err.is_config());
    }
}
