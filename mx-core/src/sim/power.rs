//! Simulated supplies

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::SimBus;
use crate::error::{Result, SerdesError};
use crate::hw::{Regulator, ResetLine};

/// Regulator counting its transitions. When it powers a [`SimBus`],
/// disabling it cuts power to every simulated device.
#[derive(Debug)]
pub struct SimRegulator {
    name: String,
    bus: Option<Arc<SimBus>>,
    enables: AtomicUsize,
    disables: AtomicUsize,
    fail_enable: AtomicBool,
}

impl SimRegulator {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            bus: None,
            enables: AtomicUsize::new(0),
            disables: AtomicUsize::new(0),
            fail_enable: AtomicBool::new(false),
        }
    }

    pub fn powering(mut self, bus: Arc<SimBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enable_count(&self) -> usize {
        self.enables.load(Ordering::SeqCst)
    }

    pub fn disable_count(&self) -> usize {
        self.disables.load(Ordering::SeqCst)
    }

    /// Make subsequent enables fail
    pub fn fail_enables(&self, fail: bool) {
        self.fail_enable.store(fail, Ordering::SeqCst);
    }
}

impl Regulator for SimRegulator {
    fn enable(&self) -> Result<()> {
        if self.fail_enable.load(Ordering::SeqCst) {
            return Err(SerdesError::regulator(&self.name, "injected failure"));
        }
        self.enables.fetch_add(1, Ordering::SeqCst);
        if let Some(bus) = &self.bus {
            bus.power_on();
        }
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        self.disables.fetch_add(1, Ordering::SeqCst);
        if let Some(bus) = &self.bus {
            bus.power_off();
        }
        Ok(())
    }
}

/// Reset GPIO recording every level it is driven to
#[derive(Debug, Default)]
pub struct SimResetLine {
    levels: Mutex<Vec<bool>>,
}

impl SimResetLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<bool> {
        self.levels.lock().clone()
    }

    pub fn is_asserted(&self) -> bool {
        self.levels.lock().last().copied().unwrap_or(false)
    }
}

impl ResetLine for SimResetLine {
    fn set(&self, asserted: bool) {
        self.levels.lock().push(asserted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::ChipIo;
    use crate::sim::SimDevice;

    #[test]
    fn test_regulator_cuts_bus_power() {
        let bus = Arc::new(SimBus::new());
        bus.add_device(0x27, SimDevice::new(0xA2));
        let reg = SimRegulator::new("vdd").powering(bus.clone());

        reg.disable().unwrap();
        assert!(!ChipIo::new(&*bus, 0x27).answers());
        reg.enable().unwrap();
        assert!(ChipIo::new(&*bus, 0x27).answers());
        assert_eq!((reg.enable_count(), reg.disable_count()), (1, 1));
    }

    #[test]
    fn test_injected_enable_failure() {
        let reg = SimRegulator::new("vdd");
        reg.fail_enables(true);
        assert!(reg.enable().is_err());
        assert_eq!(reg.enable_count(), 0);
    }

    #[test]
    fn test_reset_line_history() {
        let line = SimResetLine::new();
        line.set(true);
        line.set(false);
        assert_eq!(line.history(), vec![true, false]);
        assert!(!line.is_asserted());
    }
}
