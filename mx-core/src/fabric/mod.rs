//! Link fabric
//!
//! A [`Fabric`] drives one serializer or deserializer: its serial links,
//! video pipes, CSI links and line-fault monitors, the isolation protocol
//! that makes remote devices individually reachable, and power sequencing.
//!
//! # Locking
//! - The link selection state (isolated and selected link) has its own mutex
//!   and condvar. Waiters release it while waiting.
//! - Element bookkeeping is guarded by a second mutex that is never held
//!   while waiting on the selection state.
//! - Power state and the alias table each have their own mutex.

mod csi;
mod isolation;
mod line_fault;
mod link;
mod mux;
mod pipe;
mod power;
mod translator;

pub use isolation::{IsolationGuard, LinkIsolation};
pub use mux::LinkChannel;
pub use translator::{remap, Alias, AliasTable};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::chip::{probe_addresses, resolve, ChipDescriptor, ChipIdentity, ChipRegistry, SerdesChip};
use crate::data::{
    validate_bus_addr, validate_fabric_config, CsiLink, CsiSnapshot, FabricConfig, FabricSnapshot,
    LineFault, LinkSnapshot, LinkState, SerialLink, TimingConfig, VideoPipe,
};
use crate::error::{Result, SerdesError};
use crate::hw::{ChipIo, Clock, RegisterBus, Regulator, ResetLine, SystemClock};

use isolation::SelectionState;
use power::PowerState;

/// Runtime state of every element, indexed like the chip descriptor
#[derive(Debug)]
pub(crate) struct Elements {
    pub links: Vec<SerialLink>,
    pub pipes: Vec<VideoPipe>,
    pub csi_links: Vec<CsiLink>,
    pub line_faults: Vec<LineFault>,
}

impl Elements {
    fn new(desc: &ChipDescriptor, config: &FabricConfig) -> Self {
        Self {
            links: (0..desc.serial_links)
                .map(|i| SerialLink::new(i, config.links.get(i).cloned()))
                .collect(),
            pipes: (0..desc.video_pipes)
                .map(|i| VideoPipe::new(i, config.pipes.get(i).cloned()))
                .collect(),
            csi_links: (0..desc.csi_links)
                .map(|i| CsiLink::new(i, config.csi_links.get(i).cloned()))
                .collect(),
            line_faults: (0..desc.line_faults).map(LineFault::new).collect(),
        }
    }
}

/// Power collaborators
#[derive(Default)]
struct Supplies {
    regulator: Option<Arc<dyn Regulator>>,
    reset: Option<Arc<dyn ResetLine>>,
    /// Per-link rails, by name
    link_rails: HashMap<String, Arc<dyn Regulator>>,
    /// Links currently holding each rail
    rail_users: Mutex<HashMap<String, usize>>,
}

impl Supplies {
    fn link_rail(&self, name: &str) -> Result<&Arc<dyn Regulator>> {
        self.link_rails
            .get(name)
            .ok_or_else(|| SerdesError::config(format!("no regulator named {}", name)))
    }

    /// Take a reference on rail `name`, enabling it for the first user
    fn acquire_rail(&self, name: &str) -> Result<()> {
        let rail = self.link_rail(name)?;
        let mut users = self.rail_users.lock();
        let count = users.entry(name.to_string()).or_insert(0);
        if *count == 0 {
            rail.enable()?;
        }
        *count += 1;
        Ok(())
    }

    /// Drop a reference on rail `name`, disabling it with the last user
    fn release_rail(&self, name: &str) -> Result<()> {
        let rail = self.link_rail(name)?;
        let mut users = self.rail_users.lock();
        match users.get_mut(name) {
            Some(count) if *count > 1 => {
                *count -= 1;
                debug!(rail = name, users = *count, "Rail still in use");
                Ok(())
            }
            Some(count) if *count == 1 => {
                *count = 0;
                rail.disable()
            }
            _ => Ok(()),
        }
    }
}

/// One attached serializer or deserializer
pub struct Fabric {
    config: FabricConfig,
    timing: TimingConfig,
    chip: Arc<dyn SerdesChip>,
    identity: Mutex<ChipIdentity>,
    bus: Arc<dyn RegisterBus>,
    clock: Arc<dyn Clock>,
    supplies: Supplies,
    /// Parent link this fabric sits behind, when it is a remote device itself
    upstream: Option<(Arc<dyn LinkIsolation>, usize)>,
    selection: SelectionState,
    elements: Mutex<Elements>,
    power: Mutex<PowerState>,
    aliases: Mutex<AliasTable>,
}

impl std::fmt::Debug for Fabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fabric")
            .field("name", &self.config.name)
            .field("chip", &self.chip.descriptor().name)
            .field("addr", &self.config.addr)
            .finish()
    }
}

impl Fabric {
    pub fn builder(config: FabricConfig, bus: Arc<dyn RegisterBus>) -> FabricBuilder {
        FabricBuilder::new(config, bus)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn descriptor(&self) -> &ChipDescriptor {
        self.chip.descriptor()
    }

    pub fn identity(&self) -> ChipIdentity {
        *self.identity.lock()
    }

    pub fn chip(&self) -> &Arc<dyn SerdesChip> {
        &self.chip
    }

    /// The shared command bus
    pub fn bus(&self) -> &Arc<dyn RegisterBus> {
        &self.bus
    }

    pub(crate) fn io(&self) -> ChipIo<'_> {
        ChipIo::new(&*self.bus, self.config.addr)
    }

    pub(crate) fn check_index(kind: &'static str, index: usize, count: usize) -> Result<()> {
        if index >= count {
            return Err(SerdesError::invalid_index(kind, index, count));
        }
        Ok(())
    }

    pub(crate) fn check_link(&self, link: usize) -> Result<()> {
        Self::check_index("serial link", link, self.descriptor().serial_links)
    }

    /// Point-in-time view of every element
    pub fn snapshot(&self) -> FabricSnapshot {
        let identity = self.identity();
        let powered = self.is_powered();
        let aliases = self.aliases.lock().entries();
        let el = self.elements.lock();

        FabricSnapshot {
            name: self.config.name.clone(),
            chip: identity.name.to_string(),
            device_id: identity.device_id,
            revision: identity.revision,
            addr: self.config.addr,
            powered,
            links: el
                .links
                .iter()
                .map(|l| LinkSnapshot {
                    index: l.index,
                    state: l.state,
                    enabled: l.enabled,
                    locked: l.locked,
                    detected: l.detected,
                    failed: l.failed,
                    remote_addr: l.remote.as_ref().map(|r| r.current_addr()),
                })
                .collect(),
            pipes_enabled: el.pipes.iter().filter(|p| p.enabled).map(|p| p.index).collect(),
            csi_links: el
                .csi_links
                .iter()
                .map(|c| CsiSnapshot {
                    index: c.index,
                    enabled: c.enabled,
                    usecount: c.usecount,
                })
                .collect(),
            line_faults: el.line_faults.iter().filter(|lf| lf.enabled).map(|lf| (lf.index, lf.status)).collect(),
            aliases,
        }
    }

    /// Take every link down and power the chip off
    pub fn detach(&self) -> Result<()> {
        info!(fabric = %self.config.name, "Detaching");
        let links: Vec<usize> = {
            let el = self.elements.lock();
            el.links
                .iter()
                .filter(|l| l.state != LinkState::Disabled)
                .map(|l| l.index)
                .collect()
        };
        for link in links {
            if let Err(e) = self.disable_serial_link(link) {
                warn!(link, error = %e, "Link disable failed during detach");
            }
        }
        self.disable()
    }
}

impl LinkIsolation for Fabric {
    fn isolate(&self, link: usize) -> Result<()> {
        self.isolate_link(link)
    }

    fn deisolate(&self, link: usize) -> Result<()> {
        self.deisolate_link(link)
    }
}

/// Collects collaborators and attaches a [`Fabric`]
pub struct FabricBuilder {
    config: FabricConfig,
    bus: Arc<dyn RegisterBus>,
    registry: ChipRegistry,
    clock: Arc<dyn Clock>,
    supplies: Supplies,
    upstream: Option<(Arc<dyn LinkIsolation>, usize)>,
}

impl FabricBuilder {
    pub fn new(config: FabricConfig, bus: Arc<dyn RegisterBus>) -> Self {
        Self {
            config,
            bus,
            registry: ChipRegistry::default(),
            clock: Arc::new(SystemClock),
            supplies: Supplies::default(),
            upstream: None,
        }
    }

    pub fn registry(mut self, registry: ChipRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Main supply of the chip
    pub fn regulator(mut self, regulator: Arc<dyn Regulator>) -> Self {
        self.supplies.regulator = Some(regulator);
        self
    }

    pub fn reset_gpio(mut self, line: Arc<dyn ResetLine>) -> Self {
        self.supplies.reset = Some(line);
        self
    }

    /// Rail referenced by a link's `power_rail`
    pub fn link_regulator(mut self, name: &str, regulator: Arc<dyn Regulator>) -> Self {
        self.supplies.link_rails.insert(name.to_string(), regulator);
        self
    }

    /// Parent fabric and link this chip is reached through
    pub fn upstream(mut self, parent: Arc<dyn LinkIsolation>, link: usize) -> Self {
        self.upstream = Some((parent, link));
        self
    }

    /// Identify the chip, validate the configuration against it, power it
    /// up and bring up every link marked `auto_enable`.
    ///
    /// Configuration, identification and power failures are fatal. A link
    /// that fails its bring-up ladder is left marked failed and does not
    /// fail the attach.
    pub fn attach(self) -> Result<Arc<Fabric>> {
        let Self {
            config,
            bus,
            registry,
            clock,
            supplies,
            upstream,
        } = self;

        validate_bus_addr("fabric", config.addr)?;
        for link in &config.links {
            if let Some(rail) = &link.power_rail {
                if !supplies.link_rails.contains_key(rail) {
                    return Err(SerdesError::config(format!("no regulator named {}", rail)));
                }
            }
        }

        let timing = config.timing.clone();
        if let Some(reg) = &supplies.regulator {
            reg.enable()?;
        }

        let factory = config.factory_addr();
        let probed = (|| {
            let candidates = if factory == config.addr { vec![config.addr] } else { vec![config.addr, factory] };
            let io = ChipIo::new(&*bus, config.addr);
            // The factory address is shared with siblings until remapped
            let guard = match (&upstream, factory != config.addr) {
                (Some((parent, link)), true) => Some(IsolationGuard::acquire(&**parent, *link)?),
                _ => None,
            };
            let found = probe_addresses(io, &candidates, timing.probe_attempts, timing.probe_interval(), &*clock)
                .and_then(|(addr, id)| resolve(io.at(addr), &registry, id));
            if let Some(guard) = guard {
                guard.release()?;
            }
            found
        })();

        let (chip, identity) = match probed.and_then(|(chip, identity)| {
            validate_fabric_config(&config, chip.descriptor())?;
            Ok((chip, identity))
        }) {
            Ok(found) => found,
            Err(e) => {
                if let Some(reg) = &supplies.regulator {
                    if let Err(re) = reg.disable() {
                        warn!(error = %re, "Failed to drop rails after attach failure");
                    }
                }
                return Err(e);
            }
        };

        let desc = *chip.descriptor();
        let fabric = Fabric {
            elements: Mutex::new(Elements::new(&desc, &config)),
            aliases: Mutex::new(AliasTable::new(desc.translation_buses)),
            power: Mutex::new(PowerState::new(supplies.regulator.is_some())),
            selection: SelectionState::default(),
            identity: Mutex::new(identity),
            timing,
            config,
            chip,
            bus,
            clock,
            supplies,
            upstream,
        };

        info!(fabric = %fabric.config.name, chip = desc.name, addr = fabric.config.addr, "Attaching");
        fabric.enable()?;

        if let Err(e) = fabric.configure() {
            if let Err(de) = fabric.disable() {
                warn!(error = %de, "Failed to power down after attach failure");
            }
            return Err(e);
        }

        let auto: Vec<usize> = fabric
            .config
            .links
            .iter()
            .enumerate()
            .filter(|(_, l)| l.auto_enable)
            .map(|(i, _)| i)
            .collect();
        for link in auto {
            if let Err(e) = fabric.bring_up_link(link) {
                warn!(link, error = %e, "Link left down after attach");
            }
        }

        Ok(Arc::new(fabric))
    }
}
