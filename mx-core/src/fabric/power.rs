//! Power sequencing
//!
//! `enable` and `disable` are idempotent and touch the supplies exactly once
//! per transition. Suspend remembers which links were up so resume can
//! bring the same set back.

use tracing::{debug, info, warn};

use super::translator::GenericRemote;
use super::{remap, Fabric, IsolationGuard, LinkIsolation};
use crate::chip::{probe_addresses, CommonOps};
use crate::error::{Result, SerdesError};

#[derive(Debug)]
pub(crate) struct PowerState {
    enabled: bool,
    rails_up: bool,
    /// Address the chip answers at while powered
    current_addr: Option<u8>,
    /// Links that were enabled when suspended
    suspended_links: Vec<usize>,
    /// Failure of the address reset at suspend, fatal to the next resume
    remap_reset_failure: Option<String>,
}

impl PowerState {
    pub fn new(rails_up: bool) -> Self {
        Self {
            enabled: false,
            rails_up,
            current_addr: None,
            suspended_links: Vec::new(),
            remap_reset_failure: None,
        }
    }
}

impl Fabric {
    pub fn is_powered(&self) -> bool {
        self.power.lock().enabled
    }

    fn common_ops(&self) -> &dyn CommonOps {
        self.chip.common().unwrap_or(&GenericRemote)
    }

    fn raise_rails(&self, rails_up: &mut bool) -> Result<()> {
        if *rails_up {
            return Ok(());
        }
        if let Some(reg) = &self.supplies.regulator {
            reg.enable()?;
        }
        *rails_up = true;
        Ok(())
    }

    fn drop_rails(&self, rails_up: &mut bool) -> Result<()> {
        if let Some(reset) = &self.supplies.reset {
            reset.set(true);
        }
        if !*rails_up {
            return Ok(());
        }
        *rails_up = false;
        match &self.supplies.regulator {
            Some(reg) => reg.disable(),
            None => Ok(()),
        }
    }

    /// Run `f` with the upstream link isolated, when there is one
    fn with_upstream<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let Some((parent, link)) = &self.upstream else {
            return f();
        };
        let guard = IsolationGuard::acquire(&**parent, *link)?;
        let result = f();
        let released = guard.release();
        let value = result?;
        released?;
        Ok(value)
    }

    fn reset_chip(&self) -> Result<()> {
        let addr = self.config.addr;
        let factory = self.config.factory_addr();

        if let Some(reset) = &self.supplies.reset {
            reset.set(true);
            self.clock.sleep(self.timing.reset_pulse());
            reset.set(false);
            return Ok(());
        }

        let common = self.common_ops();
        match common.soft_reset(self.io()) {
            Ok(()) => Ok(()),
            Err(e) if factory != addr => {
                debug!(addr, factory, error = %e, "Soft reset failed, retrying at factory address");
                self.with_upstream(|| common.soft_reset(self.io().at(factory)))
            }
            Err(e) => Err(e),
        }
    }

    fn power_up_steps(&self) -> Result<()> {
        self.reset_chip()?;
        self.clock.sleep(self.timing.reset_settle());

        let factory = self.config.factory_addr();
        let common = self.common_ops();
        if factory != self.config.addr {
            let upstream = self.upstream.as_ref().map(|(parent, link)| (&**parent as &dyn LinkIsolation, *link));
            remap(
                upstream,
                self.io().at(factory),
                self.config.addr,
                common,
                self.timing.remap_settle(),
                &*self.clock,
            )?;
        }
        common.enable(self.io())
    }

    /// Power the chip up: rails, reset, settle, address, chip enable.
    /// Any failure drops the rails again.
    pub fn enable(&self) -> Result<()> {
        let mut st = self.power.lock();
        if st.enabled {
            return Ok(());
        }
        self.raise_rails(&mut st.rails_up)?;

        if let Err(e) = self.power_up_steps() {
            warn!(fabric = %self.config.name, error = %e, "Power-up failed, unwinding");
            if let Err(de) = self.drop_rails(&mut st.rails_up) {
                warn!(error = %de, "Regulator disable failed during unwind");
            }
            return Err(e);
        }

        st.enabled = true;
        st.current_addr = Some(self.config.addr);
        info!(fabric = %self.config.name, "Powered up");
        Ok(())
    }

    /// Power the chip down. The regulator is released exactly once per
    /// power-up.
    pub fn disable(&self) -> Result<()> {
        let mut st = self.power.lock();
        if !st.enabled {
            return Ok(());
        }

        self.disable_line_faults();

        let addr = st.current_addr.unwrap_or(self.config.addr);
        let hook = self.common_ops().disable(self.io().at(addr));
        if let Err(e) = &hook {
            warn!(fabric = %self.config.name, error = %e, "Chip disable hook failed");
        }

        st.enabled = false;
        st.current_addr = None;
        let rails = self.drop_rails(&mut st.rails_up);
        info!(fabric = %self.config.name, "Powered down");
        hook.and(rails)
    }

    /// Program aliases and line-fault monitors from the configuration
    pub(crate) fn configure(&self) -> Result<()> {
        for &line in &self.config.line_faults {
            self.enable_line_fault(line)?;
        }
        for alias in &self.config.aliases {
            self.add_alias(alias.sub_bus, alias.virt_addr, alias.phys_addr)?;
        }
        Ok(())
    }

    /// Prepare for system sleep: aliases off, links down, chip back to its
    /// factory address, power off
    pub fn suspend(&self) -> Result<()> {
        info!(fabric = %self.config.name, "Suspending");
        if let Err(e) = self.disable_aliases() {
            warn!(error = %e, "Alias disable failed at suspend");
        }

        let enabled = self.enabled_links();
        for &link in &enabled {
            if let Err(e) = self.disable_serial_link(link) {
                warn!(link, error = %e, "Link disable failed at suspend");
            }
        }
        self.forget_remaps();

        let factory = self.config.factory_addr();
        let reset = self.common_ops().remap_reset(self.io(), factory);
        {
            let mut st = self.power.lock();
            st.suspended_links = enabled;
            match reset {
                Ok(()) => {
                    if st.enabled {
                        st.current_addr = Some(factory);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Address reset failed at suspend");
                    st.remap_reset_failure = Some(e.to_string());
                }
            }
        }

        self.disable()
    }

    /// Re-identify the chip after sleep, at its own or its factory address
    fn identify_after_sleep(&self) -> Result<()> {
        let addr = self.config.addr;
        let factory = self.config.factory_addr();
        let candidates = if factory == addr { vec![addr] } else { vec![addr, factory] };
        let probe = || {
            probe_addresses(
                self.io(),
                &candidates,
                self.timing.resume_probe_attempts,
                self.timing.resume_probe_interval(),
                &*self.clock,
            )
        };
        let (_, device_id) = if factory == addr { probe()? } else { self.with_upstream(probe)? };

        if device_id != self.identity().device_id {
            return Err(SerdesError::UnknownDevice { addr, device_id });
        }
        Ok(())
    }

    /// Come back from [`Fabric::suspend`]: re-identify, power up, then bring
    /// back the links that were up and the aliases.
    ///
    /// A failed address reset at suspend fails every resume until the
    /// fabric is attached again. Any other failure before power-up leaves
    /// the rails down and the suspended link set in place for a retry.
    pub fn resume(&self) -> Result<()> {
        info!(fabric = %self.config.name, "Resuming");
        {
            let mut st = self.power.lock();
            if let Some(reason) = st.remap_reset_failure.as_ref() {
                return Err(SerdesError::config(format!("address reset failed at suspend: {}", reason)));
            }
            self.raise_rails(&mut st.rails_up)?;
        }

        if let Err(e) = self.identify_after_sleep() {
            warn!(fabric = %self.config.name, error = %e, "Chip not back after sleep");
            let mut st = self.power.lock();
            if !st.enabled {
                if let Err(de) = self.drop_rails(&mut st.rails_up) {
                    warn!(error = %de, "Regulator disable failed during unwind");
                }
            }
            return Err(e);
        }

        self.enable()?;
        let links = std::mem::take(&mut self.power.lock().suspended_links);
        self.restore_csi_links()?;

        for link in links {
            if let Err(e) = self.bring_up_link(link) {
                warn!(link, error = %e, "Link not restored at resume");
            }
        }
        for &line in &self.config.line_faults {
            if let Err(e) = self.enable_line_fault(line) {
                warn!(line, error = %e, "Line-fault monitor restore failed");
            }
        }
        if let Err(e) = self.restore_aliases() {
            warn!(error = %e, "Alias restore failed at resume");
        }
        info!(fabric = %self.config.name, links = ?self.enabled_links(), "Resumed");
        Ok(())
    }
}
