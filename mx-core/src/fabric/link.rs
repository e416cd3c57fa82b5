//! Serial link lifecycle
//!
//! Enable runs the full bring-up of one link: PHY programming, lock,
//! remote address assignment, then the pipes the link feeds and the CSI
//! links those pipes need. A failed enable leaves the link partially up;
//! [`Fabric::disable_serial_link`] releases exactly what it acquired.
//! [`Fabric::bring_up_link`] wraps both in an exponential backoff ladder.

use tracing::{debug, error, info, warn};

use super::pipe::csi_dependencies;
use super::Fabric;
use crate::chip::SerialLinkOps;
use crate::data::{LinkConfig, LinkState};
use crate::error::{Result, SerdesError};

impl Fabric {
    /// Poll the lock status until locked or the chip's lock timeout passes
    fn wait_for_lock(&self, ops: &dyn SerialLinkOps, link: usize) -> Result<()> {
        let timeout = ops.lock_timeout().unwrap_or_else(|| self.timing.lock_timeout());
        let poll = self.timing.lock_poll();
        let polls = if poll.is_zero() {
            1
        } else {
            (timeout.as_micros() / poll.as_micros()).clamp(1, u32::MAX as u128) as u32
        };

        for n in 1..=polls {
            if ops.is_locked(self.io(), link)? {
                debug!(link, polls = n, "Link locked");
                return Ok(());
            }
            if n < polls {
                self.clock.sleep(poll);
            }
        }
        Err(SerdesError::timeout(format!("link {} not locked after {:?}", link, timeout)))
    }

    fn enable_link_steps(&self, link: usize, config: &LinkConfig) -> Result<()> {
        let io = self.io();
        let ops = self.chip.serial_link();

        if let Some(ops) = ops {
            ops.set_remote_control(io, link, false)?;
        }

        if let Some(rail) = &config.power_rail {
            self.supplies.acquire_rail(rail)?;
            self.elements.lock().links[link].regulator_enabled = true;
        }

        if let Some(ops) = ops {
            ops.enable(io, link, config)?;
            ops.reset(io, link)?;
            self.wait_for_lock(ops, link)?;
            ops.set_remote_control(io, link, true)?;
        }
        self.elements.lock().links[link].locked = true;

        self.remap_remote(link)?;
        {
            let mut el = self.elements.lock();
            let entry = &mut el.links[link];
            entry.detected = entry.remote.is_some();
        }

        for pipe in self.pipes_sourced_from(link) {
            self.enable_video_pipe(pipe)?;
            self.elements.lock().links[link].active_pipes.push(pipe);

            let deps = self.elements.lock().pipes[pipe]
                .config
                .as_ref()
                .map(csi_dependencies)
                .unwrap_or_default();
            for csi in deps {
                self.enable_csi_link(csi)?;
                self.elements.lock().links[link].csi_refs.push(csi);
            }
        }
        Ok(())
    }

    /// Bring serial link `link` up once. On failure the link stays in
    /// `Enabling` with whatever it acquired, until disabled.
    pub fn enable_serial_link(&self, link: usize) -> Result<()> {
        self.check_link(link)?;
        let config = {
            let mut el = self.elements.lock();
            let entry = &mut el.links[link];
            match entry.state {
                LinkState::Enabled => return Ok(()),
                LinkState::Enabling | LinkState::Disabling => {
                    return Err(SerdesError::AlreadyInProgress { link })
                }
                LinkState::Disabled => {}
            }
            let config = entry
                .config
                .clone()
                .ok_or_else(|| SerdesError::config(format!("serial link {} is not configured", link)))?;
            entry.state = LinkState::Enabling;
            entry.failed = false;
            config
        };

        debug!(link, rate = config.rx_rate_mbps, "Enabling serial link");
        self.enable_link_steps(link, &config)?;

        let mut el = self.elements.lock();
        el.links[link].state = LinkState::Enabled;
        el.links[link].enabled = true;
        info!(link, "Serial link enabled");
        Ok(())
    }

    /// Take serial link `link` down, releasing the CSI references and pipes
    /// it holds. Teardown continues past failures; the first one is
    /// returned.
    pub fn disable_serial_link(&self, link: usize) -> Result<()> {
        self.check_link(link)?;
        let (csi_refs, pipes, rail) = {
            let mut el = self.elements.lock();
            let entry = &mut el.links[link];
            if entry.state == LinkState::Disabled {
                return Ok(());
            }
            entry.state = LinkState::Disabling;
            let rail = if entry.regulator_enabled {
                entry.power_rail().map(str::to_string)
            } else {
                None
            };
            (
                std::mem::take(&mut entry.csi_refs),
                std::mem::take(&mut entry.active_pipes),
                rail,
            )
        };

        let mut first_err: Option<SerdesError> = None;
        let mut keep = |result: Result<()>| {
            if let Err(e) = result {
                warn!(link, error = %e, "Link teardown step failed");
                first_err.get_or_insert(e);
            }
        };

        for csi in csi_refs.into_iter().rev() {
            keep(self.disable_csi_link(csi));
        }
        for pipe in pipes.into_iter().rev() {
            keep(self.disable_video_pipe(pipe));
        }
        if let Some(ops) = self.chip.serial_link() {
            keep(ops.disable(self.io(), link));
        }
        if let Some(rail) = rail {
            keep(self.supplies.release_rail(&rail));
        }

        let mut el = self.elements.lock();
        let entry = &mut el.links[link];
        entry.state = LinkState::Disabled;
        entry.enabled = false;
        entry.locked = false;
        entry.detected = false;
        entry.regulator_enabled = false;
        drop(el);

        info!(link, "Serial link disabled");
        first_err.map_or(Ok(()), Err)
    }

    /// Enable `link`, retrying with exponential backoff. When the next
    /// delay would exceed the cap the link is marked failed and the last
    /// error is returned. Other links are not affected.
    pub fn bring_up_link(&self, link: usize) -> Result<()> {
        let mut delay = self.timing.backoff_initial();
        let cap = self.timing.backoff_max();
        let mut attempt = 1u32;

        loop {
            let err = match self.enable_serial_link(link) {
                Ok(()) => return Ok(()),
                Err(e @ SerdesError::AlreadyInProgress { .. }) => return Err(e),
                // Retrying cannot fix a configuration problem
                Err(e) if e.is_config() => {
                    if let Err(de) = self.disable_serial_link(link) {
                        warn!(link, error = %de, "Unwind after failed bring-up incomplete");
                    }
                    return Err(e);
                }
                Err(e) => e,
            };

            warn!(link, attempt, error = %err, "Link bring-up failed");
            if let Err(e) = self.disable_serial_link(link) {
                warn!(link, error = %e, "Unwind after failed bring-up incomplete");
            }

            if delay.is_zero() || delay > cap {
                error!(link, attempts = attempt, "Giving up on link");
                self.elements.lock().links[link].failed = true;
                return Err(err);
            }
            self.clock.sleep(delay);
            delay *= 2;
            attempt += 1;
        }
    }

    pub fn link_state(&self, link: usize) -> Result<LinkState> {
        self.check_link(link)?;
        Ok(self.elements.lock().links[link].state)
    }

    /// Links currently enabled
    pub fn enabled_links(&self) -> Vec<usize> {
        let el = self.elements.lock();
        el.links.iter().filter(|l| l.enabled).map(|l| l.index).collect()
    }
}
