//! CSI link reference counting
//!
//! A CSI link is shared by every pipe and route that sends data through it.
//! The first reference programs and powers the PHY, the last one releases
//! it, and every other transition only moves the counter.

use tracing::{debug, warn};

use super::Fabric;
use crate::error::{Result, SerdesError};

impl Fabric {
    /// Take a reference on CSI link `csi`
    pub fn enable_csi_link(&self, csi: usize) -> Result<()> {
        Self::check_index("CSI link", csi, self.descriptor().csi_links)?;
        let mut el = self.elements.lock();
        let link = &mut el.csi_links[csi];

        if link.usecount == 0 {
            let config = link
                .config
                .clone()
                .ok_or_else(|| SerdesError::config(format!("CSI link {} is not configured", csi)))?;
            if let Some(ops) = self.chip.csi_link() {
                ops.enable(self.io(), csi, &config)?;
            }
            link.enabled = true;
            debug!(csi, lanes = config.lanes, freq_mhz = config.freq_mhz, "CSI link up");
        }
        link.usecount += 1;
        Ok(())
    }

    /// Drop a reference on CSI link `csi`. Releasing an unreferenced link
    /// is an error and leaves the counter at zero.
    pub fn disable_csi_link(&self, csi: usize) -> Result<()> {
        Self::check_index("CSI link", csi, self.descriptor().csi_links)?;
        let mut el = self.elements.lock();
        let link = &mut el.csi_links[csi];

        if link.usecount == 0 {
            return Err(SerdesError::config(format!("CSI link {} released without a reference", csi)));
        }
        link.usecount -= 1;
        if link.usecount > 0 {
            return Ok(());
        }

        link.enabled = false;
        if let Some(ops) = self.chip.csi_link() {
            ops.disable(self.io(), csi)?;
        }
        debug!(csi, "CSI link down");
        Ok(())
    }

    pub fn csi_usecount(&self, csi: usize) -> Result<u32> {
        Self::check_index("CSI link", csi, self.descriptor().csi_links)?;
        Ok(self.elements.lock().csi_links[csi].usecount)
    }

    /// Re-program every CSI link that still holds references after the chip
    /// lost its register state
    pub(crate) fn restore_csi_links(&self) -> Result<()> {
        let Some(ops) = self.chip.csi_link() else {
            return Ok(());
        };
        let el = self.elements.lock();
        for link in el.csi_links.iter().filter(|l| l.usecount > 0) {
            if let Some(config) = &link.config {
                if let Err(e) = ops.enable(self.io(), link.index, config) {
                    warn!(csi = link.index, error = %e, "CSI link restore failed");
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
