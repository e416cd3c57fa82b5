//! Line-fault monitors

use tracing::warn;

use super::Fabric;
use crate::data::LineFaultStatus;
use crate::error::Result;

impl Fabric {
    pub fn enable_line_fault(&self, line: usize) -> Result<()> {
        Self::check_index("line fault", line, self.descriptor().line_faults)?;
        let mut el = self.elements.lock();
        if el.line_faults[line].enabled {
            return Ok(());
        }
        if let Some(ops) = self.chip.line_fault() {
            ops.enable(self.io(), line)?;
        }
        el.line_faults[line].enabled = true;
        Ok(())
    }

    pub fn disable_line_fault(&self, line: usize) -> Result<()> {
        Self::check_index("line fault", line, self.descriptor().line_faults)?;
        let mut el = self.elements.lock();
        if !el.line_faults[line].enabled {
            return Ok(());
        }
        el.line_faults[line].enabled = false;
        el.line_faults[line].status = LineFaultStatus::Unknown;
        if let Some(ops) = self.chip.line_fault() {
            ops.disable(self.io(), line)?;
        }
        Ok(())
    }

    /// Read and cache the status of monitor `line`
    pub fn line_fault_status(&self, line: usize) -> Result<LineFaultStatus> {
        Self::check_index("line fault", line, self.descriptor().line_faults)?;
        let mut el = self.elements.lock();
        if !el.line_faults[line].enabled {
            return Ok(LineFaultStatus::Unknown);
        }
        let status = match self.chip.line_fault() {
            Some(ops) => ops.status(self.io(), line)?,
            None => LineFaultStatus::Unknown,
        };
        if status.is_fault() && status != el.line_faults[line].status {
            warn!(line, ?status, "Line fault");
        }
        el.line_faults[line].status = status;
        Ok(status)
    }

    /// Turn off every enabled monitor. Failures are logged.
    pub(crate) fn disable_line_faults(&self) {
        let enabled: Vec<usize> = {
            let el = self.elements.lock();
            el.line_faults.iter().filter(|lf| lf.enabled).map(|lf| lf.index).collect()
        };
        for line in enabled {
            if let Err(e) = self.disable_line_fault(line) {
                warn!(line, error = %e, "Line-fault monitor disable failed");
            }
        }
    }
}
