//! Video pipes

use tracing::debug;

use super::Fabric;
use crate::data::{PipeConfig, PipeSource};
use crate::error::{Result, SerdesError};

/// CSI links a pipe needs: its input port on a serializer, the targets of
/// its maps on a deserializer
pub(crate) fn csi_dependencies(config: &PipeConfig) -> Vec<usize> {
    match config.source {
        PipeSource::Csi { csi } => vec![csi],
        PipeSource::Link { .. } => config.csi_targets(),
    }
}

impl Fabric {
    /// Configured pipes fed by serial link `link`. A serializer has a
    /// single link that carries every pipe.
    pub fn pipes_sourced_from(&self, link: usize) -> Vec<usize> {
        let serializer = !self.descriptor().is_deserializer();
        self.config
            .pipes
            .iter()
            .enumerate()
            .filter(|(_, p)| match p.source {
                PipeSource::Link { link: l, .. } => l == link,
                PipeSource::Csi { .. } => serializer && link == 0,
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Program and enable pipe `pipe` from its configuration
    pub fn enable_video_pipe(&self, pipe: usize) -> Result<()> {
        Self::check_index("video pipe", pipe, self.descriptor().video_pipes)?;
        let mut el = self.elements.lock();
        let entry = &mut el.pipes[pipe];
        if entry.enabled {
            return Ok(());
        }
        let config = entry
            .config
            .as_ref()
            .ok_or_else(|| SerdesError::config(format!("video pipe {} is not configured", pipe)))?;

        if let Some(ops) = self.chip.video_pipe() {
            ops.enable(self.io(), pipe, config)?;
        }
        entry.enabled = true;
        debug!(pipe, maps = config.maps.len(), "Video pipe enabled");
        Ok(())
    }

    pub fn disable_video_pipe(&self, pipe: usize) -> Result<()> {
        Self::check_index("video pipe", pipe, self.descriptor().video_pipes)?;
        let mut el = self.elements.lock();
        let entry = &mut el.pipes[pipe];
        if !entry.enabled {
            return Ok(());
        }
        entry.enabled = false;
        if let Some(ops) = self.chip.video_pipe() {
            ops.disable(self.io(), pipe)?;
        }
        Ok(())
    }
}
