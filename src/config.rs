/*
 * This file is part of max9x.
 *
 * Copyright (C) 2025 max9x contributors
 *
 * max9x is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * max9x is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with max9x. If not, see <https://www.gnu.org/licenses/>.
 */

//! Board files
//!
//! A board file holds one fabric configuration and, optionally, the
//! simulated devices to run it against.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use mx_core::chip::max9295;
use mx_core::{
    validate_bus_addr, validate_fabric_config, ChipRegistry, CsiConfig, FabricConfig, LinkConfig,
    PipeConfig, PipeMap, PipeSource, RemoteDeviceConfig, RouteConfig, SerdesError, SimConfig,
};

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Failed to read board file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse board file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No simulated device answers at 0x{0:02x}")]
    NoChip(u8),

    #[error("Unknown device id 0x{0:02x} in simulator description")]
    UnknownChip(u8),

    #[error(transparent)]
    Invalid(#[from] SerdesError),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BoardConfig {
    pub fabric: FabricConfig,
    /// Simulated hardware, a single deserializer with cameras on every
    /// configured link when absent
    #[serde(default)]
    pub sim: Option<SimConfig>,
}

impl BoardConfig {
    /// Simulator description to run the fabric against
    pub fn sim_or_default(&self) -> SimConfig {
        match &self.sim {
            Some(sim) => sim.clone(),
            None => SimConfig::quad_deserializer(self.fabric.links.len()),
        }
    }

    /// Names of every link regulator the fabric refers to
    pub fn rails(&self) -> Vec<String> {
        let mut rails: Vec<String> = Vec::new();
        for rail in self.fabric.links.iter().filter_map(|l| l.power_rail.clone()) {
            if !rails.contains(&rail) {
                rails.push(rail);
            }
        }
        rails
    }
}

/// Board file location: explicit argument, then `MAX9X_CONFIG`, then the
/// XDG config directory
pub fn board_path(arg: Option<&str>) -> PathBuf {
    if let Some(path) = arg {
        return PathBuf::from(path);
    }
    if let Ok(path) = env::var("MAX9X_CONFIG") {
        return PathBuf::from(path);
    }
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        return Path::new(&xdg).join("max9x").join("board.json");
    }
    if let Ok(home) = env::var("HOME") {
        return Path::new(&home).join(".config").join("max9x").join("board.json");
    }
    PathBuf::from("/etc/max9x/board.json")
}

pub fn load_board(path: &Path) -> Result<BoardConfig, BoardError> {
    let data = std::fs::read_to_string(path).map_err(|source| BoardError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| BoardError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Check the fabric configuration against the chip the simulator places
/// at its address
pub fn validate_board(board: &BoardConfig) -> Result<(), BoardError> {
    let fabric = &board.fabric;
    validate_bus_addr("fabric", fabric.addr)?;

    let sim = board.sim_or_default();
    let factory = fabric.factory_addr();
    let device = sim
        .devices
        .iter()
        .find(|d| d.link.is_none() && (d.addr == fabric.addr || d.addr == factory))
        .ok_or(BoardError::NoChip(fabric.addr))?;

    let chip = ChipRegistry::default()
        .lookup(device.device_id)
        .ok_or(BoardError::UnknownChip(device.device_id))?;
    validate_fabric_config(fabric, chip.descriptor())?;
    Ok(())
}

/// Two-camera MAX96724 board, printed by `max9xctl example`
pub fn example_board() -> BoardConfig {
    let camera = |link: usize, virt_addr: u8| LinkConfig {
        remote: Some(RemoteDeviceConfig {
            name: format!("cam{}", link),
            phys_addr: 0x40,
            virt_addr,
            device_id: Some(max9295::DEVICE_ID),
        }),
        ..Default::default()
    };
    let pipe = |link: usize| PipeConfig {
        source: PipeSource::Link { link, pipe: 0 },
        maps: vec![PipeMap {
            src_vc: 0,
            src_dt: 0x2C,
            dst_vc: link as u8,
            dst_dt: 0x2C,
            dst_csi: 0,
        }],
        dbl_pixel_bpp: 0,
        soft_min_bpp: 0,
        soft_max_bpp: 0,
    };

    BoardConfig {
        fabric: FabricConfig {
            name: "des0".into(),
            addr: 0x27,
            links: vec![camera(0, 0x42), camera(1, 0x44)],
            pipes: vec![pipe(0), pipe(1)],
            csi_links: vec![CsiConfig {
                lanes: 4,
                bus_type: Default::default(),
                freq_mhz: 1500,
                deskew: Default::default(),
            }],
            line_faults: vec![0, 1],
            routes: vec![
                RouteConfig { sink_pad: 4, sink_stream: 0, source_pad: 0, source_stream: 0 },
                RouteConfig { sink_pad: 5, sink_stream: 0, source_pad: 0, source_stream: 1 },
            ],
            ..Default::default()
        },
        sim: Some(SimConfig::quad_deserializer(2)),
    }
}
