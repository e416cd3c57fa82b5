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

//! `max9xctl` subcommands
//!
//! Every command runs against the register-level simulator described in
//! the board file. Sleeps are recorded rather than taken, so a full
//! bring-up finishes instantly and reports the delay it would have cost.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use mx_core::{
    Fabric, FabricSnapshot, RecordingClock, RouteTable, SimBus, SimRegulator, StreamEndpoint,
};

use crate::config::{example_board, validate_board, BoardConfig};
use crate::logger::log_event;

/// Simulated board with a fabric attached to it
pub struct Bench {
    pub bus: Arc<SimBus>,
    pub clock: Arc<RecordingClock>,
    pub supply: Arc<SimRegulator>,
    pub fabric: Arc<Fabric>,
    pub routes: RouteTable,
}

impl Bench {
    /// Build the simulator from the board file and attach the fabric to it
    pub fn attach(board: &BoardConfig) -> Result<Self> {
        validate_board(board)?;

        let bus = Arc::new(board.sim_or_default().build());
        let clock = Arc::new(RecordingClock::new());
        let supply = Arc::new(SimRegulator::new("vdd").powering(bus.clone()));

        let mut builder = Fabric::builder(board.fabric.clone(), bus.clone())
            .clock(clock.clone())
            .regulator(supply.clone());
        for rail in board.rails() {
            builder = builder.link_regulator(&rail, Arc::new(SimRegulator::new(&rail)));
        }

        let fabric = builder
            .attach()
            .with_context(|| format!("Failed to attach fabric {}", board.fabric.name))?;
        let routes = RouteTable::new(fabric.clone()).context("Invalid route table")?;
        log_event("attach", json!({ "fabric": fabric.name(), "links": fabric.enabled_links() }));

        Ok(Self { bus, clock, supply, fabric, routes })
    }

    /// Enable every configured route from its CSI side
    pub fn start_streams(&self) -> Result<()> {
        for route in self.routes.routes() {
            let (pad, stream) = if self.fabric.descriptor().is_deserializer() {
                (route.source_pad, route.source_stream)
            } else {
                (route.sink_pad, route.sink_stream)
            };
            self.routes
                .enable_stream(pad, stream)
                .with_context(|| format!("Failed to start stream {} on pad {}", stream, pad))?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct BringupReport {
    pub snapshot: FabricSnapshot,
    pub simulated_delay_ms: u128,
    pub bus_writes: usize,
    pub collisions: usize,
}

#[derive(Debug, Serialize)]
pub struct CycleReport {
    pub links_before: Vec<usize>,
    pub links_after: Vec<usize>,
    pub streams_before: usize,
    pub streams_after: usize,
    pub survived: bool,
}

pub fn cmd_validate(board: &BoardConfig) -> Result<()> {
    validate_board(board)?;
    info!(fabric = %board.fabric.name, "Board file is valid");
    Ok(())
}

pub fn cmd_bringup(board: &BoardConfig) -> Result<BringupReport> {
    let bench = Bench::attach(board)?;
    bench.start_streams()?;

    let report = BringupReport {
        snapshot: bench.fabric.snapshot(),
        simulated_delay_ms: bench.clock.total().as_millis(),
        bus_writes: bench.bus.write_count(),
        collisions: bench.bus.collisions().len(),
    };
    if report.collisions > 0 {
        warn!(collisions = report.collisions, "Address collisions during bring-up");
    }
    log_event("bringup", serde_json::to_value(&report).unwrap_or_default());
    Ok(report)
}

pub fn cmd_cycle(board: &BoardConfig) -> Result<CycleReport> {
    let bench = Bench::attach(board)?;
    bench.start_streams()?;

    let links_before = bench.fabric.enabled_links();
    let streams_before = bench.routes.active_routes().len();

    bench.fabric.suspend().context("Suspend failed")?;
    log_event("suspend", json!({ "fabric": bench.fabric.name(), "powered": bench.bus.is_powered() }));
    bench.fabric.resume().context("Resume failed")?;

    let links_after = bench.fabric.enabled_links();
    let streams_after = bench.routes.active_routes().len();
    let report = CycleReport {
        survived: links_before == links_after && streams_before == streams_after,
        links_before,
        links_after,
        streams_before,
        streams_after,
    };
    log_event("resume", serde_json::to_value(&report).unwrap_or_default());
    Ok(report)
}

pub fn cmd_example() -> Result<String> {
    serde_json::to_string_pretty(&example_board()).context("Failed to serialize example board")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_board;
    use crate::test_utils::{board_with_rails, slow_board, write_board_file};
    use mx_core::LinkState;
    use std::time::Duration;

    #[test]
    fn test_bringup_example_board() {
        let report = cmd_bringup(&example_board()).unwrap();
        assert_eq!(report.snapshot.enabled_links(), vec![0, 1]);
        assert_eq!(report.collisions, 0);
        assert_eq!(report.snapshot.links[0].remote_addr, Some(0x42));
        assert_eq!(report.snapshot.links[1].remote_addr, Some(0x44));
        assert_eq!(report.snapshot.links[2].state, LinkState::Disabled);
        assert!(report.snapshot.powered);
    }

    #[test]
    fn test_cycle_example_board() {
        let report = cmd_cycle(&example_board()).unwrap();
        assert!(report.survived);
        assert_eq!(report.streams_after, 2);
    }

    #[test]
    fn test_supply_follows_fabric() {
        let bench = Bench::attach(&example_board()).unwrap();
        assert_eq!(bench.supply.enable_count(), 1);
        bench.fabric.detach().unwrap();
        assert_eq!(bench.supply.disable_count(), 1);
        assert!(!bench.bus.is_powered());
    }

    #[test]
    fn test_example_parses() {
        let json = cmd_example().unwrap();
        let board: BoardConfig = serde_json::from_str(&json).unwrap();
        cmd_validate(&board).unwrap();
    }

    #[test]
    fn test_bringup_with_link_rails() {
        let report = cmd_bringup(&board_with_rails()).unwrap();
        assert_eq!(report.snapshot.enabled_links(), vec![0, 1]);
    }

    #[test]
    fn test_attach_waits_for_slow_chip() {
        let bench = Bench::attach(&slow_board(3)).unwrap();
        let interval = Duration::from_millis(bench.fabric.config().timing.probe_interval_ms);
        let probe_sleeps = bench.clock.take().iter().filter(|d| **d == interval).count();
        assert!(probe_sleeps >= 3);
        assert_eq!(bench.fabric.enabled_links(), vec![0, 1]);
    }

    #[test]
    fn test_bringup_from_file() {
        let file = write_board_file(&example_board());
        let board = load_board(file.path()).unwrap();
        assert_eq!(cmd_bringup(&board).unwrap().collisions, 0);
    }
}
