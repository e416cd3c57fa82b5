/*
 * Test utilities for max9x
 *
 * Board files and simulated hardware shared by the unit tests of the
 * command-line crate.
 */

use std::io::Write;

use mx_core::chip::{max9295, max96724};
use mx_core::sim::{SimConfig, SimDeviceConfig};
use tempfile::NamedTempFile;

use crate::config::{example_board, BoardConfig};

/// Writes `board` to a temporary JSON file
pub fn write_board_file(board: &BoardConfig) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp board file");
    let json = serde_json::to_string_pretty(board).expect("serialize board");
    file.write_all(json.as_bytes()).expect("write board file");
    file
}

/// Example board whose camera links draw from named rails
pub fn board_with_rails() -> BoardConfig {
    let mut board = example_board();
    for (i, link) in board.fabric.links.iter_mut().enumerate() {
        link.power_rail = Some(format!("vcam{}", i));
    }
    board
}

/// Example board whose deserializer needs `not_ready` transfers before it
/// first answers
pub fn slow_board(not_ready: u32) -> BoardConfig {
    let mut board = example_board();
    let mut devices = vec![SimDeviceConfig {
        addr: 0x27,
        device_id: max96724::DEVICE_ID,
        not_ready,
        ..Default::default()
    }];
    devices.extend((0..2).map(|link| SimDeviceConfig {
        addr: 0x40,
        device_id: max9295::DEVICE_ID,
        link: Some(link),
        ..Default::default()
    }));
    board.sim = Some(SimConfig { devices });
    board
}
