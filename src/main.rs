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

use std::process::ExitCode;

use anyhow::Result;
use tracing::error;

use max9x::commands::{cmd_bringup, cmd_cycle, cmd_example, cmd_validate};
use max9x::config::{board_path, load_board};
use max9x::logger;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_help() {
    println!("max9xctl {} - GMSL link fabric bring-up against the simulator", VERSION);
    println!();
    println!("USAGE:");
    println!("    max9xctl <COMMAND> [board.json]");
    println!();
    println!("COMMANDS:");
    println!("    validate    Parse and validate a board file");
    println!("    bringup     Attach the fabric and print its state as JSON");
    println!("    cycle       Attach, suspend, resume and compare the link set");
    println!("    example     Print an example board file");
    println!();
    println!("ENVIRONMENT:");
    println!("    MAX9X_CONFIG       Board file when none is given");
    println!("    MAX9X_LOG          Log filter (default: info)");
    println!("    MAX9X_EVENT_LOG    JSON event log (default: /tmp/max9x_events.json)");
}

fn run(command: &str, path_arg: Option<&str>) -> Result<()> {
    if command == "example" {
        println!("{}", cmd_example()?);
        return Ok(());
    }

    let path = board_path(path_arg);
    let board = load_board(&path)?;

    match command {
        "validate" => {
            cmd_validate(&board)?;
            println!("{}: ok", path.display());
        }
        "bringup" => {
            let report = cmd_bringup(&board)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "cycle" => {
            let report = cmd_cycle(&board)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.survived {
                anyhow::bail!("link set changed across suspend/resume");
            }
        }
        other => anyhow::bail!("unknown command '{}', see --help", other),
    }
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let log_level = std::env::var("MAX9X_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(&log_level)
        .init();

    let command = match args.get(1).map(String::as_str) {
        None | Some("-h") | Some("--help") => {
            print_help();
            return ExitCode::SUCCESS;
        }
        Some("-V") | Some("--version") => {
            println!("max9xctl {}", VERSION);
            return ExitCode::SUCCESS;
        }
        Some(command) => command,
    };

    logger::init_logging();
    logger::log_event("startup", serde_json::json!({ "args": args }));

    match run(command, args.get(2).map(String::as_str)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            logger::log_event("error", serde_json::json!({ "command": command, "error": format!("{:#}", e) }));
            ExitCode::FAILURE
        }
    }
}
