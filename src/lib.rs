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

//! max9x - Board bring-up tool for GMSL serializer/deserializer fabrics
//!
//! This library wraps the link fabric in `mx-core` with board files, a
//! JSON event log and the `max9xctl` subcommands.

pub mod commands;
pub mod config;
pub mod logger;

#[cfg(test)]
pub mod test_utils;
