/*
 * This file is part of Crownwatch.
 *
 * Copyright (C) 2025 Crownwatch contributors
 *
 * Crownwatch is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Crownwatch is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Crownwatch. If not, see <https://www.gnu.org/licenses/>.
 */

//! Command Line Interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "crownwatch")]
#[command(author = "Crownwatch contributors")]
#[command(version)]
#[command(about = "Crownwatch - Neurosity Crown signal monitor")]
#[command(long_about = "Crownwatch - Neurosity Crown signal monitor

Connects to the headset through an isolated worker process, verifies that
it streams real biosignals rather than defaults or stuck values, then
relays live calm, focus and brainwave metrics.

EXAMPLES:
    crownwatch check                   Connect, print the verdict, disconnect
    crownwatch monitor                 Stream metrics until Ctrl-C
    crownwatch monitor --record        Stream and record to a session file
    crownwatch monitor --record focus-run
    crownwatch --backend stuck check   Run against the stuck simulated device
    crownwatch config                  Show effective settings as JSON

ENVIRONMENT VARIABLES:
    NEUROSITY_EMAIL        Account email
    NEUROSITY_PASSWORD     Account password
    NEUROSITY_DEVICE_ID    Headset device id
    CROWNWATCH_LOG=debug   Log level for host and worker

FILES:
    ~/.config/crownwatch/settings.json    Application settings
    ~/.local/share/crownwatch/sessions/   Recorded sessions
    .env                                  Credentials (optional)")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Worker executable (default: crownwatch-worker next to this binary)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub worker: Option<PathBuf>,

    /// Device backend: biological, mirrored, stuck, offline
    #[arg(short, long, global = true, value_name = "NAME")]
    pub backend: Option<String>,

    /// Load credentials from this .env file
    #[arg(short, long, global = true, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Connect, start monitoring and relay metrics until Ctrl-C
    Monitor {
        /// Record data events; optionally name the session file
        #[arg(long, value_name = "NAME")]
        record: Option<Option<String>>,

        /// Also print raw events
        #[arg(short, long)]
        verbose: bool,
    },

    /// Connect, print the detection verdict and device status, disconnect
    Check,

    /// Print the effective settings as JSON
    Config,
}
