/*
 * This file is part of gpu-mmio-hwmon.
 *
 * Copyright (C) 2025 gpu-mmio-hwmon contributors
 *
 * gpu-mmio-hwmon is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * gpu-mmio-hwmon is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with gpu-mmio-hwmon. If not, see <https://www.gnu.org/licenses/>.
 */

//! Command line interface of the `gpu-mmio-hwmon` client.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::constants::{names, paths};

#[derive(Parser, Debug)]
#[command(name = "gpu-mmio-hwmon")]
#[command(version)]
#[command(about = "Read fused GPU sensors and push helper snapshots")]
#[command(long_about = "Read fused GPU sensors and push helper snapshots

Talks to gpu-mmio-hwmond over its unix socket. Junction and VRAM
temperatures come from GPU registers; core temperature, board power
and fan speed come from the last pushed snapshot.

EXAMPLES:
    gpu-mmio-hwmon sensors                  Show every sensor of nvidia_mmio
    gpu-mmio-hwmon read temp2_input         Junction temperature (milli-C)
    gpu-mmio-hwmon push 42 312000 --fan 47  Push core 42 C, 312 W, fan 47 %
    gpu-mmio-hwmon push-raw 42000 -1 -1     Push a raw snapshot line
    gpu-mmio-hwmon status                   Show the bound device")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Daemon socket path
    #[arg(short, long, default_value = paths::SOCKET)]
    pub socket: PathBuf,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that the daemon answers
    Ping,

    /// Show the bound device, profile and hwmon id
    Status,

    /// List registered chips
    Chips,

    /// Show every attribute of a chip with its current value
    Sensors {
        #[arg(default_value = names::CHIP)]
        chip: String,
    },

    /// Read one attribute, e.g. temp2_input
    Read {
        attr: String,
        #[arg(short, long, default_value = names::CHIP)]
        chip: String,
    },

    /// Push a snapshot in vendor units (C, mW, percent)
    Push {
        /// Core temperature in degrees C
        temp_c: u32,
        /// Board power in milliwatts
        power_mw: u32,
        /// Fan speed in percent; omitted means not available
        #[arg(long)]
        fan: Option<u32>,
    },

    /// Push a raw snapshot line: core milli-C, power milli-W, fan
    PushRaw {
        #[arg(allow_negative_numbers = true)]
        core_temp_milli_c: i64,
        #[arg(allow_negative_numbers = true)]
        power_milli_w: i64,
        #[arg(allow_negative_numbers = true)]
        fan: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_push() {
        let cli = Cli::try_parse_from(["gpu-mmio-hwmon", "push", "42", "312000", "--fan", "47"]).unwrap();
        match cli.command {
            Commands::Push { temp_c, power_mw, fan } => {
                assert_eq!((temp_c, power_mw, fan), (42, 312_000, Some(47)));
            }
            other => panic!("{:?}", other),
        }
        assert_eq!(cli.socket, PathBuf::from("/run/gpu-mmio-hwmon.sock"));
    }

    #[test]
    fn test_parse_push_raw_with_sentinels() {
        let cli = Cli::try_parse_from(["gpu-mmio-hwmon", "push-raw", "42000", "-1", "-1"]).unwrap();
        match cli.command {
            Commands::PushRaw { core_temp_milli_c, power_milli_w, fan } => {
                assert_eq!((core_temp_milli_c, power_milli_w, fan), (42_000, -1, -1));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_read_defaults_to_gpu_chip() {
        let cli = Cli::try_parse_from(["gpu-mmio-hwmon", "-s", "/tmp/x.sock", "read", "temp2_input"]).unwrap();
        assert_eq!(cli.socket, PathBuf::from("/tmp/x.sock"));
        match cli.command {
            Commands::Read { attr, chip } => {
                assert_eq!(attr, "temp2_input");
                assert_eq!(chip, "nvidia_mmio");
            }
            other => panic!("{:?}", other),
        }
    }
}
