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

use anyhow::{Context, Result};
use clap::Parser;

use gm_protocol::PushPayload;
use gpu_mmio_hwmon::cli::{Cli, Commands};
use gpu_mmio_hwmon::client::DaemonClient;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut client = DaemonClient::connect(&cli.socket)
        .with_context(|| format!("is gpu-mmio-hwmond running on {}?", cli.socket.display()))?;

    match cli.command {
        Commands::Ping => println!("{}", client.ping()?),
        Commands::Status => {
            let status = client.status()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else if status.loaded {
                println!("device:  {}", status.pci_address.unwrap_or_default());
                println!("profile: {}", status.profile.unwrap_or_default());
                println!("hwmon:   {}", status.hwmon.unwrap_or_default());
            } else {
                println!("no device bound");
            }
        }
        Commands::Chips => {
            let chips = client.list_chips()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&chips)?);
            } else {
                for c in chips {
                    println!("{:<8} {:<16} {}", c.id, c.name, c.parent);
                }
            }
        }
        Commands::Sensors { chip } => {
            let attrs = client.list_attributes(&chip)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&attrs)?);
            } else {
                for a in attrs {
                    let shown = match (a.value, a.error) {
                        (Some(v), _) => v,
                        (None, Some(e)) => format!("({})", e),
                        (None, None) => "(write-only)".to_string(),
                    };
                    println!("{:<14} {:>4o}  {}", a.name, a.mode, shown);
                }
            }
        }
        Commands::Read { attr, chip } => println!("{}", client.read_attribute(&chip, &attr)?),
        Commands::Push { temp_c, power_mw, fan } => {
            let payload = PushPayload::from_vendor(temp_c, power_mw, fan);
            client.push(payload).context("push rejected")?;
            println!("pushed {}", payload);
        }
        Commands::PushRaw { core_temp_milli_c, power_milli_w, fan } => {
            let payload = PushPayload::new(core_temp_milli_c, power_milli_w, fan);
            client.push(payload).context("push rejected")?;
            println!("pushed {}", payload);
        }
    }

    Ok(())
}
