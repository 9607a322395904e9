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

//! Paths, identities and names shared by the core, the daemon and the CLI.

/// System paths
pub mod paths {
    /// sysfs directory holding one entry per PCI function
    pub const PCI_DEVICES: &str = "/sys/bus/pci/devices";

    /// Configuration directory
    pub const CONFIG_DIR: &str = "/etc/gpu-mmio-hwmon";

    /// Configuration file inside `CONFIG_DIR`
    pub const CONFIG_FILE: &str = "config.json";

    /// Environment override for the configuration file
    pub const CONFIG_ENV: &str = "GPU_MMIO_HWMON_CONFIG";

    /// Daemon socket
    pub const SOCKET: &str = "/run/gpu-mmio-hwmon.sock";

    /// Environment filter for the tracing subscriber
    pub const LOG_ENV: &str = "GPU_MMIO_HWMON_LOG";
}

/// PCI identities
pub mod pci {
    /// NVIDIA vendor id
    pub const NVIDIA_VENDOR_ID: u16 = 0x10de;

    /// Primary address window
    pub const REGISTER_BAR: u8 = 0;
}

/// Names the host framework and the helper agree on
pub mod names {
    /// hwmon chip name; the helper finds the push attribute by it
    pub const CHIP: &str = "nvidia_mmio";

    /// Write-only snapshot push attribute
    pub const PUSH_ATTR: &str = "nvml";

    /// Log target used for lifecycle messages
    pub const DRIVER: &str = "nvidia_mmio_hwmon";
}

/// sysfs-style permission bits
pub mod mode {
    pub const READ_ONLY: u16 = 0o444;
    pub const WRITE_ONLY: u16 = 0o200;
    pub const HIDDEN: u16 = 0;
}
