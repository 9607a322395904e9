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

//! gpu-mmio-hwmon - fused GPU hardware-health sensors
//!
//! Junction and VRAM temperatures are decoded from the GPU's memory-mapped
//! registers; core temperature, board power and fan speed arrive as snapshots
//! pushed by a helper. Both are exposed through one hwmon-style chip.

pub mod constants;
pub mod profile;
pub mod pci;
pub mod mmio;
pub mod snapshot;
pub mod hwmon;
pub mod sensors;
pub mod lifecycle;
pub mod service;
pub mod config;
pub mod logger;
pub mod client;
pub mod cli;

pub use gm_error::{ErrorKind, GpuHwmonError, Result};
pub use hwmon::{HwmonRegistry, SensorHost};
pub use lifecycle::GpuHwmonDriver;
pub use pci::SysfsPciBus;
pub use service::HwmonService;

#[cfg(test)]
pub mod test_utils;
