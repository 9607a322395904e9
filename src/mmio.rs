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

//! Register window mapping and the bound device handle.

use std::fmt;
use std::fs::File;
use std::io;
use std::sync::Arc;

use gm_error::{GpuHwmonError, Result};
use memmap2::{Mmap, MmapOptions};
use tracing::{debug, info};

use crate::constants::pci::REGISTER_BAR;
use crate::pci::{LocatedDevice, PciDevice};
use crate::profile::{Profile, RegisterSensor};

/// A mapped register space readable in 32-bit words
pub trait RegisterWindow: fmt::Debug + Send + Sync {
    fn len(&self) -> usize;

    /// 32-bit load at `offset`; offsets come from compiled-in profiles only
    fn read32(&self, offset: u32) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read-only memory mapping of a sysfs `resourceN` file
pub struct MmioWindow {
    map: Mmap,
}

impl MmioWindow {
    pub fn map(file: &File, len: usize) -> io::Result<Self> {
        // SAFETY: the mapping is read-only and never handed out as a slice;
        // every access goes through `read32` as a volatile load.
        let map = unsafe { MmapOptions::new().len(len).map(file)? };
        Ok(Self { map })
    }
}

impl fmt::Debug for MmioWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmioWindow").field("len", &self.map.len()).finish()
    }
}

impl RegisterWindow for MmioWindow {
    fn len(&self) -> usize {
        self.map.len()
    }

    fn read32(&self, offset: u32) -> u32 {
        let offset = offset as usize;
        assert!(
            offset % 4 == 0 && offset + 4 <= self.map.len(),
            "register offset {:#x} outside window",
            offset
        );
        // SAFETY: bounds and alignment checked above; the base is page aligned.
        let word = unsafe { std::ptr::read_volatile(self.map.as_ptr().add(offset) as *const u32) };
        u32::from_le(word)
    }
}

/// The one bound GPU: profile, mapped window and a device reference.
///
/// Fields drop in declaration order, so the window is unmapped before the
/// device reference is released.
#[derive(Debug)]
pub struct DeviceHandle {
    regs: Box<dyn RegisterWindow>,
    device: Arc<dyn PciDevice>,
    profile: &'static Profile,
}

impl DeviceHandle {
    /// Map the located device's primary window.
    ///
    /// On failure `located` is dropped here, releasing its device reference
    /// before the error reaches the caller.
    pub fn bind(located: LocatedDevice) -> Result<Self> {
        let LocatedDevice { device, profile } = located;

        let len = device.resource_len(REGISTER_BAR);
        if len == 0 {
            return Err(GpuHwmonError::NoMappableRegion {
                device: device.address().to_string(),
                bar: REGISTER_BAR,
            });
        }

        let needed = profile.required_window_len();
        if len < needed {
            return Err(GpuHwmonError::Mapping {
                device: device.address().to_string(),
                bar: REGISTER_BAR,
                reason: format!("window is {:#x} bytes, profile needs {:#x}", len, needed),
            });
        }

        let regs = device.map_resource(REGISTER_BAR)?;
        if (regs.len() as u64) < needed {
            return Err(GpuHwmonError::Mapping {
                device: device.address().to_string(),
                bar: REGISTER_BAR,
                reason: format!("mapped {:#x} bytes, profile needs {:#x}", regs.len(), needed),
            });
        }

        info!(
            "Mapped BAR{} of {} ({:#x} bytes)",
            REGISTER_BAR,
            device.address(),
            regs.len()
        );
        Ok(Self { regs, device, profile })
    }

    pub fn profile(&self) -> &'static Profile {
        self.profile
    }

    pub fn address(&self) -> &str {
        self.device.address()
    }

    /// Read and decode one register temperature in millidegrees
    pub fn read_milli_celsius(&self, sensor: &RegisterSensor) -> i64 {
        let word = self.regs.read32(sensor.offset);
        sensor.decode.milli_celsius(word)
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        debug!("Unmapping BAR{} and releasing {}", REGISTER_BAR, self.device.address());
    }
}
