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

//! PCI enumeration and device location.
//!
//! Devices are shared as `Arc<dyn PciDevice>`: the bus listing holds one
//! reference and the bound driver clones another, released exactly once when
//! the driver's handle drops.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gm_error::{GpuHwmonError, Result};
use tracing::{debug, info, trace};

use crate::constants;
use crate::mmio::{MmioWindow, RegisterWindow};
use crate::profile::{self, Profile};

/// One PCI function as seen by the locator
pub trait PciDevice: fmt::Debug + Send + Sync {
    /// Bus address, e.g. "0000:01:00.0"
    fn address(&self) -> &str;
    fn vendor_id(&self) -> u16;
    fn device_id(&self) -> u16;
    /// Length in bytes of BAR `bar`, 0 if unimplemented
    fn resource_len(&self, bar: u8) -> u64;
    /// Map the whole of BAR `bar` for 32-bit reads
    fn map_resource(&self, bar: u8) -> Result<Box<dyn RegisterWindow>>;
}

/// Anything that can list the attached PCI devices
pub trait PciBus {
    fn devices(&self) -> Result<Vec<Arc<dyn PciDevice>>>;
}

/// A device matched against a profile, holding its own device reference
#[derive(Debug)]
pub struct LocatedDevice {
    pub device: Arc<dyn PciDevice>,
    pub profile: &'static Profile,
}

/// Pick the first NVIDIA device whose model has a profile.
///
/// Scanning stops at the first match; later devices are never examined.
pub fn locate_device(bus: &dyn PciBus) -> Result<LocatedDevice> {
    for dev in bus.devices()? {
        if dev.vendor_id() != constants::pci::NVIDIA_VENDOR_ID {
            trace!("Skipping {} (vendor {:#06x})", dev.address(), dev.vendor_id());
            continue;
        }

        let Some(profile) = profile::find_profile(dev.device_id()) else {
            debug!("No profile for {} (device {:#06x})", dev.address(), dev.device_id());
            continue;
        };

        info!("Matched {} to profile {}", dev.address(), profile.name);
        return Ok(LocatedDevice {
            device: Arc::clone(&dev),
            profile,
        });
    }

    Err(GpuHwmonError::DeviceNotFound {
        vendor: constants::pci::NVIDIA_VENDOR_ID,
    })
}

// ============================================================================
// sysfs backend
// ============================================================================

/// PCI bus read from `/sys/bus/pci/devices` (or another root for tests)
#[derive(Debug, Clone)]
pub struct SysfsPciBus {
    root: PathBuf,
}

impl SysfsPciBus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SysfsPciBus {
    fn default() -> Self {
        Self::new(constants::paths::PCI_DEVICES)
    }
}

impl PciBus for SysfsPciBus {
    fn devices(&self) -> Result<Vec<Arc<dyn PciDevice>>> {
        let entries = fs::read_dir(&self.root).map_err(|source| GpuHwmonError::FileRead {
            path: self.root.clone(),
            source,
        })?;

        let mut dirs: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        dirs.sort();

        let mut out: Vec<Arc<dyn PciDevice>> = Vec::with_capacity(dirs.len());
        for dir in dirs {
            match SysfsPciDevice::open(&dir) {
                Ok(dev) => out.push(Arc::new(dev)),
                Err(e) => debug!("Ignoring {}: {}", dir.display(), e),
            }
        }
        Ok(out)
    }
}

#[derive(Debug)]
pub struct SysfsPciDevice {
    dir: PathBuf,
    address: String,
    vendor_id: u16,
    device_id: u16,
    /// (start, end, flags) per BAR from the `resource` file
    resources: Vec<(u64, u64, u64)>,
}

impl SysfsPciDevice {
    pub fn open(dir: &Path) -> io::Result<Self> {
        let address = dir
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        let vendor_id = parse_hex_u16(&read_trimmed(dir.join("vendor"))?)?;
        let device_id = parse_hex_u16(&read_trimmed(dir.join("device"))?)?;
        let resources = match read_trimmed(dir.join("resource")) {
            Ok(text) => parse_resource_table(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            address,
            vendor_id,
            device_id,
            resources,
        })
    }
}

impl PciDevice for SysfsPciDevice {
    fn address(&self) -> &str {
        &self.address
    }

    fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    fn device_id(&self) -> u16 {
        self.device_id
    }

    fn resource_len(&self, bar: u8) -> u64 {
        match self.resources.get(usize::from(bar)) {
            Some(&(start, end, _)) if end > start => end - start + 1,
            _ => 0,
        }
    }

    fn map_resource(&self, bar: u8) -> Result<Box<dyn RegisterWindow>> {
        let len = self.resource_len(bar);
        let path = self.dir.join(format!("resource{}", bar));
        let mapping_err = |reason: String| GpuHwmonError::Mapping {
            device: self.address.clone(),
            bar,
            reason,
        };

        let file = File::open(&path).map_err(|e| mapping_err(format!("{}: {}", path.display(), e)))?;
        let len = usize::try_from(len).map_err(|_| mapping_err(format!("window too large ({} bytes)", len)))?;
        let window = MmioWindow::map(&file, len).map_err(|e| mapping_err(e.to_string()))?;
        Ok(Box::new(window))
    }
}

fn read_trimmed<P: AsRef<Path>>(p: P) -> io::Result<String> {
    let mut s = String::new();
    File::open(p)?.read_to_string(&mut s)?;
    Ok(s.trim().to_string())
}

fn parse_hex_u16(s: &str) -> io::Result<u16> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("bad id {:?}: {}", s, e)))
}

fn parse_hex_u64(s: &str) -> Option<u64> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(digits, 16).ok()
}

/// Parse the sysfs `resource` file: one "start end flags" line per BAR
pub fn parse_resource_table(text: &str) -> Vec<(u64, u64, u64)> {
    text.lines()
        .map(|line| {
            let mut cols = line.split_whitespace().map(parse_hex_u64);
            let start = cols.next().flatten().unwrap_or(0);
            let end = cols.next().flatten().unwrap_or(0);
            let flags = cols.next().flatten().unwrap_or(0);
            (start, end, flags)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakePciBus, FakePciDevice};

    #[test]
    fn test_parse_resource_table() {
        let text = "0x00000000f6000000 0x00000000f6ffffff 0x0000000000040200\n\
                    0x0000000000000000 0x0000000000000000 0x0000000000000000";
        let table = parse_resource_table(text);
        assert_eq!(table.len(), 2);
        assert_eq!(table[0], (0xf600_0000, 0xf6ff_ffff, 0x40200));
        assert_eq!(table[1], (0, 0, 0));
    }

    #[test]
    fn test_parse_hex_u16() {
        assert_eq!(parse_hex_u16("0x10de").unwrap(), 0x10de);
        assert_eq!(parse_hex_u16("2684").unwrap(), 0x2684);
        assert!(parse_hex_u16("0xzz").is_err());
    }

    #[test]
    fn test_locate_skips_other_vendors_and_models() {
        let amd = FakePciDevice::new("0000:03:00.0", 0x1002, 0x2684);
        let unknown_nv = FakePciDevice::new("0000:04:00.0", 0x10de, 0x1111);
        let ad102 = FakePciDevice::new("0000:05:00.0", 0x10de, 0x2684);
        let bus = FakePciBus::new(vec![amd, unknown_nv, ad102]);

        let found = locate_device(&bus).unwrap();
        assert_eq!(found.device.address(), "0000:05:00.0");
        assert_eq!(found.profile.model_id, 0x2684);
    }

    #[test]
    fn test_locate_stops_at_first_match() {
        let first = FakePciDevice::new("0000:01:00.0", 0x10de, 0x2684);
        let second = FakePciDevice::new("0000:02:00.0", 0x10de, 0x2684);
        let bus = FakePciBus::new(vec![first.clone(), second.clone()]);
        let first_refs = Arc::strong_count(&first);
        let second_refs = Arc::strong_count(&second);

        let found = locate_device(&bus).unwrap();
        assert_eq!(found.device.address(), "0000:01:00.0");
        // Only the winner gains a reference
        assert_eq!(Arc::strong_count(&first), first_refs + 1);
        assert_eq!(Arc::strong_count(&second), second_refs);
        drop(found);
        assert_eq!(Arc::strong_count(&first), first_refs);
    }

    #[test]
    fn test_locate_not_found() {
        let bus = FakePciBus::new(vec![FakePciDevice::new("0000:03:00.0", 0x8086, 0x56a0)]);
        let err = locate_device(&bus).unwrap_err();
        assert_eq!(err.kind(), gm_error::ErrorKind::NotFound);

        let empty = FakePciBus::new(Vec::new());
        assert!(matches!(locate_device(&empty), Err(GpuHwmonError::DeviceNotFound { .. })));
    }

    #[test]
    fn test_sysfs_bus_missing_root() {
        let bus = SysfsPciBus::new("/nonexistent/pci/devices");
        assert!(bus.devices().is_err());
    }
}
