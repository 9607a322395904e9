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

//! The sensor host contract and an in-process host.
//!
//! Attribute names follow the hwmon ABI: `{type}{index}_{attr}` with 1-based
//! indices, so channel 0 of a temperature chip is `temp1_*`.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use gm_error::{GpuHwmonError, Result};
use gm_protocol::{AttributeReading, ChipInfo};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::constants::mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorType {
    Temp,
    Power,
    Fan,
}

impl SensorType {
    pub const ALL: [SensorType; 3] = [SensorType::Temp, SensorType::Power, SensorType::Fan];

    pub fn name(&self) -> &'static str {
        match self {
            SensorType::Temp => "temp",
            SensorType::Power => "power",
            SensorType::Fan => "fan",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorAttr {
    Input,
    Label,
    Min,
    Max,
    Crit,
    Alarm,
    Enable,
}

impl SensorAttr {
    pub const ALL: [SensorAttr; 7] = [
        SensorAttr::Input,
        SensorAttr::Label,
        SensorAttr::Min,
        SensorAttr::Max,
        SensorAttr::Crit,
        SensorAttr::Alarm,
        SensorAttr::Enable,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SensorAttr::Input => "input",
            SensorAttr::Label => "label",
            SensorAttr::Min => "min",
            SensorAttr::Max => "max",
            SensorAttr::Crit => "crit",
            SensorAttr::Alarm => "alarm",
            SensorAttr::Enable => "enable",
        }
    }
}

/// Channels a chip advertises for one sensor type; entry `n` is channel `n`
#[derive(Debug, Clone, Copy)]
pub struct ChannelInfo {
    pub ty: SensorType,
    pub channels: &'static [&'static [SensorAttr]],
}

/// What a sensor chip implements to be hosted
pub trait HwmonChip: Send + Sync {
    fn channel_info(&self) -> &'static [ChannelInfo];

    /// Permission bits for one attribute, 0 when hidden
    fn is_visible(&self, ty: SensorType, attr: SensorAttr, channel: usize) -> u16;

    fn read(&self, ty: SensorType, attr: SensorAttr, channel: usize) -> Result<i64>;

    fn read_string(&self, ty: SensorType, attr: SensorAttr, channel: usize) -> Result<&'static str>;
}

/// An extra file hosted next to a chip's sensor attributes
pub trait DeviceAttribute: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;
    fn mode(&self) -> u16;

    /// Consume a write, returning the number of bytes accepted
    fn store(&self, buf: &str) -> Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostDeviceId(pub u32);

impl fmt::Display for HostDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hwmon{}", self.0)
    }
}

/// The sensor framework a chip registers with
#[cfg_attr(test, mockall::automock)]
pub trait SensorHost: Send + Sync {
    fn register(&self, name: &str, parent: &str, chip: Arc<dyn HwmonChip>) -> Result<HostDeviceId>;

    fn create_file(&self, id: HostDeviceId, attr: Arc<dyn DeviceAttribute>) -> Result<()>;

    fn remove_file(&self, id: HostDeviceId, name: &str);

    fn unregister(&self, id: HostDeviceId);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Number(i64),
    Text(String),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Number(n) => write!(f, "{}", n),
            AttrValue::Text(s) => f.write_str(s),
        }
    }
}

pub fn extract_index(fname: &str, prefix: &str, suffix: &str) -> Option<usize> {
    if fname.len() >= prefix.len() + suffix.len() && fname.starts_with(prefix) && fname.ends_with(suffix) {
        let mid = &fname[prefix.len()..fname.len() - suffix.len()];
        mid.parse().ok()
    } else {
        None
    }
}

/// Split `temp2_input` into (Temp, channel 1, Input)
pub fn parse_attribute_name(name: &str) -> Option<(SensorType, usize, SensorAttr)> {
    let (head, attr_name) = name.split_once('_')?;
    let attr = SensorAttr::ALL.into_iter().find(|a| a.name() == attr_name)?;
    SensorType::ALL.into_iter().find_map(|ty| {
        let index = extract_index(head, ty.name(), "")?;
        index.checked_sub(1).map(|channel| (ty, channel, attr))
    })
}

pub fn attribute_name(ty: SensorType, channel: usize, attr: SensorAttr) -> String {
    format!("{}{}_{}", ty.name(), channel + 1, attr.name())
}

struct ChipEntry {
    id: HostDeviceId,
    name: String,
    parent: String,
    chip: Arc<dyn HwmonChip>,
    files: Vec<Arc<dyn DeviceAttribute>>,
}

/// In-process sensor host.
///
/// Holds its table lock only while looking entries up; chip callbacks run
/// on cloned references with the lock released.
pub struct HwmonRegistry {
    next_id: AtomicU32,
    chips: RwLock<Vec<ChipEntry>>,
}

impl Default for HwmonRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HwmonRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HwmonRegistry")
            .field("chips", &self.chips.read().len())
            .finish()
    }
}

impl HwmonRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(0),
            chips: RwLock::new(Vec::new()),
        }
    }

    pub fn find_by_name(&self, name: &str) -> Option<HostDeviceId> {
        self.chips.read().iter().find(|c| c.name == name).map(|c| c.id)
    }

    /// Resolve either a chip name (`nvidia_mmio`) or a host id (`hwmon3`)
    pub fn resolve(&self, selector: &str) -> Result<HostDeviceId> {
        let chips = self.chips.read();
        chips
            .iter()
            .find(|c| c.name == selector || c.id.to_string() == selector)
            .map(|c| c.id)
            .ok_or_else(|| GpuHwmonError::ChipNotFound(selector.to_string()))
    }

    pub fn list_chips(&self) -> Vec<ChipInfo> {
        self.chips
            .read()
            .iter()
            .map(|c| ChipInfo {
                id: c.id.to_string(),
                name: c.name.clone(),
                parent: c.parent.clone(),
            })
            .collect()
    }

    fn lookup(&self, id: HostDeviceId) -> Result<(Arc<dyn HwmonChip>, Vec<Arc<dyn DeviceAttribute>>)> {
        let chips = self.chips.read();
        let entry = chips
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| GpuHwmonError::ChipNotFound(id.to_string()))?;
        Ok((Arc::clone(&entry.chip), entry.files.clone()))
    }

    /// Every visible attribute with its mode, sensors first in channel order
    pub fn list_attributes(&self, id: HostDeviceId) -> Result<Vec<(String, u16)>> {
        let (chip, files) = self.lookup(id)?;
        let mut out = Vec::new();

        for info in chip.channel_info() {
            for (channel, attrs) in info.channels.iter().enumerate() {
                for &attr in attrs.iter() {
                    let m = chip.is_visible(info.ty, attr, channel);
                    if m != mode::HIDDEN {
                        out.push((attribute_name(info.ty, channel, attr), m));
                    }
                }
            }
        }
        out.extend(files.iter().map(|f| (f.name().to_string(), f.mode())));
        Ok(out)
    }

    pub fn read_attribute(&self, id: HostDeviceId, name: &str) -> Result<AttrValue> {
        let (chip, files) = self.lookup(id)?;

        if let Some(file) = files.iter().find(|f| f.name() == name) {
            if file.mode() & 0o444 == 0 {
                return Err(GpuHwmonError::PermissionDenied(format!("{} is write-only", name)));
            }
            return Err(GpuHwmonError::unsupported(format!("{} has no read handler", name)));
        }

        let (ty, channel, attr) = parse_attribute_name(name)
            .ok_or_else(|| GpuHwmonError::AttributeNotFound(name.to_string()))?;
        if chip.is_visible(ty, attr, channel) == mode::HIDDEN {
            return Err(GpuHwmonError::AttributeNotFound(name.to_string()));
        }

        match attr {
            SensorAttr::Label => chip.read_string(ty, attr, channel).map(|s| AttrValue::Text(s.to_string())),
            _ => chip.read(ty, attr, channel).map(AttrValue::Number),
        }
    }

    /// Read every visible attribute, keeping per-attribute failures inline
    pub fn read_all(&self, id: HostDeviceId) -> Result<Vec<AttributeReading>> {
        let attrs = self.list_attributes(id)?;
        Ok(attrs
            .into_iter()
            .map(|(name, m)| {
                if m & 0o444 == 0 {
                    return AttributeReading { name, mode: m, value: None, error: None };
                }
                match self.read_attribute(id, &name) {
                    Ok(v) => AttributeReading { name, mode: m, value: Some(v.to_string()), error: None },
                    Err(e) => AttributeReading { name, mode: m, value: None, error: Some(e.to_string()) },
                }
            })
            .collect())
    }

    pub fn write_attribute(&self, id: HostDeviceId, name: &str, value: &str) -> Result<usize> {
        let (chip, files) = self.lookup(id)?;

        if let Some(file) = files.iter().find(|f| f.name() == name) {
            if file.mode() & 0o222 == 0 {
                return Err(GpuHwmonError::PermissionDenied(format!("{} is read-only", name)));
            }
            return file.store(value);
        }

        match parse_attribute_name(name) {
            Some((ty, channel, attr)) if chip.is_visible(ty, attr, channel) != mode::HIDDEN => {
                Err(GpuHwmonError::PermissionDenied(format!("{} is read-only", name)))
            }
            _ => Err(GpuHwmonError::AttributeNotFound(name.to_string())),
        }
    }
}

impl SensorHost for HwmonRegistry {
    fn register(&self, name: &str, parent: &str, chip: Arc<dyn HwmonChip>) -> Result<HostDeviceId> {
        if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == '-' || c == '*') {
            return Err(GpuHwmonError::Registration(format!("invalid chip name {:?}", name)));
        }

        let id = HostDeviceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.chips.write().push(ChipEntry {
            id,
            name: name.to_string(),
            parent: parent.to_string(),
            chip,
            files: Vec::new(),
        });
        info!("Registered {} as {} (parent {})", name, id, parent);
        Ok(id)
    }

    fn create_file(&self, id: HostDeviceId, attr: Arc<dyn DeviceAttribute>) -> Result<()> {
        let mut chips = self.chips.write();
        let entry = chips
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| GpuHwmonError::Registration(format!("{} is not registered", id)))?;

        if entry.files.iter().any(|f| f.name() == attr.name()) || parse_attribute_name(attr.name()).is_some() {
            return Err(GpuHwmonError::Registration(format!(
                "{} already has an attribute named {}",
                id,
                attr.name()
            )));
        }
        debug!("Created {}/{} (mode {:o})", id, attr.name(), attr.mode());
        entry.files.push(attr);
        Ok(())
    }

    fn remove_file(&self, id: HostDeviceId, name: &str) {
        let mut chips = self.chips.write();
        match chips.iter_mut().find(|c| c.id == id) {
            Some(entry) => {
                entry.files.retain(|f| f.name() != name);
                debug!("Removed {}/{}", id, name);
            }
            None => warn!("remove_file on unknown device {}", id),
        }
    }

    fn unregister(&self, id: HostDeviceId) {
        let mut chips = self.chips.write();
        let before = chips.len();
        chips.retain(|c| c.id != id);
        if chips.len() == before {
            warn!("unregister of unknown device {}", id);
        } else {
            info!("Unregistered {}", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gm_error::ErrorKind;
    use parking_lot::Mutex;

    struct OneTemp;

    static ONE_TEMP: &[ChannelInfo] = &[ChannelInfo {
        ty: SensorType::Temp,
        channels: &[&[SensorAttr::Input, SensorAttr::Label, SensorAttr::Crit]],
    }];

    impl HwmonChip for OneTemp {
        fn channel_info(&self) -> &'static [ChannelInfo] {
            ONE_TEMP
        }

        fn is_visible(&self, ty: SensorType, attr: SensorAttr, channel: usize) -> u16 {
            match (ty, attr, channel) {
                (SensorType::Temp, SensorAttr::Input | SensorAttr::Label, 0) => mode::READ_ONLY,
                _ => mode::HIDDEN,
            }
        }

        fn read(&self, _ty: SensorType, _attr: SensorAttr, _channel: usize) -> Result<i64> {
            Ok(51_000)
        }

        fn read_string(&self, _ty: SensorType, _attr: SensorAttr, _channel: usize) -> Result<&'static str> {
            Ok("Probe")
        }
    }

    #[derive(Debug, Default)]
    struct Recorder {
        last: Mutex<Option<String>>,
    }

    impl DeviceAttribute for Recorder {
        fn name(&self) -> &str {
            "sink"
        }

        fn mode(&self) -> u16 {
            mode::WRITE_ONLY
        }

        fn store(&self, buf: &str) -> Result<usize> {
            *self.last.lock() = Some(buf.to_string());
            Ok(buf.len())
        }
    }

    #[test]
    fn test_extract_index() {
        assert_eq!(extract_index("fan1_input", "fan", "_input"), Some(1));
        assert_eq!(extract_index("temp12", "temp", ""), Some(12));
        assert_eq!(extract_index("temp_input", "temp", "_input"), None);
        assert_eq!(extract_index("fan", "fan", "_input"), None);
        assert_eq!(extract_index("", "fan", ""), None);
    }

    #[test]
    fn test_parse_attribute_name() {
        assert_eq!(
            parse_attribute_name("temp2_input"),
            Some((SensorType::Temp, 1, SensorAttr::Input))
        );
        assert_eq!(
            parse_attribute_name("power1_label"),
            Some((SensorType::Power, 0, SensorAttr::Label))
        );
        assert_eq!(parse_attribute_name("fan1_enable"), Some((SensorType::Fan, 0, SensorAttr::Enable)));
        // hwmon indices start at 1
        assert_eq!(parse_attribute_name("temp0_input"), None);
        assert_eq!(parse_attribute_name("temp1_bogus"), None);
        assert_eq!(parse_attribute_name("nvml"), None);
        assert_eq!(attribute_name(SensorType::Temp, 2, SensorAttr::Label), "temp3_label");
    }

    #[test]
    fn test_registry_lists_and_reads() {
        let reg = HwmonRegistry::new();
        let id = reg.register("probe", "0000:01:00.0", Arc::new(OneTemp)).unwrap();
        assert_eq!(reg.find_by_name("probe"), Some(id));
        assert_eq!(reg.resolve(&id.to_string()).unwrap(), id);

        let attrs = reg.list_attributes(id).unwrap();
        assert_eq!(
            attrs,
            vec![("temp1_input".to_string(), 0o444), ("temp1_label".to_string(), 0o444)]
        );

        assert_eq!(reg.read_attribute(id, "temp1_input").unwrap(), AttrValue::Number(51_000));
        assert_eq!(reg.read_attribute(id, "temp1_label").unwrap().to_string(), "Probe");
        // Advertised but hidden
        let err = reg.read_attribute(id, "temp1_crit").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_registry_routes_writes() {
        let reg = HwmonRegistry::new();
        let id = reg.register("probe", "pci", Arc::new(OneTemp)).unwrap();
        let sink = Arc::new(Recorder::default());
        reg.create_file(id, sink.clone()).unwrap();

        assert_eq!(reg.write_attribute(id, "sink", "1 2 3\n").unwrap(), 6);
        assert_eq!(sink.last.lock().as_deref(), Some("1 2 3\n"));

        let ro = reg.write_attribute(id, "temp1_input", "5").unwrap_err();
        assert!(matches!(ro, GpuHwmonError::PermissionDenied(_)));
        let wo = reg.read_attribute(id, "sink").unwrap_err();
        assert!(matches!(wo, GpuHwmonError::PermissionDenied(_)));
        assert!(matches!(
            reg.write_attribute(id, "nope", "1"),
            Err(GpuHwmonError::AttributeNotFound(_))
        ));

        let readings = reg.read_all(id).unwrap();
        assert_eq!(readings.len(), 3);
        assert_eq!(readings[2].name, "sink");
        assert!(readings[2].value.is_none() && readings[2].error.is_none());
    }

    #[test]
    fn test_registry_duplicate_file_and_unregister() {
        let reg = HwmonRegistry::new();
        let id = reg.register("probe", "pci", Arc::new(OneTemp)).unwrap();
        reg.create_file(id, Arc::new(Recorder::default())).unwrap();
        assert!(reg.create_file(id, Arc::new(Recorder::default())).is_err());

        reg.remove_file(id, "sink");
        assert_eq!(reg.list_attributes(id).unwrap().len(), 2);

        reg.unregister(id);
        assert!(reg.find_by_name("probe").is_none());
        assert!(matches!(reg.read_attribute(id, "temp1_input"), Err(GpuHwmonError::ChipNotFound(_))));
        assert!(reg.create_file(id, Arc::new(Recorder::default())).is_err());
        assert!(reg.list_chips().is_empty());
    }

    #[test]
    fn test_register_rejects_bad_names() {
        let reg = HwmonRegistry::new();
        assert!(reg.register("bad name", "pci", Arc::new(OneTemp)).is_err());
        assert!(reg.register("", "pci", Arc::new(OneTemp)).is_err());
        let a = reg.register("a", "pci", Arc::new(OneTemp)).unwrap();
        let b = reg.register("b", "pci", Arc::new(OneTemp)).unwrap();
        assert_ne!(a, b);
        assert_eq!(reg.list_chips().len(), 2);
    }
}
