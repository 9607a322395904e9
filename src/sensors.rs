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

use std::sync::Arc;

use gm_error::{GpuHwmonError, Result};

use crate::constants::mode;
use crate::hwmon::{ChannelInfo, HwmonChip, SensorAttr, SensorType};
use crate::mmio::DeviceHandle;
use crate::snapshot::{SnapshotField, SnapshotStore};

const IN_LABEL: &[SensorAttr] = &[SensorAttr::Input, SensorAttr::Label];

static CHANNELS: &[ChannelInfo] = &[
    ChannelInfo { ty: SensorType::Temp, channels: &[IN_LABEL, IN_LABEL, IN_LABEL] },
    ChannelInfo { ty: SensorType::Power, channels: &[IN_LABEL] },
    ChannelInfo { ty: SensorType::Fan, channels: &[IN_LABEL] },
];

/// Where one channel's value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Snapshot(SnapshotField),
    Junction,
    Vram,
}

fn channel(ty: SensorType, channel: usize) -> Option<(Source, &'static str)> {
    match (ty, channel) {
        (SensorType::Temp, 0) => Some((Source::Snapshot(SnapshotField::CoreTemp), "GPU Core")),
        (SensorType::Temp, 1) => Some((Source::Junction, "GPU Junction")),
        (SensorType::Temp, 2) => Some((Source::Vram, "GPU VRAM")),
        (SensorType::Power, 0) => Some((Source::Snapshot(SnapshotField::Power), "Total Board Power")),
        (SensorType::Fan, 0) => Some((Source::Snapshot(SnapshotField::Fan), "GPU Fan")),
        _ => None,
    }
}

/// The fused sensor chip: register temperatures plus pushed metrics
#[derive(Debug)]
pub struct GpuSensors {
    handle: DeviceHandle,
    store: Arc<SnapshotStore>,
}

impl GpuSensors {
    pub fn new(handle: DeviceHandle, store: Arc<SnapshotStore>) -> Self {
        Self { handle, store }
    }

    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    fn unsupported(ty: SensorType, attr: SensorAttr, ch: usize) -> GpuHwmonError {
        GpuHwmonError::unsupported(format!("{}{}_{}", ty.name(), ch + 1, attr.name()))
    }
}

impl HwmonChip for GpuSensors {
    fn channel_info(&self) -> &'static [ChannelInfo] {
        CHANNELS
    }

    fn is_visible(&self, ty: SensorType, attr: SensorAttr, ch: usize) -> u16 {
        match attr {
            SensorAttr::Input | SensorAttr::Label if channel(ty, ch).is_some() => mode::READ_ONLY,
            _ => mode::HIDDEN,
        }
    }

    fn read(&self, ty: SensorType, attr: SensorAttr, ch: usize) -> Result<i64> {
        if attr != SensorAttr::Input {
            return Err(Self::unsupported(ty, attr, ch));
        }
        let (source, _) = channel(ty, ch).ok_or_else(|| Self::unsupported(ty, attr, ch))?;

        let profile = self.handle.profile();
        match source {
            Source::Junction => Ok(self.handle.read_milli_celsius(&profile.hotspot)),
            Source::Vram => Ok(self.handle.read_milli_celsius(&profile.vram)),
            Source::Snapshot(field) => self.store.read_available(field),
        }
    }

    fn read_string(&self, ty: SensorType, attr: SensorAttr, ch: usize) -> Result<&'static str> {
        match (attr, channel(ty, ch)) {
            (SensorAttr::Label, Some((_, label))) => Ok(label),
            _ => Err(Self::unsupported(ty, attr, ch)),
        }
    }
}
