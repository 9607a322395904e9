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

//! Load and unload of the one bound GPU.
//!
//! Startup is locate, map, register, then create the push attribute. A
//! failure at any step undoes the earlier ones in reverse before returning.

use std::sync::Arc;

use gm_error::{GpuHwmonError, Result};
use gm_protocol::DeviceStatus;
use serde_json::json;
use tracing::{error, info};

use crate::constants::names;
use crate::hwmon::{HostDeviceId, HwmonChip, SensorHost};
use crate::logger;
use crate::mmio::DeviceHandle;
use crate::pci::{locate_device, PciBus};
use crate::sensors::GpuSensors;
use crate::snapshot::{PushAttribute, SnapshotStore};

struct Bound {
    id: HostDeviceId,
    host: Arc<dyn SensorHost>,
    chip: Arc<GpuSensors>,
}

pub struct GpuHwmonDriver {
    store: Arc<SnapshotStore>,
    bound: Option<Bound>,
}

impl Default for GpuHwmonDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuHwmonDriver {
    pub fn new() -> Self {
        Self {
            store: Arc::new(SnapshotStore::new()),
            bound: None,
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn is_loaded(&self) -> bool {
        self.bound.is_some()
    }

    pub fn host_id(&self) -> Option<HostDeviceId> {
        self.bound.as_ref().map(|b| b.id)
    }

    pub fn load(&mut self, bus: &dyn PciBus, host: Arc<dyn SensorHost>) -> Result<()> {
        if let Some(b) = &self.bound {
            return Err(GpuHwmonError::AlreadyLoaded(b.chip.handle().address().to_string()));
        }

        let bound = Self::bring_up(bus, host, &self.store).map_err(|e| {
            error!(target: names::DRIVER, "Load failed: {}", e);
            logger::log_event("load_failed", json!({ "error": e.to_string() }));
            e
        })?;

        let handle = bound.chip.handle();
        info!(
            target: names::DRIVER,
            "{} loaded on {} as {}",
            handle.profile().name,
            handle.address(),
            bound.id
        );
        logger::log_event(
            "loaded",
            json!({
                "pci": handle.address(),
                "profile": handle.profile().name,
                "hwmon": bound.id.to_string(),
            }),
        );
        self.bound = Some(bound);
        Ok(())
    }

    // Each `?` drops what was acquired so far: the handle (and with it the
    // mapping and device reference) goes out of scope with `chip`.
    fn bring_up(bus: &dyn PciBus, host: Arc<dyn SensorHost>, store: &Arc<SnapshotStore>) -> Result<Bound> {
        let located = locate_device(bus)?;
        let handle = DeviceHandle::bind(located)?;
        let parent = handle.address().to_string();

        let chip = Arc::new(GpuSensors::new(handle, Arc::clone(store)));
        let id = host.register(names::CHIP, &parent, Arc::clone(&chip) as Arc<dyn HwmonChip>)?;

        let push = Arc::new(PushAttribute::new(Arc::clone(store)));
        if let Err(e) = host.create_file(id, push) {
            host.unregister(id);
            return Err(e);
        }

        Ok(Bound { id, host, chip })
    }

    /// Tear down in reverse of startup. Does nothing when not loaded.
    pub fn unload(&mut self) {
        let Some(Bound { id, host, chip }) = self.bound.take() else {
            return;
        };
        let address = chip.handle().address().to_string();

        host.remove_file(id, names::PUSH_ATTR);
        host.unregister(id);
        drop(chip);

        info!(target: names::DRIVER, "Unloaded {}", address);
        logger::log_event("unloaded", json!({ "pci": address }));
    }

    pub fn status(&self) -> DeviceStatus {
        match &self.bound {
            Some(b) => DeviceStatus {
                loaded: true,
                pci_address: Some(b.chip.handle().address().to_string()),
                profile: Some(b.chip.handle().profile().name.to_string()),
                hwmon: Some(b.id.to_string()),
            },
            None => DeviceStatus::default(),
        }
    }
}

impl Drop for GpuHwmonDriver {
    fn drop(&mut self) {
        self.unload();
    }
}
