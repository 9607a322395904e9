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

//! The hosted sensor service: one registry, one driver, and the mapping from
//! protocol requests onto them.

use std::sync::Arc;

use gm_error::{ErrorKind, GpuHwmonError, Result};
use gm_protocol::{ErrorClass, Request, Response, ResponseData};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::hwmon::{HwmonRegistry, SensorHost};
use crate::lifecycle::GpuHwmonDriver;
use crate::pci::PciBus;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn error_class(e: &GpuHwmonError) -> ErrorClass {
    if matches!(e, GpuHwmonError::PermissionDenied(_)) {
        return ErrorClass::PermissionDenied;
    }
    match e.kind() {
        ErrorKind::NotFound => ErrorClass::NotFound,
        ErrorKind::Unsupported => ErrorClass::Unsupported,
        ErrorKind::InvalidArgument => ErrorClass::InvalidArgument,
        ErrorKind::ResourceError => ErrorClass::ResourceError,
        ErrorKind::Other => ErrorClass::Other,
    }
}

pub fn error_response(e: &GpuHwmonError) -> Response {
    Response::error(error_class(e), e.to_string())
}

pub struct HwmonService {
    registry: Arc<HwmonRegistry>,
    driver: Mutex<GpuHwmonDriver>,
}

impl Default for HwmonService {
    fn default() -> Self {
        Self::new()
    }
}

impl HwmonService {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(HwmonRegistry::new()),
            driver: Mutex::new(GpuHwmonDriver::new()),
        }
    }

    pub fn registry(&self) -> &Arc<HwmonRegistry> {
        &self.registry
    }

    /// Bind the GPU and publish its chip in the registry
    pub fn start(&self, bus: &dyn PciBus) -> Result<()> {
        let host: Arc<dyn SensorHost> = self.registry.clone();
        self.driver.lock().load(bus, host)
    }

    pub fn stop(&self) {
        self.driver.lock().unload();
    }

    pub fn is_loaded(&self) -> bool {
        self.driver.lock().is_loaded()
    }

    /// Answer one request. Writes are refused unless `peer_uid` is root.
    pub fn handle(&self, request: &Request, peer_uid: u32) -> Response {
        if let Err(e) = request.validate() {
            debug!("Rejected {}: {}", request.type_name(), e);
            return Response::error(ErrorClass::InvalidArgument, e);
        }
        if request.is_write() && peer_uid != 0 {
            warn!("Write attempt by uid={} refused", peer_uid);
            return Response::error(ErrorClass::PermissionDenied, "writes require root");
        }

        match self.dispatch(request) {
            Ok(resp) => resp,
            Err(e) => error_response(&e),
        }
    }

    fn dispatch(&self, request: &Request) -> Result<Response> {
        let reg = &self.registry;
        Ok(match request {
            Request::Ping => Response::ok_string("pong"),
            Request::Version => Response::ok_string(VERSION),
            Request::Status => Response::Ok(ResponseData::device_status(self.driver.lock().status())),
            Request::ListChips => Response::Ok(ResponseData::chip_list(reg.list_chips())),
            Request::ListAttributes { chip } => {
                let id = reg.resolve(chip)?;
                Response::Ok(ResponseData::readings(reg.read_all(id)?))
            }
            Request::ReadAttribute { chip, attr } => {
                let id = reg.resolve(chip)?;
                Response::ok_string(reg.read_attribute(id, attr)?.to_string())
            }
            Request::WriteAttribute { chip, attr, value } => {
                let id = reg.resolve(chip)?;
                let n = reg.write_attribute(id, attr, value)?;
                Response::ok_string(n.to_string())
            }
        })
    }
}
