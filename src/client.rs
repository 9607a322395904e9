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

//! Blocking client for the daemon socket.

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use gm_error::{GpuHwmonError, Result};
use gm_protocol::{
    AttributeReading, ChipInfo, DeviceStatus, PushPayload, Request, RequestEnvelope, Response,
    ResponseData, ResponseEnvelope, MAX_MESSAGE_SIZE,
};

use crate::constants::names;

const TIMEOUT: Duration = Duration::from_secs(5);

pub struct DaemonClient {
    writer: UnixStream,
    reader: BufReader<UnixStream>,
}

impl DaemonClient {
    pub fn connect(socket_path: &Path) -> Result<Self> {
        let conn_err = |e: std::io::Error| {
            GpuHwmonError::DaemonConnection(format!("{}: {}", socket_path.display(), e))
        };
        let stream = UnixStream::connect(socket_path).map_err(conn_err)?;
        stream.set_read_timeout(Some(TIMEOUT)).map_err(conn_err)?;
        stream.set_write_timeout(Some(TIMEOUT)).map_err(conn_err)?;
        let reader = stream.try_clone().map_err(conn_err)?;

        Ok(Self {
            writer: stream,
            reader: BufReader::new(reader),
        })
    }

    /// Send one request and return the daemon's answer, errors included
    pub fn request(&mut self, req: Request) -> Result<Response> {
        req.validate().map_err(GpuHwmonError::InvalidArgument)?;

        let envelope = RequestEnvelope::new(req);
        let request_id = envelope.id;
        let mut json = serde_json::to_vec(&envelope)?;
        json.push(b'\n');
        if json.len() > MAX_MESSAGE_SIZE {
            return Err(GpuHwmonError::MessageTooLarge { size: json.len(), max_size: MAX_MESSAGE_SIZE });
        }

        self.writer
            .write_all(&json)
            .map_err(|e| GpuHwmonError::DaemonConnection(format!("send failed: {}", e)))?;

        // One byte past the cap is enough to tell an oversized response apart
        let mut buf = Vec::with_capacity(1024);
        (&mut self.reader)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_until(b'\n', &mut buf)
            .map_err(|e| GpuHwmonError::DaemonConnection(format!("read failed: {}", e)))?;
        if buf.is_empty() {
            return Err(GpuHwmonError::DaemonConnection("daemon closed connection".into()));
        }
        if buf.len() > MAX_MESSAGE_SIZE {
            return Err(GpuHwmonError::MessageTooLarge { size: buf.len(), max_size: MAX_MESSAGE_SIZE });
        }

        let resp: ResponseEnvelope = serde_json::from_slice(&buf)?;
        if resp.id != request_id {
            return Err(GpuHwmonError::IpcProtocol(format!(
                "response id {} does not match request {}",
                resp.id, request_id
            )));
        }
        Ok(resp.response)
    }

    fn request_data(&mut self, req: Request) -> Result<ResponseData> {
        match self.request(req)? {
            Response::Ok(data) => Ok(data),
            Response::Error { kind, message } => {
                Err(GpuHwmonError::DaemonResponse(format!("{:?}: {}", kind, message)))
            }
        }
    }

    fn value(&mut self, req: Request) -> Result<String> {
        let kind = req.type_name();
        self.request_data(req)?
            .value
            .ok_or_else(|| GpuHwmonError::IpcProtocol(format!("{} response without value", kind)))
    }

    pub fn ping(&mut self) -> Result<String> {
        self.value(Request::Ping)
    }

    pub fn version(&mut self) -> Result<String> {
        self.value(Request::Version)
    }

    pub fn status(&mut self) -> Result<DeviceStatus> {
        self.request_data(Request::Status)?
            .status
            .ok_or_else(|| GpuHwmonError::IpcProtocol("Status response without status".into()))
    }

    pub fn list_chips(&mut self) -> Result<Vec<ChipInfo>> {
        Ok(self.request_data(Request::ListChips)?.chips.unwrap_or_default())
    }

    pub fn list_attributes(&mut self, chip: &str) -> Result<Vec<AttributeReading>> {
        let req = Request::ListAttributes { chip: chip.to_string() };
        Ok(self.request_data(req)?.attributes.unwrap_or_default())
    }

    pub fn read_attribute(&mut self, chip: &str, attr: &str) -> Result<String> {
        self.value(Request::ReadAttribute { chip: chip.to_string(), attr: attr.to_string() })
    }

    pub fn write_attribute(&mut self, chip: &str, attr: &str, value: &str) -> Result<String> {
        self.value(Request::WriteAttribute {
            chip: chip.to_string(),
            attr: attr.to_string(),
            value: value.to_string(),
        })
    }

    /// The helper side of the push contract
    pub fn push(&mut self, payload: PushPayload) -> Result<String> {
        self.write_attribute(names::CHIP, names::PUSH_ATTR, &format!("{}\n", payload))
    }
}
