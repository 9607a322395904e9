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

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use gm_error::{GpuHwmonError, Result};
use serde::{Deserialize, Serialize};

use crate::constants::paths;

fn default_socket_path() -> PathBuf { PathBuf::from(paths::SOCKET) }
fn default_pci_root() -> PathBuf { PathBuf::from(paths::PCI_DEVICES) }
fn default_log_level() -> String { "info".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// Where PCI functions are enumerated; tests point this at a fake tree
    #[serde(default = "default_pci_root")]
    pub pci_root: PathBuf,
    /// JSON-lines lifecycle log, disabled when absent
    #[serde(default)]
    pub event_log: Option<PathBuf>,
    /// Level or filter directives for the tracing subscriber
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            pci_root: default_pci_root(),
            event_log: None,
            log_level: default_log_level(),
        }
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(p) = env::var(paths::CONFIG_ENV) {
        if !p.is_empty() {
            return PathBuf::from(p);
        }
    }
    Path::new(paths::CONFIG_DIR).join(paths::CONFIG_FILE)
}

pub fn load_config_from(path: &Path) -> Result<DaemonConfig> {
    let data = match fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(DaemonConfig::default()),
        Err(source) => {
            return Err(GpuHwmonError::FileRead {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let cfg: DaemonConfig = serde_json::from_str(&data)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

fn invalid(field: &str, reason: impl Into<String>) -> GpuHwmonError {
    GpuHwmonError::InvalidConfig {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn is_safe_directive(s: &str) -> bool {
    if s.is_empty() || s.len() > 256 { return false; }
    s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | ',' | ':' | '.' | '-'))
}

pub fn validate_config(cfg: &DaemonConfig) -> Result<()> {
    if !cfg.socket_path.is_absolute() {
        return Err(invalid("socket_path", "must be an absolute path"));
    }
    if cfg.socket_path.as_os_str().len() > 100 {
        // sun_path is 108 bytes including the terminator
        return Err(invalid("socket_path", "too long for a unix socket"));
    }
    if !cfg.pci_root.is_absolute() {
        return Err(invalid("pci_root", "must be an absolute path"));
    }
    if let Some(log) = &cfg.event_log {
        if !log.is_absolute() {
            return Err(invalid("event_log", "must be an absolute path"));
        }
    }
    if !is_safe_directive(&cfg.log_level) {
        return Err(invalid("log_level", format!("invalid filter {:?}", cfg.log_level)));
    }
    Ok(())
}
