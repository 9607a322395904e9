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

//! Lifecycle event log: one JSON object per line.
//!
//! Nothing is written until `init_event_log` succeeds.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde_json::{json, Value};

lazy_static! {
    static ref LOG_FILE: Mutex<Option<File>> = Mutex::new(None);
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

pub fn init_event_log(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let f = OpenOptions::new().create(true).append(true).open(path)?;
    *LOG_FILE.lock() = Some(f);
    Ok(())
}

/// Stop writing; later events are dropped
pub fn close_event_log() {
    LOG_FILE.lock().take();
}

pub fn is_enabled() -> bool {
    LOG_FILE.lock().is_some()
}

pub fn log_event(event: &str, data: Value) {
    let mut guard = LOG_FILE.lock();
    let Some(f) = guard.as_mut() else { return };

    let line = json!({
        "ts_ms": now_millis(),
        "event": event,
        "data": data,
    });
    if let Err(e) = writeln!(f, "{}", line) {
        tracing::debug!("Event log write failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_events_are_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("events.json");

        init_event_log(&path).unwrap();
        assert!(is_enabled());
        log_event("loaded", json!({"pci": "0000:01:00.0"}));
        log_event("unloaded", json!({}));
        close_event_log();
        assert!(!is_enabled());

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "loaded");
        assert_eq!(lines[0]["data"]["pci"], "0000:01:00.0");
        assert!(lines[1]["ts_ms"].as_u64().is_some());
    }

    #[test]
    #[serial]
    fn test_disabled_log_is_silent() {
        close_event_log();
        log_event("ignored", json!({"x": 1}));
        assert!(!is_enabled());
    }

    #[test]
    #[serial]
    fn test_init_fails_on_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        assert!(init_event_log(&blocker.join("events.json")).is_err());
        assert!(!is_enabled());
    }
}
