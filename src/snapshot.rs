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

//! Externally pushed metrics.
//!
//! The helper writes `<core_temp_milliC> <power_milliW> <fan>` lines; each
//! accepted line replaces the whole snapshot under one lock, so readers never
//! see fields from two different pushes.

use std::sync::Arc;

use gm_error::{GpuHwmonError, Result};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::constants;
use crate::hwmon::DeviceAttribute;

/// "Not yet available"
pub const SENTINEL: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub core_temp_milli_c: i64,
    pub power_milli_w: i64,
    /// Fan speed in percent
    pub fan: i64,
}

impl Snapshot {
    pub const EMPTY: Snapshot = Snapshot {
        core_temp_milli_c: SENTINEL,
        power_milli_w: SENTINEL,
        fan: SENTINEL,
    };

    /// Parse a push line: three base-10 integers, each an optionally signed
    /// run of digits after any whitespace. Scanning stops after the third
    /// integer, so `"1 2 3abc"` is `(1, 2, 3)`.
    pub fn parse(line: &str) -> Result<Self> {
        let mut rest = line;
        let mut next = |what: &str| -> Result<i64> {
            let (value, tail) = scan_i64(rest)
                .ok_or_else(|| GpuHwmonError::invalid_argument(format!("bad {} in {:?}", what, line)))?;
            rest = tail;
            Ok(value)
        };

        Ok(Self {
            core_temp_milli_c: next("core temperature")?,
            power_milli_w: next("power")?,
            fan: next("fan value")?,
        })
    }

    pub fn get(&self, field: SnapshotField) -> i64 {
        match field {
            SnapshotField::CoreTemp => self.core_temp_milli_c,
            SnapshotField::Power => self.power_milli_w,
            SnapshotField::Fan => self.fan,
        }
    }
}

/// Leading `[+-]digits` after optional whitespace, and the unconsumed tail
fn scan_i64(s: &str) -> Option<(i64, &str)> {
    let s = s.trim_start();
    let sign = usize::from(s.starts_with(['+', '-']));
    let digits = s[sign..].bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let end = sign + digits;
    s[..end].parse().ok().map(|v| (v, &s[end..]))
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotField {
    CoreTemp,
    Power,
    Fan,
}

/// The process-wide holder of the latest pushed snapshot
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: Mutex<Snapshot>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot with a parsed push line.
    ///
    /// A malformed line leaves the previous snapshot untouched.
    pub fn push(&self, line: &str) -> Result<()> {
        let next = Snapshot::parse(line)?;
        *self.current.lock() = next;
        trace!(
            "Snapshot pushed: temp={} power={} fan={}",
            next.core_temp_milli_c,
            next.power_milli_w,
            next.fan
        );
        Ok(())
    }

    pub fn read(&self, field: SnapshotField) -> i64 {
        self.current.lock().get(field)
    }

    /// Field value, or Unsupported while it holds the sentinel
    pub fn read_available(&self, field: SnapshotField) -> Result<i64> {
        let value = self.read(field);
        if value < 0 {
            return Err(GpuHwmonError::unsupported(format!("{:?} not available", field)));
        }
        Ok(value)
    }

    /// Copy of all three fields taken under one lock
    pub fn snapshot(&self) -> Snapshot {
        *self.current.lock()
    }
}

/// The write-only `nvml` attribute feeding a [`SnapshotStore`]
#[derive(Debug)]
pub struct PushAttribute {
    store: Arc<SnapshotStore>,
}

impl PushAttribute {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }
}

impl DeviceAttribute for PushAttribute {
    fn name(&self) -> &str {
        constants::names::PUSH_ATTR
    }

    fn mode(&self) -> u16 {
        constants::mode::WRITE_ONLY
    }

    fn store(&self, buf: &str) -> Result<usize> {
        if let Err(e) = self.store.push(buf) {
            debug!("Rejected push {:?}: {}", buf.trim_end(), e);
            return Err(e);
        }
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gm_error::ErrorKind;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_initial_state_is_sentinel() {
        let store = SnapshotStore::new();
        assert_eq!(store.snapshot(), Snapshot::EMPTY);
        for field in [SnapshotField::CoreTemp, SnapshotField::Power, SnapshotField::Fan] {
            assert_eq!(store.read(field), -1);
            assert_eq!(store.read_available(field).unwrap_err().kind(), ErrorKind::Unsupported);
        }
    }

    #[test]
    fn test_push_read_round_trip() {
        let store = SnapshotStore::new();
        store.push("42000 312000 47").unwrap();
        assert_eq!(store.read_available(SnapshotField::CoreTemp).unwrap(), 42_000);
        assert_eq!(store.read_available(SnapshotField::Power).unwrap(), 312_000);
        assert_eq!(store.read_available(SnapshotField::Fan).unwrap(), 47);
    }

    #[test]
    fn test_partial_sentinel() {
        let store = SnapshotStore::new();
        store.push("40000 -1 50\n").unwrap();
        assert_eq!(store.read_available(SnapshotField::CoreTemp).unwrap(), 40_000);
        assert_eq!(store.read_available(SnapshotField::Power).unwrap_err().kind(), ErrorKind::Unsupported);
        assert_eq!(store.read_available(SnapshotField::Fan).unwrap(), 50);
    }

    #[test]
    fn test_malformed_push_keeps_previous() {
        let store = SnapshotStore::new();
        store.push("42000 312000 47").unwrap();

        for bad in ["abc", "1 2", "", "   ", "1 x 3", "1.5 2 3"] {
            let err = store.push(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "input {:?}", bad);
        }
        assert_eq!(store.snapshot(), Snapshot::new_for_test(42_000, 312_000, 47));
    }

    #[test]
    fn test_parse_tolerates_whitespace_and_trailing_fields() {
        let s = Snapshot::parse("  \t41000   300000 -1 99 extra\n").unwrap();
        assert_eq!(s, Snapshot::new_for_test(41_000, 300_000, -1));
        let signed = Snapshot::parse("+45000 -1 -1").unwrap();
        assert_eq!(signed.core_temp_milli_c, 45_000);
    }

    #[test]
    fn test_parse_stops_at_first_non_digit() {
        assert_eq!(Snapshot::parse("1 2 3abc").unwrap(), Snapshot::new_for_test(1, 2, 3));
        assert_eq!(Snapshot::parse("1 2 3.9").unwrap(), Snapshot::new_for_test(1, 2, 3));
        assert_eq!(Snapshot::parse("40000\t250000\t-1\r\n").unwrap(), Snapshot::new_for_test(40_000, 250_000, -1));
        // A suffix on an earlier field leaves the next field unparseable
        assert!(Snapshot::parse("1abc 2 3").is_err());
        assert!(Snapshot::parse("- 2 3").is_err());
        assert!(Snapshot::parse("99999999999999999999 2 3").is_err());
    }

    #[test]
    fn test_push_attribute_reports_consumed_bytes() {
        let store = Arc::new(SnapshotStore::new());
        let attr = PushAttribute::new(Arc::clone(&store));
        assert_eq!(attr.name(), "nvml");
        assert_eq!(attr.mode(), 0o200);

        assert_eq!(attr.store("42000 312000 47\n").unwrap(), 16);
        assert_eq!(store.read(SnapshotField::Fan), 47);
        assert!(attr.store("1 2").is_err());
        assert_eq!(store.read(SnapshotField::Fan), 47);
    }

    #[test]
    fn test_concurrent_pushes_never_tear() {
        const WRITERS: i64 = 4;
        const READERS: usize = 4;
        const PUSHES: i64 = 2_000;

        // Every triple pushed by writer w at step i is (t, t+1, t+2) with
        // t = w * 1_000_000 + i * 3, so a torn read breaks the pattern.
        let store = Arc::new(SnapshotStore::new());
        let mut handles = Vec::new();

        for w in 0..WRITERS {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for i in 0..PUSHES {
                    let t = w * 1_000_000 + i * 3;
                    store.push(&format!("{} {} {}", t, t + 1, t + 2)).unwrap();
                }
                HashSet::new()
            }));
        }

        for _ in 0..READERS {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                let mut seen = HashSet::new();
                for _ in 0..PUSHES {
                    let s = store.snapshot();
                    seen.insert((s.core_temp_milli_c, s.power_milli_w, s.fan));
                }
                seen
            }));
        }

        let mut observed = HashSet::new();
        for h in handles {
            observed.extend(h.join().unwrap());
        }

        for (t, p, f) in observed {
            if t == SENTINEL {
                assert_eq!((p, f), (SENTINEL, SENTINEL));
                continue;
            }
            assert_eq!(p, t + 1, "torn snapshot ({}, {}, {})", t, p, f);
            assert_eq!(f, t + 2, "torn snapshot ({}, {}, {})", t, p, f);
        }
    }

    impl Snapshot {
        fn new_for_test(core_temp_milli_c: i64, power_milli_w: i64, fan: i64) -> Self {
            Self { core_temp_milli_c, power_milli_w, fan }
        }
    }
}
