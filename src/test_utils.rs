/*
 * Test utilities and fake hardware for gpu-mmio-hwmon
 *
 * Fake PCI devices hand out in-memory register windows and count how many
 * of those windows are alive, so tests can check that every failure path
 * unmaps and releases what it acquired.
 */

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use gm_error::{GpuHwmonError, Result};
use parking_lot::Mutex;

use crate::mmio::RegisterWindow;
use crate::pci::{PciBus, PciDevice};
use crate::snapshot::SnapshotStore;

/// Default BAR0 size of the fake devices (16 MiB)
pub const FAKE_BAR_LEN: u64 = 16 * 1024 * 1024;

type RegisterFile = Arc<Mutex<HashMap<u32, u32>>>;

pub struct FakeRegisters {
    words: RegisterFile,
    len: usize,
    live: Arc<AtomicUsize>,
}

impl fmt::Debug for FakeRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeRegisters").field("len", &self.len).finish()
    }
}

impl RegisterWindow for FakeRegisters {
    fn len(&self) -> usize {
        self.len
    }

    fn read32(&self, offset: u32) -> u32 {
        self.words.lock().get(&offset).copied().unwrap_or(0)
    }
}

impl Drop for FakeRegisters {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct FakePciDevice {
    address: String,
    vendor_id: u16,
    device_id: u16,
    bar_len: u64,
    fail_map: bool,
    words: RegisterFile,
    live: Arc<AtomicUsize>,
}

impl FakePciDevice {
    pub fn new(address: &str, vendor_id: u16, device_id: u16) -> Arc<Self> {
        Self::build(address, vendor_id, device_id, FAKE_BAR_LEN, false)
    }

    pub fn with_bar_len(address: &str, vendor_id: u16, device_id: u16, bar_len: u64) -> Arc<Self> {
        Self::build(address, vendor_id, device_id, bar_len, false)
    }

    /// Device whose BAR exists but refuses to map
    pub fn failing_map(address: &str, vendor_id: u16, device_id: u16) -> Arc<Self> {
        Self::build(address, vendor_id, device_id, FAKE_BAR_LEN, true)
    }

    fn build(address: &str, vendor_id: u16, device_id: u16, bar_len: u64, fail_map: bool) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            vendor_id,
            device_id,
            bar_len,
            fail_map,
            words: Arc::new(Mutex::new(HashMap::new())),
            live: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Change what the hardware reports; visible through live mappings too
    pub fn set_register(&self, offset: u32, value: u32) {
        self.words.lock().insert(offset, value);
    }

    /// Number of windows mapped and not yet dropped
    pub fn live_maps(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl PciDevice for FakePciDevice {
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
        if bar == 0 { self.bar_len } else { 0 }
    }

    fn map_resource(&self, bar: u8) -> Result<Box<dyn RegisterWindow>> {
        if self.fail_map {
            return Err(GpuHwmonError::Mapping {
                device: self.address.clone(),
                bar,
                reason: "injected failure".into(),
            });
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeRegisters {
            words: Arc::clone(&self.words),
            len: self.bar_len as usize,
            live: Arc::clone(&self.live),
        }))
    }
}

pub struct FakePciBus {
    devices: Vec<Arc<FakePciDevice>>,
}

impl FakePciBus {
    pub fn new(devices: Vec<Arc<FakePciDevice>>) -> Self {
        Self { devices }
    }
}

impl PciBus for FakePciBus {
    fn devices(&self) -> Result<Vec<Arc<dyn PciDevice>>> {
        Ok(self
            .devices
            .iter()
            .map(|d| Arc::clone(d) as Arc<dyn PciDevice>)
            .collect())
    }
}

/// An AD102 with known junction (45 °C) and VRAM (20 °C) readings
pub fn create_mock_ad102() -> Arc<FakePciDevice> {
    let dev = FakePciDevice::new("0000:01:00.0", 0x10de, 0x2684);
    dev.set_register(0x2046c, 0x0000_2d00);
    dev.set_register(0xe2a8, 0x0000_0280);
    dev
}

pub fn create_pushed_store(line: &str) -> Arc<SnapshotStore> {
    let store = Arc::new(SnapshotStore::new());
    store.push(line).expect("valid push line");
    store
}
