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

//! Compiled-in register profiles, one per supported GPU model.
//!
//! Decoding is data: a new model is a new table row, never new code.

/// How a 32-bit register word turns into whole degrees Celsius
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDecode {
    pub shift: u32,
    pub mask: u32,
    pub divisor: u32,
}

impl FieldDecode {
    /// Bits [15:8] hold whole degrees
    pub const HOTSPOT: FieldDecode = FieldDecode { shift: 8, mask: 0xff, divisor: 1 };

    /// Bits [11:0] hold 1/32 degree steps
    pub const VRAM: FieldDecode = FieldDecode { shift: 0, mask: 0xfff, divisor: 32 };

    /// Decode a raw word into millidegrees
    #[inline]
    pub fn milli_celsius(&self, word: u32) -> i64 {
        let degrees = ((word >> self.shift) & self.mask) / self.divisor;
        i64::from(degrees) * 1000
    }
}

/// One register-readable temperature: where it lives and how to decode it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSensor {
    pub offset: u32,
    pub decode: FieldDecode,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Profile {
    /// PCI device id
    pub model_id: u16,
    pub name: &'static str,
    pub hotspot: RegisterSensor,
    pub vram: RegisterSensor,
}

impl Profile {
    pub fn hotspot_register_offset(&self) -> u32 {
        self.hotspot.offset
    }

    pub fn vram_register_offset(&self) -> u32 {
        self.vram.offset
    }

    /// Smallest window length that covers every register this profile reads
    pub fn required_window_len(&self) -> u64 {
        let highest = self.hotspot.offset.max(self.vram.offset);
        u64::from(highest) + 4
    }
}

pub static PROFILES: &[Profile] = &[Profile {
    model_id: 0x2684,
    name: "AD102 (GeForce RTX 4090)",
    hotspot: RegisterSensor { offset: 0x0002_046c, decode: FieldDecode::HOTSPOT },
    vram: RegisterSensor { offset: 0x0000_e2a8, decode: FieldDecode::VRAM },
}];

/// First profile in table order whose model id matches
pub fn find_profile(model_id: u16) -> Option<&'static Profile> {
    find_profile_in(PROFILES, model_id)
}

pub fn find_profile_in(table: &'static [Profile], model_id: u16) -> Option<&'static Profile> {
    table.iter().find(|p| p.model_id == model_id)
}
