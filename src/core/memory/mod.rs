// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Guest physical memory access
//!
//! The DSP reads sample data for its voices directly out of guest physical
//! memory (FCRAM). The memory system itself lives outside this crate; the DSP
//! only needs a read-only view of a physical range, expressed by the
//! [`GuestMemory`] trait.
//!
//! # Memory Map
//!
//! | Physical Address Range  | Region | Size    |
//! |-------------------------|--------|---------|
//! | 0x20000000-0x27FFFFFF   | FCRAM  | 128MB   |
//!
//! [`FlatMemory`] is a single contiguous backing store placed at an arbitrary
//! physical base, used by the system harness and by tests.
//!
//! # Example
//!
//! ```
//! use ctr_hle::core::memory::{FlatMemory, GuestMemory};
//!
//! let mut mem = FlatMemory::new(FlatMemory::FCRAM_BASE, 0x1000);
//! mem.write16(0x2000_0010, 0x1234);
//!
//! assert_eq!(mem.physical_slice(0x2000_0010, 2), Some(&[0x34, 0x12][..]));
//! assert_eq!(mem.physical_slice(0x1FFF_FFFF, 2), None);
//! ```

/// Read-only access to guest physical memory
pub trait GuestMemory {
    /// Borrow `len` bytes starting at physical address `addr`
    ///
    /// Returns `None` if any part of the range is unmapped.
    fn physical_slice(&self, addr: u32, len: usize) -> Option<&[u8]>;
}

/// Contiguous guest memory mapped at a physical base address
pub struct FlatMemory {
    /// Physical address of the first byte
    base: u32,

    /// Backing store
    data: Vec<u8>,
}

impl FlatMemory {
    /// Physical base address of FCRAM
    pub const FCRAM_BASE: u32 = 0x2000_0000;

    /// Create a zero-filled memory of `size` bytes at `base`
    ///
    /// # Arguments
    ///
    /// * `base` - Physical address of the first byte
    /// * `size` - Size in bytes
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            data: vec![0u8; size],
        }
    }

    /// Physical base address
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Size of the backing store in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the backing store is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Translate a physical range into a backing-store range
    fn range(&self, addr: u32, len: usize) -> Option<std::ops::Range<usize>> {
        let start = addr.checked_sub(self.base)? as usize;
        let end = start.checked_add(len)?;
        (end <= self.data.len()).then_some(start..end)
    }

    /// Mutable access to a physical range
    ///
    /// Returns `None` if any part of the range is outside this memory.
    pub fn physical_slice_mut(&mut self, addr: u32, len: usize) -> Option<&mut [u8]> {
        let range = self.range(addr, len)?;
        Some(&mut self.data[range])
    }

    /// Copy bytes into guest memory
    ///
    /// Writes that fall outside the mapped range are logged and dropped.
    pub fn write_bytes(&mut self, addr: u32, bytes: &[u8]) {
        match self.physical_slice_mut(addr, bytes.len()) {
            Some(dest) => dest.copy_from_slice(bytes),
            None => log::warn!(
                "FlatMemory: write of {} bytes to unmapped 0x{:08X}",
                bytes.len(),
                addr
            ),
        }
    }

    /// Read an 8-bit value (0 when unmapped)
    pub fn read8(&self, addr: u32) -> u8 {
        self.physical_slice(addr, 1).map_or(0, |b| b[0])
    }

    /// Read a little-endian 16-bit value (0 when unmapped)
    pub fn read16(&self, addr: u32) -> u16 {
        self.physical_slice(addr, 2)
            .map_or(0, |b| u16::from_le_bytes([b[0], b[1]]))
    }

    /// Write an 8-bit value
    pub fn write8(&mut self, addr: u32, value: u8) {
        self.write_bytes(addr, &[value]);
    }

    /// Write a little-endian 16-bit value
    pub fn write16(&mut self, addr: u32, value: u16) {
        self.write_bytes(addr, &value.to_le_bytes());
    }
}

impl GuestMemory for FlatMemory {
    fn physical_slice(&self, addr: u32, len: usize) -> Option<&[u8]> {
        let range = self.range(addr, len)?;
        Some(&self.data[range])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_zeroed() {
        let mem = FlatMemory::new(0x1000, 16);
        assert_eq!(mem.len(), 16);
        assert_eq!(mem.physical_slice(0x1000, 16), Some(&[0u8; 16][..]));
    }

    #[test]
    fn test_out_of_range_is_none() {
        let mem = FlatMemory::new(0x1000, 16);
        assert!(mem.physical_slice(0x0FFF, 1).is_none());
        assert!(mem.physical_slice(0x100F, 2).is_none());
        assert!(mem.physical_slice(0x1010, 0).is_some());
        assert!(mem.physical_slice(u32::MAX, usize::MAX).is_none());
    }

    #[test]
    fn test_write_and_read_back() {
        let mut mem = FlatMemory::new(FlatMemory::FCRAM_BASE, 0x100);
        mem.write8(0x2000_0000, 0xAB);
        mem.write16(0x2000_0002, 0xBEEF);
        assert_eq!(mem.read8(0x2000_0000), 0xAB);
        assert_eq!(mem.read16(0x2000_0002), 0xBEEF);
        assert_eq!(mem.read16(0x3000_0000), 0);
    }

    #[test]
    fn test_unmapped_write_is_dropped() {
        let mut mem = FlatMemory::new(0x1000, 4);
        mem.write_bytes(0x1002, &[1, 2, 3, 4]);
        assert_eq!(mem.physical_slice(0x1000, 4), Some(&[0u8; 4][..]));
    }
}
