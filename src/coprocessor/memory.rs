// SPDX-License-Identifier: GPL-3.0-only

//! DMA-visible host memory
//!
//! Host allocations live in a flat effective-address space so that a kernel
//! can be handed nothing but an integer (through its mailbox) and still reach
//! the data through its DMA engine. Every allocation starts on a
//! [`HOST_ALLOC_ALIGN`] boundary and is released when its [`HostBuffer`]
//! handle drops.

use crate::constants::HOST_ALLOC_ALIGN;
use crate::errors::MemoryError;
use bytemuck::Pod;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::trace;

/// First address handed out. Keeps every valid address clear of the mailbox
/// vocabulary words.
const ADDRESS_SPACE_BASE: u64 = 0x1000_0000;

/// Unmapped gap left between two allocations
const GUARD_GAP: u64 = HOST_ALLOC_ALIGN;

/// Address of a byte in host memory as seen by the DMA engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EffectiveAddress(pub u64);

impl EffectiveAddress {
    pub fn offset(self, bytes: usize) -> Self {
        EffectiveAddress(self.0 + bytes as u64)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Round down to a multiple of `align` (power of two)
    pub fn align_down(self, align: u64) -> Self {
        EffectiveAddress(self.0 & !(align - 1))
    }

    /// Byte offset of this address inside its `align` sized block
    pub fn misalignment(self, align: u64) -> usize {
        (self.0 & (align - 1)) as usize
    }
}

impl fmt::Display for EffectiveAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

struct Region {
    bytes: RwLock<Box<[u8]>>,
}

struct Arena {
    next: u64,
    regions: BTreeMap<u64, Arc<Region>>,
}

/// Shared handle to the host address space
#[derive(Clone)]
pub struct HostMemory {
    arena: Arc<RwLock<Arena>>,
}

impl Default for HostMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HostMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let regions = self.arena.read().map(|a| a.regions.len()).unwrap_or(0);
        f.debug_struct("HostMemory").field("regions", &regions).finish()
    }
}

impl HostMemory {
    pub fn new() -> Self {
        Self {
            arena: Arc::new(RwLock::new(Arena {
                next: ADDRESS_SPACE_BASE,
                regions: BTreeMap::new(),
            })),
        }
    }

    /// Allocate `len` zeroed bytes, aligned to [`HOST_ALLOC_ALIGN`]
    pub fn alloc(&self, len: usize) -> Result<HostBuffer, MemoryError> {
        let mut arena = self.arena.write().map_err(|_| MemoryError::Poisoned)?;
        let base = arena.next;
        let span = (len.max(1) as u64)
            .checked_add(HOST_ALLOC_ALIGN - 1)
            .map(|v| v & !(HOST_ALLOC_ALIGN - 1))
            .and_then(|v| v.checked_add(GUARD_GAP))
            .ok_or(MemoryError::OutOfAddressSpace(len))?;
        arena.next = base
            .checked_add(span)
            .ok_or(MemoryError::OutOfAddressSpace(len))?;
        arena.regions.insert(
            base,
            Arc::new(Region {
                bytes: RwLock::new(vec![0u8; len].into_boxed_slice()),
            }),
        );
        trace!(addr = %EffectiveAddress(base), len, "Host allocation");

        Ok(HostBuffer {
            memory: self.clone(),
            addr: EffectiveAddress(base),
            len,
        })
    }

    /// Allocate a buffer holding the bytes of `value`
    pub fn alloc_pod<T: Pod>(&self, value: &T) -> Result<HostBuffer, MemoryError> {
        let bytes = bytemuck::bytes_of(value);
        let buffer = self.alloc(bytes.len())?;
        buffer.write_at(0, bytes)?;
        Ok(buffer)
    }

    fn region_for(
        &self,
        addr: EffectiveAddress,
        len: usize,
    ) -> Result<(Arc<Region>, usize), MemoryError> {
        let invalid = MemoryError::InvalidAddress { addr, len };
        let arena = self.arena.read().map_err(|_| MemoryError::Poisoned)?;
        let (base, region) = arena
            .regions
            .range(..=addr.0)
            .next_back()
            .ok_or(invalid.clone())?;
        let offset = (addr.0 - base) as usize;
        let region_len = region.bytes.read().map_err(|_| MemoryError::Poisoned)?.len();
        if offset.checked_add(len).is_none_or(|end| end > region_len) {
            return Err(invalid);
        }
        Ok((Arc::clone(region), offset))
    }

    /// Copy `dst.len()` bytes starting at `addr` into `dst`
    pub fn read(&self, addr: EffectiveAddress, dst: &mut [u8]) -> Result<(), MemoryError> {
        let (region, offset) = self.region_for(addr, dst.len())?;
        let bytes = region.bytes.read().map_err(|_| MemoryError::Poisoned)?;
        dst.copy_from_slice(&bytes[offset..offset + dst.len()]);
        Ok(())
    }

    /// Copy `src` to host memory at `addr`
    pub fn write(&self, addr: EffectiveAddress, src: &[u8]) -> Result<(), MemoryError> {
        let (region, offset) = self.region_for(addr, src.len())?;
        let mut bytes = region.bytes.write().map_err(|_| MemoryError::Poisoned)?;
        bytes[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Set `len` bytes at `addr` to `value`
    pub fn fill(&self, addr: EffectiveAddress, len: usize, value: u8) -> Result<(), MemoryError> {
        let (region, offset) = self.region_for(addr, len)?;
        let mut bytes = region.bytes.write().map_err(|_| MemoryError::Poisoned)?;
        bytes[offset..offset + len].fill(value);
        Ok(())
    }

    /// Number of live allocations
    pub fn live_allocations(&self) -> usize {
        self.arena.read().map(|a| a.regions.len()).unwrap_or(0)
    }

    fn free(&self, addr: EffectiveAddress) {
        if let Ok(mut arena) = self.arena.write() {
            arena.regions.remove(&addr.0);
            trace!(addr = %addr, "Host allocation released");
        }
    }
}

/// Owned host allocation; released on drop
pub struct HostBuffer {
    memory: HostMemory,
    addr: EffectiveAddress,
    len: usize,
}

impl fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostBuffer({}, {} bytes)", self.addr, self.len)
    }
}

impl HostBuffer {
    pub fn addr(&self) -> EffectiveAddress {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn write_at(&self, offset: usize, src: &[u8]) -> Result<(), MemoryError> {
        self.memory.write(self.addr.offset(offset), src)
    }

    pub fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<(), MemoryError> {
        self.memory.read(self.addr.offset(offset), dst)
    }

    /// Overwrite the start of the buffer with the bytes of `value`
    pub fn write_pod<T: Pod>(&self, value: &T) -> Result<(), MemoryError> {
        self.write_at(0, bytemuck::bytes_of(value))
    }

    pub fn fill(&self, value: u8) -> Result<(), MemoryError> {
        self.memory.fill(self.addr, self.len, value)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, MemoryError> {
        let mut out = vec![0u8; self.len];
        self.read_at(0, &mut out)?;
        Ok(out)
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        self.memory.free(self.addr);
    }
}
