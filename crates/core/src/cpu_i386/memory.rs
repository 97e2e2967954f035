//! Flat, fixed-size guest memory.
//!
//! There is no segmentation: every address is a plain offset into one byte
//! buffer. Unlike real hardware, an access past the end of the buffer is a
//! reported fault (`CpuError::OutOfBounds`) rather than a wrap or open bus.

use super::CpuError;
use crate::logging::{log, LogCategory, LogLevel};

/// Conventional memory size (1 MiB)
pub const DEFAULT_MEMORY_SIZE: usize = 1024 * 1024;

/// Boot sectors are loaded at this offset
pub const BOOT_LOAD_ADDRESS: u32 = 0x7C00;

/// Byte-addressable guest memory
#[derive(Debug, Clone)]
pub struct FlatMemory {
    data: Vec<u8>,
}

impl FlatMemory {
    /// Allocate `size` zeroed bytes
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }

    /// Size of the buffer in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether `addr` addresses a byte inside the buffer
    #[inline]
    pub fn contains(&self, addr: u32) -> bool {
        (addr as usize) < self.data.len()
    }

    /// Copy `image` into memory starting at `addr`
    pub fn load(&mut self, addr: u32, image: &[u8]) -> Result<(), CpuError> {
        let start = addr as usize;
        let end = start
            .checked_add(image.len())
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| self.out_of_bounds(addr.wrapping_add(image.len() as u32)))?;
        self.data[start..end].copy_from_slice(image);
        Ok(())
    }

    /// Zero the whole buffer
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Raw view of the buffer
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn read8(&self, addr: u32) -> Result<u8, CpuError> {
        self.data
            .get(addr as usize)
            .copied()
            .ok_or_else(|| self.out_of_bounds(addr))
    }

    #[inline]
    pub fn write8(&mut self, addr: u32, val: u8) -> Result<(), CpuError> {
        let size = self.data.len();
        match self.data.get_mut(addr as usize) {
            Some(byte) => {
                *byte = val;
                Ok(())
            }
            None => Err(Self::fault(addr, size)),
        }
    }

    /// Little-endian 32-bit read, as four byte reads at addr..addr+3
    pub fn read32(&self, addr: u32) -> Result<u32, CpuError> {
        let mut value = 0u32;
        for i in 0..4 {
            value |= (self.read8(addr.wrapping_add(i))? as u32) << (i * 8);
        }
        Ok(value)
    }

    /// Little-endian 32-bit write, as four byte writes at addr..addr+3
    pub fn write32(&mut self, addr: u32, val: u32) -> Result<(), CpuError> {
        for i in 0..4 {
            self.write8(addr.wrapping_add(i), (val >> (i * 8)) as u8)?;
        }
        Ok(())
    }

    fn out_of_bounds(&self, addr: u32) -> CpuError {
        Self::fault(addr, self.data.len())
    }

    fn fault(addr: u32, size: usize) -> CpuError {
        log(LogCategory::Bus, LogLevel::Error, || {
            format!(
                "Bus: access to {:08X} outside of {:#X}-byte memory",
                addr, size
            )
        });
        CpuError::OutOfBounds {
            address: addr,
            size: size as u32,
        }
    }
}

impl Default for FlatMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_SIZE)
    }
}
