// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Flash region accessor abstractions for SUIT storage backends
//! OWNERS: @runtime
//! STATUS: Functional (host-first)
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below + downstream crates (suit-storage, suit-stream)
//!
//! PUBLIC API:
//!   - FlashDevice: read/write/erase primitives over a byte-addressed device
//!   - Partition: named, bounds-checked window on a device
//!   - MemFlash: in-memory NOR emulation (writes only clear bits)
//!   - FileFlash (std): MemFlash persisted to a host file
//!
//! DEPENDENCIES:
//!   - thiserror: error display

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;

#[cfg(feature = "std")]
mod file;

#[cfg(feature = "std")]
pub use file::FileFlash;

/// Value of every byte after an erase.
pub const ERASED_BYTE: u8 = 0xFF;

/// Flash device error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FlashError {
    /// Read/write/erase failed.
    #[error("flash i/o error")]
    IoError,
    /// Access outside the device or partition.
    #[error("flash access out of range")]
    OutOfRange,
    /// Erase not aligned to the erase block size.
    #[error("flash erase not aligned to erase block")]
    Unaligned,
}

/// Abstract flash device.
pub trait FlashDevice {
    /// Total size in bytes.
    fn size(&self) -> usize;

    /// Erase granularity in bytes.
    fn erase_block_size(&self) -> usize;

    /// Read `buf.len()` bytes starting at `offset`.
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Program `data` at `offset`. The target range is expected to be erased.
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError>;

    /// Erase `len` bytes at `offset`; both must be erase-block aligned.
    fn erase(&mut self, offset: usize, len: usize) -> Result<(), FlashError>;

    /// Flush all pending writes to durable storage.
    fn sync(&mut self) -> Result<(), FlashError> {
        Ok(())
    }
}

impl<F: FlashDevice + ?Sized> FlashDevice for &mut F {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn erase_block_size(&self) -> usize {
        (**self).erase_block_size()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(offset, buf)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        (**self).write(offset, data)
    }

    fn erase(&mut self, offset: usize, len: usize) -> Result<(), FlashError> {
        (**self).erase(offset, len)
    }

    fn sync(&mut self) -> Result<(), FlashError> {
        (**self).sync()
    }
}

/// Rounds `value` up to a multiple of `block`.
pub fn align_up(value: usize, block: usize) -> usize {
    if block == 0 {
        return value;
    }
    value.div_ceil(block) * block
}

/// Reads `len` bytes into a fresh buffer. The range is checked against the device size
/// before anything is allocated.
pub fn read_vec<F: FlashDevice + ?Sized>(
    device: &F,
    offset: usize,
    len: usize,
) -> Result<Vec<u8>, FlashError> {
    match offset.checked_add(len) {
        Some(end) if end <= device.size() => {}
        _ => return Err(FlashError::OutOfRange),
    }
    let mut buf = vec![0u8; len];
    device.read(offset, &mut buf)?;
    Ok(buf)
}

/// Returns true if every byte equals the erased value.
pub fn is_erased(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| *b == ERASED_BYTE)
}

/// Named, fixed window on a flash device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub name: &'static str,
    pub offset: usize,
    pub size: usize,
}

impl Partition {
    pub const fn new(name: &'static str, offset: usize, size: usize) -> Self {
        Self { name, offset, size }
    }

    /// First byte past the partition.
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    /// True if `[address, address + len)` lies inside the partition.
    pub fn contains(&self, address: usize, len: usize) -> bool {
        match address.checked_add(len) {
            Some(end) => address >= self.offset && end <= self.end(),
            None => false,
        }
    }

    /// Translates a partition-relative range to a device offset.
    pub fn check(&self, relative: usize, len: usize) -> Result<usize, FlashError> {
        let end = relative.checked_add(len).ok_or(FlashError::OutOfRange)?;
        if end > self.size {
            return Err(FlashError::OutOfRange);
        }
        Ok(self.offset + relative)
    }
}

/// In-memory NOR flash emulation for tests and host runs.
///
/// Programming can only clear bits, so rewriting a location without an erase
/// yields `old & new`, exactly like the real part.
pub struct MemFlash {
    erase_block_size: usize,
    data: Vec<u8>,
    writes_left: Option<usize>,
}

impl MemFlash {
    /// Creates a fully erased device.
    pub fn new(size: usize, erase_block_size: usize) -> Self {
        Self { erase_block_size, data: vec![ERASED_BYTE; size], writes_left: None }
    }

    /// Creates a device from an existing image.
    pub fn from_image(image: Vec<u8>, erase_block_size: usize) -> Self {
        Self { erase_block_size, data: image, writes_left: None }
    }

    /// Get raw access to storage (for corruption tests and fixtures).
    pub fn raw_storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Read-only view of the whole device.
    pub fn raw_storage(&self) -> &[u8] {
        &self.data
    }

    /// Lets the next `count` write/erase calls succeed, then fails all later ones.
    /// `None` disables the fault.
    pub fn fail_writes_after(&mut self, count: Option<usize>) {
        self.writes_left = count;
    }

    fn consume_write(&mut self) -> Result<(), FlashError> {
        match self.writes_left.as_mut() {
            Some(0) => Err(FlashError::IoError),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn range(&self, offset: usize, len: usize) -> Result<core::ops::Range<usize>, FlashError> {
        let end = offset.checked_add(len).ok_or(FlashError::OutOfRange)?;
        if end > self.data.len() {
            return Err(FlashError::OutOfRange);
        }
        Ok(offset..end)
    }
}

impl FlashDevice for MemFlash {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn erase_block_size(&self) -> usize {
        self.erase_block_size
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        let range = self.range(offset, data.len())?;
        self.consume_write()?;
        for (dst, src) in self.data[range].iter_mut().zip(data) {
            *dst &= *src;
        }
        Ok(())
    }

    fn erase(&mut self, offset: usize, len: usize) -> Result<(), FlashError> {
        if offset % self.erase_block_size != 0 || len % self.erase_block_size != 0 {
            return Err(FlashError::Unaligned);
        }
        let range = self.range(offset, len)?;
        self.consume_write()?;
        self.data[range].fill(ERASED_BYTE);
        Ok(())
    }
}
