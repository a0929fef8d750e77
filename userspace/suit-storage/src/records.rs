// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Small CRC-protected records: update candidate, recovery reports, storage flags
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1 record formats)
//! TEST_COVERAGE: Unit tests below
//!
//! All integers are little-endian. A record whose magic does not match is treated as absent;
//! a record with a valid magic but a bad CRC is reported as `Corrupted`.

use alloc::vec::Vec;

use bitflags::bitflags;

use crate::StorageError;

// ============================================================================
// Update candidate
// ============================================================================

/// Update candidate magic.
const CANDIDATE_MAGIC: u32 = 0x5555_AAAA;

/// Envelope region plus up to five DFU caches.
pub const MAX_UPDATE_REGIONS: usize = 6;

const REGION_SIZE: usize = 16;

/// magic(4) + count(4) + regions + crc(4)
pub const CANDIDATE_RECORD_SIZE: usize = 8 + MAX_UPDATE_REGIONS * REGION_SIZE + 4;

/// Address range in the device address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub address: usize,
    pub size: usize,
}

impl MemoryRegion {
    pub const fn new(address: usize, size: usize) -> Self {
        Self { address, size }
    }

    /// Zero or all-ones address/size.
    pub fn is_unset(&self) -> bool {
        self.address == 0 || self.size == 0 || self.address == usize::MAX || self.size == usize::MAX
    }
}

pub fn encode_candidate(regions: &[MemoryRegion]) -> Result<Vec<u8>, StorageError> {
    if regions.is_empty() {
        return Err(StorageError::InvalidArgument);
    }
    if regions.len() > MAX_UPDATE_REGIONS {
        return Err(StorageError::TooManyRegions);
    }
    let mut out = Vec::with_capacity(CANDIDATE_RECORD_SIZE);
    out.extend_from_slice(&CANDIDATE_MAGIC.to_le_bytes());
    out.extend_from_slice(&(regions.len() as u32).to_le_bytes());
    for region in regions {
        out.extend_from_slice(&(region.address as u64).to_le_bytes());
        out.extend_from_slice(&(region.size as u64).to_le_bytes());
    }
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

pub fn decode_candidate(bytes: &[u8]) -> Result<Vec<MemoryRegion>, StorageError> {
    if bytes.len() < 8 || read_u32(bytes, 0) != CANDIDATE_MAGIC {
        return Err(StorageError::NotFound);
    }
    let count = read_u32(bytes, 4) as usize;
    if count == 0 || count > MAX_UPDATE_REGIONS {
        return Err(StorageError::Corrupted);
    }
    let body_len = 8 + count * REGION_SIZE;
    if bytes.len() < body_len + 4 {
        return Err(StorageError::Corrupted);
    }
    if crc32fast::hash(&bytes[..body_len]) != read_u32(bytes, body_len) {
        return Err(StorageError::Corrupted);
    }
    (0..count)
        .map(|i| {
            let at = 8 + i * REGION_SIZE;
            Ok(MemoryRegion {
                address: to_usize(read_u64(bytes, at))?,
                size: to_usize(read_u64(bytes, at + 8))?,
            })
        })
        .collect()
}

/// Stored widths are 64-bit; narrower targets reject what they cannot address.
fn to_usize(value: u64) -> Result<usize, StorageError> {
    usize::try_from(value).map_err(|_| StorageError::Corrupted)
}

// ============================================================================
// Reports
// ============================================================================

/// Report record magic: "SRPT"
const REPORT_MAGIC: u32 = 0x5352_5054;

pub const REPORT_SLOTS: usize = 2;
pub const MAX_REPORT_SIZE: usize = 148;

/// magic(4) + len(2) + reserved(2) + payload + crc(4)
pub const REPORT_AREA_SIZE: usize = 8 + MAX_REPORT_SIZE + 4;

pub fn encode_report(payload: &[u8]) -> Result<Vec<u8>, StorageError> {
    if payload.is_empty() || payload.len() > MAX_REPORT_SIZE {
        return Err(StorageError::InvalidArgument);
    }
    let mut out = Vec::with_capacity(8 + payload.len() + 4);
    out.extend_from_slice(&REPORT_MAGIC.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(&[0u8; 2]);
    out.extend_from_slice(payload);
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

pub fn decode_report(bytes: &[u8]) -> Result<Vec<u8>, StorageError> {
    if bytes.len() < 8 || read_u32(bytes, 0) != REPORT_MAGIC {
        return Err(StorageError::NotFound);
    }
    let len = u16::from_le_bytes([bytes[4], bytes[5]]) as usize;
    if len == 0 || len > MAX_REPORT_SIZE || bytes.len() < 8 + len + 4 {
        return Err(StorageError::Corrupted);
    }
    if crc32fast::hash(&bytes[..8 + len]) != read_u32(bytes, 8 + len) {
        return Err(StorageError::Corrupted);
    }
    Ok(bytes[8..8 + len].to_vec())
}

// ============================================================================
// Flags
// ============================================================================

/// Flags record magic: "SFLG"
const FLAGS_MAGIC: u32 = 0x5346_4C47;

pub const FLAGS_RECORD_SIZE: usize = 12;

bitflags! {
    /// Persisted boot flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StorageFlags: u32 {
        /// Boot into the recovery manifest.
        const RECOVERY = 0x1;
        /// Boot into foreground DFU (recovery image as updater).
        const FOREGROUND_DFU = 0x2;
    }
}

pub fn encode_flags(flags: StorageFlags) -> [u8; FLAGS_RECORD_SIZE] {
    let mut out = [0u8; FLAGS_RECORD_SIZE];
    out[0..4].copy_from_slice(&FLAGS_MAGIC.to_le_bytes());
    out[4..8].copy_from_slice(&flags.bits().to_le_bytes());
    let crc = crc32fast::hash(&out[..8]);
    out[8..12].copy_from_slice(&crc.to_le_bytes());
    out
}

/// Erased or unreadable records yield no flags.
pub fn decode_flags(bytes: &[u8]) -> StorageFlags {
    if bytes.len() < FLAGS_RECORD_SIZE || read_u32(bytes, 0) != FLAGS_MAGIC {
        return StorageFlags::empty();
    }
    if crc32fast::hash(&bytes[..8]) != read_u32(bytes, 8) {
        return StorageFlags::empty();
    }
    StorageFlags::from_bits_truncate(read_u32(bytes, 4))
}

// ============================================================================
// Helpers
// ============================================================================

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}
