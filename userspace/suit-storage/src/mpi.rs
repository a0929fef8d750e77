// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Manifest Policy Index (MPI) record codec and validation
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1 wire format)
//! TEST_COVERAGE: Unit + property tests below
//!
//! Wire format (48 bytes, followed by a 32-byte SHA-256 over those bytes):
//!   [0]      version (0x01)
//!   [1]      downgrade prevention (0x01 disabled, 0x02 enabled)
//!   [2]      independent updateability (0x01 denied, 0x02 allowed)
//!   [3]      signature check (0x01 disabled, 0x02 on update, 0x03 on update and boot)
//!   [4..16]  reserved, unconstrained
//!   [16..32] vendor UUID
//!   [32..48] class UUID

use alloc::vec::Vec;

use sha2::{Digest, Sha256};

use crate::class_id::{
    ManifestClassId, ManifestRole, NORDIC_SDFW_CLASS_ID, NORDIC_SYSCTRL_CLASS_ID,
    NORDIC_TOP_CLASS_ID, NORDIC_VENDOR_ID,
};

// ============================================================================
// Constants (MPI v1)
// ============================================================================

pub const MPI_VERSION: u8 = 0x01;
pub const MPI_RECORD_SIZE: usize = 48;
pub const MPI_DIGEST_SIZE: usize = 32;
/// Single record followed by its digest.
pub const MPI_SLOT_WITH_DIGEST_SIZE: usize = MPI_RECORD_SIZE + MPI_DIGEST_SIZE;

/// Provisioned application MPI slots, in area order.
pub const APP_MPI_ROLES: [ManifestRole; 5] = [
    ManifestRole::AppRoot,
    ManifestRole::AppRecovery,
    ManifestRole::AppLocal1,
    ManifestRole::AppLocal2,
    ManifestRole::AppLocal3,
];

/// Provisioned radio MPI slots, in area order.
pub const RAD_MPI_ROLES: [ManifestRole; 3] =
    [ManifestRole::RadRecovery, ManifestRole::RadLocal1, ManifestRole::RadLocal2];

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MpiError {
    /// Never programmed (all 0xFF).
    #[error("mpi area erased")]
    Erased,
    #[error("mpi digest mismatch")]
    DigestMismatch,
    #[error("unsupported mpi version {0:#04x}")]
    UnsupportedVersion(u8),
    #[error("invalid mpi {field} value {value:#04x}")]
    InvalidPolicy { field: &'static str, value: u8 },
    #[error("mpi length {actual}, expected {expected}")]
    Length { expected: usize, actual: usize },
    /// Class id already claimed by another slot.
    #[error("duplicate manifest class id")]
    DuplicateClass,
}

// ============================================================================
// Policies
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DowngradePrevention {
    Disabled = 0x01,
    Enabled = 0x02,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IndependentUpdate {
    Denied = 0x01,
    Allowed = 0x02,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SignatureCheck {
    Disabled = 0x01,
    EnabledOnUpdate = 0x02,
    EnabledOnUpdateAndBoot = 0x03,
}

impl DowngradePrevention {
    fn from_u8(value: u8) -> Result<Self, MpiError> {
        match value {
            0x01 => Ok(Self::Disabled),
            0x02 => Ok(Self::Enabled),
            _ => Err(MpiError::InvalidPolicy { field: "downgrade prevention", value }),
        }
    }
}

impl IndependentUpdate {
    fn from_u8(value: u8) -> Result<Self, MpiError> {
        match value {
            0x01 => Ok(Self::Denied),
            0x02 => Ok(Self::Allowed),
            _ => Err(MpiError::InvalidPolicy { field: "independent updateability", value }),
        }
    }
}

impl SignatureCheck {
    fn from_u8(value: u8) -> Result<Self, MpiError> {
        match value {
            0x01 => Ok(Self::Disabled),
            0x02 => Ok(Self::EnabledOnUpdate),
            0x03 => Ok(Self::EnabledOnUpdateAndBoot),
            _ => Err(MpiError::InvalidPolicy { field: "signature check", value }),
        }
    }
}

// ============================================================================
// Record
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpiRecord {
    pub downgrade_prevention: DowngradePrevention,
    pub independent_update: IndependentUpdate,
    pub signature_check: SignatureCheck,
    pub reserved: [u8; 12],
    pub vendor_id: [u8; 16],
    pub class_id: ManifestClassId,
}

impl MpiRecord {
    /// Record with reserved bytes left erased.
    pub fn new(
        vendor_id: [u8; 16],
        class_id: ManifestClassId,
        downgrade_prevention: DowngradePrevention,
        independent_update: IndependentUpdate,
        signature_check: SignatureCheck,
    ) -> Self {
        Self {
            downgrade_prevention,
            independent_update,
            signature_check,
            reserved: [0xFF; 12],
            vendor_id,
            class_id,
        }
    }

    pub fn encode(&self) -> [u8; MPI_RECORD_SIZE] {
        let mut out = [0u8; MPI_RECORD_SIZE];
        out[0] = MPI_VERSION;
        out[1] = self.downgrade_prevention as u8;
        out[2] = self.independent_update as u8;
        out[3] = self.signature_check as u8;
        out[4..16].copy_from_slice(&self.reserved);
        out[16..32].copy_from_slice(&self.vendor_id);
        out[32..48].copy_from_slice(self.class_id.as_bytes());
        out
    }

    /// Decodes a bare 48-byte record (no digest).
    pub fn decode(bytes: &[u8]) -> Result<Self, MpiError> {
        if bytes.len() != MPI_RECORD_SIZE {
            return Err(MpiError::Length { expected: MPI_RECORD_SIZE, actual: bytes.len() });
        }
        if bytes[0] != MPI_VERSION {
            return Err(MpiError::UnsupportedVersion(bytes[0]));
        }
        let downgrade_prevention = DowngradePrevention::from_u8(bytes[1])?;
        let independent_update = IndependentUpdate::from_u8(bytes[2])?;
        let signature_check = SignatureCheck::from_u8(bytes[3])?;

        let mut reserved = [0u8; 12];
        reserved.copy_from_slice(&bytes[4..16]);
        let mut vendor_id = [0u8; 16];
        vendor_id.copy_from_slice(&bytes[16..32]);
        let mut class_id = [0u8; 16];
        class_id.copy_from_slice(&bytes[32..48]);

        Ok(Self {
            downgrade_prevention,
            independent_update,
            signature_check,
            reserved,
            vendor_id,
            class_id: ManifestClassId::new(class_id),
        })
    }

    /// Record followed by its SHA-256.
    pub fn encode_with_digest(&self) -> [u8; MPI_SLOT_WITH_DIGEST_SIZE] {
        let mut out = [0u8; MPI_SLOT_WITH_DIGEST_SIZE];
        let record = self.encode();
        out[..MPI_RECORD_SIZE].copy_from_slice(&record);
        out[MPI_RECORD_SIZE..].copy_from_slice(&digest(&record));
        out
    }

    pub fn is_independent_update_allowed(&self) -> bool {
        self.independent_update == IndependentUpdate::Allowed
    }

    pub fn is_downgrade_prevented(&self) -> bool {
        self.downgrade_prevention == DowngradePrevention::Enabled
    }

    pub fn is_signature_check_disabled(&self) -> bool {
        self.signature_check == SignatureCheck::Disabled
    }
}

pub fn digest(bytes: &[u8]) -> [u8; MPI_DIGEST_SIZE] {
    Sha256::digest(bytes).into()
}

fn is_erased(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| *b == 0xFF)
}

/// Validates one record followed by its digest.
///
/// An area that was never programmed is reported as [`MpiError::Erased`], distinct from a
/// programmed area whose digest or contents are wrong.
pub fn validate(area: &[u8]) -> Result<MpiRecord, MpiError> {
    if area.len() != MPI_SLOT_WITH_DIGEST_SIZE {
        return Err(MpiError::Length { expected: MPI_SLOT_WITH_DIGEST_SIZE, actual: area.len() });
    }
    if is_erased(area) {
        return Err(MpiError::Erased);
    }
    let (record, stored) = area.split_at(MPI_RECORD_SIZE);
    if digest(record).as_slice() != stored {
        return Err(MpiError::DigestMismatch);
    }
    MpiRecord::decode(record)
}

// ============================================================================
// Multi-slot areas
// ============================================================================

/// State of one slot inside a digest-valid area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpiSlot {
    Erased,
    Valid(MpiRecord),
    Invalid(MpiError),
}

impl MpiSlot {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if is_erased(bytes) {
            return Self::Erased;
        }
        match MpiRecord::decode(bytes) {
            Ok(record) => Self::Valid(record),
            Err(err) => Self::Invalid(err),
        }
    }
}

/// Size of an area holding `slots` records plus the trailing digest.
pub const fn area_size(slots: usize) -> usize {
    slots * MPI_RECORD_SIZE + MPI_DIGEST_SIZE
}

/// Builds a provisioned area image; `None` leaves a slot erased.
pub fn encode_area(slots: &[Option<MpiRecord>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(area_size(slots.len()));
    for slot in slots {
        match slot {
            Some(record) => out.extend_from_slice(&record.encode()),
            None => out.extend_from_slice(&[0xFF; MPI_RECORD_SIZE]),
        }
    }
    let area_digest = digest(&out);
    out.extend_from_slice(&area_digest);
    out
}

/// Splits a digest-valid area into slot states.
pub fn decode_area(area: &[u8]) -> Vec<MpiSlot> {
    let body = &area[..area.len().saturating_sub(MPI_DIGEST_SIZE)];
    body.chunks_exact(MPI_RECORD_SIZE).map(MpiSlot::from_bytes).collect()
}

// ============================================================================
// Built-in secure-domain records
// ============================================================================

/// Records compiled into the firmware for the secure-domain classes.
pub fn builtin_records() -> [(ManifestRole, MpiRecord); 3] {
    [
        (
            ManifestRole::SecTop,
            MpiRecord::new(
                NORDIC_VENDOR_ID,
                NORDIC_TOP_CLASS_ID,
                DowngradePrevention::Enabled,
                IndependentUpdate::Allowed,
                SignatureCheck::EnabledOnUpdateAndBoot,
            ),
        ),
        (
            ManifestRole::SecSdfw,
            MpiRecord::new(
                NORDIC_VENDOR_ID,
                NORDIC_SDFW_CLASS_ID,
                DowngradePrevention::Enabled,
                IndependentUpdate::Denied,
                SignatureCheck::EnabledOnUpdateAndBoot,
            ),
        ),
        (
            ManifestRole::SecSysctrl,
            MpiRecord::new(
                NORDIC_VENDOR_ID,
                NORDIC_SYSCTRL_CLASS_ID,
                DowngradePrevention::Enabled,
                IndependentUpdate::Denied,
                SignatureCheck::EnabledOnUpdateAndBoot,
            ),
        ),
    ]
}

// ============================================================================
// Tests
// ============================================================================
