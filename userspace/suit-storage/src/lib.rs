// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: SUIT storage engine (MPI, installed envelopes, update candidate, reports, NVV)
//! OWNERS: @runtime
//! STATUS: Functional (host-first)
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit + property tests per module, integration tests in tests/suit_host
//!
//! PUBLIC API:
//!   - SuitStorage: init/provision, envelope install and lookup, candidate, reports, flags, NVV
//!   - StorageLayout: erase-block aligned placement of every area on the device
//!   - mpi: Manifest Policy Index record codec and validation
//!   - BootSnapshot: plain-value view of persisted state used to derive the execution mode
//!   - StorageError: Error types
//!
//! DEPENDENCIES:
//!   - flash: FlashDevice abstraction
//!   - sha2: SHA-256 digests of MPI and NVV areas
//!   - crc32fast: CRC32 of envelope, candidate, report and flag records
//!   - bitflags: persisted storage flags
//!   - log: lifecycle and recovery logging

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

pub mod class_id;
pub mod digest_area;
mod engine;
pub mod envelope;
pub mod layout;
pub mod mpi;
pub mod nvv;
pub mod records;
mod snapshot;

pub use class_id::{ManifestClassId, ManifestDomain, ManifestRole};
pub use digest_area::AreaState;
pub use engine::SuitStorage;
pub use layout::StorageLayout;
pub use mpi::{MpiError, MpiRecord};
pub use records::{MemoryRegion, StorageFlags, MAX_REPORT_SIZE, MAX_UPDATE_REGIONS, REPORT_SLOTS};
pub use snapshot::{BootSnapshot, SlotState};

use flash::FlashError;

// ============================================================================
// Error Types
// ============================================================================

/// Storage engine error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Underlying flash operation failed.
    #[error("flash error: {0}")]
    Flash(#[from] FlashError),
    /// Record absent (never written, cleared, or unreadable).
    #[error("record not found")]
    NotFound,
    /// Class id has no valid MPI on this device.
    #[error("unsupported manifest class")]
    UnsupportedClass,
    /// Envelope does not fit into its bank.
    #[error("envelope of {size} bytes exceeds bank capacity {max}")]
    EnvelopeTooLarge { size: usize, max: usize },
    /// Update candidate lists more regions than the record holds.
    #[error("too many update candidate regions")]
    TooManyRegions,
    /// Index outside the report or variable table.
    #[error("index out of bounds")]
    OutOfBounds,
    /// Empty candidate, empty or oversized report, or similar caller error.
    #[error("invalid argument")]
    InvalidArgument,
    /// Stored record failed its integrity check.
    #[error("stored record corrupted")]
    Corrupted,
    /// MPI area could not be authenticated.
    #[error("mpi area authentication failed")]
    Authentication,
    /// Area is not in a writable state.
    #[error("storage area not writable")]
    Io,
}
