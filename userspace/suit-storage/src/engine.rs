// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: SUIT storage engine over a flash device
//! OWNERS: @runtime
//! STATUS: Functional (host-first)
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit + property tests below, tests/suit_host

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use flash::{read_vec, FlashDevice};
use log::{error, info, warn};

use crate::class_id::{ManifestClassId, ManifestDomain, ManifestRole};
use crate::digest_area::{self, digest_valid, AreaState};
use crate::envelope::{payload_offset, read_bank, EnvelopeHeader};
use crate::layout::StorageLayout;
use crate::mpi::{
    self, area_size, builtin_records, MpiError, MpiRecord, MpiSlot, APP_MPI_ROLES, MPI_DIGEST_SIZE,
    RAD_MPI_ROLES,
};
use crate::nvv::{NvvTable, NVV_AREA_SIZE, NVV_BODY_SIZE};
use crate::records::{
    self, MemoryRegion, StorageFlags, CANDIDATE_RECORD_SIZE, FLAGS_RECORD_SIZE, REPORT_AREA_SIZE,
    REPORT_SLOTS,
};
use crate::snapshot::{BootSnapshot, SlotState};
use crate::StorageError;

#[derive(Debug, Clone, Copy)]
struct Installed {
    bank: usize,
    header: EnvelopeHeader,
}

/// SUIT storage engine.
///
/// `init()` must run before class lookups; until then no class is supported.
/// Operations are not internally synchronized; callers serialize mutations.
pub struct SuitStorage<F: FlashDevice> {
    device: F,
    layout: StorageLayout,
    app_area: AreaState,
    rad_area: AreaState,
    /// Provisioned slots in area order.
    slots: Vec<(ManifestRole, SlotState)>,
    builtin: [(ManifestRole, MpiRecord); 3],
    installed: BTreeMap<ManifestRole, Installed>,
}

impl<F: FlashDevice> SuitStorage<F> {
    pub fn new(device: F, layout: StorageLayout) -> Self {
        Self {
            device,
            layout,
            app_area: AreaState::Erased,
            rad_area: AreaState::Erased,
            slots: Vec::new(),
            builtin: builtin_records(),
            installed: BTreeMap::new(),
        }
    }

    // ========================================================================
    // Initialization
    // ========================================================================

    /// Reconciles every protected area with its backup and rebuilds the caches.
    ///
    /// Corrupt or erased MPI areas are not an error here; they are reported through
    /// [`SuitStorage::boot_snapshot`]. Flash failures are.
    pub fn init(&mut self) -> Result<(), StorageError> {
        let app_len = area_size(APP_MPI_ROLES.len());
        let (app_state, app_bytes) = digest_area::recover(
            &mut self.device,
            &self.layout.app_mpi,
            &self.layout.app_mpi_backup,
            app_len,
        )?;
        let rad_len = area_size(RAD_MPI_ROLES.len());
        let (rad_state, rad_bytes) = digest_area::recover(
            &mut self.device,
            &self.layout.rad_mpi,
            &self.layout.rad_mpi_backup,
            rad_len,
        )?;
        self.app_area = app_state;
        self.rad_area = rad_state;

        let mut slots = Vec::with_capacity(APP_MPI_ROLES.len() + RAD_MPI_ROLES.len());
        slots.extend(area_slots(&APP_MPI_ROLES, app_state, &app_bytes));
        slots.extend(area_slots(&RAD_MPI_ROLES, rad_state, &rad_bytes));
        mark_duplicates(&self.builtin, &mut slots);
        self.slots = slots;

        self.init_nvv()?;
        self.load_envelopes()?;

        info!(
            "suit-storage: init app_mpi={:?} rad_mpi={:?} envelopes={}",
            self.app_area,
            self.rad_area,
            self.installed.len()
        );
        Ok(())
    }

    fn init_nvv(&mut self) -> Result<(), StorageError> {
        let (state, _) = digest_area::recover(
            &mut self.device,
            &self.layout.nvv,
            &self.layout.nvv_backup,
            NVV_AREA_SIZE,
        )?;
        if state != AreaState::Valid {
            warn!("suit-storage: nvv area {:?}, loading defaults", state);
            digest_area::commit(
                &mut self.device,
                &self.layout.nvv,
                &self.layout.nvv_backup,
                &NvvTable::default().to_body(),
            )?;
        }
        Ok(())
    }

    fn load_envelopes(&mut self) -> Result<(), StorageError> {
        self.installed.clear();
        for slot in &self.layout.envelopes {
            let Some(class_id) = self.class_for(slot.role) else {
                continue;
            };
            let mut best: Option<Installed> = None;
            for (bank, part) in slot.banks.iter().enumerate() {
                let Some(header) = read_bank(&self.device, part, slot.capacity)? else {
                    continue;
                };
                if header.class_id != class_id {
                    warn!("suit-storage: envelope bank class mismatch for {:?}", slot.role);
                    continue;
                }
                if best.map_or(true, |b| header.generation > b.header.generation) {
                    best = Some(Installed { bank, header });
                }
            }
            if let Some(installed) = best {
                self.installed.insert(slot.role, installed);
            }
        }
        Ok(())
    }

    /// Writes the MPI area of `domain` and re-runs [`SuitStorage::init`].
    ///
    /// `slots` must hold one entry per slot of the area; `None` leaves a slot erased.
    pub fn provision_mpi(
        &mut self,
        domain: ManifestDomain,
        slots: &[Option<MpiRecord>],
    ) -> Result<(), StorageError> {
        let (primary, backup, expected) = match domain {
            ManifestDomain::Application => {
                (self.layout.app_mpi, self.layout.app_mpi_backup, APP_MPI_ROLES.len())
            }
            ManifestDomain::Radio => {
                (self.layout.rad_mpi, self.layout.rad_mpi_backup, RAD_MPI_ROLES.len())
            }
            ManifestDomain::Secure => return Err(StorageError::InvalidArgument),
        };
        if slots.len() != expected {
            return Err(StorageError::InvalidArgument);
        }
        let sealed = mpi::encode_area(slots);
        let body = &sealed[..sealed.len() - MPI_DIGEST_SIZE];
        digest_area::commit(&mut self.device, &primary, &backup, body)?;
        info!("suit-storage: provisioned {:?} mpi", domain);
        self.init()
    }

    // ========================================================================
    // MPI queries
    // ========================================================================

    fn class_for(&self, role: ManifestRole) -> Option<ManifestClassId> {
        self.mpi_for_role(role).map(|record| record.class_id)
    }

    fn mpi_for_role(&self, role: ManifestRole) -> Option<&MpiRecord> {
        self.builtin
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, record)| record)
            .or_else(|| {
                self.slots.iter().find(|(r, _)| *r == role).and_then(|(_, state)| state.record())
            })
    }

    fn all_valid(&self) -> impl Iterator<Item = (ManifestRole, &MpiRecord)> {
        self.builtin.iter().map(|(role, record)| (*role, record)).chain(
            self.slots.iter().filter_map(|(role, state)| state.record().map(|record| (*role, record))),
        )
    }

    /// Role of a supported class.
    pub fn mpi_role(&self, class_id: &ManifestClassId) -> Result<ManifestRole, StorageError> {
        self.all_valid()
            .find(|(_, record)| record.class_id == *class_id)
            .map(|(role, _)| role)
            .ok_or(StorageError::UnsupportedClass)
    }

    pub fn mpi_get(&self, class_id: &ManifestClassId) -> Result<MpiRecord, StorageError> {
        self.all_valid()
            .find(|(_, record)| record.class_id == *class_id)
            .map(|(_, record)| *record)
            .ok_or(StorageError::UnsupportedClass)
    }

    /// Class configured for `role`, if its MPI is valid.
    pub fn mpi_class(&self, role: ManifestRole) -> Option<ManifestClassId> {
        self.class_for(role)
    }

    /// Every class with a valid MPI, built-in classes first.
    pub fn supported_classes(&self) -> Vec<ManifestClassId> {
        self.all_valid().map(|(_, record)| record.class_id).collect()
    }

    // ========================================================================
    // Installed envelopes
    // ========================================================================

    /// Device address and size of the installed envelope payload.
    pub fn installed_envelope_get(
        &self,
        class_id: &ManifestClassId,
    ) -> Result<(usize, usize), StorageError> {
        let role = self.mpi_role(class_id)?;
        let installed = self.installed.get(&role).ok_or(StorageError::NotFound)?;
        let slot = self.layout.envelope_slot(role).ok_or(StorageError::NotFound)?;
        Ok((payload_offset(&slot.banks[installed.bank]), installed.header.len as usize))
    }

    pub fn installed_envelope_read(
        &self,
        class_id: &ManifestClassId,
    ) -> Result<Vec<u8>, StorageError> {
        let (address, size) = self.installed_envelope_get(class_id)?;
        Ok(read_vec(&self.device, address, size)?)
    }

    /// Installs `envelope` for `class_id` into the inactive bank.
    ///
    /// The payload is durable before the header that points at it is programmed; the
    /// previous bank is erased only afterwards.
    pub fn install_envelope(
        &mut self,
        class_id: &ManifestClassId,
        envelope: &[u8],
    ) -> Result<(), StorageError> {
        let role = self.mpi_role(class_id)?;
        let slot = *self.layout.envelope_slot(role).ok_or(StorageError::UnsupportedClass)?;
        if envelope.is_empty() {
            return Err(StorageError::InvalidArgument);
        }
        if envelope.len() > slot.capacity {
            return Err(StorageError::EnvelopeTooLarge { size: envelope.len(), max: slot.capacity });
        }

        let previous = self.installed.get(&role).copied();
        let target = previous.map_or(0, |p| 1 - p.bank);
        let generation = previous.map_or(1, |p| p.header.generation.wrapping_add(1));
        let bank = slot.banks[target];
        let header = EnvelopeHeader::new(generation, *class_id, envelope);

        let result = (|| -> Result<(), StorageError> {
            self.device.erase(bank.offset, bank.size)?;
            self.device.write(payload_offset(&bank), envelope)?;
            self.device.sync()?;
            self.device.write(bank.offset, &header.encode())?;
            self.device.sync()?;
            Ok(())
        })();
        if let Err(err) = result {
            error!("suit-storage: envelope install for {:?} failed: {}", role, err);
            return Err(err);
        }
        self.installed.insert(role, Installed { bank: target, header });

        if let Some(old) = previous {
            let old_bank = slot.banks[old.bank];
            self.device.erase(old_bank.offset, old_bank.size)?;
            self.device.sync()?;
        }
        info!(
            "suit-storage: installed envelope for {:?} ({} bytes, generation {})",
            role,
            envelope.len(),
            generation
        );
        Ok(())
    }

    /// Removes the installed envelope of `class_id`.
    pub fn envelope_erase(&mut self, class_id: &ManifestClassId) -> Result<(), StorageError> {
        let role = self.mpi_role(class_id)?;
        let slot = *self.layout.envelope_slot(role).ok_or(StorageError::UnsupportedClass)?;
        for bank in slot.banks {
            self.device.erase(bank.offset, bank.size)?;
        }
        self.device.sync()?;
        self.installed.remove(&role);
        Ok(())
    }

    // ========================================================================
    // Update candidate
    // ========================================================================

    pub fn update_candidate_get(&self) -> Result<Vec<MemoryRegion>, StorageError> {
        let raw = read_vec(&self.device, self.layout.update_candidate.offset, CANDIDATE_RECORD_SIZE)?;
        records::decode_candidate(&raw)
    }

    pub fn update_candidate_set(&mut self, regions: &[MemoryRegion]) -> Result<(), StorageError> {
        let encoded = records::encode_candidate(regions)?;
        digest_area::rewrite(&mut self.device, &self.layout.update_candidate, &encoded)?;
        info!("suit-storage: update candidate set ({} regions)", regions.len());
        Ok(())
    }

    pub fn update_candidate_clear(&mut self) -> Result<(), StorageError> {
        let part = self.layout.update_candidate;
        self.device.erase(part.offset, part.size)?;
        self.device.sync()?;
        Ok(())
    }

    // ========================================================================
    // Reports
    // ========================================================================

    fn report_part(&self, index: usize) -> Result<flash::Partition, StorageError> {
        if index >= REPORT_SLOTS {
            return Err(StorageError::OutOfBounds);
        }
        Ok(self.layout.reports[index])
    }

    pub fn report_set(&mut self, index: usize, report: &[u8]) -> Result<(), StorageError> {
        let part = self.report_part(index)?;
        let encoded = records::encode_report(report)?;
        digest_area::rewrite(&mut self.device, &part, &encoded)?;
        Ok(())
    }

    pub fn report_read(&self, index: usize) -> Result<Vec<u8>, StorageError> {
        let part = self.report_part(index)?;
        let raw = read_vec(&self.device, part.offset, REPORT_AREA_SIZE)?;
        records::decode_report(&raw)
    }

    pub fn report_clear(&mut self, index: usize) -> Result<(), StorageError> {
        let part = self.report_part(index)?;
        self.device.erase(part.offset, part.size)?;
        self.device.sync()?;
        Ok(())
    }

    // ========================================================================
    // Flags
    // ========================================================================

    pub fn flags_get(&self) -> Result<StorageFlags, StorageError> {
        let raw = read_vec(&self.device, self.layout.flags.offset, FLAGS_RECORD_SIZE)?;
        Ok(records::decode_flags(&raw))
    }

    fn flags_store(&mut self, flags: StorageFlags) -> Result<(), StorageError> {
        let part = self.layout.flags;
        if flags.is_empty() {
            self.device.erase(part.offset, part.size)?;
            self.device.sync()?;
            return Ok(());
        }
        digest_area::rewrite(&mut self.device, &part, &records::encode_flags(flags))?;
        Ok(())
    }

    pub fn flags_set(&mut self, flags: StorageFlags) -> Result<(), StorageError> {
        let current = self.flags_get()?;
        self.flags_store(current | flags)
    }

    pub fn flags_clear(&mut self, flags: StorageFlags) -> Result<(), StorageError> {
        let current = self.flags_get()?;
        self.flags_store(current - flags)
    }

    /// True if every flag in `flags` is set.
    pub fn flags_check(&self, flags: StorageFlags) -> Result<bool, StorageError> {
        Ok(self.flags_get()?.contains(flags))
    }

    // ========================================================================
    // Non-volatile variables
    // ========================================================================

    fn nvv_table(&self) -> Result<NvvTable, StorageError> {
        for part in [&self.layout.nvv, &self.layout.nvv_backup] {
            let area = read_vec(&self.device, part.offset, NVV_AREA_SIZE)?;
            if digest_valid(&area) {
                return Ok(NvvTable::from_body(&area[..NVV_BODY_SIZE]));
            }
        }
        Err(StorageError::Corrupted)
    }

    pub fn var_get(&self, index: usize) -> Result<u32, StorageError> {
        self.nvv_table()?.get(index).ok_or(StorageError::OutOfBounds)
    }

    /// Updates one variable; refused while the primary copy is invalid.
    pub fn var_set(&mut self, index: usize, value: u32) -> Result<(), StorageError> {
        let primary = read_vec(&self.device, self.layout.nvv.offset, NVV_AREA_SIZE)?;
        if !digest_valid(&primary) {
            return Err(StorageError::Io);
        }
        let mut table = NvvTable::from_body(&primary[..NVV_BODY_SIZE]);
        table.set(index, value).ok_or(StorageError::OutOfBounds)?;
        digest_area::commit(
            &mut self.device,
            &self.layout.nvv,
            &self.layout.nvv_backup,
            &table.to_body(),
        )?;
        Ok(())
    }

    // ========================================================================
    // Snapshot and raw access
    // ========================================================================

    /// Collects the state the execution mode is derived from.
    pub fn boot_snapshot(&self) -> Result<BootSnapshot, StorageError> {
        let flags = self.flags_get()?;
        let report = match self.report_read(0) {
            Ok(_) => true,
            Err(StorageError::NotFound) | Err(StorageError::Corrupted) => false,
            Err(err) => return Err(err),
        };
        let update_candidate = match self.update_candidate_get() {
            Ok(_) => true,
            Err(StorageError::NotFound) | Err(StorageError::Corrupted) => false,
            Err(err) => return Err(err),
        };
        Ok(BootSnapshot {
            app_area: self.app_area,
            rad_area: self.rad_area,
            slots: self.slots.clone(),
            recovery: report || flags.contains(StorageFlags::RECOVERY),
            foreground_dfu: flags.contains(StorageFlags::FOREGROUND_DFU),
            update_candidate,
        })
    }

    /// Reads `len` bytes at a device address (envelopes, candidate images).
    pub fn read_raw(&self, address: usize, len: usize) -> Result<Vec<u8>, StorageError> {
        Ok(read_vec(&self.device, address, len)?)
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn device(&self) -> &F {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut F {
        &mut self.device
    }

    pub fn into_device(self) -> F {
        self.device
    }
}

fn area_slots(
    roles: &[ManifestRole],
    state: AreaState,
    bytes: &[u8],
) -> Vec<(ManifestRole, SlotState)> {
    match state {
        AreaState::Valid => roles
            .iter()
            .zip(mpi::decode_area(bytes))
            .map(|(role, slot)| {
                let state = match slot {
                    MpiSlot::Erased => SlotState::Erased,
                    MpiSlot::Valid(record) => SlotState::Valid(record),
                    MpiSlot::Invalid(err) => SlotState::Invalid(err),
                };
                (*role, state)
            })
            .collect(),
        AreaState::Erased => roles.iter().map(|role| (*role, SlotState::Erased)).collect(),
        AreaState::Corrupt => roles.iter().map(|role| (*role, SlotState::Unavailable)).collect(),
    }
}

fn mark_duplicates(builtin: &[(ManifestRole, MpiRecord)], slots: &mut [(ManifestRole, SlotState)]) {
    let mut seen: Vec<ManifestClassId> = builtin.iter().map(|(_, r)| r.class_id).collect();
    for (role, state) in slots.iter_mut() {
        if let SlotState::Valid(record) = state {
            if seen.contains(&record.class_id) {
                warn!("suit-storage: duplicate class {} in {:?} slot", record.class_id, role);
                *state = SlotState::Invalid(MpiError::DuplicateClass);
            } else {
                seen.push(record.class_id);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
