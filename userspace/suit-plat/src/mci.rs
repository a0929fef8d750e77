// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Manifest configuration information (MCI) policy table
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below
//!
//! Answers what a manifest class may do on this device: which keys may sign it, which
//! processors it may start, which memory it may touch and which manifests it may declare
//! or process as dependencies. Built from the MPI records held by the storage engine.

use alloc::vec;
use alloc::vec::Vec;

use flash::FlashDevice;
use suit_storage::mpi::{DowngradePrevention, IndependentUpdate, SignatureCheck};
use suit_storage::{ManifestClassId, ManifestRole, MpiRecord, SuitStorage};

use crate::execution_mode::ExecutionMode;
use crate::MciError;

const PUBKEY_NRF_TOP_GEN0: u32 = 0x4000_BB00;
const PUBKEY_SYSCTRL_GEN0: u32 = 0x4008_2100;
const PUBKEY_OEM_ROOT_GEN0: u32 = 0x4000_AA00;
const PUBKEY_APPLICATION_GEN0: u32 = 0x4002_2100;
const PUBKEY_RADIO_GEN0: u32 = 0x4003_2100;
/// Key generations accepted above generation 0.
const PUBKEY_GEN_RANGE: u32 = 2;

pub const PROCESSOR_APPLICATION: i32 = 2;
pub const PROCESSOR_RADIOCORE: i32 = 3;
pub const PROCESSOR_SYSCTRL: i32 = 13;

/// Platform-specific components only the secure firmware manifest controls.
const SDFW_COMPONENT: u32 = 1;
const SDFW_RECOVERY_COMPONENT: u32 = 2;

/// Domain owning a memory range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOwner {
    Application,
    Radio,
}

/// Memory a domain's manifests may read and program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    pub owner: MemoryOwner,
    pub address: u64,
    pub size: u64,
}

impl MemoryRange {
    fn covers(&self, address: u64, size: u64) -> bool {
        let (Some(end), Some(range_end)) =
            (address.checked_add(size), self.address.checked_add(self.size))
        else {
            return false;
        };
        address >= self.address && end <= range_end
    }
}

/// Policy table for the classes configured on this device.
#[derive(Debug, Clone, Default)]
pub struct Mci {
    classes: Vec<(ManifestRole, MpiRecord)>,
    memory: Vec<MemoryRange>,
}

impl Mci {
    pub fn new(classes: Vec<(ManifestRole, MpiRecord)>, memory: Vec<MemoryRange>) -> Self {
        Self { classes, memory }
    }

    /// Snapshot of every class with a valid MPI in `storage`.
    pub fn from_storage<F: FlashDevice>(storage: &SuitStorage<F>, memory: Vec<MemoryRange>) -> Self {
        let classes = ManifestRole::ALL
            .iter()
            .filter_map(|role| {
                let class_id = storage.mpi_class(*role)?;
                storage.mpi_get(&class_id).ok().map(|record| (*role, record))
            })
            .collect();
        Self { classes, memory }
    }

    pub fn supported_classes(&self) -> Vec<ManifestClassId> {
        self.classes.iter().map(|(_, record)| record.class_id).collect()
    }

    fn entry(&self, class_id: &ManifestClassId) -> Result<(ManifestRole, &MpiRecord), MciError> {
        self.classes
            .iter()
            .find(|(_, record)| record.class_id == *class_id)
            .map(|(role, record)| (*role, record))
            .ok_or(MciError::ManifestClassId)
    }

    pub fn role(&self, class_id: &ManifestClassId) -> Result<ManifestRole, MciError> {
        self.entry(class_id).map(|(role, _)| role)
    }

    pub fn class_for_role(&self, role: ManifestRole) -> Option<ManifestClassId> {
        self.classes.iter().find(|(r, _)| *r == role).map(|(_, record)| record.class_id)
    }

    pub fn validate_class_id(&self, class_id: &ManifestClassId) -> Result<(), MciError> {
        self.entry(class_id).map(|_| ())
    }

    pub fn vendor_id(&self, class_id: &ManifestClassId) -> Result<[u8; 16], MciError> {
        self.entry(class_id).map(|(_, record)| record.vendor_id)
    }

    pub fn downgrade_prevention(
        &self,
        class_id: &ManifestClassId,
    ) -> Result<DowngradePrevention, MciError> {
        self.entry(class_id).map(|(_, record)| record.downgrade_prevention)
    }

    /// Independent updateability of `class_id`. Recovery manifests are never updated by a
    /// candidate delivered while recovery firmware runs.
    pub fn independent_update(
        &self,
        mode: ExecutionMode,
        class_id: &ManifestClassId,
    ) -> Result<IndependentUpdate, MciError> {
        let (role, record) = self.entry(class_id)?;
        if mode.is_recovery() && role.is_recovery() {
            return Ok(IndependentUpdate::Denied);
        }
        Ok(record.independent_update)
    }

    /// Checks that `key_id` may sign manifests of `class_id`. Key id 0 (unsigned) is
    /// accepted when the MPI disables signature checks, or enables them for updates only
    /// and the manifest is being invoked.
    pub fn validate_signing_key_id(
        &self,
        mode: ExecutionMode,
        class_id: &ManifestClassId,
        key_id: u32,
    ) -> Result<(), MciError> {
        let (role, record) = self.entry(class_id)?;
        if key_id == 0 {
            return match record.signature_check {
                SignatureCheck::Disabled => Ok(()),
                SignatureCheck::EnabledOnUpdate if mode == ExecutionMode::Invoke => Ok(()),
                _ => Err(MciError::WrongKeyId),
            };
        }

        let gen0 = match role {
            ManifestRole::SecTop | ManifestRole::SecSdfw => PUBKEY_NRF_TOP_GEN0,
            ManifestRole::SecSysctrl => PUBKEY_SYSCTRL_GEN0,
            ManifestRole::AppRoot => PUBKEY_OEM_ROOT_GEN0,
            ManifestRole::AppRecovery
            | ManifestRole::AppLocal1
            | ManifestRole::AppLocal2
            | ManifestRole::AppLocal3 => PUBKEY_APPLICATION_GEN0,
            ManifestRole::RadRecovery | ManifestRole::RadLocal1 | ManifestRole::RadLocal2 => {
                PUBKEY_RADIO_GEN0
            }
        };
        if (gen0..=gen0 + PUBKEY_GEN_RANGE).contains(&key_id) {
            Ok(())
        } else {
            Err(MciError::WrongKeyId)
        }
    }

    pub fn validate_processor_start_rights(
        &self,
        class_id: &ManifestClassId,
        processor_id: i32,
    ) -> Result<(), MciError> {
        let allowed = match self.role(class_id)? {
            ManifestRole::SecTop | ManifestRole::AppRoot | ManifestRole::SecSdfw => None,
            ManifestRole::SecSysctrl => Some(PROCESSOR_SYSCTRL),
            ManifestRole::AppRecovery
            | ManifestRole::AppLocal1
            | ManifestRole::AppLocal2
            | ManifestRole::AppLocal3 => Some(PROCESSOR_APPLICATION),
            ManifestRole::RadRecovery | ManifestRole::RadLocal1 | ManifestRole::RadLocal2 => {
                Some(PROCESSOR_RADIOCORE)
            }
        };
        if allowed == Some(processor_id) {
            Ok(())
        } else {
            Err(MciError::NoAccess)
        }
    }

    pub fn validate_memory_access_rights(
        &self,
        class_id: &ManifestClassId,
        address: u64,
        size: u64,
    ) -> Result<(), MciError> {
        if address == 0 || size == 0 {
            return Err(MciError::InvalidArgument);
        }
        let owner = match self.role(class_id)? {
            ManifestRole::SecTop | ManifestRole::AppRoot => return Err(MciError::NoAccess),
            ManifestRole::SecSdfw | ManifestRole::SecSysctrl => return Ok(()),
            ManifestRole::AppRecovery
            | ManifestRole::AppLocal1
            | ManifestRole::AppLocal2
            | ManifestRole::AppLocal3 => MemoryOwner::Application,
            ManifestRole::RadRecovery | ManifestRole::RadLocal1 | ManifestRole::RadLocal2 => {
                MemoryOwner::Radio
            }
        };
        if self.memory.iter().any(|range| range.owner == owner && range.covers(address, size)) {
            Ok(())
        } else {
            Err(MciError::NoAccess)
        }
    }

    pub fn validate_platform_specific_component_rights(
        &self,
        class_id: &ManifestClassId,
        number: u32,
    ) -> Result<(), MciError> {
        match self.role(class_id)? {
            ManifestRole::SecSdfw
                if matches!(number, SDFW_COMPONENT | SDFW_RECOVERY_COMPONENT) =>
            {
                Ok(())
            }
            _ => Err(MciError::NoAccess),
        }
    }

    /// May a manifest of class `parent` declare `child` as a dependency?
    pub fn validate_parent_child_declaration(
        &self,
        parent: &ManifestClassId,
        child: &ManifestClassId,
    ) -> Result<(), MciError> {
        let parent = self.role(parent)?;
        let child = self.role(child)?;
        let allowed = match parent {
            ManifestRole::AppRoot => is_local(child) || child == ManifestRole::SecTop,
            ManifestRole::SecTop => is_secure_child(child),
            ManifestRole::AppRecovery => is_local(child) || child == ManifestRole::RadRecovery,
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(MciError::NoAccess)
        }
    }

    /// May `parent` process `child` as a dependency in `mode`?
    pub fn validate_process_dependency(
        &self,
        mode: ExecutionMode,
        parent: &ManifestClassId,
        child: &ManifestClassId,
    ) -> Result<(), MciError> {
        let parent = self.role(parent)?;
        let child = self.role(child)?;
        let allowed = match (mode, parent) {
            (_, ManifestRole::SecTop)
                if matches!(
                    mode,
                    ExecutionMode::Invoke
                        | ExecutionMode::Install
                        | ExecutionMode::InstallRecovery
                        | ExecutionMode::InvokeRecovery
                ) =>
            {
                is_secure_child(child)
            }
            (ExecutionMode::Invoke, ManifestRole::AppRoot)
            | (ExecutionMode::InvokeRecovery, ManifestRole::AppRoot) => is_local(child),
            (ExecutionMode::Install, ManifestRole::AppRoot)
            | (ExecutionMode::InstallRecovery, ManifestRole::AppRoot) => {
                is_local(child) || child == ManifestRole::SecTop
            }
            (ExecutionMode::Install, ManifestRole::AppRecovery) => {
                child == ManifestRole::RadRecovery
            }
            (ExecutionMode::InvokeRecovery, ManifestRole::AppRecovery) => {
                is_local(child) || child == ManifestRole::RadRecovery
            }
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(MciError::NoAccess)
        }
    }

    /// Classes to invoke, in order, when booting in `mode`.
    pub fn invoke_order(&self, mode: ExecutionMode) -> Result<Vec<ManifestClassId>, MciError> {
        let top = || self.class_for_role(ManifestRole::SecTop).ok_or(MciError::NotFound);
        let recovery_or_root = || {
            self.class_for_role(ManifestRole::AppRecovery)
                .or_else(|| self.class_for_role(ManifestRole::AppRoot))
                .ok_or(MciError::NotFound)
        };
        match mode {
            ExecutionMode::Invoke => {
                let root = self.class_for_role(ManifestRole::AppRoot).ok_or(MciError::NotFound)?;
                Ok(vec![top()?, root])
            }
            ExecutionMode::InvokeRecovery => Ok(vec![top()?, recovery_or_root()?]),
            ExecutionMode::InvokeForegroundDfu => {
                let recovery =
                    self.class_for_role(ManifestRole::AppRecovery).ok_or(MciError::NotFound)?;
                Ok(vec![recovery])
            }
            _ => Err(MciError::IncorrectState),
        }
    }
}

fn is_local(role: ManifestRole) -> bool {
    role.is_app_local() || role.is_rad_local()
}

fn is_secure_child(role: ManifestRole) -> bool {
    matches!(role, ManifestRole::SecSysctrl | ManifestRole::SecSdfw)
}
