// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Plain-value view of the persisted boot state

use alloc::vec::Vec;

use crate::class_id::ManifestRole;
use crate::digest_area::AreaState;
use crate::mpi::{MpiError, MpiRecord};

/// State of one provisioned MPI slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Valid(MpiRecord),
    /// Slot left unprogrammed in a valid (or fully erased) area.
    Erased,
    /// Slot programmed but not decodable, or a duplicate class.
    Invalid(MpiError),
    /// Enclosing area failed its digest check.
    Unavailable,
}

impl SlotState {
    pub fn record(&self) -> Option<&MpiRecord> {
        match self {
            Self::Valid(record) => Some(record),
            _ => None,
        }
    }
}

/// Everything the execution-mode derivation looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSnapshot {
    pub app_area: AreaState,
    pub rad_area: AreaState,
    /// Provisioned slots in area order (application first, then radio).
    pub slots: Vec<(ManifestRole, SlotState)>,
    /// Recovery report present in slot 0 or the recovery flag set.
    pub recovery: bool,
    pub foreground_dfu: bool,
    pub update_candidate: bool,
}

impl BootSnapshot {
    pub fn slot(&self, role: ManifestRole) -> SlotState {
        self.slots
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, state)| *state)
            .unwrap_or(SlotState::Unavailable)
    }

    pub fn root(&self) -> SlotState {
        self.slot(ManifestRole::AppRoot)
    }
}
