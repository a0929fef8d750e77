// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Component id compatibility check against the MCI policy

use log::debug;
use suit_storage::ManifestClassId;

use crate::component_id::{self, ComponentType};
use crate::execution_mode::ExecutionMode;
use crate::mci::Mci;
use crate::PlatError;

/// Decides whether a manifest class may reference a raw component id.
pub trait ComponentCompatibility {
    fn check(&self, class_id: &ManifestClassId, component_id: &[u8]) -> Result<(), PlatError>;
}

/// Compatibility check backed by the device MCI policy.
pub struct MciCompatibility<'a> {
    mci: &'a Mci,
    mode: ExecutionMode,
}

impl<'a> MciCompatibility<'a> {
    pub fn new(mci: &'a Mci, mode: ExecutionMode) -> Self {
        Self { mci, mode }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }
}

impl ComponentCompatibility for MciCompatibility<'_> {
    fn check(&self, class_id: &ManifestClassId, component_id: &[u8]) -> Result<(), PlatError> {
        if self.mci.validate_class_id(class_id).is_err() {
            return Err(PlatError::UnsupportedComponentId);
        }

        let ty = component_id::decode_component_type(component_id)
            .map_err(|_| PlatError::UnsupportedComponentId)?;
        debug!("suit-plat: {:?} component for class {} ({})", ty, class_id, self.mode);

        match ty {
            ComponentType::Mem => {
                let (cpu_id, address, size) = component_id::decode_mem(component_id)
                    .map_err(|_| PlatError::UnsupportedComponentId)?;
                self.mci
                    .validate_processor_start_rights(class_id, cpu_id)
                    .map_err(|_| PlatError::UnauthorizedComponent)?;
                self.mci
                    .validate_memory_access_rights(class_id, address, size)
                    .map_err(|_| PlatError::UnauthorizedComponent)
            }
            ComponentType::SocSpecific => {
                let number = component_id::decode_component_number(component_id)
                    .map_err(|_| PlatError::Decoding)?;
                self.mci
                    .validate_platform_specific_component_rights(class_id, number)
                    .map_err(|_| PlatError::UnauthorizedComponent)
            }
            ComponentType::CandidateImage
            | ComponentType::CandidateManifest
            | ComponentType::CachePool
            | ComponentType::ManifestVariable => {
                component_id::decode_component_number(component_id)
                    .map_err(|_| PlatError::UnsupportedComponentId)?;
                Ok(())
            }
            ComponentType::InstalledManifest => {
                let child = component_id::decode_manifest_class_id(component_id)
                    .map_err(|_| PlatError::UnsupportedComponentId)?;
                self.mci
                    .validate_parent_child_declaration(class_id, &child)
                    .map_err(|_| PlatError::UnauthorizedComponent)
            }
            ComponentType::Unsupported => Err(PlatError::UnsupportedComponentId),
        }
    }
}
