// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Component authorization gate against an MCI built from provisioned storage
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 8 tests
//!
//! TEST_SCOPE:
//!   - Literal CBOR component ids, as a manifest would carry them
//!   - Processor and memory rights per manifest role
//!   - Platform-specific components and parent/child declarations
//!   - Argument checks ahead of the compatibility check
//!
//! TEST_SCENARIOS:
//!   - test_local_manifest_may_use_its_memory(): MEM on cpu 2 inside the application range
//!   - test_reject_mem_outside_memory_map(): address past every configured range
//!   - test_reject_mem_for_wrong_processor_or_role(): radio cpu, root manifest
//!   - test_soc_specific_reserved_for_sdfw(): SOC_SPEC 1 and 2
//!   - test_installed_manifest_declarations(): root may declare local, not the reverse
//!   - test_reject_missing_or_empty_ids(): Decoding before any decoding happens
//!   - test_reject_manifest_id_of_wrong_type(): manifest id is not INSTLD_MFST
//!   - test_reject_unprovisioned_class(): radio class has no MPI

use suit_host::*;
use suit_plat::{
    authorize_component_id, ComponentId, ExecutionMode, MciCompatibility, MemoryOwner,
    MemoryRange, Mci, PlatError,
};
use suit_storage::class_id::NORDIC_SDFW_CLASS_ID;
use suit_storage::ManifestClassId;

/// MEM, cpu 2, address 0x80000, size 0x1000 (non-minimal address encoding).
const MEM_APP: [u8; 18] = [
    0x84, 0x44, 0x63, b'M', b'E', b'M', 0x41, 0x02, 0x45, 0x1A, 0x00, 0x08, 0x00, 0x00, 0x43,
    0x19, 0x10, 0x00,
];

/// SOC_SPEC 1.
const SOC_SPEC_1: [u8; 13] =
    [0x82, 0x49, 0x68, b'S', b'O', b'C', b'_', b'S', b'P', b'E', b'C', 0x41, 0x01];

fn mci() -> Mci {
    let storage = provisioned_storage(MPI_ROOT);
    Mci::from_storage(
        &storage,
        vec![
            MemoryRange { owner: MemoryOwner::Application, address: 0x8_0000, size: 0x1_0000 },
            MemoryRange { owner: MemoryOwner::Radio, address: 0x20_0000, size: 0x1_0000 },
        ],
    )
}

fn manifest(class_id: ManifestClassId) -> Vec<u8> {
    ComponentId::InstalledManifest(class_id).encode().expect("encode")
}

fn mem(cpu_id: i32, address: u64, size: u64) -> Vec<u8> {
    ComponentId::Mem { cpu_id, address, size }.encode().expect("encode")
}

fn authorize(mci: &Mci, class_id: ManifestClassId, component: &[u8]) -> Result<(), PlatError> {
    let compatibility = MciCompatibility::new(mci, ExecutionMode::Install);
    authorize_component_id(Some(&manifest(class_id)), Some(component), &compatibility)
}

#[test]
fn test_local_manifest_may_use_its_memory() {
    let mci = mci();
    assert_eq!(authorize(&mci, LOCAL_CLASS, &MEM_APP), Ok(()));
    assert_eq!(authorize(&mci, LOCAL_CLASS, &mem(2, 0x8_F000, 0x1000)), Ok(()));
    assert_eq!(authorize(&mci, RECOVERY_CLASS, &MEM_APP), Ok(()));
}

#[test]
fn test_reject_mem_outside_memory_map() {
    let mci = mci();
    // Straddles the end of the application range.
    assert_eq!(
        authorize(&mci, LOCAL_CLASS, &mem(2, 0x8_F000, 0x2000)),
        Err(PlatError::UnauthorizedComponent)
    );
    // Inside the radio range, which the application does not own.
    assert_eq!(
        authorize(&mci, LOCAL_CLASS, &mem(2, 0x20_0000, 0x100)),
        Err(PlatError::UnauthorizedComponent)
    );
    assert_eq!(authorize(&mci, LOCAL_CLASS, &mem(2, 0, 0x100)), Err(PlatError::UnauthorizedComponent));
}

#[test]
fn test_reject_mem_for_wrong_processor_or_role() {
    let mci = mci();
    assert_eq!(
        authorize(&mci, LOCAL_CLASS, &mem(3, 0x8_0000, 0x1000)),
        Err(PlatError::UnauthorizedComponent)
    );
    assert_eq!(authorize(&mci, ROOT_CLASS, &MEM_APP), Err(PlatError::UnauthorizedComponent));
}

#[test]
fn test_soc_specific_reserved_for_sdfw() {
    let mci = mci();
    assert_eq!(authorize(&mci, NORDIC_SDFW_CLASS_ID, &SOC_SPEC_1), Ok(()));
    let recovery = ComponentId::SocSpecific(2).encode().expect("encode");
    assert_eq!(authorize(&mci, NORDIC_SDFW_CLASS_ID, &recovery), Ok(()));
    let other = ComponentId::SocSpecific(3).encode().expect("encode");
    assert_eq!(
        authorize(&mci, NORDIC_SDFW_CLASS_ID, &other),
        Err(PlatError::UnauthorizedComponent)
    );
    assert_eq!(authorize(&mci, LOCAL_CLASS, &SOC_SPEC_1), Err(PlatError::UnauthorizedComponent));
}

#[test]
fn test_installed_manifest_declarations() {
    let mci = mci();
    assert_eq!(authorize(&mci, ROOT_CLASS, &manifest(LOCAL_CLASS)), Ok(()));
    assert_eq!(
        authorize(&mci, LOCAL_CLASS, &manifest(ROOT_CLASS)),
        Err(PlatError::UnauthorizedComponent)
    );
    // Recovery may not declare the root manifest either.
    assert_eq!(
        authorize(&mci, RECOVERY_CLASS, &manifest(ROOT_CLASS)),
        Err(PlatError::UnauthorizedComponent)
    );
}

#[test]
fn test_reject_missing_or_empty_ids() {
    let mci = mci();
    let compatibility = MciCompatibility::new(&mci, ExecutionMode::Invoke);
    let root = manifest(ROOT_CLASS);
    assert_eq!(authorize_component_id(None, Some(&MEM_APP), &compatibility), Err(PlatError::Decoding));
    assert_eq!(authorize_component_id(Some(&root), None, &compatibility), Err(PlatError::Decoding));
    assert_eq!(
        authorize_component_id(Some(&[]), Some(&MEM_APP), &compatibility),
        Err(PlatError::Decoding)
    );
    assert_eq!(authorize_component_id(Some(&root), Some(&[]), &compatibility), Err(PlatError::Decoding));
}

#[test]
fn test_reject_manifest_id_of_wrong_type() {
    let mci = mci();
    let compatibility = MciCompatibility::new(&mci, ExecutionMode::Invoke);
    assert_eq!(
        authorize_component_id(Some(&MEM_APP), Some(&MEM_APP), &compatibility),
        Err(PlatError::UnauthorizedComponent)
    );
}

#[test]
fn test_reject_unprovisioned_class() {
    let mci = mci();
    assert_eq!(authorize(&mci, RADIO_CLASS, &MEM_APP), Err(PlatError::UnsupportedComponentId));
    assert!(!mci.supported_classes().contains(&RADIO_CLASS));
}
