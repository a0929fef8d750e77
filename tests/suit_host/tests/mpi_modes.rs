// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Execution mode derivation from provisioned MPI areas and persisted state
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 12 tests
//!
//! TEST_SCOPE:
//!   - MPI area validation (digest, version, policy values, duplicates)
//!   - Backup restore of a corrupted primary area
//!   - Mode selection from flags, reports and the update candidate
//!
//! TEST_SCENARIOS:
//!   - test_blank_device_is_fail_no_mpi(): nothing provisioned
//!   - test_valid_root_boots(): root provisioned, nothing pending
//!   - test_reject_unsupported_version(): root record version 0x02
//!   - test_reject_undefined_policy_value(): signature check 0x07
//!   - test_missing_root_is_invalid_missing(): root slot left erased
//!   - test_root_not_updateable_is_unsupported(): independent update denied
//!   - test_duplicate_class_is_invalid(): local slot reuses root class
//!   - test_corrupt_area_without_backup(): both copies fail the digest
//!   - test_primary_restored_from_backup(): single corrupted copy recovered
//!   - test_recovery_report_and_flag(): report or flag selects recovery modes
//!   - test_foreground_dfu_and_install(): flag and candidate precedence
//!   - test_radio_only_provisioning(): radio area without application root

use flash::FlashDevice;
use suit_host::*;
use suit_plat::ExecutionMode;
use suit_storage::mpi::MpiError;
use suit_storage::{AreaState, SlotState, StorageFlags, SuitStorage};

fn mode<F: FlashDevice>(storage: &SuitStorage<F>) -> ExecutionMode {
    ExecutionMode::derive(&storage.boot_snapshot().expect("snapshot"))
}

#[test]
fn test_blank_device_is_fail_no_mpi() {
    let storage = blank_storage();
    assert_eq!(mode(&storage), ExecutionMode::FailNoMpi);
    assert!(mode(&storage).is_failed());
}

#[test]
fn test_valid_root_boots() {
    let storage = provisioned_storage(MPI_ROOT);
    assert_eq!(mode(&storage), ExecutionMode::Invoke);
    assert_eq!(storage.mpi_get(&ROOT_CLASS).expect("root").vendor_id, VENDOR_ID);
    assert!(storage.supported_classes().contains(&LOCAL_CLASS));
}

#[test]
fn test_reject_unsupported_version() {
    let storage = provisioned_storage(MPI_ROOT_BAD_VERSION);
    let snapshot = storage.boot_snapshot().expect("snapshot");
    assert_eq!(snapshot.root(), SlotState::Invalid(MpiError::UnsupportedVersion(0x02)));
    assert_eq!(ExecutionMode::derive(&snapshot), ExecutionMode::FailMpiInvalid);
}

#[test]
fn test_reject_undefined_policy_value() {
    let storage = provisioned_storage(MPI_ROOT_BAD_POLICY);
    assert_eq!(mode(&storage), ExecutionMode::FailMpiInvalid);
}

#[test]
fn test_missing_root_is_invalid_missing() {
    let mut storage = blank_storage();
    program_app_mpi(&mut storage, [None, Some(MPI_RECOVERY), Some(MPI_LOCAL), None, None]);
    assert_eq!(mode(&storage), ExecutionMode::FailMpiInvalidMissing);
}

#[test]
fn test_root_not_updateable_is_unsupported() {
    let storage = provisioned_storage(MPI_ROOT_DENIED);
    assert_eq!(mode(&storage), ExecutionMode::FailMpiUnsupported);
}

#[test]
fn test_duplicate_class_is_invalid() {
    let mut storage = blank_storage();
    program_app_mpi(&mut storage, [Some(MPI_ROOT), None, Some(MPI_ROOT), None, None]);
    assert_eq!(mode(&storage), ExecutionMode::FailMpiInvalid);
}

#[test]
fn test_corrupt_area_without_backup() {
    let mut storage = blank_storage();
    let app_mpi = storage.layout().app_mpi;
    storage.device_mut().write(app_mpi.offset, &MPI_ROOT).expect("write");
    storage.init().expect("init");

    let snapshot = storage.boot_snapshot().expect("snapshot");
    assert_eq!(snapshot.app_area, AreaState::Corrupt);
    assert_eq!(ExecutionMode::derive(&snapshot), ExecutionMode::FailMpiInvalidMissing);
}

#[test]
fn test_primary_restored_from_backup() {
    let mut storage = provisioned_storage(MPI_ROOT);
    let app_mpi = storage.layout().app_mpi;
    let before = flash::read_vec(storage.device(), app_mpi.offset, app_mpi.size).expect("read");

    // Clearing bits in the record invalidates the primary digest.
    storage.device_mut().write(app_mpi.offset + 40, &[0x00]).expect("corrupt");
    storage.init().expect("init");

    let after = flash::read_vec(storage.device(), app_mpi.offset, app_mpi.size).expect("read");
    assert_eq!(before, after);
    assert_eq!(mode(&storage), ExecutionMode::Invoke);
}

#[test]
fn test_recovery_report_and_flag() {
    let mut storage = provisioned_storage(MPI_ROOT);
    storage.report_set(0, b"boot failure").expect("report");
    assert_eq!(mode(&storage), ExecutionMode::InvokeRecovery);
    stage_candidate(&mut storage, b"candidate", 0);
    assert_eq!(mode(&storage), ExecutionMode::InstallRecovery);

    storage.report_clear(0).expect("clear");
    storage.update_candidate_clear().expect("clear");
    storage.flags_set(StorageFlags::RECOVERY).expect("flag");
    assert_eq!(mode(&storage), ExecutionMode::InvokeRecovery);
}

#[test]
fn test_foreground_dfu_and_install() {
    let mut storage = provisioned_storage(MPI_ROOT);
    stage_candidate(&mut storage, b"candidate", 0);
    assert_eq!(mode(&storage), ExecutionMode::Install);

    storage.flags_set(StorageFlags::FOREGROUND_DFU).expect("flag");
    assert_eq!(mode(&storage), ExecutionMode::InvokeForegroundDfu);
    storage.flags_clear(StorageFlags::FOREGROUND_DFU).expect("flag");
    assert_eq!(mode(&storage), ExecutionMode::Install);
}

#[test]
fn test_radio_only_provisioning() {
    let mut storage = blank_storage();
    program_rad_mpi(&mut storage, [None, Some(MPI_RADIO), None]);
    let snapshot = storage.boot_snapshot().expect("snapshot");
    assert_eq!(snapshot.rad_area, AreaState::Valid);
    assert_eq!(snapshot.app_area, AreaState::Erased);
    assert_eq!(ExecutionMode::derive(&snapshot), ExecutionMode::FailMpiInvalidMissing);
}
