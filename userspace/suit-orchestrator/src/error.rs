// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Orchestrator outcomes and their boot-firmware errno values

use suit_plat::ExecutionMode;
use suit_storage::StorageError;

pub const ENOENT: i32 = 2;
pub const EIO: i32 = 5;
pub const ENOEXEC: i32 = 8;
pub const EACCES: i32 = 13;
pub const EFAULT: i32 = 14;
pub const EINVAL: i32 = 22;
pub const ENOTSUP: i32 = 134;
pub const EILSEQ: i32 = 138;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OrchestratorError {
    /// `entry()` called before `init()`.
    #[error("orchestrator not initialized")]
    NotInitialized,
    /// Nothing to do in this execution mode.
    #[error("no orchestration defined for mode {0}")]
    InvalidMode(ExecutionMode),
    /// Invoking the installed manifests failed; a failure report was saved.
    #[error("boot failed")]
    BootFailed,
    /// Manifest required for booting is not installed.
    #[error("manifest not found")]
    NotFound,
    /// Installed envelope failed decoding or authentication.
    #[error("envelope invalid")]
    EnvelopeInvalid,
    /// A manifest sequence failed or a required one is missing.
    #[error("sequence failed")]
    SequenceFailed,
    /// Update candidate rejected.
    #[error("update candidate not authorized")]
    Unauthorized,
    /// Update candidate points at no envelope.
    #[error("update candidate envelope address or size invalid")]
    CandidateFault,
    /// Update candidate malformed (e.g. too many cache regions).
    #[error("update candidate invalid")]
    InvalidCandidate,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl OrchestratorError {
    /// Negative errno reported by the boot firmware.
    pub fn errno(&self) -> i32 {
        -match self {
            Self::NotInitialized | Self::InvalidMode(_) | Self::InvalidCandidate => EINVAL,
            Self::BootFailed => ENOTSUP,
            Self::NotFound => ENOENT,
            Self::EnvelopeInvalid => ENOEXEC,
            Self::SequenceFailed => EILSEQ,
            Self::Unauthorized => EACCES,
            Self::CandidateFault => EFAULT,
            Self::Storage(_) => EIO,
        }
    }
}
