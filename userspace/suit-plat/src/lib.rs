// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: SUIT platform policy (component ids, MCI, authorization, execution modes)
//! OWNERS: @runtime
//! STATUS: Functional (host-first)
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module, integration tests in tests/suit_host
//!
//! PUBLIC API:
//!   - ExecutionMode: boot mode derived from a storage BootSnapshot
//!   - Mci: per-class policy (keys, processors, memory, dependencies, invoke order)
//!   - ComponentCompatibility / MciCompatibility: component id vs manifest class check
//!   - authorize_component_id(): authorization gate in front of every component operation
//!   - component_id: CBOR component identifier codec
//!   - PlatError / MciError: Error types
//!
//! DEPENDENCIES:
//!   - suit-storage: MPI records and boot snapshot
//!   - ciborium-ll: CBOR headers of component ids

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

pub mod authorize;
pub mod compatibility;
pub mod component_id;
pub mod execution_mode;
pub mod mci;

pub use authorize::authorize_component_id;
pub use compatibility::{ComponentCompatibility, MciCompatibility};
pub use component_id::{ComponentId, ComponentType};
pub use execution_mode::ExecutionMode;
pub use mci::{MemoryOwner, MemoryRange, Mci};

// ============================================================================
// Error Types
// ============================================================================

/// MCI policy refusals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MciError {
    /// Class id has no valid MPI on this device.
    #[error("unsupported manifest class id")]
    ManifestClassId,
    #[error("signing key id not allowed for manifest class")]
    WrongKeyId,
    #[error("access denied for manifest class")]
    NoAccess,
    #[error("no class configured for the requested role")]
    NotFound,
    /// Operation not defined in the current execution mode.
    #[error("incorrect execution mode")]
    IncorrectState,
    #[error("invalid argument")]
    InvalidArgument,
}

/// Component authorization outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PlatError {
    #[error("component id decoding error")]
    Decoding,
    #[error("unauthorized component")]
    UnauthorizedComponent,
    #[error("unsupported component id")]
    UnsupportedComponentId,
}
