// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: SUIT orchestrator: boot-time driver for firmware invocation and updates
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module; integration flows in tests/suit_host
//!
//! The orchestrator owns the SUIT storage, derives the execution mode at `init()` and,
//! at `entry()`, either invokes the installed manifests in MCI order or authenticates
//! and installs the pending update candidate. Manifest parsing is delegated to a
//! [`ManifestProcessor`]; signatures to a [`SignatureVerifier`].

#![forbid(unsafe_code)]

pub mod config;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod processor;
pub mod signature;

pub use config::{ConfigError, OrchestratorConfig};
pub use context::{SequenceContext, Streaming};
pub use error::OrchestratorError;
pub use orchestrator::{BootFailureReport, Orchestrator, BOOT_FAILURE_REPORT_SLOT};
pub use processor::{EnvelopeInfo, ManifestProcessor, ProcessorError, Sequence};
pub use signature::{Ed25519Verifier, KeyRing, SignatureVerifier, VerifyError};
