// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Manifest processor collaborator seam
//!
//! Envelope parsing and command-sequence execution live outside this crate. The
//! orchestrator only needs the envelope's authentication data and a way to run one
//! named sequence against the platform.

use core::fmt;

use suit_plat::PlatError;
use suit_storage::{ManifestClassId, StorageError};
use suit_stream::{CacheError, StreamError};
use thiserror::Error;

use crate::context::SequenceContext;

/// Command sequences the orchestrator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sequence {
    Validate,
    Load,
    Invoke,
    CandidateVerification,
    Install,
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validate => "validate",
            Self::Load => "load",
            Self::Invoke => "invoke",
            Self::CandidateVerification => "candidate-verification",
            Self::Install => "install",
        })
    }
}

/// What the orchestrator learns about an envelope before running it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeInfo {
    pub class_id: ManifestClassId,
    pub sequence_number: u32,
    /// Signing key id; 0 marks an unsigned envelope.
    pub key_id: u32,
    /// Bytes covered by `signature`.
    pub signed_payload: Vec<u8>,
    pub signature: Option<[u8; 64]>,
    /// Sequences present in the manifest.
    pub sequences: Vec<Sequence>,
}

impl EnvelopeInfo {
    pub fn has_sequence(&self, sequence: Sequence) -> bool {
        self.sequences.contains(&sequence)
    }
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("envelope decoding failed")]
    Decoding,
    #[error("sequence {0} not present")]
    MissingSequence(Sequence),
    #[error("command failed")]
    CommandFailed,
    #[error("component: {0}")]
    Component(#[from] PlatError),
    #[error("stream: {0}")]
    Stream(#[from] StreamError),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("dfu cache: {0}")]
    Cache(#[from] CacheError),
    #[error("unsupported operation")]
    Unsupported,
}

/// Decodes envelopes and executes their command sequences.
pub trait ManifestProcessor {
    fn decode(&mut self, envelope: &[u8]) -> Result<EnvelopeInfo, ProcessorError>;

    fn process(
        &mut self,
        envelope: &[u8],
        sequence: Sequence,
        ctx: &mut dyn SequenceContext,
    ) -> Result<(), ProcessorError>;
}
