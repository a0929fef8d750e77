// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Orchestrator driver: boot and update paths per execution mode
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below with a scripted processor; flows in tests/suit_host
//!
//! `init()` brings up storage and derives the execution mode; `entry()` then either
//! invokes the installed manifests or processes the update candidate.

use std::sync::Arc;

use flash::FlashDevice;
use log::{debug, error, info, warn};
use suit_plat::{ExecutionMode, Mci};
use suit_storage::mpi::{DowngradePrevention, IndependentUpdate};
use suit_storage::{ManifestClassId, ManifestDomain, StorageError, SuitStorage};
use suit_stream::{DfuCache, ImageRequestor};

use crate::config::OrchestratorConfig;
use crate::context::{PlatformContext, Streaming};
use crate::error::OrchestratorError;
use crate::processor::{EnvelopeInfo, ManifestProcessor, Sequence};
use crate::signature::SignatureVerifier;

/// Report slot written when booting fails.
pub const BOOT_FAILURE_REPORT_SLOT: usize = 0;

/// Failure report persisted when invoking the installed manifests fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootFailureReport {
    /// Negative errno of the underlying cause.
    pub cause: i32,
    pub class_id: Option<ManifestClassId>,
}

impl BootFailureReport {
    const ENCODED_LEN: usize = 4 + 16;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&self.cause.to_le_bytes());
        out.extend_from_slice(self.class_id.as_ref().map_or(&[0u8; 16], |id| id.as_bytes()));
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        let cause = i32::from_le_bytes(bytes[..4].try_into().ok()?);
        let class = &bytes[4..];
        let class_id =
            if class.iter().all(|b| *b == 0) { None } else { ManifestClassId::from_slice(class) };
        Some(Self { cause, class_id })
    }
}

struct Failure {
    error: OrchestratorError,
    class_id: Option<ManifestClassId>,
}

impl From<OrchestratorError> for Failure {
    fn from(error: OrchestratorError) -> Self {
        Self { error, class_id: None }
    }
}

pub struct Orchestrator<F: FlashDevice, P: ManifestProcessor, V: SignatureVerifier> {
    storage: SuitStorage<F>,
    processor: P,
    verifier: V,
    config: OrchestratorConfig,
    mci: Option<Mci>,
    mode: Option<ExecutionMode>,
    streaming: Option<Streaming>,
    memory: Option<Box<dyn FlashDevice + Send>>,
    cache: DfuCache,
}

impl<F: FlashDevice, P: ManifestProcessor, V: SignatureVerifier> Orchestrator<F, P, V> {
    pub fn new(storage: SuitStorage<F>, processor: P, verifier: V, config: OrchestratorConfig) -> Self {
        let cache = DfuCache::new(config.cache.clone());
        Self {
            storage,
            processor,
            verifier,
            config,
            mci: None,
            mode: None,
            streaming: None,
            memory: None,
            cache,
        }
    }

    /// Enables `fetch` from manifest sequences through `requestor`.
    pub fn with_streaming(mut self, requestor: Arc<ImageRequestor>) -> Self {
        self.streaming = Some(Streaming { requestor, config: self.config.stream });
        self
    }

    /// Device backing `MEM` components and the DFU cache pools.
    pub fn with_memory(mut self, memory: Box<dyn FlashDevice + Send>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn storage(&self) -> &SuitStorage<F> {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut SuitStorage<F> {
        &mut self.storage
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut P {
        &mut self.processor
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn memory(&self) -> Option<&(dyn FlashDevice + Send)> {
        self.memory.as_deref()
    }

    pub fn cache(&self) -> &DfuCache {
        &self.cache
    }

    /// `None` until `init()` succeeded.
    pub fn mode(&self) -> Option<ExecutionMode> {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ExecutionMode) {
        self.mode = Some(mode);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Initializes storage, loads the MCI and derives the execution mode.
    pub fn init(&mut self) -> Result<ExecutionMode, OrchestratorError> {
        self.storage.init().map_err(|err| {
            error!("orchestrator: storage init failed: {}", err);
            OrchestratorError::Storage(err)
        })?;
        let mci = Mci::from_storage(&self.storage, self.config.memory.clone());
        let snapshot = self.storage.boot_snapshot()?;
        let mode = ExecutionMode::derive(&snapshot);
        info!(
            "orchestrator: mode {} ({} classes supported)",
            mode,
            mci.supported_classes().len()
        );
        self.mci = Some(mci);
        self.mode = Some(mode);
        if let Some(memory) = self.memory.as_deref_mut() {
            if !self.cache.is_empty() {
                self.cache.initialize(memory, false);
            }
        }
        Ok(mode)
    }

    /// Runs the orchestration step for the current mode.
    pub fn entry(&mut self) -> Result<(), OrchestratorError> {
        let mode = self.mode.ok_or(OrchestratorError::NotInitialized)?;
        if self.mci.is_none() {
            return Err(OrchestratorError::NotInitialized);
        }
        match mode {
            ExecutionMode::Invoke
            | ExecutionMode::InvokeRecovery
            | ExecutionMode::InvokeForegroundDfu => self.boot(mode),
            ExecutionMode::Install | ExecutionMode::InstallRecovery => self.update(mode),
            other => {
                warn!("orchestrator: nothing to do in mode {}", other);
                Err(OrchestratorError::InvalidMode(other))
            }
        }
    }

    // ========================================================================
    // Boot path
    // ========================================================================

    fn boot(&mut self, mode: ExecutionMode) -> Result<(), OrchestratorError> {
        let failure = match self.invoke_installed(mode) {
            Ok(()) => {
                if let Some(next) = mode.post_invoke() {
                    self.mode = Some(next);
                }
                info!("orchestrator: boot complete, mode {}", self.mode.unwrap_or(mode));
                return Ok(());
            }
            Err(failure) => failure,
        };

        error!("orchestrator: boot in {} failed: {}", mode, failure.error);
        if mode == ExecutionMode::InvokeForegroundDfu {
            self.mode = Some(ExecutionMode::FailInvokeForegroundDfu);
            return Err(failure.error);
        }

        let report = BootFailureReport { cause: failure.error.errno(), class_id: failure.class_id };
        if let Err(err) = self.storage.report_set(BOOT_FAILURE_REPORT_SLOT, &report.encode()) {
            error!("orchestrator: failure report not saved: {}", err);
        }
        if mode == ExecutionMode::InvokeRecovery {
            self.mode = Some(ExecutionMode::FailInvokeRecovery);
        }
        Err(OrchestratorError::BootFailed)
    }

    fn invoke_installed(&mut self, mode: ExecutionMode) -> Result<(), Failure> {
        let mci = self.mci.as_ref().ok_or(OrchestratorError::NotInitialized)?;
        let order = mci.invoke_order(mode).map_err(|err| {
            warn!("orchestrator: no invoke order in {}: {}", mode, err);
            OrchestratorError::NotFound
        })?;

        for class_id in order {
            let fail = |error| Failure { error, class_id: Some(class_id) };
            let secure = self
                .mci
                .as_ref()
                .and_then(|mci| mci.role(&class_id).ok())
                .is_some_and(|role| role.domain() == ManifestDomain::Secure);

            let envelope = match self.storage.installed_envelope_read(&class_id) {
                Ok(envelope) => envelope,
                Err(StorageError::NotFound) if secure => {
                    debug!("orchestrator: no envelope for secure class {}, skipping", class_id);
                    continue;
                }
                Err(StorageError::NotFound) => return Err(fail(OrchestratorError::NotFound)),
                Err(err) => {
                    warn!("orchestrator: envelope for {} unreadable: {}", class_id, err);
                    return Err(fail(OrchestratorError::EnvelopeInvalid));
                }
            };

            let info = self
                .processor
                .decode(&envelope)
                .map_err(|err| {
                    warn!("orchestrator: envelope for {} not decodable: {}", class_id, err);
                    OrchestratorError::EnvelopeInvalid
                })
                .map_err(fail)?;
            if info.class_id != class_id {
                warn!("orchestrator: envelope class {} installed as {}", info.class_id, class_id);
                return Err(fail(OrchestratorError::EnvelopeInvalid));
            }
            self.authenticate(mode, &info).map_err(|reason| {
                warn!("orchestrator: envelope for {} rejected: {}", class_id, reason);
                fail(OrchestratorError::EnvelopeInvalid)
            })?;

            let validate_required = mode != ExecutionMode::InvokeForegroundDfu;
            self.run_sequence(mode, &envelope, &info, Sequence::Validate, validate_required)
                .map_err(fail)?;
            self.run_sequence(mode, &envelope, &info, Sequence::Load, false).map_err(fail)?;
            self.run_sequence(mode, &envelope, &info, Sequence::Invoke, true).map_err(fail)?;
            info!("orchestrator: invoked {}", class_id);
        }
        Ok(())
    }

    // ========================================================================
    // Update path
    // ========================================================================

    fn update(&mut self, mode: ExecutionMode) -> Result<(), OrchestratorError> {
        let result = self.process_candidate(mode);
        self.clear_cache();
        let cleared = self.storage.update_candidate_clear();
        match &result {
            Ok(()) => info!("orchestrator: update candidate installed"),
            Err(err) => warn!("orchestrator: update candidate rejected: {}", err),
        }
        if let Err(err) = cleared {
            error!("orchestrator: update candidate not cleared: {}", err);
            result?;
            return Err(err.into());
        }
        result
    }

    /// Payloads cached for a candidate do not outlive its processing.
    fn clear_cache(&mut self) {
        let Some(memory) = self.memory.as_deref_mut() else {
            return;
        };
        if let Err(err) = self.cache.clear(memory) {
            warn!("orchestrator: dfu cache not cleared: {}", err);
        }
    }

    fn process_candidate(&mut self, mode: ExecutionMode) -> Result<(), OrchestratorError> {
        let regions = match self.storage.update_candidate_get() {
            Ok(regions) => regions,
            Err(StorageError::NotFound) | Err(StorageError::Corrupted) => {
                return Err(OrchestratorError::Unauthorized);
            }
            Err(err) => return Err(err.into()),
        };
        let envelope_region = regions.first().ok_or(OrchestratorError::CandidateFault)?;
        if envelope_region.is_unset() {
            return Err(OrchestratorError::CandidateFault);
        }
        let caches = regions.len() - 1;
        if caches > self.config.max_dfu_caches {
            warn!(
                "orchestrator: {} cache regions, at most {} accepted",
                caches, self.config.max_dfu_caches
            );
            return Err(OrchestratorError::InvalidCandidate);
        }
        let envelope = self
            .storage
            .read_raw(envelope_region.address, envelope_region.size)
            .map_err(|_| OrchestratorError::CandidateFault)?;

        let info = self.processor.decode(&envelope).map_err(|err| {
            warn!("orchestrator: candidate envelope not decodable: {}", err);
            OrchestratorError::Unauthorized
        })?;
        let class_id = info.class_id;
        self.check_update_policy(mode, &info)?;
        self.authenticate(mode, &info).map_err(|reason| {
            warn!("orchestrator: candidate for {} rejected: {}", class_id, reason);
            OrchestratorError::Unauthorized
        })?;

        self.run_sequence(mode, &envelope, &info, Sequence::CandidateVerification, false)
            .map_err(|_| OrchestratorError::Unauthorized)?;
        self.run_sequence(mode, &envelope, &info, Sequence::Install, true)
            .map_err(|_| OrchestratorError::Unauthorized)?;

        self.storage.install_envelope(&class_id, &envelope)?;
        Ok(())
    }

    fn check_update_policy(
        &mut self,
        mode: ExecutionMode,
        info: &EnvelopeInfo,
    ) -> Result<(), OrchestratorError> {
        let mci = self.mci.as_ref().ok_or(OrchestratorError::NotInitialized)?;
        let class_id = &info.class_id;
        mci.validate_class_id(class_id).map_err(|_| {
            warn!("orchestrator: candidate class {} not supported", class_id);
            OrchestratorError::Unauthorized
        })?;
        if mci.independent_update(mode, class_id) != Ok(IndependentUpdate::Allowed) {
            warn!("orchestrator: class {} not independently updateable in {}", class_id, mode);
            return Err(OrchestratorError::Unauthorized);
        }

        if mci.downgrade_prevention(class_id) == Ok(DowngradePrevention::Enabled) {
            let installed = match self.storage.installed_envelope_read(class_id) {
                Ok(envelope) => self.processor.decode(&envelope).ok(),
                Err(_) => None,
            };
            if let Some(installed) = installed {
                if info.sequence_number < installed.sequence_number {
                    warn!(
                        "orchestrator: downgrade of {} from {} to {} refused",
                        class_id, installed.sequence_number, info.sequence_number
                    );
                    return Err(OrchestratorError::Unauthorized);
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Shared steps
    // ========================================================================

    /// Key id policy and signature check. Unsigned envelopes pass only where the MCI
    /// accepts key id 0.
    fn authenticate(&self, mode: ExecutionMode, info: &EnvelopeInfo) -> Result<(), &'static str> {
        let mci = self.mci.as_ref().ok_or("not initialized")?;
        mci.validate_signing_key_id(mode, &info.class_id, info.key_id)
            .map_err(|_| "signing key id not allowed")?;
        if info.key_id == 0 {
            return Ok(());
        }
        let key = self.config.keys.get(info.key_id).ok_or("unknown signing key")?;
        let signature = info.signature.as_ref().ok_or("signature missing")?;
        self.verifier
            .verify_ed25519(key, &info.signed_payload, signature)
            .map_err(|_| "signature verification failed")
    }

    fn run_sequence(
        &mut self,
        mode: ExecutionMode,
        envelope: &[u8],
        info: &EnvelopeInfo,
        sequence: Sequence,
        required: bool,
    ) -> Result<(), OrchestratorError> {
        if !info.has_sequence(sequence) {
            if required {
                warn!("orchestrator: {} has no {} sequence", info.class_id, sequence);
                return Err(OrchestratorError::SequenceFailed);
            }
            return Ok(());
        }
        let mci = self.mci.as_ref().ok_or(OrchestratorError::NotInitialized)?;
        let mut ctx = PlatformContext {
            storage: &mut self.storage,
            mci,
            mode,
            class_id: info.class_id,
            streaming: self.streaming.as_ref(),
            memory: self.memory.as_mut(),
            cache: (!self.cache.is_empty()).then_some(&self.cache),
        };
        self.processor.process(envelope, sequence, &mut ctx).map_err(|err| {
            warn!("orchestrator: {} sequence of {} failed: {}", sequence, info.class_id, err);
            OrchestratorError::SequenceFailed
        })
    }
}
