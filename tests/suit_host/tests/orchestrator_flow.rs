// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: End-to-end orchestrator runs with real signatures, storage and streaming
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 11 tests
//!
//! TEST_SCOPE:
//!   - Install of a signed candidate and the following boot
//!   - Errno mapping of rejected candidates
//!   - Boot failure reporting and the recovery path
//!   - Foreground DFU outcomes
//!   - Fetch of a memory component through the chunk provider
//!   - Fetch into a DFU cache pool and its cleanup after processing
//!
//! TEST_SCENARIOS:
//!   - test_signed_update_then_boot(): Install -> re-init -> Invoke -> PostInvoke
//!   - test_reject_bad_signatures(): forged signature, unknown key, unsigned candidate
//!   - test_reject_candidate_shapes(): no candidate, unset envelope region, too many caches
//!   - test_downgrade_prevention(): lower sequence number refused, equal accepted
//!   - test_boot_failure_reported(): failing invoke sequence, report, recovery attempt
//!   - test_foreground_dfu_outcomes(): missing, undecodable and incomplete recovery envelopes
//!   - test_foreground_dfu_boots_recovery(): valid recovery envelope reaches PostInvokeForegroundDfu
//!   - test_fetch_into_memory_component(): image streamed into MEM and verified
//!   - test_config_from_file(): TOML key ring loaded from disk
//!   - test_dependency_processing_rights(): root may process local manifests only
//!   - test_fetch_into_cache_pool(): payload cached under its URI, caches cleared afterwards

use std::io::Write;
use std::sync::Arc;

use flash::{FlashDevice, MemFlash};
use suit_host::*;
use suit_orchestrator::{
    BootFailureReport, Ed25519Verifier, Orchestrator, OrchestratorConfig, OrchestratorError,
    Sequence, BOOT_FAILURE_REPORT_SLOT,
};
use suit_plat::{ComponentId, ExecutionMode};
use suit_storage::{MemoryRegion, StorageError, StorageFlags, SuitStorage};
use suit_stream::{CacheError, CachePartition, ChunkProvider, ImageRequestor, MemoryImageSource};

/// Generation-0 OEM root key id.
const ROOT_KEY_ID: u32 = 0x4000_AA00;
const KEY_SEED: u8 = 7;

type HostOrchestrator = Orchestrator<MemFlash, TestProcessor, Ed25519Verifier>;

fn config() -> OrchestratorConfig {
    let public = hex::encode(signing_key(KEY_SEED).verifying_key().to_bytes());
    OrchestratorConfig::from_toml_str(&format!(
        r#"
        [stream]
        inter_chunk_timeout_ms = 2000
        requesting_period_ms = 20

        [[keys]]
        id = {ROOT_KEY_ID}
        ed25519 = "{public}"

        [[memory]]
        owner = "application"
        address = 0x1000
        size = 0x2000
        "#
    ))
    .expect("config")
}

fn orchestrator(storage: SuitStorage<MemFlash>) -> HostOrchestrator {
    Orchestrator::new(storage, TestProcessor::default(), Ed25519Verifier, config())
}

fn root_envelope(sequence_number: u32) -> EnvelopeBuilder {
    EnvelopeBuilder::new(ROOT_CLASS).sequence_number(sequence_number).all_sequences()
}

/// Stages `envelope`, runs init + entry and returns the entry result.
fn install(orch: &mut HostOrchestrator, envelope: &[u8]) -> Result<(), OrchestratorError> {
    stage_candidate(orch.storage_mut(), envelope, 0);
    assert_eq!(orch.init().expect("init"), ExecutionMode::Install);
    orch.entry()
}

#[test]
fn test_signed_update_then_boot() {
    let mut orch = orchestrator(provisioned_storage(MPI_ROOT_SIGNED));
    let envelope = root_envelope(1).build_signed(ROOT_KEY_ID, &signing_key(KEY_SEED));

    install(&mut orch, &envelope).expect("install");
    assert_eq!(orch.storage().installed_envelope_read(&ROOT_CLASS).expect("read"), envelope);
    assert_eq!(orch.storage().update_candidate_get(), Err(StorageError::NotFound));
    let installed_at = orch.storage().installed_envelope_get(&ROOT_CLASS).expect("get");

    assert_eq!(orch.init().expect("init"), ExecutionMode::Invoke);
    orch.entry().expect("boot");
    assert_eq!(orch.mode(), Some(ExecutionMode::PostInvoke));
    assert_eq!(orch.storage().installed_envelope_get(&ROOT_CLASS), Ok(installed_at));
    assert_eq!(
        orch.processor().runs,
        vec![
            (ROOT_CLASS, Sequence::CandidateVerification),
            (ROOT_CLASS, Sequence::Install),
            (ROOT_CLASS, Sequence::Validate),
            (ROOT_CLASS, Sequence::Invoke),
        ]
    );
}

#[test]
fn test_reject_bad_signatures() {
    let candidates = [
        root_envelope(1).build_with_signature(ROOT_KEY_ID, &[0x55; 64]),
        root_envelope(1).build_signed(ROOT_KEY_ID + 1, &signing_key(KEY_SEED)),
        root_envelope(1).build_signed(ROOT_KEY_ID, &signing_key(KEY_SEED + 1)),
        root_envelope(1).build_unsigned(),
    ];
    for envelope in candidates {
        let mut orch = orchestrator(provisioned_storage(MPI_ROOT_SIGNED));
        let err = install(&mut orch, &envelope).expect_err("rejected");
        assert_eq!(err, OrchestratorError::Unauthorized);
        assert_eq!(err.errno(), -13);
        assert_eq!(orch.storage().installed_envelope_get(&ROOT_CLASS), Err(StorageError::NotFound));
        assert_eq!(orch.storage().update_candidate_get(), Err(StorageError::NotFound));
    }
}

#[test]
fn test_reject_candidate_shapes() {
    let envelope = root_envelope(1).build_unsigned();

    // Nothing staged.
    let mut orch = orchestrator(provisioned_storage(MPI_ROOT));
    assert_eq!(orch.init().expect("init"), ExecutionMode::Invoke);
    orch.set_mode(ExecutionMode::Install);
    assert_eq!(orch.entry().map_err(|err| err.errno()), Err(-13));

    // Envelope region left unset.
    let mut orch = orchestrator(provisioned_storage(MPI_ROOT));
    orch.storage_mut().update_candidate_set(&[MemoryRegion::new(0, 0x100)]).expect("set");
    orch.init().expect("init");
    orch.set_mode(ExecutionMode::Install);
    assert_eq!(orch.entry(), Err(OrchestratorError::CandidateFault));
    assert_eq!(OrchestratorError::CandidateFault.errno(), -14);

    // More cache regions than configured.
    let mut orch = orchestrator(provisioned_storage(MPI_ROOT));
    stage_candidate(orch.storage_mut(), &envelope, 5);
    orch.init().expect("init");
    assert_eq!(orch.entry().map_err(|err| err.errno()), Err(-22));
    assert_eq!(orch.storage().installed_envelope_get(&ROOT_CLASS), Err(StorageError::NotFound));

    // Four caches are accepted.
    let mut orch = orchestrator(provisioned_storage(MPI_ROOT));
    stage_candidate(orch.storage_mut(), &envelope, 4);
    orch.init().expect("init");
    orch.entry().expect("install");
}

#[test]
fn test_downgrade_prevention() {
    let key = signing_key(KEY_SEED);
    let mut orch = orchestrator(provisioned_storage(MPI_ROOT_SIGNED));
    install(&mut orch, &root_envelope(5).build_signed(ROOT_KEY_ID, &key)).expect("install");

    let older = root_envelope(4).build_signed(ROOT_KEY_ID, &key);
    assert_eq!(install(&mut orch, &older), Err(OrchestratorError::Unauthorized));

    let same = root_envelope(5).sequence(Sequence::Load, Vec::new()).build_signed(ROOT_KEY_ID, &key);
    install(&mut orch, &same).expect("same sequence number");
    assert_eq!(orch.storage().installed_envelope_read(&ROOT_CLASS).expect("read"), same);
}

#[test]
fn test_boot_failure_reported() {
    let mut orch = orchestrator(provisioned_storage(MPI_ROOT));
    let failing = EnvelopeBuilder::new(ROOT_CLASS)
        .sequence(Sequence::Validate, Vec::new())
        .sequence(Sequence::Install, Vec::new())
        .sequence(Sequence::Invoke, vec![Command::Fail])
        .build_unsigned();
    install(&mut orch, &failing).expect("install");

    assert_eq!(orch.init().expect("init"), ExecutionMode::Invoke);
    let err = orch.entry().expect_err("boot fails");
    assert_eq!(err, OrchestratorError::BootFailed);
    assert_eq!(err.errno(), -134);

    let raw = orch.storage().report_read(BOOT_FAILURE_REPORT_SLOT).expect("report");
    let report = BootFailureReport::decode(&raw).expect("decode");
    assert_eq!(report.cause, OrchestratorError::SequenceFailed.errno());
    assert_eq!(report.class_id, Some(ROOT_CLASS));

    // The report selects recovery; no recovery envelope is installed.
    assert_eq!(orch.init().expect("init"), ExecutionMode::InvokeRecovery);
    assert_eq!(orch.entry(), Err(OrchestratorError::BootFailed));
    assert_eq!(orch.mode(), Some(ExecutionMode::FailInvokeRecovery));
    assert_eq!(
        orch.entry(),
        Err(OrchestratorError::InvalidMode(ExecutionMode::FailInvokeRecovery))
    );
}

#[test]
fn test_foreground_dfu_outcomes() {
    let incomplete =
        EnvelopeBuilder::new(RECOVERY_CLASS).sequence(Sequence::Validate, Vec::new()).build_unsigned();
    let cases: [(Option<&[u8]>, OrchestratorError, i32); 3] = [
        (None, OrchestratorError::NotFound, -2),
        (Some(&b"not an envelope"[..]), OrchestratorError::EnvelopeInvalid, -8),
        (Some(incomplete.as_slice()), OrchestratorError::SequenceFailed, -138),
    ];

    for (envelope, expected, errno) in cases {
        let mut storage = provisioned_storage(MPI_ROOT);
        if let Some(envelope) = envelope {
            storage.install_envelope(&RECOVERY_CLASS, envelope).expect("install");
        }
        storage.flags_set(StorageFlags::FOREGROUND_DFU).expect("flag");

        let mut orch = orchestrator(storage);
        assert_eq!(orch.init().expect("init"), ExecutionMode::InvokeForegroundDfu);
        let err = orch.entry().expect_err("fails");
        assert_eq!(err, expected);
        assert_eq!(err.errno(), errno);
        assert_eq!(orch.mode(), Some(ExecutionMode::FailInvokeForegroundDfu));
        // Foreground DFU failures leave no boot report behind.
        assert_eq!(
            orch.storage().report_read(BOOT_FAILURE_REPORT_SLOT),
            Err(StorageError::NotFound)
        );
    }
}

#[test]
fn test_foreground_dfu_boots_recovery() {
    let mut storage = provisioned_storage(MPI_ROOT);
    let recovery = EnvelopeBuilder::new(RECOVERY_CLASS)
        .sequence(Sequence::Invoke, vec![Command::SetVar { index: 1, value: 3 }])
        .build_unsigned();
    storage.install_envelope(&RECOVERY_CLASS, &recovery).expect("install");
    storage.flags_set(StorageFlags::FOREGROUND_DFU).expect("flag");

    let mut orch = orchestrator(storage);
    assert_eq!(orch.init().expect("init"), ExecutionMode::InvokeForegroundDfu);
    orch.entry().expect("boot");
    assert_eq!(orch.mode(), Some(ExecutionMode::PostInvokeForegroundDfu));
    assert_eq!(orch.processor().runs, vec![(RECOVERY_CLASS, Sequence::Invoke)]);
    assert_eq!(orch.storage().var_get(1), Ok(3));
}

#[test]
fn test_fetch_into_memory_component() {
    let config = config();
    let firmware: Vec<u8> = (0..0x800).map(|i| (i % 251) as u8).collect();
    let component = ComponentId::Mem { cpu_id: 2, address: 0x1000, size: 0x800 }
        .encode()
        .expect("encode");

    let requestor = Arc::new(ImageRequestor::new(config.stream.max_chunks));
    let source = Arc::new(MemoryImageSource::new());
    source.insert(b"#local_fw", firmware.clone());
    let provider = ChunkProvider::spawn(
        requestor.clone(),
        source,
        config.stream.chunk_size,
        config.stream.buffer_count,
    )
    .expect("provider");

    let envelope = EnvelopeBuilder::new(LOCAL_CLASS)
        .sequence(Sequence::CandidateVerification, Vec::new())
        .sequence(
            Sequence::Install,
            vec![
                Command::Fetch { resource: b"#local_fw".to_vec(), component: component.clone() },
                Command::Expect { component: component.clone(), bytes: firmware.clone() },
                Command::SetVar { index: 2, value: 9 },
            ],
        )
        .build_unsigned();

    let mut orch = Orchestrator::new(
        provisioned_storage(MPI_ROOT),
        TestProcessor::default(),
        Ed25519Verifier,
        config,
    )
    .with_streaming(requestor)
    .with_memory(Box::new(MemFlash::new(0x4000, 0x400)));
    install(&mut orch, &envelope).expect("install");
    provider.shutdown();

    let memory = orch.memory().expect("memory");
    assert_eq!(memory.size(), 0x4000);
    assert_eq!(flash::read_vec(memory, 0x1000, firmware.len()).expect("read"), firmware);
    assert_eq!(orch.storage().var_get(2), Ok(9));
    assert_eq!(orch.storage().installed_envelope_read(&LOCAL_CLASS).expect("read"), envelope);
}

#[test]
fn test_config_from_file() {
    let public = hex::encode(signing_key(KEY_SEED).verifying_key().to_bytes());
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    write!(file, "[update]\nmax_dfu_caches = 1\n\n[[keys]]\nid = {ROOT_KEY_ID}\ned25519 = \"{public}\"\n")
        .expect("write");
    let config = OrchestratorConfig::load(file.path()).expect("load");
    assert_eq!(config.max_dfu_caches, 1);

    let mut orch = Orchestrator::new(
        provisioned_storage(MPI_ROOT_SIGNED),
        TestProcessor::default(),
        Ed25519Verifier,
        config,
    );
    let envelope = root_envelope(1).build_signed(ROOT_KEY_ID, &signing_key(KEY_SEED));
    stage_candidate(orch.storage_mut(), &envelope, 2);
    orch.init().expect("init");
    assert_eq!(orch.entry(), Err(OrchestratorError::InvalidCandidate));

    stage_candidate(orch.storage_mut(), &envelope, 1);
    orch.init().expect("init");
    orch.entry().expect("install");
}

#[test]
fn test_dependency_processing_rights() {
    let mut orch = orchestrator(provisioned_storage(MPI_ROOT));
    let parent = EnvelopeBuilder::new(ROOT_CLASS)
        .sequence(Sequence::Validate, Vec::new())
        .sequence(Sequence::Install, vec![Command::ProcessDependency(LOCAL_CLASS)])
        .sequence(Sequence::Invoke, vec![Command::ProcessDependency(LOCAL_CLASS)])
        .build_unsigned();
    install(&mut orch, &parent).expect("install");
    assert_eq!(orch.init().expect("init"), ExecutionMode::Invoke);
    orch.entry().expect("boot");
    assert_eq!(orch.mode(), Some(ExecutionMode::PostInvoke));

    // Unprovisioned child during install.
    let mut orch = orchestrator(provisioned_storage(MPI_ROOT));
    let radio = EnvelopeBuilder::new(ROOT_CLASS)
        .sequence(Sequence::Install, vec![Command::ProcessDependency(RADIO_CLASS)])
        .build_unsigned();
    assert_eq!(install(&mut orch, &radio), Err(OrchestratorError::Unauthorized));

    // Recovery is not a dependency of the root manifest at boot.
    let mut orch = orchestrator(provisioned_storage(MPI_ROOT));
    let recovery = EnvelopeBuilder::new(ROOT_CLASS)
        .sequence(Sequence::Validate, Vec::new())
        .sequence(Sequence::Install, Vec::new())
        .sequence(Sequence::Invoke, vec![Command::ProcessDependency(RECOVERY_CLASS)])
        .build_unsigned();
    install(&mut orch, &recovery).expect("install");
    assert_eq!(orch.init().expect("init"), ExecutionMode::Invoke);
    assert_eq!(orch.entry(), Err(OrchestratorError::BootFailed));
}

#[test]
fn test_fetch_into_cache_pool() {
    let mut config = config();
    config.cache = vec![CachePartition::new(1, 0x3000, 0x1000)];
    let payload: Vec<u8> = (0..0x300).map(|i| (i % 13) as u8).collect();
    let pool = ComponentId::CachePool(1).encode().expect("encode");

    let requestor = Arc::new(ImageRequestor::new(config.stream.max_chunks));
    let source = Arc::new(MemoryImageSource::new());
    source.insert(b"http://updates.example/app.bin", payload.clone());
    let provider = ChunkProvider::spawn(
        requestor.clone(),
        source,
        config.stream.chunk_size,
        config.stream.buffer_count,
    )
    .expect("provider");

    let envelope = EnvelopeBuilder::new(LOCAL_CLASS)
        .sequence(Sequence::CandidateVerification, Vec::new())
        .sequence(
            Sequence::Install,
            vec![
                Command::Fetch {
                    resource: b"http://updates.example/app.bin".to_vec(),
                    component: pool.clone(),
                },
                Command::ExpectCached {
                    resource: b"http://updates.example/app.bin".to_vec(),
                    bytes: payload.clone(),
                },
            ],
        )
        .build_unsigned();

    let mut orch = Orchestrator::new(
        provisioned_storage(MPI_ROOT),
        TestProcessor::default(),
        Ed25519Verifier,
        config,
    )
    .with_streaming(requestor)
    .with_memory(Box::new(MemFlash::new(0x4000, 0x400)));
    install(&mut orch, &envelope).expect("install");
    provider.shutdown();

    // Caches do not outlive the candidate that filled them.
    let memory = orch.memory().expect("memory");
    assert_eq!(
        orch.cache().search(memory, b"http://updates.example/app.bin"),
        Err(CacheError::NotFound)
    );
    assert!(flash::is_erased(&flash::read_vec(memory, 0x3000, 0x1000).expect("read")));
    assert_eq!(orch.storage().installed_envelope_read(&LOCAL_CLASS).expect("read"), envelope);
}
