// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Shared fixtures for the SUIT host integration tests
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Exercised by tests/*.rs
//!
//! Provides literal MPI records, a storage factory with scratch space for staged
//! candidates, and a small test envelope format with its builder and processor.
//!
//! Test envelope layout (little endian):
//!   body_len u32 | body | key_id u32 | has_sig u8 | [signature 64]
//! Body:
//!   "TENV" | class 16 | sequence_number u32 | n_seq u8 | { seq u8 | n_cmd u8 | cmd* }*

use ed25519_dalek::{Signer, SigningKey};
use flash::{FlashDevice, MemFlash};
use suit_orchestrator::{
    EnvelopeInfo, ManifestProcessor, ProcessorError, Sequence, SequenceContext,
};
use suit_storage::mpi::digest;
use suit_storage::{ManifestClassId, MemoryRegion, StorageLayout, SuitStorage};

// ============================================================================
// Class ids and literal MPI records
// ============================================================================

pub const VENDOR_ID: [u8; 16] = [
    0x76, 0x17, 0xda, 0xa5, 0x71, 0xfd, 0x5a, 0x85, 0x8f, 0x94, 0xe2, 0x8d, 0x73, 0x5c, 0xe9, 0xf4,
];

const ROOT: [u8; 16] = [
    0x3f, 0x6a, 0x3a, 0x4d, 0xcd, 0xfa, 0x58, 0xc5, 0xac, 0xce, 0xf9, 0xf5, 0x84, 0xc4, 0x11, 0x24,
];
const RECOVERY: [u8; 16] = [
    0x08, 0xc1, 0xb5, 0x99, 0x55, 0xe8, 0x5f, 0xbc, 0x9e, 0x76, 0x7b, 0xc2, 0x9c, 0xe1, 0xb0, 0x4d,
];
const LOCAL: [u8; 16] = [
    0x5b, 0x46, 0x9f, 0xd1, 0x90, 0xee, 0x53, 0x9c, 0xa3, 0x18, 0x68, 0x1b, 0x03, 0x69, 0x5e, 0x36,
];
const RADIO: [u8; 16] = [
    0x81, 0x6a, 0xa0, 0xa0, 0xaf, 0x11, 0x5e, 0xf2, 0x85, 0x8a, 0xfe, 0xb6, 0x68, 0xb2, 0xe9, 0xc9,
];

pub const ROOT_CLASS: ManifestClassId = ManifestClassId::new(ROOT);
pub const RECOVERY_CLASS: ManifestClassId = ManifestClassId::new(RECOVERY);
pub const LOCAL_CLASS: ManifestClassId = ManifestClassId::new(LOCAL);
pub const RADIO_CLASS: ManifestClassId = ManifestClassId::new(RADIO);

/// Builds a 48-byte MPI v1 record from its policy bytes.
pub const fn mpi_record(
    version: u8,
    downgrade: u8,
    independent: u8,
    signature: u8,
    class: [u8; 16],
) -> [u8; 48] {
    let mut out = [0xFF; 48];
    out[0] = version;
    out[1] = downgrade;
    out[2] = independent;
    out[3] = signature;
    let mut i = 0;
    while i < 16 {
        out[16 + i] = VENDOR_ID[i];
        out[32 + i] = class[i];
        i += 1;
    }
    out
}

/// Root: downgrade prevention off, independently updateable, signature check off.
pub const MPI_ROOT: [u8; 48] = mpi_record(0x01, 0x01, 0x02, 0x01, ROOT);
/// Root requiring signed updates.
pub const MPI_ROOT_SIGNED: [u8; 48] = mpi_record(0x01, 0x02, 0x02, 0x02, ROOT);
/// Root with an unsupported MPI version.
pub const MPI_ROOT_BAD_VERSION: [u8; 48] = mpi_record(0x02, 0x01, 0x02, 0x01, ROOT);
/// Root that may not be updated independently.
pub const MPI_ROOT_DENIED: [u8; 48] = mpi_record(0x01, 0x01, 0x01, 0x01, ROOT);
/// Root with an undefined signature-check value.
pub const MPI_ROOT_BAD_POLICY: [u8; 48] = mpi_record(0x01, 0x01, 0x02, 0x07, ROOT);
pub const MPI_RECOVERY: [u8; 48] = mpi_record(0x01, 0x01, 0x02, 0x01, RECOVERY);
pub const MPI_LOCAL: [u8; 48] = mpi_record(0x01, 0x01, 0x02, 0x01, LOCAL);
pub const MPI_RADIO: [u8; 48] = mpi_record(0x01, 0x01, 0x02, 0x01, RADIO);

// ============================================================================
// Storage
// ============================================================================

pub const ERASE_BLOCK: usize = 256;
/// Bytes past the storage partitions used to stage candidate envelopes.
pub const SCRATCH: usize = 8192;

pub fn blank_storage() -> SuitStorage<MemFlash> {
    let layout = StorageLayout::new(0, ERASE_BLOCK);
    let device = MemFlash::new(layout.device_size() + SCRATCH, ERASE_BLOCK);
    let mut storage = SuitStorage::new(device, layout);
    storage.init().expect("storage init");
    storage
}

fn seal_area(slots: &[Option<[u8; 48]>]) -> Vec<u8> {
    let mut body = Vec::new();
    for slot in slots {
        body.extend_from_slice(slot.as_ref().unwrap_or(&[0xFF; 48]));
    }
    let digest = digest(&body);
    body.extend_from_slice(&digest);
    body
}

/// Programs raw application MPI slots (root, recovery, local 1..3) and re-runs init.
pub fn program_app_mpi<F: FlashDevice>(
    storage: &mut SuitStorage<F>,
    slots: [Option<[u8; 48]>; 5],
) {
    let part = storage.layout().app_mpi;
    program_area(storage, part, &slots);
}

/// Programs raw radio MPI slots (recovery, local 1..2) and re-runs init.
pub fn program_rad_mpi<F: FlashDevice>(
    storage: &mut SuitStorage<F>,
    slots: [Option<[u8; 48]>; 3],
) {
    let part = storage.layout().rad_mpi;
    program_area(storage, part, &slots);
}

fn program_area<F: FlashDevice>(
    storage: &mut SuitStorage<F>,
    part: flash::Partition,
    slots: &[Option<[u8; 48]>],
) {
    let area = seal_area(slots);
    let device = storage.device_mut();
    device.erase(part.offset, part.size).expect("erase mpi");
    device.write(part.offset, &area).expect("write mpi");
    storage.init().expect("storage init");
}

/// Storage with root, recovery and one local application class.
pub fn provisioned_storage(root: [u8; 48]) -> SuitStorage<MemFlash> {
    let mut storage = blank_storage();
    program_app_mpi(&mut storage, [Some(root), Some(MPI_RECOVERY), Some(MPI_LOCAL), None, None]);
    storage
}

/// Copies `envelope` into the scratch area and makes it the update candidate, followed
/// by `caches` placeholder cache regions.
pub fn stage_candidate<F: FlashDevice>(
    storage: &mut SuitStorage<F>,
    envelope: &[u8],
    caches: usize,
) -> usize {
    let address = storage.layout().device_size();
    let device = storage.device_mut();
    device.erase(address, SCRATCH).expect("erase scratch");
    device.write(address, envelope).expect("write candidate");
    let mut regions = vec![MemoryRegion::new(address, envelope.len())];
    regions.extend((0..caches).map(|i| MemoryRegion::new(address + SCRATCH / 2 + i * 64, 64)));
    storage.update_candidate_set(&regions).expect("set candidate");
    address
}

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

// ============================================================================
// Test envelope format
// ============================================================================

/// Commands a test sequence may contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Authorizes the component for the running manifest.
    Authorize(Vec<u8>),
    /// Streams a resource into a memory component.
    Fetch { resource: Vec<u8>, component: Vec<u8> },
    /// Fails unless the component holds exactly these bytes.
    Expect { component: Vec<u8>, bytes: Vec<u8> },
    SetVar { index: u8, value: u32 },
    /// Processes another manifest as a dependency of the running one.
    ProcessDependency(ManifestClassId),
    /// Fails unless the DFU cache holds exactly these bytes under the resource URI.
    ExpectCached { resource: Vec<u8>, bytes: Vec<u8> },
    Fail,
}

const MAGIC: &[u8; 4] = b"TENV";

fn sequence_tag(sequence: Sequence) -> u8 {
    match sequence {
        Sequence::Validate => 1,
        Sequence::Load => 2,
        Sequence::Invoke => 3,
        Sequence::CandidateVerification => 4,
        Sequence::Install => 5,
    }
}

fn sequence_from_tag(tag: u8) -> Option<Sequence> {
    Some(match tag {
        1 => Sequence::Validate,
        2 => Sequence::Load,
        3 => Sequence::Invoke,
        4 => Sequence::CandidateVerification,
        5 => Sequence::Install,
        _ => return None,
    })
}

#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    class_id: ManifestClassId,
    sequence_number: u32,
    sequences: Vec<(Sequence, Vec<Command>)>,
}

impl EnvelopeBuilder {
    pub fn new(class_id: ManifestClassId) -> Self {
        Self { class_id, sequence_number: 1, sequences: Vec::new() }
    }

    pub fn sequence_number(mut self, value: u32) -> Self {
        self.sequence_number = value;
        self
    }

    pub fn sequence(mut self, sequence: Sequence, commands: Vec<Command>) -> Self {
        self.sequences.push((sequence, commands));
        self
    }

    /// Empty validate, invoke, candidate-verification and install sequences.
    pub fn all_sequences(self) -> Self {
        self.sequence(Sequence::Validate, Vec::new())
            .sequence(Sequence::Invoke, Vec::new())
            .sequence(Sequence::CandidateVerification, Vec::new())
            .sequence(Sequence::Install, Vec::new())
    }

    fn body(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(self.class_id.as_bytes());
        out.extend_from_slice(&self.sequence_number.to_le_bytes());
        out.push(self.sequences.len() as u8);
        for (sequence, commands) in &self.sequences {
            out.push(sequence_tag(*sequence));
            out.push(commands.len() as u8);
            for command in commands {
                encode_command(&mut out, command);
            }
        }
        out
    }

    pub fn build_unsigned(&self) -> Vec<u8> {
        assemble(&self.body(), 0, None)
    }

    pub fn build_signed(&self, key_id: u32, key: &SigningKey) -> Vec<u8> {
        let body = self.body();
        let signature = key.sign(&body).to_bytes();
        assemble(&body, key_id, Some(&signature))
    }

    /// Signed with `key_id` but carrying an arbitrary signature.
    pub fn build_with_signature(&self, key_id: u32, signature: &[u8; 64]) -> Vec<u8> {
        assemble(&self.body(), key_id, Some(signature))
    }
}

fn assemble(body: &[u8], key_id: u32, signature: Option<&[u8; 64]>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(&key_id.to_le_bytes());
    match signature {
        Some(signature) => {
            out.push(1);
            out.extend_from_slice(signature);
        }
        None => out.push(0),
    }
    out
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn encode_command(out: &mut Vec<u8>, command: &Command) {
    match command {
        Command::Authorize(component) => {
            out.push(1);
            put_bytes(out, component);
        }
        Command::Fetch { resource, component } => {
            out.push(2);
            put_bytes(out, resource);
            put_bytes(out, component);
        }
        Command::Expect { component, bytes } => {
            out.push(3);
            put_bytes(out, component);
            put_bytes(out, bytes);
        }
        Command::SetVar { index, value } => {
            out.push(4);
            out.push(*index);
            out.extend_from_slice(&value.to_le_bytes());
        }
        Command::Fail => out.push(5),
        Command::ProcessDependency(class_id) => {
            out.push(6);
            out.extend_from_slice(class_id.as_bytes());
        }
        Command::ExpectCached { resource, bytes } => {
            out.push(7);
            put_bytes(out, resource);
            put_bytes(out, bytes);
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], ProcessorError> {
        let end = self.at.checked_add(len).ok_or(ProcessorError::Decoding)?;
        let slice = self.bytes.get(self.at..end).ok_or(ProcessorError::Decoding)?;
        self.at = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ProcessorError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, ProcessorError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn bytes(&mut self) -> Result<Vec<u8>, ProcessorError> {
        let raw = self.take(2)?;
        let len = u16::from_le_bytes([raw[0], raw[1]]) as usize;
        Ok(self.take(len)?.to_vec())
    }
}

struct Parsed {
    info: EnvelopeInfo,
    sequences: Vec<(Sequence, Vec<Command>)>,
}

fn parse(envelope: &[u8]) -> Result<Parsed, ProcessorError> {
    let mut outer = Reader { bytes: envelope, at: 0 };
    let body_len = outer.u32()? as usize;
    let body = outer.take(body_len)?;
    let key_id = outer.u32()?;
    let signature = match outer.u8()? {
        0 => None,
        1 => {
            let mut signature = [0u8; 64];
            signature.copy_from_slice(outer.take(64)?);
            Some(signature)
        }
        _ => return Err(ProcessorError::Decoding),
    };
    if outer.at != envelope.len() {
        return Err(ProcessorError::Decoding);
    }

    let mut reader = Reader { bytes: body, at: 0 };
    if reader.take(4)? != MAGIC {
        return Err(ProcessorError::Decoding);
    }
    let class_id = ManifestClassId::from_slice(reader.take(16)?).ok_or(ProcessorError::Decoding)?;
    let sequence_number = reader.u32()?;
    let count = reader.u8()?;
    let mut sequences = Vec::new();
    for _ in 0..count {
        let sequence = sequence_from_tag(reader.u8()?).ok_or(ProcessorError::Decoding)?;
        let commands = reader.u8()?;
        let mut list = Vec::new();
        for _ in 0..commands {
            list.push(match reader.u8()? {
                1 => Command::Authorize(reader.bytes()?),
                2 => Command::Fetch { resource: reader.bytes()?, component: reader.bytes()? },
                3 => Command::Expect { component: reader.bytes()?, bytes: reader.bytes()? },
                4 => Command::SetVar { index: reader.u8()?, value: reader.u32()? },
                5 => Command::Fail,
                6 => Command::ProcessDependency(
                    ManifestClassId::from_slice(reader.take(16)?).ok_or(ProcessorError::Decoding)?,
                ),
                7 => Command::ExpectCached { resource: reader.bytes()?, bytes: reader.bytes()? },
                _ => return Err(ProcessorError::Decoding),
            });
        }
        sequences.push((sequence, list));
    }

    Ok(Parsed {
        info: EnvelopeInfo {
            class_id,
            sequence_number,
            key_id,
            signed_payload: body.to_vec(),
            signature,
            sequences: sequences.iter().map(|(sequence, _)| *sequence).collect(),
        },
        sequences,
    })
}

/// Manifest processor for the test envelope format. Records every sequence it runs.
#[derive(Debug, Default)]
pub struct TestProcessor {
    pub runs: Vec<(ManifestClassId, Sequence)>,
}

impl ManifestProcessor for TestProcessor {
    fn decode(&mut self, envelope: &[u8]) -> Result<EnvelopeInfo, ProcessorError> {
        parse(envelope).map(|parsed| parsed.info)
    }

    fn process(
        &mut self,
        envelope: &[u8],
        sequence: Sequence,
        ctx: &mut dyn SequenceContext,
    ) -> Result<(), ProcessorError> {
        let parsed = parse(envelope)?;
        let commands = parsed
            .sequences
            .into_iter()
            .find(|(s, _)| *s == sequence)
            .map(|(_, commands)| commands)
            .ok_or(ProcessorError::MissingSequence(sequence))?;
        self.runs.push((ctx.class_id(), sequence));

        for command in commands {
            match command {
                Command::Authorize(component) => ctx.authorize(&component)?,
                Command::Fetch { resource, component } => {
                    ctx.fetch(&resource, &component)?;
                }
                Command::Expect { component, bytes } => {
                    if ctx.read_component(&component)? != bytes {
                        return Err(ProcessorError::CommandFailed);
                    }
                }
                Command::SetVar { index, value } => ctx.var_set(index as usize, value)?,
                Command::ProcessDependency(class_id) => {
                    ctx.authorize_process_dependency(&class_id)?
                }
                Command::ExpectCached { resource, bytes } => {
                    if ctx.cache_read(&resource)? != bytes {
                        return Err(ProcessorError::CommandFailed);
                    }
                }
                Command::Fail => return Err(ProcessorError::CommandFailed),
            }
        }
        Ok(())
    }
}
