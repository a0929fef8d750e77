// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Non-volatile manifest variables (NVV)

use alloc::vec::Vec;

use crate::mpi::MPI_DIGEST_SIZE;

pub const NVV_COUNT: usize = 32;
pub const NVV_DEFAULT: u32 = 0xFFFF_FFFF;
pub const NVV_BODY_SIZE: usize = NVV_COUNT * 4;
pub const NVV_AREA_SIZE: usize = NVV_BODY_SIZE + MPI_DIGEST_SIZE;

/// In-memory copy of the variable table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NvvTable {
    values: [u32; NVV_COUNT],
}

impl Default for NvvTable {
    fn default() -> Self {
        Self { values: [NVV_DEFAULT; NVV_COUNT] }
    }
}

impl NvvTable {
    pub fn from_body(body: &[u8]) -> Self {
        let mut values = [NVV_DEFAULT; NVV_COUNT];
        for (value, raw) in values.iter_mut().zip(body.chunks_exact(4)) {
            *value = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        }
        Self { values }
    }

    pub fn to_body(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        self.values.get(index).copied()
    }

    pub fn set(&mut self, index: usize, value: u32) -> Option<()> {
        *self.values.get_mut(index)? = value;
        Some(())
    }
}
