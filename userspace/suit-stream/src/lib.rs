// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: SUIT image streaming between a requestor and a chunk provider
//! OWNERS: @runtime
//! STATUS: Functional (host-first)
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module, threaded round trips in tests/suit_host
//!
//! PUBLIC API:
//!   - ImageRequestor: consumer side; pulls one image at a time into a StreamSink
//!   - ChunkProvider: producer side; owns the chunk buffer pool and serves fetch requests
//!   - StreamSink: MemorySink, FlashSink, DigestSink
//!   - ImageSource: MemoryImageSource, DirImageSource
//!   - DfuCache: URI-keyed slots in cache partitions, filled through CacheSlotSink
//!   - StreamError / SinkError: Error types
//!
//! DEPENDENCIES:
//!   - parking_lot: Mutex/Condvar for the requestor state and status signal
//!   - std::sync::mpsc: fetch request channel into the provider thread
//!   - sha2: DigestSink
//!   - flash: FlashSink and cache partition target
//!   - ciborium-ll: cache partition map headers
//!
//! The requestor owns chunk buffers from enqueue until a status request hands them back;
//! only the provider writes buffer contents.

#![forbid(unsafe_code)]

use std::time::Duration;

pub mod cache;
pub mod provider;
pub mod requestor;
pub mod sink;
pub mod source;

pub use cache::{
    CacheError, CachePartition, CacheSlot, CacheSlotSink, CachedPayload, DfuCache, MAX_URI_LENGTH,
};
pub use provider::{BufferPool, BufferState, ChunkProvider};
pub use requestor::{ChunkInfo, ChunkStatus, EnqueueError, ImageRequestor, Stage};
pub use sink::{DigestSink, FlashSink, MemorySink, SinkError, StreamSink, MEMORY_SINK_LIMIT};
pub use source::{DirImageSource, ImageSource, MemoryImageSource};

/// Streaming error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("invalid argument")]
    InvalidArgument,
    /// Wrong session, no session, or session closing.
    #[error("incorrect stream state")]
    IncorrectState,
    /// No free slot; retry after a chunk status notification.
    #[error("busy")]
    Busy,
    /// A stream or subscriber is already registered.
    #[error("no resources")]
    NoResources,
    /// No response within the inter-chunk timeout.
    #[error("stream timed out")]
    Timeout,
    /// Chunk overlaps bytes already delivered to the sink.
    #[error("chunk at offset {got} overlaps delivered data (expected {expected})")]
    DataIntegrity { expected: usize, got: usize },
    /// The requestor refused a chunk; the session is over.
    #[error("chunk refused")]
    Refused,
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Timing and sizing of one requestor/provider pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub inter_chunk_timeout: Duration,
    pub requesting_period: Duration,
    /// Requestor chunk slots.
    pub max_chunks: usize,
    /// Provider buffer size.
    pub chunk_size: usize,
    /// Provider buffer count.
    pub buffer_count: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            inter_chunk_timeout: Duration::from_millis(5000),
            requesting_period: Duration::from_millis(1000),
            max_chunks: 5,
            chunk_size: 512,
            buffer_count: 5,
        }
    }
}
