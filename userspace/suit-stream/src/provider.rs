// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Chunk provider and chunk buffer pool (producer side of the streaming protocol)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below + tests/suit_host/tests/streaming.rs
//!
//! Buffer lifecycle: Free -> ReadyToEnqueue (filled) -> Enqueued (owned by the requestor)
//! -> Free (handed back by a status request). Only the provider fills buffers; only a status
//! response returns an enqueued buffer to Free.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::requestor::{ChunkStatus, EnqueueError, ImageRequestor};
use crate::source::ImageSource;
use crate::StreamError;

/// Longest wait for a chunk status notification before polling again.
const STATUS_WAIT: Duration = Duration::from_millis(50);

// ============================================================================
// Buffer pool
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Free,
    ReadyToEnqueue,
    Enqueued,
}

struct PoolBuffer {
    state: BufferState,
    chunk_id: u32,
    /// `None` while the requestor owns the buffer.
    data: Option<Vec<u8>>,
}

/// Fixed set of reusable chunk buffers.
pub struct BufferPool {
    buffers: Vec<PoolBuffer>,
    chunk_size: usize,
}

impl BufferPool {
    pub fn new(count: usize, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let buffers = (0..count.max(1))
            .map(|_| PoolBuffer {
                state: BufferState::Free,
                chunk_id: 0,
                data: Some(Vec::with_capacity(chunk_size)),
            })
            .collect();
        Self { buffers, chunk_size }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn state(&self, index: usize) -> Option<BufferState> {
        self.buffers.get(index).map(|b| b.state)
    }

    pub fn find_free(&self) -> Option<usize> {
        self.buffers.iter().position(|b| b.state == BufferState::Free)
    }

    /// Buffers currently owned by the requestor.
    pub fn in_flight(&self) -> usize {
        self.buffers.iter().filter(|b| b.state == BufferState::Enqueued).count()
    }

    /// Fills a free buffer and moves it to `ReadyToEnqueue`, handing out its storage.
    pub fn fill(&mut self, index: usize, chunk_id: u32, bytes: &[u8]) -> Option<Vec<u8>> {
        let buffer = self.buffers.get_mut(index)?;
        if buffer.state != BufferState::Free || bytes.len() > self.chunk_size {
            return None;
        }
        let mut data = buffer.data.take().unwrap_or_default();
        data.clear();
        data.extend_from_slice(bytes);
        buffer.state = BufferState::ReadyToEnqueue;
        buffer.chunk_id = chunk_id;
        Some(data)
    }

    /// Storage accepted by the requestor.
    pub fn mark_enqueued(&mut self, index: usize) {
        if let Some(buffer) = self.buffers.get_mut(index) {
            if buffer.state == BufferState::ReadyToEnqueue {
                buffer.state = BufferState::Enqueued;
            }
        }
    }

    /// Storage returned unused (enqueue rejected); the buffer stays `ReadyToEnqueue`.
    pub fn restore(&mut self, index: usize, data: Vec<u8>) {
        if let Some(buffer) = self.buffers.get_mut(index) {
            buffer.data = Some(data);
        }
    }

    /// Storage handed back by a status response. Returns false for unknown chunks.
    pub fn release(&mut self, chunk_id: u32, data: Vec<u8>) -> bool {
        let Some(buffer) = self
            .buffers
            .iter_mut()
            .find(|b| b.state == BufferState::Enqueued && b.chunk_id == chunk_id)
        else {
            return false;
        };
        buffer.data = Some(data);
        buffer.state = BufferState::Free;
        true
    }

    /// Returns every buffer to `Free`, reallocating storage the requestor kept.
    pub fn reset(&mut self) {
        let chunk_size = self.chunk_size;
        for buffer in &mut self.buffers {
            if buffer.data.is_none() {
                buffer.data = Some(Vec::with_capacity(chunk_size));
            }
            buffer.state = BufferState::Free;
            buffer.chunk_id = 0;
        }
    }
}

// ============================================================================
// Status signal
// ============================================================================

#[derive(Default)]
struct StatusSignal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl StatusSignal {
    fn raise(&self) {
        *self.raised.lock() = true;
        self.cond.notify_all();
    }

    fn wait(&self, timeout: Duration) {
        let mut raised = self.raised.lock();
        if !*raised {
            self.cond.wait_for(&mut raised, timeout);
        }
        *raised = false;
    }
}

// ============================================================================
// Provider
// ============================================================================

#[derive(Debug)]
struct FetchRequest {
    resource_id: Vec<u8>,
    session_id: u32,
}

/// Producer serving fetch requests from an [`ImageSource`] on its own thread.
pub struct ChunkProvider {
    requestor: Arc<ImageRequestor>,
    worker: Option<JoinHandle<()>>,
}

impl ChunkProvider {
    /// Subscribes to the requestor's notifications and starts the worker thread.
    pub fn spawn(
        requestor: Arc<ImageRequestor>,
        source: Arc<dyn ImageSource>,
        chunk_size: usize,
        buffer_count: usize,
    ) -> Result<Self, StreamError> {
        let (tx, rx) = mpsc::channel::<FetchRequest>();
        let requests: Mutex<Sender<FetchRequest>> = Mutex::new(tx);
        requestor.subscribe_missing_image(move |resource_id, session_id| {
            let request = FetchRequest { resource_id: resource_id.to_vec(), session_id };
            if requests.lock().send(request).is_err() {
                debug!("suit-stream: provider gone, fetch request dropped");
            }
        })?;

        let signal = Arc::new(StatusSignal::default());
        let notifier = signal.clone();
        if let Err(err) = requestor.subscribe_chunk_status(move |_| notifier.raise()) {
            requestor.unsubscribe_missing_image();
            return Err(err);
        }

        let mut worker = Worker {
            requestor: requestor.clone(),
            source,
            pool: BufferPool::new(buffer_count, chunk_size),
            signal,
            last_session: None,
        };
        let handle = thread::Builder::new()
            .name("suit-chunk-provider".into())
            .spawn(move || worker.run(rx));
        match handle {
            Ok(handle) => Ok(Self { requestor, worker: Some(handle) }),
            Err(_) => {
                requestor.unsubscribe_missing_image();
                requestor.unsubscribe_chunk_status();
                Err(StreamError::NoResources)
            }
        }
    }

    /// Unsubscribes and waits for the worker to finish the request in progress.
    pub fn shutdown(self) {
        drop(self);
    }

    fn stop(&mut self) {
        self.requestor.unsubscribe_missing_image();
        self.requestor.unsubscribe_chunk_status();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("suit-stream: provider worker panicked");
            }
        }
    }
}

impl Drop for ChunkProvider {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    requestor: Arc<ImageRequestor>,
    source: Arc<dyn ImageSource>,
    pool: BufferPool,
    signal: Arc<StatusSignal>,
    last_session: Option<u32>,
}

impl Worker {
    fn run(&mut self, requests: Receiver<FetchRequest>) {
        while let Ok(request) = requests.recv() {
            if self.last_session == Some(request.session_id) {
                debug!("suit-stream: repeated fetch request for session {} ignored", request.session_id);
                continue;
            }
            self.last_session = Some(request.session_id);

            let Some(image) = self.source.read(&request.resource_id) else {
                warn!(
                    "suit-stream: no image for resource {:?}",
                    String::from_utf8_lossy(&request.resource_id)
                );
                continue;
            };
            match self.serve(request.session_id, &image) {
                Ok(()) => info!(
                    "suit-stream: served {} bytes to session {}",
                    image.len(),
                    request.session_id
                ),
                Err(err) => warn!("suit-stream: session {} aborted: {}", request.session_id, err),
            }
            self.pool.reset();
        }
    }

    fn serve(&mut self, session_id: u32, image: &[u8]) -> Result<(), StreamError> {
        let chunk_size = self.pool.chunk_size();
        let mut chunk_id = 0u32;
        let mut offset = 0usize;
        for piece in image.chunks(chunk_size) {
            let index = self.wait_free(session_id)?;
            chunk_id += 1;
            let data = self.pool.fill(index, chunk_id, piece).ok_or(StreamError::IncorrectState)?;
            self.enqueue(session_id, Some(index), chunk_id, offset, data, false)?;
            offset += piece.len();
        }
        chunk_id += 1;
        self.enqueue(session_id, None, chunk_id, offset, Vec::new(), true)?;
        self.drain(session_id)
    }

    fn enqueue(
        &mut self,
        session_id: u32,
        index: Option<usize>,
        chunk_id: u32,
        offset: usize,
        mut data: Vec<u8>,
        last: bool,
    ) -> Result<(), StreamError> {
        loop {
            match self.requestor.chunk_enqueue(session_id, chunk_id, offset, data, last) {
                Ok(()) => {
                    if let Some(index) = index {
                        self.pool.mark_enqueued(index);
                    }
                    return Ok(());
                }
                Err(EnqueueError { error: StreamError::Busy, data: returned }) => {
                    data = returned;
                    self.collect(session_id)?;
                    self.signal.wait(STATUS_WAIT);
                }
                Err(EnqueueError { error, data: returned }) => {
                    if let Some(index) = index {
                        self.pool.restore(index, returned);
                    }
                    return Err(error);
                }
            }
        }
    }

    /// Takes back every buffer the requestor no longer references.
    fn collect(&mut self, session_id: u32) -> Result<(), StreamError> {
        let infos = self.requestor.chunk_status_req(session_id, self.requestor.max_chunks())?;
        let mut refused = false;
        for info in infos {
            match info.status {
                ChunkStatus::Pending => {}
                ChunkStatus::Processed => {
                    self.pool.release(info.chunk_id, info.data);
                }
                ChunkStatus::Refused => {
                    self.pool.release(info.chunk_id, info.data);
                    refused = true;
                }
            }
        }
        if refused {
            return Err(StreamError::Refused);
        }
        Ok(())
    }

    fn wait_free(&mut self, session_id: u32) -> Result<usize, StreamError> {
        loop {
            if let Some(index) = self.pool.find_free() {
                return Ok(index);
            }
            self.collect(session_id)?;
            if let Some(index) = self.pool.find_free() {
                return Ok(index);
            }
            self.signal.wait(STATUS_WAIT);
        }
    }

    /// Collects outstanding buffers until none is left or the session closes.
    fn drain(&mut self, session_id: u32) -> Result<(), StreamError> {
        while self.pool.in_flight() > 0 {
            match self.collect(session_id) {
                Ok(()) => {}
                Err(StreamError::IncorrectState) => break,
                Err(err) => return Err(err),
            }
            if self.pool.in_flight() == 0 {
                break;
            }
            self.signal.wait(STATUS_WAIT);
        }
        Ok(())
    }
}
