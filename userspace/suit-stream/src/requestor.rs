// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Image requestor (consumer side of the streaming protocol)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below + tests/suit_host/tests/streaming.rs
//!
//! One stream at a time. `stream()` runs the data loop on the caller's thread; the producer
//! calls `chunk_enqueue` / `chunk_status_req` from any other thread. Notification handlers and
//! sink operations run with the state lock released.
//!
//! Slot lifecycle: Empty -> Pending (enqueue) -> ProcessedSuccess | ProcessedFail (data loop)
//! -> Empty (status request hands the buffer back).

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::sink::StreamSink;
use crate::StreamError;

/// `(resource_id, session_id)`
pub type MissingImageHandler = Arc<dyn Fn(&[u8], u32) + Send + Sync>;
/// `(session_id)`
pub type ChunkStatusHandler = Arc<dyn Fn(u32) + Send + Sync>;

const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    PendingFirstResponse,
    InProgress,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotStatus {
    Empty,
    Pending,
    ProcessedSuccess,
    ProcessedFail,
}

/// Status reported to the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    Processed,
    Refused,
}

/// One entry of a status response. `data` carries the buffer back for non-pending chunks.
#[derive(Debug)]
pub struct ChunkInfo {
    pub chunk_id: u32,
    pub status: ChunkStatus,
    pub data: Vec<u8>,
}

/// Rejected enqueue; the buffer is returned to the caller.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct EnqueueError {
    pub error: StreamError,
    pub data: Vec<u8>,
}

struct ChunkSlot {
    status: SlotStatus,
    chunk_id: u32,
    offset: usize,
    data: Vec<u8>,
    arrival: u32,
}

impl ChunkSlot {
    fn empty() -> Self {
        Self { status: SlotStatus::Empty, chunk_id: 0, offset: 0, data: Vec::new(), arrival: 0 }
    }
}

struct State {
    stage: Stage,
    session_id: u32,
    last_session_id: u32,
    resource_id: Vec<u8>,
    inter_chunk_timeout: Duration,
    requesting_period: Duration,
    last_request: Option<Instant>,
    last_response: Instant,
    last_arrival: u32,
    last_processed: u32,
    write_offset: usize,
    last_chunk_arrival: u32,
    completion: Option<StreamError>,
    slots: Vec<ChunkSlot>,
    kicked: bool,
    missing_image: Option<MissingImageHandler>,
    chunk_status: Option<ChunkStatusHandler>,
}

impl State {
    fn begin(&mut self, resource_id: &[u8], inter_chunk_timeout: Duration, requesting_period: Duration) {
        self.stage = Stage::PendingFirstResponse;
        self.resource_id = resource_id.to_vec();
        self.inter_chunk_timeout = inter_chunk_timeout;
        self.requesting_period = requesting_period.max(MIN_PERIOD);

        self.last_session_id = self.last_session_id.wrapping_add(1);
        if self.last_session_id == 0 {
            self.last_session_id = 1;
        }
        self.session_id = self.last_session_id;

        self.last_request = None;
        self.last_response = Instant::now();
        self.last_arrival = 0;
        self.last_processed = 0;
        self.write_offset = 0;
        self.last_chunk_arrival = 0;
        self.completion = None;
        self.kicked = false;
        for slot in &mut self.slots {
            *slot = ChunkSlot::empty();
        }
    }

    fn next_pending(&self) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.status == SlotStatus::Pending && slot.arrival == self.last_processed + 1
        })
    }

    fn occupied_by_arrival(&self) -> Vec<usize> {
        let mut occupied: Vec<usize> = (0..self.slots.len())
            .filter(|i| self.slots[*i].status != SlotStatus::Empty)
            .collect();
        occupied.sort_by_key(|i| self.slots[*i].arrival);
        occupied
    }
}

/// Consumer side of the streaming protocol.
pub struct ImageRequestor {
    state: Mutex<State>,
    kick: Condvar,
    max_chunks: usize,
}

impl ImageRequestor {
    pub fn new(max_chunks: usize) -> Self {
        let max_chunks = max_chunks.max(1);
        let state = State {
            stage: Stage::Idle,
            session_id: 0,
            last_session_id: 0,
            resource_id: Vec::new(),
            inter_chunk_timeout: Duration::ZERO,
            requesting_period: MIN_PERIOD,
            last_request: None,
            last_response: Instant::now(),
            last_arrival: 0,
            last_processed: 0,
            write_offset: 0,
            last_chunk_arrival: 0,
            completion: None,
            slots: (0..max_chunks).map(|_| ChunkSlot::empty()).collect(),
            kicked: false,
            missing_image: None,
            chunk_status: None,
        };
        Self { state: Mutex::new(state), kick: Condvar::new(), max_chunks }
    }

    pub fn max_chunks(&self) -> usize {
        self.max_chunks
    }

    pub fn stage(&self) -> Stage {
        self.state.lock().stage
    }

    /// Id of the current (or last) session; 0 before the first stream.
    pub fn session_id(&self) -> u32 {
        self.state.lock().session_id
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub fn subscribe_missing_image<H>(&self, handler: H) -> Result<(), StreamError>
    where
        H: Fn(&[u8], u32) + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        if state.missing_image.is_some() {
            return Err(StreamError::NoResources);
        }
        state.missing_image = Some(Arc::new(handler));
        Ok(())
    }

    pub fn unsubscribe_missing_image(&self) {
        self.state.lock().missing_image = None;
    }

    pub fn subscribe_chunk_status<H>(&self, handler: H) -> Result<(), StreamError>
    where
        H: Fn(u32) + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        if state.chunk_status.is_some() {
            return Err(StreamError::NoResources);
        }
        state.chunk_status = Some(Arc::new(handler));
        Ok(())
    }

    pub fn unsubscribe_chunk_status(&self) {
        self.state.lock().chunk_status = None;
    }

    // ========================================================================
    // Consumer
    // ========================================================================

    /// Fetches `resource_id` into `sink`, blocking until the last chunk is written, the sink
    /// fails, or no chunk arrives within `inter_chunk_timeout`.
    pub fn stream(
        &self,
        resource_id: &[u8],
        sink: &mut dyn StreamSink,
        inter_chunk_timeout: Duration,
        requesting_period: Duration,
    ) -> Result<(), StreamError> {
        if resource_id.is_empty() {
            return Err(StreamError::InvalidArgument);
        }
        let mut state = self.state.lock();
        if state.stage != Stage::Idle {
            return Err(StreamError::NoResources);
        }
        state.begin(resource_id, inter_chunk_timeout, requesting_period);
        let session_id = state.session_id;
        info!("suit-stream: session {} started", session_id);

        let result = self.data_loop(&mut state, sink);
        match result {
            Ok(()) => info!(
                "suit-stream: session {} complete ({} bytes)",
                session_id, state.write_offset
            ),
            Err(err) => error!("suit-stream: session {} failed: {}", session_id, err),
        }
        result
    }

    fn data_loop(
        &self,
        state: &mut MutexGuard<'_, State>,
        sink: &mut dyn StreamSink,
    ) -> Result<(), StreamError> {
        let mut sleep = Duration::ZERO;
        loop {
            if !state.kicked && !sleep.is_zero() {
                self.kick.wait_for(state, sleep);
            }
            state.kicked = false;
            let now = Instant::now();
            sleep = state.inter_chunk_timeout;

            if state.stage == Stage::InProgress {
                if let Some(index) = state.next_pending() {
                    let result = process_chunk(state, index, sink);
                    let arrival = state.slots[index].arrival;
                    match result {
                        Ok(()) => {
                            state.last_processed = arrival;
                            if state.last_chunk_arrival == arrival {
                                state.stage = Stage::Closing;
                            }
                            state.slots[index].status = SlotStatus::ProcessedSuccess;
                        }
                        Err(err) => {
                            state.completion = Some(err);
                            state.stage = Stage::Closing;
                            state.slots[index].status = SlotStatus::ProcessedFail;
                        }
                    }
                    notify_chunk_status(state);
                    sleep = Duration::ZERO;
                }
            }

            if state.stage == Stage::Closing {
                for slot in state.slots.iter_mut() {
                    if slot.status == SlotStatus::Pending {
                        slot.status = SlotStatus::ProcessedFail;
                    }
                }
                notify_chunk_status(state);
                state.stage = Stage::Idle;
                return match state.completion.take() {
                    None => sink.flush().map_err(StreamError::from),
                    Some(err) => Err(err),
                };
            }

            if state.stage == Stage::PendingFirstResponse {
                let period = state.requesting_period;
                let due = state
                    .last_request
                    .map_or(true, |at| now.saturating_duration_since(at) >= period);
                if due {
                    notify_missing_image(state);
                    state.last_request = Some(now);
                }
                let next_request = state
                    .last_request
                    .map_or(period, |at| (at + period).saturating_duration_since(now));
                sleep = sleep.min(next_request);
            }

            let idle_for = now.saturating_duration_since(state.last_response);
            if idle_for >= state.inter_chunk_timeout {
                warn!("suit-stream: session {} inter-chunk timeout", state.session_id);
                state.stage = Stage::Idle;
                return Err(StreamError::Timeout);
            }
            sleep = sleep.min(state.inter_chunk_timeout - idle_for);
        }
    }

    // ========================================================================
    // Producer
    // ========================================================================

    /// Hands a chunk to the requestor. An empty `data` with `last = false` only moves the
    /// write position; with `last = true` it marks the end of the image.
    pub fn chunk_enqueue(
        &self,
        session_id: u32,
        chunk_id: u32,
        offset: usize,
        data: Vec<u8>,
        last: bool,
    ) -> Result<(), EnqueueError> {
        let mut state = self.state.lock();
        if state.stage == Stage::Idle || state.session_id != session_id {
            return Err(EnqueueError { error: StreamError::IncorrectState, data });
        }
        if state.stage == Stage::Closing || state.last_chunk_arrival != 0 {
            return Err(EnqueueError { error: StreamError::IncorrectState, data });
        }
        if state.stage == Stage::PendingFirstResponse {
            state.stage = Stage::InProgress;
        }
        state.last_response = Instant::now();

        let Some(index) = state.slots.iter().position(|s| s.status == SlotStatus::Empty) else {
            return Err(EnqueueError { error: StreamError::Busy, data });
        };
        state.last_arrival += 1;
        let arrival = state.last_arrival;
        debug!(
            "suit-stream: enqueue session={} chunk={} offset={} len={} last={}",
            session_id,
            chunk_id,
            offset,
            data.len(),
            last
        );
        state.slots[index] = ChunkSlot { status: SlotStatus::Pending, chunk_id, offset, data, arrival };
        if last {
            state.last_chunk_arrival = arrival;
        }
        state.kicked = true;
        self.kick.notify_one();
        Ok(())
    }

    /// Reports every occupied slot in arrival order and frees the non-pending ones.
    ///
    /// Returns `Busy` without freeing anything when more than `capacity` slots are occupied.
    pub fn chunk_status_req(
        &self,
        session_id: u32,
        capacity: usize,
    ) -> Result<Vec<ChunkInfo>, StreamError> {
        let mut state = self.state.lock();
        if state.stage == Stage::Idle || state.session_id != session_id {
            return Err(StreamError::IncorrectState);
        }
        let occupied = state.occupied_by_arrival();
        if occupied.len() > capacity {
            return Err(StreamError::Busy);
        }

        let mut infos = Vec::with_capacity(occupied.len());
        for index in occupied {
            let slot = &mut state.slots[index];
            let status = match slot.status {
                SlotStatus::Pending => ChunkStatus::Pending,
                SlotStatus::ProcessedSuccess => ChunkStatus::Processed,
                _ => ChunkStatus::Refused,
            };
            let data = if status == ChunkStatus::Pending {
                Vec::new()
            } else {
                slot.status = SlotStatus::Empty;
                std::mem::take(&mut slot.data)
            };
            infos.push(ChunkInfo { chunk_id: slot.chunk_id, status, data });
        }
        Ok(infos)
    }
}

/// Writes one pending chunk to the sink with the lock released.
fn process_chunk(
    state: &mut MutexGuard<'_, State>,
    index: usize,
    sink: &mut dyn StreamSink,
) -> Result<(), StreamError> {
    let offset = state.slots[index].offset;
    let expected = state.write_offset;
    if offset < expected {
        return Err(StreamError::DataIntegrity { expected, got: offset });
    }
    if offset > expected {
        MutexGuard::unlocked(state, || sink.seek(offset))?;
        state.write_offset = offset;
    }

    let data = std::mem::take(&mut state.slots[index].data);
    let written =
        if data.is_empty() { Ok(()) } else { MutexGuard::unlocked(state, || sink.write(&data)) };
    let len = data.len();
    state.slots[index].data = data;
    written?;
    state.write_offset =
        offset.checked_add(len).ok_or(StreamError::DataIntegrity { expected, got: offset })?;
    Ok(())
}

fn notify_chunk_status(state: &mut MutexGuard<'_, State>) {
    let Some(handler) = state.chunk_status.clone() else {
        return;
    };
    let session_id = state.session_id;
    MutexGuard::unlocked(state, || handler(session_id));
}

fn notify_missing_image(state: &mut MutexGuard<'_, State>) {
    let Some(handler) = state.missing_image.clone() else {
        return;
    };
    let resource_id = state.resource_id.clone();
    let session_id = state.session_id;
    MutexGuard::unlocked(state, || handler(&resource_id, session_id));
}
