// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: DFU cache partitions holding payloads fetched ahead of installation
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below; fetch into a cache pool in tests/suit_host
//!
//! A partition holds one CBOR map of indefinite length, `0xBF (tstr uri, bstr payload)* 0xFF`.
//! Erased flash after the last entry reads as the closing break. A new slot reserves its
//! payload length as `0x5A FF FF FF FF` and programs it on close, so a slot still carrying
//! that length was interrupted and is erased before the partition is written again.
//! Closed slots are padded with an empty-key entry up to the next erase block.

use ciborium_io::Write;
use ciborium_ll::{Decoder, Encoder, Header};
use flash::{FlashDevice, FlashError, Partition};
use log::{debug, info, warn};

use crate::sink::{SinkError, StreamSink};

/// Longest URI accepted as a slot key.
pub const MAX_URI_LENGTH: usize = 128;

/// Map header, the longest text header, the key, the slot length header and the break.
pub const MIN_PARTITION_SIZE: usize = MAX_URI_LENGTH + 16;

const MAP_HEADER: u8 = 0xBF;
/// Byte string with a four-byte length.
const BSTR_U32: u8 = 0x5A;
const EMPTY_TEXT: u8 = 0x60;
const SHORT_BSTR: u8 = 0x40;
const OPEN_LENGTH: usize = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("no cache partition {0}")]
    UnknownPartition(u8),
    #[error("uri not cached")]
    NotFound,
    #[error("uri already cached")]
    Exists,
    #[error("uri longer than {MAX_URI_LENGTH} bytes")]
    UriTooLong,
    #[error("cache partition full")]
    NoSpace,
    #[error("cache partition content is not a cache map")]
    Malformed,
    /// Empty URI, misaligned partition, or a slot closed past its capacity.
    #[error("invalid argument")]
    InvalidArgument,
    #[error("flash error: {0}")]
    Flash(#[from] FlashError),
}

/// Numbered cache partition in the device address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePartition {
    pub id: u8,
    pub partition: Partition,
}

impl CachePartition {
    pub const fn new(id: u8, address: usize, size: usize) -> Self {
        Self { id, partition: Partition::new("dfu_cache", address, size) }
    }
}

/// Closed entry found by [`DfuCache::search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedPayload {
    pub partition_id: u8,
    /// Device address of the first payload byte.
    pub address: usize,
    pub size: usize,
}

/// Slot reserved by [`DfuCache::slot_create`]. Finish it with `slot_close` or `slot_drop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSlot {
    partition_id: u8,
    /// Start of the slot, including the map header for the first slot of a partition.
    address: usize,
    /// Offset of the four reserved length bytes.
    size_offset: usize,
    data_offset: usize,
    /// Payload bytes that fit before the end of the partition.
    capacity: usize,
}

impl CacheSlot {
    pub fn partition_id(&self) -> u8 {
        self.partition_id
    }

    pub fn address(&self) -> usize {
        self.address
    }

    pub fn data_address(&self) -> usize {
        self.address + self.data_offset
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

struct Entry {
    key: Vec<u8>,
    offset: usize,
    size: usize,
}

enum Scan {
    Erased,
    /// Every slot closed; the next one starts at `end`.
    Closed { entries: Vec<Entry>, end: usize },
    /// The slot starting at `start` was never closed.
    Open { entries: Vec<Entry>, start: usize },
}

fn head(bytes: &[u8], at: usize) -> Result<(Header, usize), CacheError> {
    let rest = bytes.get(at..).ok_or(CacheError::Malformed)?;
    let mut decoder = Decoder::from(rest);
    let header = decoder.pull().map_err(|_| CacheError::Malformed)?;
    Ok((header, at + decoder.offset()))
}

/// Walks the map stored in `bytes`, the full contents of one partition.
fn scan(bytes: &[u8]) -> Result<Scan, CacheError> {
    if flash::is_erased(bytes) {
        return Ok(Scan::Erased);
    }
    let (header, mut at) = head(bytes, 0)?;
    if !matches!(header, Header::Map(None)) {
        return Err(CacheError::Malformed);
    }
    let mut entries = Vec::new();
    loop {
        if at >= bytes.len() {
            return Ok(Scan::Closed { entries, end: bytes.len() });
        }
        // The first slot owns the map header.
        let start = if at == 1 { 0 } else { at };
        let (key_header, key_at) = head(bytes, at)?;
        let key_len = match key_header {
            Header::Break => return Ok(Scan::Closed { entries, end: at }),
            Header::Text(Some(len)) => len,
            _ => return Err(CacheError::Malformed),
        };
        let key_end = key_at
            .checked_add(key_len)
            .filter(|end| *end <= bytes.len())
            .ok_or(CacheError::Malformed)?;
        let (value_header, data_at) = head(bytes, key_end)?;
        let size = match value_header {
            Header::Bytes(Some(OPEN_LENGTH)) => return Ok(Scan::Open { entries, start }),
            Header::Bytes(Some(len)) => len,
            _ => return Err(CacheError::Malformed),
        };
        let end = data_at
            .checked_add(size)
            .filter(|end| *end <= bytes.len())
            .ok_or(CacheError::Malformed)?;
        if key_len > 0 {
            entries.push(Entry { key: bytes[key_at..key_end].to_vec(), offset: data_at, size });
        }
        at = end;
    }
}

/// Drops one trailing NUL terminator.
fn trim_uri(uri: &[u8]) -> &[u8] {
    uri.strip_suffix(&[0]).unwrap_or(uri)
}

/// Empty-key entry of exactly `len` bytes (at least 2).
fn padding_entry(len: usize) -> Result<Vec<u8>, CacheError> {
    let mut entry = vec![0u8; len];
    entry[0] = EMPTY_TEXT;
    if len <= 2 + 23 {
        entry[1] = SHORT_BSTR + (len - 2) as u8;
    } else {
        let payload = u32::try_from(len - 6).map_err(|_| CacheError::InvalidArgument)?;
        entry[1] = BSTR_U32;
        entry[2..6].copy_from_slice(&payload.to_be_bytes());
    }
    Ok(entry)
}

/// Set of DFU cache partitions on one device. The cache holds no device handle; callers
/// pass the device to each operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DfuCache {
    partitions: Vec<CachePartition>,
}

impl DfuCache {
    pub fn new(partitions: Vec<CachePartition>) -> Self {
        Self { partitions }
    }

    pub fn partitions(&self) -> &[CachePartition] {
        &self.partitions
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn partition(&self, id: u8) -> Result<&CachePartition, CacheError> {
        self.partitions.iter().find(|p| p.id == id).ok_or(CacheError::UnknownPartition(id))
    }

    fn check_layout<D: FlashDevice + ?Sized>(
        device: &D,
        part: &CachePartition,
    ) -> Result<(), CacheError> {
        let block = device.erase_block_size();
        let p = &part.partition;
        if block == 0 || p.size < MIN_PARTITION_SIZE || p.offset % block != 0 || p.size % block != 0 {
            return Err(CacheError::InvalidArgument);
        }
        match p.offset.checked_add(p.size) {
            Some(end) if end <= device.size() => Ok(()),
            _ => Err(FlashError::OutOfRange.into()),
        }
    }

    fn contents<D: FlashDevice + ?Sized>(
        device: &D,
        part: &CachePartition,
    ) -> Result<Vec<u8>, CacheError> {
        Ok(flash::read_vec(device, part.partition.offset, part.partition.size)?)
    }

    /// Erases from partition offset `start` to the end of the partition and returns where
    /// the next slot begins.
    fn erase_from<D: FlashDevice + ?Sized>(
        device: &mut D,
        part: &CachePartition,
        start: usize,
    ) -> Result<usize, CacheError> {
        let block = device.erase_block_size();
        let start = if (part.partition.offset + start) % block == 0 { start } else { 0 };
        device.erase(part.partition.offset + start, part.partition.size - start)?;
        device.sync()?;
        Ok(start)
    }

    /// Checks every partition, erasing those that do not hold a cache map (all of them when
    /// `force_erase`). Unusable partitions are logged and skipped; returns how many are usable.
    pub fn initialize<D: FlashDevice + ?Sized>(&self, device: &mut D, force_erase: bool) -> usize {
        let mut usable = 0;
        for part in &self.partitions {
            match Self::prepare(device, part, force_erase) {
                Ok(()) => usable += 1,
                Err(err) => warn!("suit-stream: cache partition {} unusable: {}", part.id, err),
            }
        }
        info!("suit-stream: {} of {} cache partitions ready", usable, self.partitions.len());
        usable
    }

    fn prepare<D: FlashDevice + ?Sized>(
        device: &mut D,
        part: &CachePartition,
        force_erase: bool,
    ) -> Result<(), CacheError> {
        Self::check_layout(device, part)?;
        match scan(&Self::contents(device, part)?) {
            Ok(Scan::Erased) => return Ok(()),
            Ok(_) if !force_erase => return Ok(()),
            Ok(_) => {}
            Err(_) => warn!("suit-stream: cache partition {} holds no cache map", part.id),
        }
        info!("suit-stream: erasing cache partition {}", part.id);
        Self::erase_from(device, part, 0)?;
        Ok(())
    }

    /// Finds the closed slot keyed by `uri` in any partition.
    pub fn search<D: FlashDevice + ?Sized>(
        &self,
        device: &D,
        uri: &[u8],
    ) -> Result<CachedPayload, CacheError> {
        let uri = trim_uri(uri);
        for part in &self.partitions {
            let Ok(bytes) = Self::contents(device, part) else {
                continue;
            };
            let entries = match scan(&bytes) {
                Ok(Scan::Closed { entries, .. }) | Ok(Scan::Open { entries, .. }) => entries,
                _ => continue,
            };
            if let Some(entry) = entries.iter().find(|entry| entry.key == uri) {
                return Ok(CachedPayload {
                    partition_id: part.id,
                    address: part.partition.offset + entry.offset,
                    size: entry.size,
                });
            }
        }
        Err(CacheError::NotFound)
    }

    /// Reads the payload cached under `uri`.
    pub fn read<D: FlashDevice + ?Sized>(&self, device: &D, uri: &[u8]) -> Result<Vec<u8>, CacheError> {
        let found = self.search(device, uri)?;
        Ok(flash::read_vec(device, found.address, found.size)?)
    }

    /// Reserves a slot keyed by `uri` at the free end of partition `partition_id`.
    ///
    /// An interrupted slot found at the end of the partition is erased first; a partition
    /// whose contents are not a cache map is erased entirely.
    pub fn slot_create<D: FlashDevice + ?Sized>(
        &self,
        device: &mut D,
        partition_id: u8,
        uri: &[u8],
    ) -> Result<CacheSlot, CacheError> {
        let uri = trim_uri(uri);
        if uri.is_empty() {
            return Err(CacheError::InvalidArgument);
        }
        if uri.len() > MAX_URI_LENGTH {
            return Err(CacheError::UriTooLong);
        }
        let part = *self.partition(partition_id)?;
        Self::check_layout(device, &part)?;
        match self.search(device, uri) {
            Ok(_) => return Err(CacheError::Exists),
            Err(CacheError::NotFound) => {}
            Err(err) => return Err(err),
        }

        let start = match scan(&Self::contents(device, &part)?) {
            Ok(Scan::Erased) => 0,
            // A bare map header leaves no aligned slot start.
            Ok(Scan::Closed { end: 1, .. }) => Self::erase_from(device, &part, 0)?,
            Ok(Scan::Closed { end, .. }) => end,
            Ok(Scan::Open { start, .. }) => {
                warn!("suit-stream: erasing interrupted slot in cache partition {}", partition_id);
                Self::erase_from(device, &part, start)?
            }
            Err(_) => {
                warn!("suit-stream: cache partition {} holds no cache map", partition_id);
                Self::erase_from(device, &part, 0)?
            }
        };

        let mut header = Vec::with_capacity(MIN_PARTITION_SIZE);
        if start == 0 {
            header.push(MAP_HEADER);
        }
        {
            let mut encoder = Encoder::from(&mut header);
            encoder.push(Header::Text(Some(uri.len()))).map_err(|_| CacheError::Malformed)?;
            encoder.write_all(uri).map_err(|_| CacheError::Malformed)?;
        }
        header.push(BSTR_U32);
        let size_offset = header.len();
        header.extend_from_slice(&[0xFF; 4]);

        let room = part
            .partition
            .size
            .checked_sub(start)
            .filter(|room| *room > header.len())
            .ok_or(CacheError::NoSpace)?;
        let address = part.partition.offset + start;
        device.write(address, &header)?;
        device.sync()?;
        debug!("suit-stream: cache slot at {:#x} in partition {}", address, partition_id);
        Ok(CacheSlot {
            partition_id,
            address,
            size_offset,
            data_offset: header.len(),
            capacity: room - header.len(),
        })
    }

    /// Commits `used` payload bytes of `slot` and pads the entry to the next erase block.
    pub fn slot_close<D: FlashDevice + ?Sized>(
        &self,
        device: &mut D,
        slot: &CacheSlot,
        used: usize,
    ) -> Result<(), CacheError> {
        if used > slot.capacity {
            return Err(CacheError::InvalidArgument);
        }
        let part = *self.partition(slot.partition_id)?;
        let length = u32::try_from(used).map_err(|_| CacheError::InvalidArgument)?;
        device.write(slot.address + slot.size_offset, &length.to_be_bytes())?;

        let end = slot.data_address() + used;
        let block = device.erase_block_size();
        let aligned = flash::align_up(end, block).min(part.partition.end());
        let mut padding = aligned - end;
        if padding == 1 {
            // Too short for an entry: cover the next block too, or leave the last byte
            // of the partition erased as the break.
            padding = if aligned < part.partition.end() { 1 + block } else { 0 };
        }
        if padding > 0 {
            device.write(end, &padding_entry(padding)?)?;
        }
        device.sync()?;
        info!(
            "suit-stream: cache slot closed in partition {} ({} bytes)",
            slot.partition_id, used
        );
        Ok(())
    }

    /// Discards `slot` and everything after it in its partition.
    pub fn slot_drop<D: FlashDevice + ?Sized>(
        &self,
        device: &mut D,
        slot: &CacheSlot,
    ) -> Result<(), CacheError> {
        let part = *self.partition(slot.partition_id)?;
        let start = slot
            .address
            .checked_sub(part.partition.offset)
            .filter(|start| *start < part.partition.size)
            .ok_or(CacheError::InvalidArgument)?;
        Self::erase_from(device, &part, start)?;
        info!("suit-stream: cache slot dropped in partition {}", slot.partition_id);
        Ok(())
    }

    /// Erases every partition that is not already erased.
    pub fn clear<D: FlashDevice + ?Sized>(&self, device: &mut D) -> Result<(), CacheError> {
        let mut result = Ok(());
        for part in &self.partitions {
            let erased = Self::contents(device, part).map(|bytes| flash::is_erased(&bytes));
            let outcome = match erased {
                Ok(true) => Ok(()),
                Ok(false) => Self::erase_from(device, part, 0).map(|_| ()),
                Err(err) => Err(err),
            };
            if let Err(err) = outcome {
                warn!("suit-stream: cache partition {} not cleared: {}", part.id, err);
                result = result.and(Err(err));
            }
        }
        result
    }
}

/// Sink writing the payload of an open cache slot.
pub struct CacheSlotSink<D: FlashDevice> {
    device: D,
    slot: CacheSlot,
    position: usize,
    used: usize,
}

impl<D: FlashDevice> CacheSlotSink<D> {
    pub fn new(device: D, slot: CacheSlot) -> Self {
        Self { device, slot, position: 0, used: 0 }
    }

    pub fn slot(&self) -> &CacheSlot {
        &self.slot
    }
}

impl<D: FlashDevice> StreamSink for CacheSlotSink<D> {
    fn write(&mut self, data: &[u8]) -> Result<(), SinkError> {
        let end = self
            .position
            .checked_add(data.len())
            .filter(|end| *end <= self.slot.capacity)
            .ok_or(SinkError::OutOfBounds)?;
        self.device.write(self.slot.data_address() + self.position, data)?;
        self.position = end;
        self.used = self.used.max(end);
        Ok(())
    }

    fn seek(&mut self, offset: usize) -> Result<(), SinkError> {
        if offset > self.slot.capacity {
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
