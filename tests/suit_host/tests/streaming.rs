// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Streaming requestor and chunk provider running on separate threads
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 5 tests
//!
//! TEST_SCOPE:
//!   - Image delivery through the provider's buffer pool
//!   - Digest and flash sinks
//!   - Timeouts and single-session enforcement
//!
//! TEST_SCENARIOS:
//!   - test_image_streams_into_flash_with_digest(): provider -> requestor -> flash
//!   - test_directory_source_round_trip(): file-backed source via tempdir
//!   - test_missing_image_times_out(): provider has nothing to serve
//!   - test_second_stream_rejected(): concurrent stream gets NoResources
//!   - test_sink_overflow_aborts_stream(): image larger than the partition

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flash::{MemFlash, Partition};
use sha2::{Digest, Sha256};
use suit_stream::{
    ChunkProvider, DigestSink, DirImageSource, FlashSink, ImageRequestor, MemoryImageSource,
    MemorySink, SinkError, StreamError, StreamSink,
};

const TIMEOUT: Duration = Duration::from_millis(2000);
const PERIOD: Duration = Duration::from_millis(20);

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 253) as u8).collect()
}

#[test]
fn test_image_streams_into_flash_with_digest() {
    let requestor = Arc::new(ImageRequestor::new(3));
    let source = Arc::new(MemoryImageSource::new());
    let firmware = image(5000);
    source.insert(b"#app_fw", firmware.clone());
    let provider = ChunkProvider::spawn(requestor.clone(), source, 512, 3).expect("provider");

    let mut device = MemFlash::new(0x4000, 0x1000);
    let partition = Partition::new("app", 0x1000, 0x2000);
    let sink = FlashSink::open(&mut device, partition).expect("sink");
    let mut sink = DigestSink::new(sink);
    requestor.stream(b"#app_fw", &mut sink, TIMEOUT, PERIOD).expect("stream");
    provider.shutdown();

    let (digest, sink) = sink.finish();
    assert_eq!(sink.used_storage(), firmware.len());
    drop(sink);
    assert_eq!(digest, <[u8; 32]>::from(Sha256::digest(&firmware)));
    let written = flash::read_vec(&device, 0x1000, firmware.len()).expect("read");
    assert_eq!(written, firmware);
}

#[test]
fn test_directory_source_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let firmware = image(1300);
    std::fs::write(dir.path().join("rad.bin"), &firmware).expect("write");

    let requestor = Arc::new(ImageRequestor::new(2));
    let source = Arc::new(DirImageSource::new(dir.path()));
    let provider = ChunkProvider::spawn(requestor.clone(), source, 256, 2).expect("provider");
    let mut sink = MemorySink::new();
    requestor.stream(b"file://rad.bin", &mut sink, TIMEOUT, PERIOD).expect("stream");
    provider.shutdown();
    assert_eq!(sink.data(), firmware.as_slice());
}

#[test]
fn test_missing_image_times_out() {
    let requestor = Arc::new(ImageRequestor::new(2));
    let source = Arc::new(MemoryImageSource::new());
    let _provider = ChunkProvider::spawn(requestor.clone(), source, 64, 2).expect("provider");
    let mut sink = MemorySink::new();
    assert_eq!(
        requestor.stream(b"#absent", &mut sink, Duration::from_millis(150), PERIOD),
        Err(StreamError::Timeout)
    );
    assert!(sink.data().is_empty());
}

#[test]
fn test_second_stream_rejected() {
    let requestor = Arc::new(ImageRequestor::new(2));
    let background = requestor.clone();
    let first = thread::spawn(move || {
        let mut sink = MemorySink::new();
        background.stream(b"#slow", &mut sink, Duration::from_millis(400), PERIOD)
    });

    thread::sleep(Duration::from_millis(50));
    let mut sink = MemorySink::new();
    assert_eq!(
        requestor.stream(b"#other", &mut sink, Duration::from_millis(10), PERIOD),
        Err(StreamError::NoResources)
    );
    assert_eq!(first.join().expect("join"), Err(StreamError::Timeout));
}

#[test]
fn test_sink_overflow_aborts_stream() {
    let requestor = Arc::new(ImageRequestor::new(2));
    let source = Arc::new(MemoryImageSource::new());
    source.insert(b"#big", image(3000));
    let provider = ChunkProvider::spawn(requestor.clone(), source, 512, 2).expect("provider");

    let mut device = MemFlash::new(0x2000, 0x400);
    let mut sink =
        FlashSink::open(&mut device, Partition::new("small", 0, 0x800)).expect("sink");
    assert_eq!(
        requestor.stream(b"#big", &mut sink, TIMEOUT, PERIOD),
        Err(StreamError::Sink(SinkError::OutOfBounds))
    );
    provider.shutdown();
    drop(sink);
    assert!(flash::is_erased(&flash::read_vec(&device, 0x800, 0x800).expect("read")));
}
