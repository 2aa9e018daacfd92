/// Integration tests for the multi-threaded frame pipeline.
///
/// Every test drives `FramePipeline` end to end through in-memory readers and
/// writers, with the real codecs from `zframe_codecs`.
use std::io::{self, Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use zframe_codecs::{Lz4Codec, PassThroughCodec, ZstdCodec};
use zframe_core::{
    Codec, Error, FrameHeader, FramePipeline, FrameReader, PipelineConfig, Session, ThreadPool,
    HEADER_SIZE, MAX_FRAME_SIZE,
};

/// Generate `len` deterministic bytes using a simple LCG.
fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

/// Generate `len` highly compressible bytes (repeating pattern).
fn compressible_bytes(len: usize) -> Vec<u8> {
    let pattern = b"the quick brown fox jumps over the lazy dog. ";
    (0..len).map(|i| pattern[i % pattern.len()]).collect()
}

// ── helpers ───────────────────────────────────────────────────────────────

const SMALL_FRAME: usize = 4096;

fn all_codecs() -> [Arc<dyn Codec>; 3] {
    [
        Arc::new(ZstdCodec),
        Arc::new(Lz4Codec),
        Arc::new(PassThroughCodec),
    ]
}

fn small_frames(codec: Arc<dyn Codec>) -> FramePipeline {
    FramePipeline::with_config(
        codec,
        PipelineConfig::default().with_frame_size(SMALL_FRAME),
    )
}

fn pack(pipeline: &FramePipeline, threads: usize, data: &[u8], level: u32) -> Vec<u8> {
    let pool = ThreadPool::new(threads).unwrap();
    let mut packed = Vec::new();
    pipeline.compress(&pool, data, &mut packed, level).unwrap();
    packed
}

fn unpack(pipeline: &FramePipeline, threads: usize, packed: &[u8]) -> Vec<u8> {
    let pool = ThreadPool::new(threads).unwrap();
    let mut unpacked = Vec::new();
    pipeline.decompress(&pool, packed, &mut unpacked).unwrap();
    unpacked
}

/// Accepts `budget` bytes, then reports that it cannot take any more.
struct FailingSink {
    written: Vec<u8>,
    budget: usize,
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.budget - self.written.len());
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Lz4 that counts how many sessions it hands out.
#[derive(Default)]
struct CountingCodec {
    encoders: AtomicUsize,
    decoders: AtomicUsize,
}

impl Codec for CountingCodec {
    fn name(&self) -> &'static str {
        "counting-lz4"
    }

    fn max_level(&self) -> u32 {
        0
    }

    fn max_compressed_size(&self, source_size: usize) -> usize {
        Lz4Codec.max_compressed_size(source_size)
    }

    fn encoder(&self, level: u32) -> zframe_core::Result<Box<dyn Session>> {
        self.encoders.fetch_add(1, Ordering::SeqCst);
        Lz4Codec.encoder(level)
    }

    fn decoder(&self) -> zframe_core::Result<Box<dyn Session>> {
        self.decoders.fetch_add(1, Ordering::SeqCst);
        Lz4Codec.decoder()
    }
}

// ── round trips ───────────────────────────────────────────────────────────

#[test]
fn test_roundtrip_every_codec_and_pool_size() {
    let data = compressible_bytes(37 * SMALL_FRAME + 123);
    for codec in all_codecs() {
        let pipeline = small_frames(codec.clone());
        for threads in [1, 2, 4, 8] {
            let packed = pack(&pipeline, threads, &data, 3);
            let unpacked = unpack(&pipeline, threads, &packed);
            assert_eq!(
                unpacked,
                data,
                "{} round-trip with {} thread(s) should be byte-exact",
                codec.name(),
                threads
            );
        }
    }
}

#[test]
fn test_stream_is_independent_of_thread_count() {
    let data = pseudo_random_bytes(20 * SMALL_FRAME + 7, 0xC0FFEE);
    let pipeline = small_frames(Arc::new(ZstdCodec));

    let serial = pack(&pipeline, 1, &data, 5);
    let parallel = pack(&pipeline, 8, &data, 5);
    assert_eq!(serial, parallel, "frames must be committed in input order");

    // Decoding one thread's output with another thread count works too.
    assert_eq!(unpack(&pipeline, 8, &serial), data);
    assert_eq!(unpack(&pipeline, 1, &parallel), data);
}

#[test]
fn test_order_preserved_with_distinct_frames() {
    // Each frame is filled with its own index, so any reordering shows up.
    let frames = 100;
    let frame_size = 1024;
    let data: Vec<u8> = (0..frames * frame_size)
        .map(|i| (i / frame_size) as u8)
        .collect();
    let pipeline = FramePipeline::with_config(
        Arc::new(Lz4Codec),
        PipelineConfig::default().with_frame_size(frame_size),
    );

    let packed = pack(&pipeline, 8, &data, 0);
    let unpacked = unpack(&pipeline, 8, &packed);
    assert_eq!(unpacked, data);
}

#[test]
fn test_summary_counts() {
    let data = compressible_bytes(10 * SMALL_FRAME + 1);
    let pipeline = small_frames(Arc::new(ZstdCodec));
    let pool = ThreadPool::new(4).unwrap();

    let mut packed = Vec::new();
    let summary = pipeline.compress(&pool, data.as_slice(), &mut packed, 1).unwrap();
    assert_eq!(summary.frames, 11);
    assert_eq!(summary.bytes_in, data.len() as u64);
    assert_eq!(summary.bytes_out, packed.len() as u64);

    let mut unpacked = Vec::new();
    let summary = pipeline.decompress(&pool, packed.as_slice(), &mut unpacked).unwrap();
    assert_eq!(summary.frames, 11);
    assert_eq!(summary.bytes_in, packed.len() as u64);
    assert_eq!(summary.bytes_out, data.len() as u64);
}

#[test]
fn test_exact_multiple_of_frame_size() {
    let data = pseudo_random_bytes(4 * SMALL_FRAME, 42);
    let pipeline = small_frames(Arc::new(PassThroughCodec));
    let packed = pack(&pipeline, 2, &data, 0);

    // No empty trailing frame.
    assert_eq!(packed.len(), data.len() + 4 * HEADER_SIZE);
    assert_eq!(unpack(&pipeline, 2, &packed), data);
}

#[test]
fn test_empty_input() {
    for threads in [1, 4] {
        let pipeline = FramePipeline::new(Arc::new(ZstdCodec));
        let packed = pack(&pipeline, threads, &[], 0);
        assert!(packed.is_empty(), "empty input should produce no frames");
        assert!(unpack(&pipeline, threads, &packed).is_empty());
    }
}

#[test]
fn test_repeated_byte_compresses() {
    let data = vec![b'A'; 10_000];
    let pipeline = FramePipeline::new(Arc::new(ZstdCodec));

    let packed = pack(&pipeline, 4, &data, 0);
    assert!(!packed.is_empty());
    assert!(
        packed.len() < data.len(),
        "10000 identical bytes should shrink, got {} bytes",
        packed.len()
    );
    assert_eq!(unpack(&pipeline, 1, &packed), data);
}

#[test]
fn test_free_functions() {
    let data = compressible_bytes(3 * 1024 * 1024 + 5);
    let pool = ThreadPool::new(4).unwrap();

    let mut packed = Vec::new();
    zframe_core::compress(&pool, Arc::new(Lz4Codec), data.as_slice(), &mut packed, 0).unwrap();
    let mut unpacked = Vec::new();
    zframe_core::decompress(&pool, Arc::new(Lz4Codec), packed.as_slice(), &mut unpacked).unwrap();
    assert_eq!(unpacked, data);
}

// ── levels ────────────────────────────────────────────────────────────────

#[test]
fn test_level_above_max_is_clamped() {
    let data = compressible_bytes(6 * SMALL_FRAME);
    let pipeline = small_frames(Arc::new(ZstdCodec));
    let max = pipeline.codec().max_level();

    let at_max = pack(&pipeline, 1, &data, max);
    let beyond = pack(&pipeline, 1, &data, max + 100);
    assert_eq!(at_max, beyond);
}

#[test]
fn test_roundtrip_sampled_levels() {
    let data = pseudo_random_bytes(3 * SMALL_FRAME, 1)
        .into_iter()
        .chain(compressible_bytes(3 * SMALL_FRAME))
        .collect::<Vec<u8>>();
    let pipeline = small_frames(Arc::new(ZstdCodec));
    for level in [0, 1, 6, 12, 19, pipeline.codec().max_level()] {
        let packed = pack(&pipeline, 4, &data, level);
        assert_eq!(unpack(&pipeline, 2, &packed), data, "level {level}");
    }
}

#[test]
fn test_max_level_not_larger_than_fastest() {
    let data = compressible_bytes(200_000);
    let pipeline = FramePipeline::new(Arc::new(ZstdCodec));
    let max = pipeline.codec().max_level();

    let fastest = pack(&pipeline, 1, &data, 0);
    let strongest = pack(&pipeline, 1, &data, max);
    assert!(
        strongest.len() <= fastest.len(),
        "level {} gave {} bytes, level 0 gave {}",
        max,
        strongest.len(),
        fastest.len()
    );
}

// ── session reuse ─────────────────────────────────────────────────────────

#[test]
fn test_serial_path_reuses_sessions_across_calls() {
    let codec = Arc::new(CountingCodec::default());
    let pipeline = small_frames(codec.clone());
    let pool = ThreadPool::new(1).unwrap();
    let data = compressible_bytes(10 * SMALL_FRAME);

    let mut packed = Vec::new();
    for _ in 0..3 {
        packed.clear();
        pipeline.compress(&pool, data.as_slice(), &mut packed, 0).unwrap();
    }
    for _ in 0..3 {
        let mut out = Vec::new();
        pipeline.decompress(&pool, packed.as_slice(), &mut out).unwrap();
        assert_eq!(out, data);
    }

    assert_eq!(codec.encoders.load(Ordering::SeqCst), 1);
    assert_eq!(codec.decoders.load(Ordering::SeqCst), 1);
}

#[test]
fn test_workers_reuse_sessions_across_frames() {
    let codec = Arc::new(CountingCodec::default());
    let pipeline = small_frames(codec.clone());
    let threads = 4;
    let data = compressible_bytes(64 * SMALL_FRAME);

    let packed = pack(&pipeline, threads, &data, 0);
    assert_eq!(unpack(&pipeline, threads, &packed), data);

    // At most one session per worker thread, never one per frame.
    assert!(codec.encoders.load(Ordering::SeqCst) <= threads);
    assert!(codec.decoders.load(Ordering::SeqCst) <= threads);
}

// ── malformed streams ─────────────────────────────────────────────────────

#[test]
fn test_trailing_garbage_ends_stream() {
    let data = compressible_bytes(5 * SMALL_FRAME + 99);
    let pipeline = small_frames(Arc::new(ZstdCodec));
    let packed = pack(&pipeline, 2, &data, 1);

    // A full-size block that is not a header, and a short tail.
    for garbage in [&b"this is not a frame header at all"[..], &b"xyz"[..]] {
        let mut stream = packed.clone();
        stream.extend_from_slice(garbage);
        for threads in [1, 4] {
            assert_eq!(unpack(&pipeline, threads, &stream), data);
        }
    }
}

#[test]
fn test_truncated_payload_is_corrupt() {
    let data = pseudo_random_bytes(3 * SMALL_FRAME, 7);
    let pipeline = small_frames(Arc::new(ZstdCodec));
    let packed = pack(&pipeline, 1, &data, 1);
    let truncated = &packed[..packed.len() - 10];

    for threads in [1, 4] {
        let pool = ThreadPool::new(threads).unwrap();
        let mut out = Vec::new();
        let err = pipeline.decompress(&pool, truncated, &mut out).unwrap_err();
        assert!(
            matches!(err, Error::CorruptFrame { frame_index: 2, .. }),
            "expected corrupt frame 2, got {err:?}"
        );
    }
}

#[test]
fn test_oversized_header_is_corrupt() {
    let data = compressible_bytes(SMALL_FRAME);
    let pipeline = small_frames(Arc::new(PassThroughCodec));
    let mut packed = pack(&pipeline, 1, &data, 0);

    // Passthrough payloads can never exceed the source size.
    let bigger = (SMALL_FRAME as u32 + 1).to_le_bytes();
    packed[8..12].copy_from_slice(&bigger);

    let pool = ThreadPool::new(1).unwrap();
    let err = pipeline
        .decompress(&pool, packed.as_slice(), &mut Vec::new())
        .unwrap_err();
    assert!(matches!(err, Error::CorruptFrame { frame_index: 0, .. }));
}

#[test]
fn test_huge_declared_source_size_is_corrupt() {
    // A lone header claiming a 4 GiB frame must be rejected before anything
    // is allocated for it.
    let stream = FrameHeader::new(0, u32::MAX).to_bytes();
    let pipeline = FramePipeline::new(Arc::new(PassThroughCodec));

    for threads in [1, 4] {
        let pool = ThreadPool::new(threads).unwrap();
        let err = pipeline
            .decompress(&pool, &stream[..], &mut Vec::new())
            .unwrap_err();
        assert!(
            matches!(err, Error::CorruptFrame { frame_index: 0, .. }),
            "expected corrupt frame 0, got {err:?}"
        );
    }
    assert_eq!(pipeline.buffer_stats().created, 0);

    let just_over = FrameHeader::new(0, MAX_FRAME_SIZE as u32 + 1).to_bytes();
    let err = FrameReader::open(Cursor::new(just_over.to_vec()), Arc::new(ZstdCodec))
        .err()
        .unwrap();
    assert!(matches!(err, Error::CorruptFrame { frame_index: 0, .. }));
}

/// Damage one frame's payload. Every frame before it still decodes, the
/// call fails, and nothing from the damaged frame or after it is written.
#[test]
fn test_frames_are_independent() {
    const NUM_FRAMES: usize = 8;
    const DAMAGED: usize = 3;

    let data = compressible_bytes(NUM_FRAMES * SMALL_FRAME);
    let pipeline = small_frames(Arc::new(ZstdCodec));
    let mut packed = pack(&pipeline, 4, &data, 3);

    let reader = FrameReader::open(Cursor::new(packed.clone()), Arc::new(ZstdCodec)).unwrap();
    assert_eq!(reader.frame_count(), NUM_FRAMES);
    let entry = reader.entries()[DAMAGED];
    let at = entry.offset as usize + HEADER_SIZE + entry.compressed_size as usize / 2;
    packed[at] ^= 0xFF;

    for threads in [1, 4] {
        let pool = ThreadPool::new(threads).unwrap();
        let mut out = Vec::new();
        let result = pipeline.decompress(&pool, packed.as_slice(), &mut out);
        assert!(result.is_err(), "damaged frame must fail to decode");
        assert_eq!(
            out,
            &data[..DAMAGED * SMALL_FRAME],
            "frames before the damaged one should be written intact ({threads} thread(s))"
        );
    }
}

// ── sink failures and buffer accounting ───────────────────────────────────

#[test]
fn test_short_write_reported() {
    let data = pseudo_random_bytes(12 * SMALL_FRAME, 99);
    let pipeline = small_frames(Arc::new(PassThroughCodec));

    for threads in [1, 4] {
        let pool = ThreadPool::new(threads).unwrap();
        let mut sink = FailingSink {
            written: Vec::new(),
            budget: 2 * SMALL_FRAME,
        };
        let err = pipeline
            .compress(&pool, data.as_slice(), &mut sink, 0)
            .unwrap_err();
        assert!(
            matches!(err, Error::ShortWrite { frame_index: 1, .. }),
            "expected short write on frame 1, got {err:?}"
        );
        assert_eq!(sink.written.len(), 2 * SMALL_FRAME);
    }
}

#[test]
fn test_no_buffers_outlive_a_call() {
    let data = compressible_bytes(25 * SMALL_FRAME + 3);
    let pipeline = small_frames(Arc::new(ZstdCodec));

    let packed = pack(&pipeline, 4, &data, 2);
    let after_compress = pipeline.buffer_stats();
    assert!(after_compress.created > 0);
    assert_eq!(after_compress.live, 0);

    unpack(&pipeline, 4, &packed);
    assert_eq!(pipeline.buffer_stats().live, 0);
}

#[test]
fn test_no_buffers_outlive_a_failed_call() {
    let data = pseudo_random_bytes(30 * SMALL_FRAME, 5);
    let pipeline = small_frames(Arc::new(ZstdCodec));
    let packed = pack(&pipeline, 4, &data, 1);

    // Truncated stream: decode fails on the last frame.
    let pool = ThreadPool::new(8).unwrap();
    let truncated = &packed[..packed.len() - 10];
    assert!(pipeline
        .decompress(&pool, truncated, &mut Vec::new())
        .is_err());
    assert_eq!(pipeline.buffer_stats().live, 0);

    // Sink failure: encode fails partway.
    let mut sink = FailingSink {
        written: Vec::new(),
        budget: 1000,
    };
    assert!(pipeline
        .compress(&pool, data.as_slice(), &mut sink, 1)
        .is_err());
    assert_eq!(pipeline.buffer_stats().live, 0);
}

#[test]
fn test_max_tasks_caps_parallelism() {
    let data = compressible_bytes(16 * SMALL_FRAME);
    let config = PipelineConfig::default()
        .with_frame_size(SMALL_FRAME)
        .with_max_tasks(1);
    let pipeline = FramePipeline::with_config(Arc::new(ZstdCodec), config);
    assert_eq!(pipeline.config().max_tasks, 1);

    let packed = pack(&pipeline, 8, &data, 3);
    assert_eq!(unpack(&pipeline, 8, &packed), data);
}
