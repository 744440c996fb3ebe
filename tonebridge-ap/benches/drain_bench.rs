//! Drain Loop Performance Benchmark
//!
//! Measures how long decode + scheduling takes per chunk. A drain pass must
//! finish well inside one chunk duration or the lookahead drains away.
//!
//! ## Scenarios
//!
//! - Decode one 500ms WAV chunk at its native format
//! - Decode one 500ms WAV chunk converted to 48kHz stereo (resample + remix)
//! - Drain a queue of 16 chunks into a headless sink

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;
use tonebridge_ap::audio::{ChunkDecoder, EncodedChunk, OutputFormat, SymphoniaDecoder};
use tonebridge_ap::playback::{NullSink, Scheduler, SchedulerConfig, SystemClock};
use tonebridge_common::events::EventBus;
use tonebridge_common::tone::ToneGenerator;

const CHUNK: Duration = Duration::from_millis(500);

fn tone_chunk() -> Vec<u8> {
    ToneGenerator::default().next_chunk(CHUNK).unwrap()
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_chunk");
    group.throughput(Throughput::Elements(1));

    let chunk = EncodedChunk::new(0, tone_chunk());

    let native = SymphoniaDecoder::new();
    group.bench_function("native_44k_mono", |b| {
        b.iter(|| black_box(native.decode(black_box(&chunk)).unwrap()))
    });

    let converting = SymphoniaDecoder::with_output(OutputFormat {
        sample_rate: 48000,
        channels: 2,
    });
    group.bench_function("to_48k_stereo", |b| {
        b.iter(|| black_box(converting.decode(black_box(&chunk)).unwrap()))
    });

    group.finish();
}

fn bench_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain_and_schedule");
    group.throughput(Throughput::Elements(16));

    let bytes = tone_chunk();
    group.bench_function("16_chunks_null_sink", |b| {
        b.iter_batched(
            || {
                let scheduler = Scheduler::new(
                    SchedulerConfig {
                        max_lookahead: 3600.0,
                        max_queue_depth: 16,
                        ..SchedulerConfig::default()
                    },
                    Arc::new(SystemClock::new()),
                    Arc::new(NullSink::with_history(0)),
                    Arc::new(SymphoniaDecoder::new()),
                    Arc::new(EventBus::new(64)),
                )
                .unwrap();
                scheduler.start().unwrap();
                for _ in 0..16 {
                    scheduler.enqueue(bytes.as_slice());
                }
                scheduler
            },
            |scheduler| black_box(scheduler.drain_and_schedule().unwrap()),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_decode, bench_drain);
criterion_main!(benches);
