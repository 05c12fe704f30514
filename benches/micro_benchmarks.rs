//! Micro benchmarks for the connection core hot paths
//!
//! - Frame assembly from whole, fragmented and batched reads
//! - Stream id acquire/release churn
//! - Request encoding
//!
//! Run with: cargo bench --bench micro_benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use cql_wire::protocol::constants::{opcodes, MAX_STREAMS};
use cql_wire::protocol::{encode_request, FrameAssembler, Message};
use cql_wire::stream::StreamManager;

fn response(stream: i8, body_len: usize) -> Vec<u8> {
    let mut frame = vec![0x82, 0, stream as u8, opcodes::RESULT];
    frame.extend_from_slice(&(body_len as i32).to_be_bytes());
    frame.resize(8 + body_len, 0xAB);
    frame
}

/// Feed `input` in `chunk`-sized reads, returning the number of frames assembled
fn assemble(assembler: &mut FrameAssembler, input: &[u8], chunk: usize) -> usize {
    let mut frames = 0;
    for mut piece in input.chunks(chunk) {
        while !piece.is_empty() {
            let consumed = assembler.consume(piece).unwrap();
            piece = &piece[consumed..];
            if assembler.take_frame().is_some() {
                frames += 1;
            }
        }
    }
    frames
}

// ============================================================================
// Frame Assembly
// ============================================================================

fn assembler_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_assembler");

    for body_len in [64usize, 4 * 1024, 256 * 1024] {
        let frame = response(1, body_len);
        group.throughput(Throughput::Bytes(frame.len() as u64));

        group.bench_with_input(BenchmarkId::new("single_read", body_len), &frame, |b, frame| {
            let mut assembler = FrameAssembler::new();
            b.iter(|| black_box(assemble(&mut assembler, frame, frame.len())));
        });

        group.bench_with_input(BenchmarkId::new("mtu_reads", body_len), &frame, |b, frame| {
            let mut assembler = FrameAssembler::new();
            b.iter(|| black_box(assemble(&mut assembler, frame, 1460)));
        });
    }

    let batch: Vec<u8> = (0..MAX_STREAMS)
        .flat_map(|s| response(s as i8, 32))
        .collect();
    group.throughput(Throughput::Elements(MAX_STREAMS as u64));
    group.bench_function("batched_small_frames", |b| {
        let mut assembler = FrameAssembler::new();
        b.iter(|| black_box(assemble(&mut assembler, &batch, 64 * 1024)));
    });

    group.finish();
}

// ============================================================================
// Stream Multiplexer
// ============================================================================

fn stream_manager_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_manager");

    group.bench_function("acquire_release", |b| {
        let mut streams = StreamManager::new();
        b.iter(|| {
            let id = streams.acquire(black_box(7u64)).unwrap();
            black_box(streams.release(id));
        });
    });

    group.bench_function("fill_and_drain", |b| {
        let mut streams = StreamManager::new();
        b.iter(|| {
            for i in 0..MAX_STREAMS as u64 {
                let _ = streams.acquire(i);
            }
            for id in (0..MAX_STREAMS).rev() {
                black_box(streams.release(id as i8));
            }
        });
    });

    group.finish();
}

fn encode_benchmarks(c: &mut Criterion) {
    let query = Message::query("SELECT key, value FROM ks.table WHERE key = 'k'");
    c.bench_function("encode_query", |b| {
        b.iter(|| black_box(encode_request(black_box(5), &query).unwrap()));
    });
}

criterion_group!(
    benches,
    assembler_benchmarks,
    stream_manager_benchmarks,
    encode_benchmarks
);
criterion_main!(benches);
