//! Benchmarks for request framing and response parsing.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use forkpool::worker::frame::{self, HEADER_LEN};
use forkpool::worker::protocol::{self, ResponseParse};
use serde_json::json;

/// A JSON payload of roughly `size` bytes.
fn payload(size: usize) -> Vec<u8> {
    let filler = "x".repeat(size.saturating_sub(16));
    protocol::encode_payload(&json!({ "id": "A", "data": filler })).unwrap()
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in [64, 4096, 1 << 20].iter() {
        let body = payload(*size);
        group.throughput(Throughput::Bytes(body.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(frame::encode(black_box(&body)).unwrap()));
        });
    }

    group.finish();
}

fn bench_decode_header(c: &mut Criterion) {
    let header: [u8; HEADER_LEN] = *b"1048576 ";
    c.bench_function("frame_decode_header", |b| {
        b.iter(|| black_box(frame::decode_header(black_box(&header))));
    });
}

fn bench_parse_response(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_response");

    for size in [64, 4096, 1 << 20].iter() {
        let body = payload(*size);
        group.throughput(Throughput::Bytes(body.len() as u64));

        group.bench_with_input(BenchmarkId::new("complete", size), size, |b, _| {
            b.iter(|| {
                let parsed = protocol::parse_response(black_box(&body));
                assert!(matches!(parsed, ResponseParse::Complete(_)));
            });
        });

        // Half a response: the cost of a poll that finds a partial read.
        let partial = &body[..body.len() / 2];
        group.bench_with_input(BenchmarkId::new("incomplete", size), size, |b, _| {
            b.iter(|| black_box(protocol::parse_response(black_box(partial))));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode_header,
    bench_parse_response
);
criterion_main!(benches);
