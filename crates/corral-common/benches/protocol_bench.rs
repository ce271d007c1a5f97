// Criterion benchmarks for the corral-common protocol layer
//
// Run benchmarks with:
//   cargo bench -p corral-common

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use corral_common::protocol::{names, Message};
use corral_common::transport::JsonCodec;
use serde_json::json;

fn bench_message_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_creation");

    group.bench_function("method_call", |b| {
        b.iter(|| {
            Message::method_call(
                black_box(1),
                black_box(names::ORCHESTRATOR_OBJECT_PATH),
                black_box(names::ORCHESTRATOR_IFACE),
                black_box("IsolateAll"),
                black_box(json!({"target": "multi-user.target"})),
            )
        });
    });

    group.bench_function("signal", |b| {
        b.iter(|| {
            Message::signal(
                black_box(names::ORCHESTRATOR_OBJECT_PATH),
                black_box(names::ORCHESTRATOR_IFACE),
                black_box("JobNew"),
                black_box(json!({"id": 1, "job": "/org/corral/orchestrator/jobs/1"})),
            )
        });
    });

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let call = Message::method_call(
        7,
        names::NODE_PEER_OBJECT_PATH,
        names::NODE_PEER_IFACE,
        "Isolate",
        json!({"target": "multi-user.target"}),
    );
    group.bench_function("encode_call", |b| {
        b.iter(|| JsonCodec::encode(black_box(&call)));
    });

    let encoded = JsonCodec::encode(&call).unwrap();
    group.bench_function("decode_call", |b| {
        b.iter(|| JsonCodec::decode(black_box(&encoded)));
    });

    let removed = Message::signal(
        names::ORCHESTRATOR_OBJECT_PATH,
        names::ORCHESTRATOR_IFACE,
        "JobRemoved",
        json!({"id": 1, "job": "/org/corral/orchestrator/jobs/1", "result": "done"}),
    );
    let encoded = JsonCodec::encode(&removed).unwrap();
    group.bench_function("decode_signal", |b| {
        b.iter(|| JsonCodec::decode(black_box(&encoded)));
    });

    group.finish();
}

criterion_group!(benches, bench_message_creation, bench_codec);
criterion_main!(benches);
