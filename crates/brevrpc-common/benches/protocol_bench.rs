// Criterion benchmarks for brevrpc-common framing and codecs
//
// Run benchmarks with:
//   cargo bench -p brevrpc-common

use brevrpc_common::protocol::Request;
use brevrpc_common::transport::{Envelope, FrameDecoder, Message, SerializationType};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn sample_request(serialization: SerializationType) -> Request {
    Request::new("HelloFacade", "hello_rpc", "1.0.0")
        .with_param_types(["String", "String"])
        .with_args(serialization.codec().encode(&("Tom", "Hangzhou")).unwrap())
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for serialization in [
        SerializationType::MsgPack,
        SerializationType::Json,
        SerializationType::Postcard,
    ] {
        let envelope = Envelope::new(1, serialization, Message::Request(sample_request(serialization)));
        group.bench_function(format!("{:?}", serialization), |b| {
            b.iter(|| black_box(&envelope).encode().unwrap());
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for serialization in [SerializationType::Json, SerializationType::Postcard] {
        let bytes = Envelope::new(1, serialization, Message::Request(sample_request(serialization)))
            .encode()
            .unwrap();
        group.bench_function(format!("{:?}", serialization), |b| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new();
                decoder.extend(black_box(&bytes));
                let frame = decoder.decode().unwrap().unwrap();
                Envelope::decode(&frame).unwrap()
            });
        });
    }

    group.bench_function("split_delivery", |b| {
        let bytes = Envelope::new(
            1,
            SerializationType::Postcard,
            Message::Request(sample_request(SerializationType::Postcard)),
        )
        .encode()
        .unwrap();
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            for chunk in bytes.chunks(7) {
                decoder.extend(chunk);
                if let Some(frame) = decoder.decode().unwrap() {
                    black_box(frame);
                }
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
