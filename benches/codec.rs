//! 코덱 / netascii 벤치마크

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use wtftp::message::{Message, Request, TransferMode};
use wtftp::netascii;

fn bench_data_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("data_codec");

    for size in [512usize, 1024, 1496] {
        let message = Message::Data {
            block: 4242,
            payload: Bytes::from(vec![0xA5u8; size]),
        };
        let encoded = message.encode();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &message, |b, m| {
            b.iter(|| black_box(m.encode()))
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &encoded, |b, bytes| {
            b.iter(|| black_box(Message::decode(bytes).unwrap()))
        });
    }

    group.finish();
}

fn bench_request_decode(c: &mut Criterion) {
    let mut request = Request::new("pxelinux.cfg/default", TransferMode::Octet);
    for (key, value) in [("blksize", "1468"), ("tsize", "0"), ("windowsize", "16"), ("timeout", "1")] {
        request.options.insert(key.to_string(), value.to_string());
    }
    let encoded = Message::ReadRequest(request).encode();

    c.bench_function("request_decode", |b| {
        b.iter(|| black_box(Message::decode(&encoded).unwrap()))
    });
}

fn bench_netascii(c: &mut Criterion) {
    let text = b"The quick brown fox\njumps over\r\nthe lazy dog\n".repeat(1024);
    let mut wire = Vec::new();
    netascii::encode(&text, &mut wire);

    let mut group = c.benchmark_group("netascii");
    group.throughput(Throughput::Bytes(text.len() as u64));

    group.bench_function("encode", |b| {
        let mut out = Vec::with_capacity(wire.len());
        b.iter(|| {
            out.clear();
            netascii::encode(black_box(&text), &mut out);
        })
    });
    group.bench_function("decode", |b| {
        let mut out = Vec::with_capacity(text.len());
        b.iter(|| {
            out.clear();
            let mut decoder = netascii::Decoder::new();
            for block in wire.chunks(512) {
                decoder.decode(black_box(block), &mut out);
            }
            decoder.finish(&mut out);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_data_codec, bench_request_decode, bench_netascii);
criterion_main!(benches);
