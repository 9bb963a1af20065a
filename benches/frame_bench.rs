//! Microbenchmarks for the frame codec and masking

use bytes::BytesMut;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

use riptide_ws::frame::{OpCode, encode_frame, parse_header};
use riptide_ws::mask::{apply_mask, apply_mask_offset};

fn bench_mask(c: &mut Criterion) {
    let key = [0x37, 0xfa, 0x21, 0x3d];

    let mut group = c.benchmark_group("mask");
    for size in [64usize, 1024, 16 * 1024] {
        group.bench_function(format!("apply_mask/{}", size), |b| {
            let mut data = vec![0xABu8; size];
            b.iter(|| {
                apply_mask(black_box(&mut data), black_box(key));
            });
        });
        group.bench_function(format!("apply_mask_offset/{}", size), |b| {
            let mut data = vec![0xABu8; size];
            b.iter(|| {
                apply_mask_offset(black_box(&mut data), black_box(key), black_box(3));
            });
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for size in [8usize, 256, 65536] {
        let payload = vec![0x42u8; size];
        group.bench_function(format!("unmasked/{}", size), |b| {
            let mut buf = BytesMut::with_capacity(size + 16);
            b.iter(|| {
                buf.clear();
                encode_frame(&mut buf, OpCode::Binary, black_box(&payload), true, None);
            });
        });
        group.bench_function(format!("masked/{}", size), |b| {
            let mut buf = BytesMut::with_capacity(size + 16);
            b.iter(|| {
                buf.clear();
                encode_frame(
                    &mut buf,
                    OpCode::Binary,
                    black_box(&payload),
                    true,
                    Some([0x01, 0x02, 0x03, 0x04]),
                );
            });
        });
    }
    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut encoded = BytesMut::new();
    encode_frame(
        &mut encoded,
        OpCode::Binary,
        &vec![0x42u8; 1024],
        true,
        Some([0x01, 0x02, 0x03, 0x04]),
    );
    let encoded = encoded.freeze();

    c.bench_function("parse_header/1024", |b| {
        b.iter(|| {
            let mut buf = BytesMut::from(&encoded[..]);
            black_box(parse_header(&mut buf, true).unwrap().unwrap());
        });
    });
}

criterion_group!(benches, bench_mask, bench_encode, bench_parse);
criterion_main!(benches);
