//! MsgBuffer benchmarks: steady-state write/retrieve churn and the
//! grow/compact path under a consumed prefix.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use evio_core::MsgBuffer;

fn bench_write_retrieve_churn(c: &mut Criterion) {
    let payload = [0xabu8; 512];
    c.bench_function("write_retrieve_512", |b| {
        let mut buf = MsgBuffer::with_capacity(4096);
        b.iter(|| {
            buf.write(black_box(&payload));
            buf.retrieve(payload.len());
        });
    });
}

fn bench_grow_path(c: &mut Criterion) {
    let payload = [0x55u8; 256];
    c.bench_function("grow_from_64", |b| {
        b.iter(|| {
            let mut buf = MsgBuffer::with_capacity(64);
            for _ in 0..16 {
                buf.write(black_box(&payload));
            }
            black_box(buf.readable_size())
        });
    });
}

fn bench_compact_with_prefix(c: &mut Criterion) {
    c.bench_function("compact_half_consumed", |b| {
        b.iter(|| {
            let mut buf = MsgBuffer::with_capacity(1024);
            buf.write(&[1u8; 768]);
            buf.retrieve(512);
            buf.compact();
            black_box(buf.writable_size())
        });
    });
}

criterion_group!(
    benches,
    bench_write_retrieve_churn,
    bench_grow_path,
    bench_compact_with_prefix
);
criterion_main!(benches);
