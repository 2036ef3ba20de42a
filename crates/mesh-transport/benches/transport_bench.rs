use std::time::Instant;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use mesh_core::lower_transport::{SegmentKind, split};
use mesh_core::{Address, SeqZero};
use mesh_transport::ReplayCache;
use mesh_transport::sar::{Reassembler, SarParameters, SegmentMeta};

fn populate_replay(cache: &mut ReplayCache, count: u16) {
    for i in 1..=count {
        cache.check(Address(i), u64::from(i), false);
    }
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");

    for (label, fill) in [("empty", 0u16), ("1K", 1_000), ("30K", 30_000)] {
        let mut cache = ReplayCache::new();
        populate_replay(&mut cache, fill);
        let mut seq = 1_000_000u64;

        group.bench_with_input(BenchmarkId::new("check_fresh", label), &fill, |b, _| {
            b.iter(|| {
                seq += 1;
                cache.check(Address(1), seq, false)
            });
        });
    }

    group.finish();
}

fn bench_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembly");
    let kind = SegmentKind::Access {
        aid: None,
        szmic: false,
    };

    for segments in [2usize, 8, 32] {
        let payload = vec![0xA5u8; segments * 12];
        let split = split(kind, SeqZero::new(1), &payload).expect("payload fits");

        group.bench_with_input(
            BenchmarkId::new("in_order", segments),
            &split,
            |b, split| {
                b.iter(|| {
                    let mut reassembler = Reassembler::new(SarParameters::default());
                    let now = Instant::now();
                    let meta = SegmentMeta {
                        source: Address(0x0002),
                        destination: Address(0x0001),
                        ttl: 5,
                        seq_auth: 1,
                    };
                    for segment in split {
                        reassembler.on_segment(now, meta, segment.clone(), true);
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_replay, bench_reassembly);
criterion_main!(benches);
