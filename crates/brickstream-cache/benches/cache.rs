//! Codec and per-frame update benchmarks.

use brickstream_cache::{
    BrickCache, CacheConfig, DispatchMode, NodeCodec, NodeDescriptor, NodeFlags, NodePayload,
    PoolCapacity, UploadBudget,
};
use brickstream_core::SlotIndex;
use brickstream_octree::{VolumeConfig, VolumeGenerator};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn codec(c: &mut Criterion) {
    let codec = NodeCodec::new(3).unwrap();
    let descriptor = NodeDescriptor {
        homogeneous: false,
        child_pointer: 4321,
        payload: NodePayload::Average([1000, 20000, 65535, 0]),
    };
    let packed = codec.encode(&descriptor);

    c.bench_function("codec_encode", |b| b.iter(|| codec.encode(black_box(&descriptor))));
    c.bench_function("codec_decode", |b| b.iter(|| codec.decode(black_box(packed))));
    c.bench_function("codec_rebind", |b| {
        b.iter(|| codec.update_brick_binding(black_box(packed), &NodePayload::Brick(SlotIndex(77))))
    });
}

fn update(c: &mut Criterion) {
    let (octree, store) = VolumeGenerator::new(VolumeConfig {
        levels: 5,
        brick_dim: 8,
        threshold: 20000,
        ..Default::default()
    })
    .generate()
    .unwrap();
    let config = CacheConfig {
        pool: PoolCapacity::Slots(256),
        upload: UploadBudget::UNLIMITED,
    };

    c.bench_function("update_full_requests", |b| {
        b.iter(|| {
            let mut cache = BrickCache::new(&octree, config).unwrap();
            let mut dispatch = cache.begin_dispatch(DispatchMode::FullFrame);
            for flag in dispatch.flags_mut().iter_mut() {
                *flag = NodeFlags::REQUESTED.bits();
            }
            dispatch.complete();
            black_box(cache.update(&octree, &store, None).unwrap())
        });
    });
}

criterion_group!(benches, codec, update);
criterion_main!(benches);
