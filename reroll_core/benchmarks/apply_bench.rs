use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use reroll_core::{CellCatalog, MemoryWorld, MutationTask, RegionMutator, TracingStatusSink};
use reroll_schema::{CellTypeId, RegionKey, VerticalBounds};

fn seeded_world(region_size: u32, height: i32) -> MemoryWorld {
    let region = RegionKey::new(0, 0);
    let mut world = MemoryWorld::new(region_size, VerticalBounds::new(0, height));
    world
        .load_region(region, &CellTypeId::new("base", "stone"))
        .unwrap();
    world
        .fill_layer(region, 0, &CellTypeId::new("base", "bedrock"))
        .unwrap();
    world
        .fill_layer(region, height - 1, &CellTypeId::new("base", "air"))
        .unwrap();
    world
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");
    let catalog = CellCatalog::builtin();

    for height in [64i32, 128, 384] {
        group.bench_with_input(BenchmarkId::new("height", height), &height, |b, &height| {
            let mutator = RegionMutator::new(16, Arc::clone(&catalog), Arc::new(TracingStatusSink));
            b.iter_batched(
                || seeded_world(16, height),
                |mut world| {
                    mutator
                        .apply(
                            MutationTask::new(RegionKey::new(0, 0), CellTypeId::new("base", "glass")),
                            &mut world,
                        )
                        .unwrap()
                },
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(apply_benches, bench_apply);
criterion_main!(apply_benches);
