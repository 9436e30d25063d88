use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use fdrscan::RangeCollection;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Every other block of 10 items, so the collection stays fragmented
fn fragmented(items: u64) -> RangeCollection {
    let mut collection = RangeCollection::new();
    for block in (0..items / 10).step_by(2) {
        collection.add_range(block * 10, block * 10 + 9);
    }
    collection
}

fn bench_add_shuffled(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_collection_add");
    group.sample_size(20);

    for items in [1_000u64, 10_000, 100_000] {
        let mut order: Vec<u64> = (0..items).collect();
        order.shuffle(&mut StdRng::seed_from_u64(7));

        group.bench_with_input(BenchmarkId::new("shuffled", items), &order, |b, order| {
            b.iter(|| {
                let mut collection = RangeCollection::new();
                for &item in order {
                    collection.add(black_box(item));
                }
                collection
            });
        });
    }

    group.finish();
}

fn bench_text_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_collection_text");
    group.sample_size(20);

    for items in [10_000u64, 100_000] {
        let collection = fragmented(items);
        let text = collection.to_string();

        group.bench_with_input(BenchmarkId::new("display", items), &collection, |b, collection| {
            b.iter(|| black_box(collection).to_string());
        });
        group.bench_with_input(BenchmarkId::new("parse", items), &text, |b, text| {
            b.iter(|| black_box(text).parse::<RangeCollection>().unwrap());
        });
    }

    group.finish();
}

fn bench_merge_and_complement(c: &mut Criterion) {
    let checkpoint = fragmented(100_000);
    let mut pending = RangeCollection::new();
    for block in (1..10_000u64).step_by(2) {
        pending.add_range(block * 10, block * 10 + 9);
    }

    c.bench_function("range_collection_merge_pending", |b| {
        b.iter(|| {
            let mut merged = checkpoint.clone();
            merged.add_range_collection(black_box(&pending));
            merged.is_complete(100_000)
        })
    });

    c.bench_function("range_collection_complement", |b| {
        b.iter(|| black_box(&checkpoint).complement(0, 99_999))
    });
}

criterion_group!(
    benches,
    bench_add_shuffled,
    bench_text_round_trip,
    bench_merge_and_complement,
);
criterion_main!(benches);
