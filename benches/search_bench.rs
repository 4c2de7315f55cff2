//! Benchmarks for collection-level search

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vectordb_embedded::{
    AttrValue, CollectionMetadata, CollectionStore, IndexCache, MemoryRecordStore, NewEmbedding,
    SearchQuery, Where,
};
use std::sync::Arc;

fn create_random_embeddings(n: usize, dim: usize) -> Vec<NewEmbedding> {
    (0..n)
        .map(|i| {
            let data: Vec<f32> = (0..dim).map(|_| rand::random::<f32>() - 0.5).collect();
            NewEmbedding::new(format!("v{}", i), data).with_args(
                Some(AttrValue::Int((i % 10) as i64)),
                None,
                None,
            )
        })
        .collect()
}

fn benchmark_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    let dir = tempfile::tempdir().unwrap();

    for size in [100, 1000, 10000].iter() {
        let store = CollectionStore::new(
            MemoryRecordStore::new(),
            Arc::new(IndexCache::new(dir.path().join(size.to_string()))),
        );
        let name = format!("bench{}", size);
        store
            .create_collection(
                &name,
                CollectionMetadata::new(128).with_max_elements(*size),
                false,
            )
            .unwrap();
        store
            .add_embeddings(&name, create_random_embeddings(*size, 128))
            .unwrap();

        let query = SearchQuery::new(name.clone(), vec![0.1; 128], 10);
        let filtered = query.clone().with_filter(Where {
            arg1: Some(AttrValue::Int(3)),
            ..Default::default()
        });

        group.bench_with_input(BenchmarkId::new("unfiltered", size), size, |b, _| {
            b.iter(|| store.get_nearest_neighbors(black_box(&query)).unwrap());
        });

        group.bench_with_input(BenchmarkId::new("filtered", size), size, |b, _| {
            b.iter(|| store.get_nearest_neighbors(black_box(&filtered)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_search);
criterion_main!(benches);
