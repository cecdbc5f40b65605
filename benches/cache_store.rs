//! Benchmarks for the cache store and a cached pipeline
//!
//! This benchmark measures:
//! - Raw get/set on the in-memory store
//! - Tag invalidation over a populated store
//! - Key derivation from request URLs
//! - A full HIT through a composed pipeline

use api_optimizer::cache::{CacheBackend, CacheKey, CacheKeyGenerator, MemoryCache};
use api_optimizer::middleware::{handler_fn, PipelineConfig, Request, Response};
use api_optimizer::{ApiOptimizer, OptimizerConfig};
use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

const TTL: Duration = Duration::from_secs(300);

fn populated(n: usize) -> MemoryCache {
    let cache = MemoryCache::new(n.max(1) * 2);
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        for i in 0..n {
            let tags = [format!("group-{}", i % 10)];
            cache
                .set(&CacheKey::new(format!("GET:/api/items/{i}")), Bytes::from_static(b"{}"), TTL, &tags)
                .await
                .unwrap();
        }
    });
    cache
}

fn bench_get_set(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("memory_cache");
    group.throughput(Throughput::Elements(1));

    let cache = populated(1_000);
    let hit = CacheKey::new("GET:/api/items/500");
    let miss = CacheKey::new("GET:/api/nothing");

    group.bench_function("get_hit", |b| {
        b.to_async(&rt).iter(|| async { black_box(cache.get(&hit).await.unwrap()) })
    });
    group.bench_function("get_miss", |b| {
        b.to_async(&rt).iter(|| async { black_box(cache.get(&miss).await.unwrap()) })
    });
    group.bench_function("overwrite", |b| {
        b.to_async(&rt).iter(|| async {
            cache
                .set(&hit, Bytes::from_static(b"{\"v\":1}"), TTL, &[])
                .await
                .unwrap()
        })
    });
    group.finish();
}

fn bench_invalidate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("invalidate_by_tag");
    for size in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || populated(size),
                |cache| rt.block_on(async { black_box(cache.invalidate_by_tag("group-3").await.unwrap()) }),
                criterion::BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

fn bench_key_generation(c: &mut Criterion) {
    let keys = CacheKeyGenerator::new();
    c.bench_function("cache_key/generate", |b| {
        b.iter(|| black_box(keys.generate("GET", "/api/portfolios?sort=name&page=2&limit=10&filter=active")))
    });
}

fn bench_pipeline_hit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let optimizer = rt
        .block_on(async { ApiOptimizer::new(OptimizerConfig::new().with_eager_expiry(false)) })
        .unwrap();
    let pipeline = optimizer
        .pipeline(
            PipelineConfig::new()
                .with_cache(TTL, &["items"])
                .with_rate_limit(u32::MAX, Duration::from_secs(60))
                .with_metrics(true),
        )
        .build(handler_fn(|_req| async { Ok(Response::ok("[]")) }))
        .unwrap();
    rt.block_on(pipeline.handle(Request::get("/api/items"))).unwrap();

    c.bench_function("pipeline/cache_hit", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(pipeline.handle(Request::get("/api/items")).await.unwrap()) })
    });
}

criterion_group!(benches, bench_get_set, bench_invalidate, bench_key_generation, bench_pipeline_hit);
criterion_main!(benches);
