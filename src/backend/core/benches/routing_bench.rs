//! Benchmarks for query normalization and backend routing.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use catalog_core::query::{NormalizedQuery, RawQueryParams};
use catalog_core::routing::{BackendRouter, RouterConfig};

const BROWSE: &[(&str, &str)] = &[("category", "Electronics"), ("subcategory", "Phones")];
const FILTERED: &[(&str, &str)] = &[("category", "Clothing"), ("brands", "Acme,Hooli,Globex"), ("colors", "Red,Blue"), ("minPrice", "20"), ("sort", "price-desc")];
const SEARCH: &[(&str, &str)] = &[("q", "noise cancelling headphones"), ("minRating", "4")];
const QUICK: &[(&str, &str)] = &[("category", "Electronics"), ("quickFilter", "trending"), ("page", "2")];

fn cases() -> [(&'static str, &'static [(&'static str, &'static str)]); 4] {
    [("browse", BROWSE), ("filtered", FILTERED), ("search", SEARCH), ("quick_filter", QUICK)]
}

fn bench_query_normalization(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_normalization");
    for (label, pairs) in cases() {
        let raw = RawQueryParams::from_pairs(pairs.iter().copied());
        group.bench_with_input(BenchmarkId::from_parameter(label), &raw, |b, r| { b.iter(|| black_box(NormalizedQuery::from_raw(r).unwrap())); });
    }
    group.finish();
}

fn bench_routing_decision(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing_decision");
    let router = BackendRouter::new(RouterConfig::default());
    for (label, pairs) in cases() {
        let query = NormalizedQuery::from_raw(&RawQueryParams::from_pairs(pairs.iter().copied())).unwrap();
        group.bench_with_input(BenchmarkId::new("decide", label), &query, |b, q| { b.iter(|| black_box(router.decide(q))); });
        group.bench_with_input(BenchmarkId::new("plan", label), &query, |b, q| { b.iter(|| black_box(router.plan(q))); });
    }
    group.finish();
}

fn bench_routing_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing_batch");
    let router = BackendRouter::new(RouterConfig::default());
    let queries: Vec<_> = cases().iter().map(|(_, pairs)| NormalizedQuery::from_raw(&RawQueryParams::from_pairs(pairs.iter().copied())).unwrap()).collect();
    for batch_size in [100, 1_000] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch_size), &batch_size, |b, &n| {
            b.iter(|| { for i in 0..n { black_box(router.decide(&queries[i % queries.len()])); } });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_query_normalization, bench_routing_decision, bench_routing_batch);
criterion_main!(benches);
