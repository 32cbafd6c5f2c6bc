//! Criterion benchmarks for landscape sampling and search.
//!
//! Run with:
//!   cargo bench
//!   cargo bench --features parallel
//!
//! Results are saved to target/criterion/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use motifscape::{
    build_motif_population, ExecutionTier, InputRange, LandscapeSampler, MotifModel, MotifSpec,
    SearchConfig, SimilaritySearch, Topology,
};

fn make_model(topology: Topology, seed: u64) -> MotifModel {
    let acts = vec!["tanh"; topology.activation_count()];
    let aggs = vec!["sum"; topology.aggregation_count()];
    let spec = MotifSpec::new(topology, 1, &acts, &aggs).expect("valid spec");
    build_motif_population(&spec, 1, None, None, seed)
        .expect("population")
        .remove(0)
}

/// Landscape sampling across grid sizes.
fn bench_sample_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("sample_size");
    let model = make_model(Topology::CoherentLoop, 42);

    for points in [21usize, 41, 81].iter() {
        group.throughput(Throughput::Elements((*points * *points) as u64));
        group.bench_with_input(BenchmarkId::new("coherent_loop", points), points, |b, &points| {
            let sampler = LandscapeSampler::new(InputRange::default(), points).expect("grid");
            b.iter(|| black_box(sampler.sample(&model).expect("sample")));
        });
    }

    group.finish();
}

/// Gradient fields per execution tier.
fn bench_gradient_tiers(c: &mut Criterion) {
    let mut group = c.benchmark_group("gradient_tier");
    let model = make_model(Topology::IncoherentLoop, 7);
    let points = 81;

    group.bench_function("scalar_81", |b| {
        let sampler = LandscapeSampler::new(InputRange::default(), points)
            .expect("grid")
            .with_execution_tier(ExecutionTier::Scalar);
        b.iter(|| black_box(sampler.gradient_field(&model).expect("field")));
    });

    // Parallel (falls back to scalar if feature not enabled)
    group.bench_function("parallel_81", |b| {
        let sampler = LandscapeSampler::new(InputRange::default(), points)
            .expect("grid")
            .with_execution_tier(ExecutionTier::Parallel);
        b.iter(|| black_box(sampler.gradient_field(&model).expect("field")));
    });

    group.finish();
}

/// One minimum search over a small pool.
fn bench_minimum_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("minimum_search");
    group.sample_size(10);

    let source = make_model(Topology::Collider, 1);
    let acts = ["tanh", "tanh"];
    let spec = MotifSpec::new(Topology::Chain, 2, &acts, &[]).expect("valid spec");
    let pool = build_motif_population(&spec, 4, None, None, 2).expect("pool");
    let cfg = SearchConfig::default()
        .with_grid(InputRange::default(), 21)
        .with_caps(100, 1);

    for tier in [ExecutionTier::Scalar, ExecutionTier::Parallel] {
        let search = SimilaritySearch::new(cfg.with_execution_tier(tier)).expect("config");
        group.bench_function(format!("{tier:?}").to_lowercase(), |b| {
            b.iter(|| black_box(search.minimum_search(&source, &pool).expect("search")));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_sample_sizes,
    bench_gradient_tiers,
    bench_minimum_search,
);

criterion_main!(benches);
