//! # Pipeline Benchmarks
//!
//! Cost of a fully cached generation against a generation with one edited root.
//!
//! Run with: `cargo bench -p ripple-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ripple_core::{CancellationToken, Driver, GraphBuilder, RootInputs};
use std::hint::black_box;

fn wide_pipeline() -> Driver {
    let mut graph = GraphBuilder::new();
    let input = graph.roots();
    let words = graph.select_many("words", input, |ctx, s: &String| {
        for word in s.split_whitespace() {
            ctx.emit(word.to_string());
        }
        Ok(())
    });
    let upper = graph.select("upper", words, |w: &String| w.to_uppercase());
    graph.host_output("emit", upper, |ctx, w: &String| {
        let key = ctx.input_key().to_string();
        ctx.add_output(key, w.clone());
        Ok(())
    });
    Driver::new(graph.build().expect("build"))
}

fn inputs(size: usize) -> RootInputs {
    RootInputs::from_pairs(
        (0..size).map(|i| (format!("file{i:05}.txt"), format!("alpha beta gamma {i}"))),
    )
    .expect("roots")
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_cached_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_generation");

    for size in [100, 1000, 10000].iter() {
        let roots = inputs(*size);
        let mut driver = wide_pipeline();
        driver
            .run_generation(&roots, &CancellationToken::new())
            .expect("generation");

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let outcome = driver.run_generation(&roots, &CancellationToken::new());
                black_box(outcome)
            });
        });
    }

    group.finish();
}

fn bench_single_edit(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_edit");

    for size in [100, 1000, 10000].iter() {
        let base = inputs(*size);
        let mut edited = base.clone();
        edited
            .insert("file00000.txt", "delta epsilon")
            .expect("insert");
        let mut driver = wide_pipeline();
        driver
            .run_generation(&base, &CancellationToken::new())
            .expect("generation");

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            let mut flip = false;
            b.iter(|| {
                flip = !flip;
                let roots = if flip { &edited } else { &base };
                let outcome = driver.run_generation(roots, &CancellationToken::new());
                black_box(outcome)
            });
        });
    }

    group.finish();
}

fn bench_first_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("first_generation");

    for size in [100, 1000].iter() {
        let roots = inputs(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut driver = wide_pipeline();
                let outcome = driver.run_generation(&roots, &CancellationToken::new());
                black_box(outcome)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_cached_generation,
    bench_single_edit,
    bench_first_generation
);
criterion_main!(benches);
