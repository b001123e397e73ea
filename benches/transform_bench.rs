use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dimvar::ops::{MaxEquals, Plus, Times};
use dimvar::{accumulate_in_place, transform2, Dim, Dimensions, Unit, Variable};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn dims(pairs: &[(&str, i64)]) -> Dimensions {
    let pairs: Vec<(Dim, i64)> = pairs.iter().map(|&(n, e)| (Dim::new(n), e)).collect();
    Dimensions::from_pairs(&pairs).unwrap()
}

fn random_values(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(0.0..1000.0)).collect()
}

fn square(size: usize, seed: u64) -> Variable {
    Variable::new(
        dims(&[("y", size as i64), ("x", size as i64)]),
        Unit::M,
        random_values(size * size, seed),
        None,
    )
    .unwrap()
}

fn bench_dense_plus(c: &mut Criterion) {
    let mut group = c.benchmark_group("dense_plus");
    for size in [100usize, 500, 1000] {
        let elements = size * size;
        group.throughput(Throughput::Elements(elements as u64));

        let a = square(size, 1);
        let b = square(size, 2);
        group.bench_with_input(BenchmarkId::new("contiguous", size), &size, |bench, _| {
            bench.iter(|| transform2(&Plus, &a, &b).unwrap());
        });

        // Same data through a transposed view: the inner loop cannot fuse
        // all dimensions.
        let b_t = b.transpose(&[]).unwrap();
        group.bench_with_input(BenchmarkId::new("transposed", size), &size, |bench, _| {
            bench.iter(|| transform2(&Plus, &a, &b_t).unwrap());
        });
    }
    group.finish();
}

fn bench_variance_propagation(c: &mut Criterion) {
    let mut group = c.benchmark_group("times_with_variances");
    for size in [100usize, 500, 1000] {
        let elements = size * size;
        group.throughput(Throughput::Elements(elements as u64));

        let a = square(size, 3);
        a.set_variances::<f64>(Some(random_values(elements, 4)))
            .unwrap();
        let b = square(size, 5);
        b.set_variances::<f64>(Some(random_values(elements, 6)))
            .unwrap();
        group.bench_with_input(BenchmarkId::new("values_and_variances", size), &size, |bench, _| {
            bench.iter(|| transform2(&Times, &a, &b).unwrap());
        });
    }
    group.finish();
}

fn bench_accumulate_max(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulate_max");
    for size in [1_000usize, 100_000, 1_000_000] {
        group.throughput(Throughput::Elements(size as u64));

        let other = Variable::new(
            dims(&[("y", 8), ("x", size as i64)]),
            Unit::NONE,
            random_values(8 * size, 7),
            None,
        )
        .unwrap();
        group.bench_with_input(BenchmarkId::new("reduce_x", size), &size, |bench, _| {
            bench.iter(|| {
                let out = Variable::new(
                    dims(&[("y", 8)]),
                    Unit::NONE,
                    vec![f64::MIN; 8],
                    None,
                )
                .unwrap();
                accumulate_in_place(&MaxEquals, &out, &other).unwrap();
                out
            });
        });
    }
    group.finish();
}

fn bench_binned_scale(c: &mut Criterion) {
    let mut group = c.benchmark_group("binned_scale");
    for events_per_bin in [10usize, 1000] {
        let bins = 1000usize;
        let total = bins * events_per_bin;
        group.throughput(Throughput::Elements(total as u64));

        let ranges: Vec<(usize, usize)> = (0..bins)
            .map(|i| (i * events_per_bin, (i + 1) * events_per_bin))
            .collect();
        let inner = Variable::new(
            dims(&[("event", total as i64)]),
            Unit::COUNTS,
            random_values(total, 8),
            None,
        )
        .unwrap();
        let binned = Variable::binned(
            dims(&[("spectrum", bins as i64)]),
            ranges,
            Dim::new("event"),
            inner,
        )
        .unwrap();
        let scale = Variable::new(
            dims(&[("spectrum", bins as i64)]),
            Unit::NONE,
            random_values(bins, 9),
            None,
        )
        .unwrap();
        group.bench_with_input(
            BenchmarkId::new("events_per_bin", events_per_bin),
            &events_per_bin,
            |bench, _| {
                bench.iter(|| transform2(&Times, &binned, &scale).unwrap());
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_dense_plus,
    bench_variance_propagation,
    bench_accumulate_max,
    bench_binned_scale
);
criterion_main!(benches);
