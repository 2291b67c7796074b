use amdrisk::{run_bp, Config, FactorGraph, FactorKind, Marginals, Potentials};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::{ArrayD, IxDyn};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use std::time::Duration;

fn gen_potentials(graph: &FactorGraph) -> Potentials {
    let mut pot = Potentials::uniform(graph);
    for f in 0..graph.n_factors() {
        if let FactorKind::Weight { .. } = graph.factor_kind(f) {
            let table = ArrayD::random(IxDyn(&graph.factor_shape(f)), Uniform::new(0.01, 1.0));
            pot.set(f, table).unwrap();
        }
    }
    pot
}

fn bench_bp(c: &mut Criterion) {
    let mut group = c.benchmark_group("belief_propagation");
    let config = Config::default();
    for n_features in [8, 64, 512].iter() {
        let graph =
            FactorGraph::build((0..*n_features).map(|i| (format!("f{}", i), 4)), "target")
                .unwrap();
        let pot = gen_potentials(&graph);
        group.bench_with_input(
            BenchmarkId::new("run_bp", n_features),
            n_features,
            |b, _| {
                b.iter(|| {
                    let res = run_bp(&graph, &pot, &config);
                    Marginals::extract(&graph, &res.messages).risk_score()
                })
            },
        );
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = bench_bp
}
criterion_main!(benches);
