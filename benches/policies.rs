use chaoslearn::{Operation, Policy, PolicyConfig, PolicyKind, StaticArchitecture};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

fn fan_in(n_ops: usize) -> StaticArchitecture {
    // svc0 is a leaf; every later operation depends on up to three earlier ones.
    let ops = (0..n_ops)
        .map(|i| {
            let deps: Vec<String> = (i.saturating_sub(3)..i).map(|j| format!("svc{j}")).collect();
            Operation::new(format!("svc{i}"))
                .with_circuit_breaker(i % 4 == 0)
                .with_service_instances(1 + (i as u32 % 5))
                .with_dependencies(deps)
        })
        .collect();
    StaticArchitecture::new(ops).unwrap()
}

fn params(kind: PolicyKind) -> &'static [f64] {
    match kind {
        PolicyKind::BanditEpsilon => &[0.5, 0.99, 0.05],
        PolicyKind::BanditOptimistic => &[5.0],
        PolicyKind::QLearning => &[0.1, 0.9, 0.5, 0.0],
        PolicyKind::Tableau => &[0.3, 0.99, 0.0, 0.01, 4.0],
        PolicyKind::Neural => &[16.0],
        PolicyKind::Random => &[],
    }
}

fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("propose_feedback");
    for &n_ops in &[8usize, 64usize] {
        let arch = fan_in(n_ops);
        for kind in PolicyKind::ALL {
            // Training cost dominates the neural policy; keep it out of the hot loop.
            if kind == PolicyKind::Neural {
                continue;
            }
            let mut p = PolicyConfig::from_params(kind, params(kind), 7)
                .unwrap()
                .build(&arch)
                .unwrap();
            let mut t = 0u64;
            group.bench_with_input(BenchmarkId::new(kind.as_str(), n_ops), &n_ops, |b, &_n| {
                b.iter(|| {
                    let a = p.propose().unwrap();
                    t += 1;
                    p.feedback(black_box((t % 7) as f64)).unwrap();
                    black_box(a);
                })
            });
        }
    }
    group.finish();
}

fn bench_neural_training(c: &mut Criterion) {
    let arch = fan_in(16);
    c.bench_function("neural_first_five_feedbacks", |b| {
        b.iter(|| {
            let mut p: Box<dyn Policy> = PolicyConfig::from_params(PolicyKind::Neural, &[8.0], 3)
                .unwrap()
                .build(&arch)
                .unwrap();
            for i in 0..5 {
                p.propose().unwrap();
                p.feedback(f64::from(i % 2)).unwrap();
            }
            black_box(p);
        })
    });
}

criterion_group!(benches, bench_round_trip, bench_neural_training);
criterion_main!(benches);
