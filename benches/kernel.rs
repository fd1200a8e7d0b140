//! Throughput of the event loop on basic scheduling workloads.

use criterion::{criterion_group, criterion_main, Criterion};

use chronoflow::{boxed, run_from, suspend_for};

fn concurrent_sleepers(c: &mut Criterion) {
    c.bench_function("hundred concurrent sleepers", |b| {
        b.iter(|| {
            let sleepers =
                (0..100).map(|index| boxed(async move { suspend_for(0.1 * f64::from(index % 10 + 1)).await }));
            run_from(0.0, sleepers).expect("benchmark simulation failed");
        })
    });
}

fn sequential_timeline(c: &mut Criterion) {
    c.bench_function("thousand sequential steps", |b| {
        b.iter(|| {
            run_from(
                0.0,
                [boxed(async {
                    for _ in 0..1000 {
                        suspend_for(1.0).await?;
                    }
                    Ok(())
                })],
            )
            .expect("benchmark simulation failed");
        })
    });
}

criterion_group!(benches, concurrent_sleepers, sequential_timeline);
criterion_main!(benches);
