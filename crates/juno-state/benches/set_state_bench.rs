//! Write-path benchmarks: plain writes, fan-out to listeners, and batching.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use juno_state::StateManager;
use serde_json::json;

fn bench_set_state(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_state");

    group.bench_function("single_path", |b| {
        let state = StateManager::default();
        let mut n = 0_i64;
        b.iter(|| {
            n += 1;
            black_box(state.set_state("counter.value", n));
        });
    });

    for listeners in [1_usize, 16, 128] {
        group.bench_with_input(BenchmarkId::new("fan_out", listeners), &listeners, |b, &listeners| {
            let state = StateManager::default();
            let subs: Vec<_> = (0..listeners)
                .map(|_| state.subscribe("todos", |change| {
                    black_box(change);
                }, true))
                .collect();
            let mut n = 0_i64;
            b.iter(|| {
                n += 1;
                state.set_state("todos.0.done", n % 2 == 0);
            });
            drop(subs);
        });
    }

    group.bench_function("batch_100_writes", |b| {
        let state = StateManager::default();
        let _sub = state.subscribe("form", |change| {
            black_box(change);
        }, true);
        let mut n = 0_i64;
        b.iter(|| {
            n += 1;
            state.execute_batch(|| {
                for i in 0..100 {
                    state.set_state(&format!("form.field{}", i % 10), json!(n + i));
                }
            });
        });
    });

    group.finish();
}

criterion_group!(benches, bench_set_state);
criterion_main!(benches);
