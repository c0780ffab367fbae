//! Propagation benchmarks: wide fan-out, deep chains, diamonds and
//! batched writes.

use std::rc::Rc;

use cellgraph_core::{batch, Cell, Derived, Effect};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    for width in [10usize, 100, 1000] {
        let root = Cell::new(0u64);
        let leaves: Vec<Derived<u64>> = (0..width as u64)
            .map(|i| root.derive(move |v| v + i))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                root.write(next).unwrap();
                for leaf in &leaves {
                    black_box(leaf.read().unwrap());
                }
            });
        });
    }
    group.finish();
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    for depth in [10usize, 100, 500] {
        let root = Cell::new(0u64);
        // Each link keeps its predecessor alive.
        let mut tail = root.derive(|v| v + 1);
        for _ in 1..depth {
            tail = tail.derive(|v| v + 1);
        }

        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                root.write(next).unwrap();
                black_box(tail.read().unwrap())
            });
        });
    }
    group.finish();
}

fn bench_diamond_effect(c: &mut Criterion) {
    let a = Cell::new(1i64);
    let left = a.derive(|x| x + 1);
    let right = a.derive(|x| x * 10);
    let (l, r) = (left.clone(), right.clone());
    let sink = Derived::new(move || Ok(l.read()? + r.read()?));

    let seen = Rc::new(std::cell::Cell::new(0i64));
    let (reader, tally) = (sink.clone(), Rc::clone(&seen));
    let effect = Effect::new(move || {
        tally.set(reader.read()?);
        Ok(None)
    });

    let mut next = 1i64;
    c.bench_function("diamond_effect", |b| {
        b.iter(|| {
            next += 1;
            a.write(next).unwrap();
            black_box(seen.get())
        });
    });
    effect.dispose();
}

fn bench_batched_writes(c: &mut Criterion) {
    let cells: Vec<Cell<u64>> = (0..64).map(Cell::new).collect();
    let readers = cells.clone();
    let total = Rc::new(std::cell::Cell::new(0u64));
    let tally = Rc::clone(&total);
    let effect = Effect::new(move || {
        tally.set(readers.iter().map(Cell::read).sum());
        Ok(None)
    });

    let mut round = 0u64;
    c.bench_function("batched_writes_64", |b| {
        b.iter(|| {
            round += 1;
            batch(|| {
                for cell in &cells {
                    cell.update(|v| v + round).unwrap();
                }
            });
            black_box(total.get())
        });
    });
    effect.dispose();
}

criterion_group!(
    benches,
    bench_fan_out,
    bench_chain,
    bench_diamond_effect,
    bench_batched_writes
);
criterion_main!(benches);
