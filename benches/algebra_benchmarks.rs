//! Join and index hot-path benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use relata::algebra::{Rel, VarScope};
use relata::expr::Params;
use relata::head::Head;
use relata::index;
use relata::tuple::{Tuple, TupleBuf};
use relata::value::{DataType, Value};

fn head(attrs: &[(&str, DataType)]) -> Head {
    Head::new(attrs.iter().map(|(n, t)| ((*n).to_string(), *t)).collect())
}

fn pairs(n: i32, modulo: i32) -> TupleBuf {
    (0..n)
        .map(|i| Tuple::new(vec![Value::Int(i % modulo), Value::Int(i)]))
        .collect()
}

fn bench_index_sort(c: &mut Criterion) {
    c.bench_function("index_sort_10k", |b| {
        b.iter_batched(
            || pairs(10_000, 97),
            |mut buf| {
                index::sort(&mut buf, &[0, 1]);
                black_box(buf)
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

fn bench_join(c: &mut Criterion) {
    let ab = head(&[("a", DataType::Int), ("b", DataType::Int)]);

    c.bench_function("join_2k_x_2k", |b| {
        b.iter_batched(
            || {
                let mut vars = VarScope::new();
                vars.insert("l", pairs(2_000, 50));
                vars.insert("r", pairs(2_000, 50));
                vars
            },
            |mut vars| {
                let node = Rel::join(
                    Rel::load(ab.clone(), "l"),
                    Rel::rename(
                        Rel::load(ab.clone(), "r"),
                        &["b".to_string()],
                        &["c".to_string()],
                    )
                    .unwrap(),
                );
                black_box(node.eval(&mut vars, &Params::default()))
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_index_sort, bench_join);
criterion_main!(benches);
