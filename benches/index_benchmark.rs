use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use rbac_engine::rule::{Access, Rule};
use rbac_engine::rule_index::RuleIndex;

fn rules_for(n: usize) -> Vec<Rule> {
    (0..n)
        .map(|i| {
            Rule::new(
                (i % 64) as u64,
                format!("smt/{}/{}/{}", i % 8, i % 16, i),
                "read",
                Access::Allow,
            )
        })
        .collect()
}

fn bench_index_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_build");
    for size in [100, 1_000, 10_000, 100_000] {
        let rules = rules_for(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &rules, |b, rules| {
            b.iter(|| black_box(RuleIndex::build(rules.clone())));
        });
    }
    group.finish();
}

fn bench_index_get(c: &mut Criterion) {
    let ix = RuleIndex::build(rules_for(10_000));
    c.bench_function("index_get_hit", |b| {
        b.iter(|| black_box(ix.get(5, "read", "smt/5/5/5")));
    });
}

criterion_group!(benches, bench_index_build, bench_index_get);
criterion_main!(benches);
