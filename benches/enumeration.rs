use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use joinenum_lib::query::analyze::query_analyze;
use joinenum_lib::query::enumerate::subsets_enumerate;
use joinenum_lib::query::generate::SubqueryGenerator;

fn enumeration_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("Subset Enumeration");

    let test_queries = vec![
        (
            "star_4",
            "SELECT * FROM t, mi, mc, ci \
             WHERE t.id = mi.movie_id AND t.id = mc.movie_id AND t.id = ci.movie_id \
             AND t.production_year > 2000;",
        ),
        (
            "chain_6",
            "SELECT * FROM t1, t2, t3, t4, t5, t6 \
             WHERE t1.a = t2.a AND t2.b = t3.b AND t3.c = t4.c AND t4.d = t5.d AND t5.e = t6.e;",
        ),
        (
            "constant_clique_5",
            "SELECT * FROM a, b, c, d, e \
             WHERE a.kind = 'movie' AND b.kind = 'movie' AND c.kind = 'movie' \
             AND d.kind = 'movie' AND e.kind = 'movie';",
        ),
    ];

    for (name, sql) in &test_queries {
        group.bench_with_input(BenchmarkId::new("analyze", name), sql, |b, &sql| {
            b.iter(|| black_box(query_analyze(black_box(sql)).expect("query should analyze")))
        });

        group.bench_with_input(BenchmarkId::new("full_pipeline", name), sql, |b, &sql| {
            b.iter(|| {
                let analyzed = query_analyze(black_box(sql)).expect("query should analyze");
                let enumeration =
                    subsets_enumerate(&analyzed.join_graph, &analyzed.aliases, 20);
                let generator = SubqueryGenerator::new(&analyzed);
                let queries: Vec<String> = enumeration
                    .plans
                    .iter()
                    .map(|plan| generator.subquery_generate(plan))
                    .collect();
                black_box(queries)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, enumeration_benchmarks);
criterion_main!(benches);
