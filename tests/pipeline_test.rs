//! End-to-end pipeline tests: raw SQL in, enumerated sub-queries out.

use joinenum_lib::query::analyze::query_analyze;
use joinenum_lib::query::enumerate::{Enumeration, subsets_enumerate};
use joinenum_lib::query::generate::SubqueryGenerator;

fn enumerate(sql: &str) -> Enumeration {
    let analyzed = query_analyze(sql).unwrap();
    subsets_enumerate(&analyzed.join_graph, &analyzed.aliases, 20)
}

fn run(sql: &str) -> Vec<(String, String)> {
    let analyzed = query_analyze(sql).unwrap();
    let enumeration = subsets_enumerate(&analyzed.join_graph, &analyzed.aliases, 20);
    let generator = SubqueryGenerator::new(&analyzed);
    enumeration
        .plans
        .iter()
        .map(|plan| (plan.key(), generator.subquery_generate(plan)))
        .collect()
}

fn sql_for<'r>(rows: &'r [(String, String)], key: &str) -> &'r str {
    &rows
        .iter()
        .find(|(k, _)| k == key)
        .unwrap_or_else(|| panic!("no subplan with key {key}"))
        .1
}

#[test]
fn test_two_relation_query_with_selection() {
    let rows = run("SELECT * FROM A, B WHERE A.x = B.y AND A.z > 10;");

    let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, ["A", "B", "A|||B"]);
    assert_eq!(
        sql_for(&rows, "A|||B"),
        "SELECT * FROM A\nJOIN B ON A.x = B.y\nWHERE A.z > 10;"
    );
}

#[test]
fn test_matching_column_chain_becomes_clique() {
    let rows = run("SELECT * FROM C, D, E WHERE C.a = D.b AND D.b = E.c;");

    // Closure on the shared column D.b yields C.a = E.c, so all seven
    // non-empty subsets are connected.
    assert_eq!(rows.len(), 7);
    assert_eq!(
        sql_for(&rows, "C|||E"),
        "SELECT * FROM C\nJOIN E ON C.a = E.c;"
    );
}

#[test]
fn test_mismatched_column_chain_stays_a_path() {
    let enumeration = enumerate("SELECT * FROM A, B, C WHERE A.x = B.y AND B.z = C.w;");

    let keys: Vec<String> = enumeration.plans.iter().map(|p| p.key()).collect();
    assert_eq!(keys, ["A", "B", "C", "A|||B", "B|||C", "A|||B|||C"]);

    // {A,C} is not enumerable, so the full set decomposes as {A} x {B,C}
    let full = enumeration.plans.last().unwrap();
    assert_eq!(full.left.len(), 1);
    assert_eq!(full.left[0], "A");
    assert_eq!(full.right.len(), 2);
}

#[test]
fn test_constant_equality_derives_join() {
    let rows = run("SELECT * FROM X, Y WHERE X.k = 'p' AND Y.k = 'p';");

    assert_eq!(rows.len(), 3);
    assert_eq!(
        sql_for(&rows, "X|||Y"),
        "SELECT * FROM X\nJOIN Y ON X.k = Y.k\nWHERE X.k = 'p'\n  AND Y.k = 'p';"
    );
}

#[test]
fn test_query_without_where() {
    let rows = run("SELECT * FROM A");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].1, "SELECT * FROM A;");
}

#[test]
fn test_self_join_aliases_are_distinct_relations() {
    let rows = run("SELECT * FROM title t1, title t2 WHERE t1.id = t2.id;");

    assert_eq!(rows.len(), 3);
    assert_eq!(sql_for(&rows, "t1"), "SELECT * FROM title t1;");
    assert_eq!(
        sql_for(&rows, "t1|||t2"),
        "SELECT * FROM title t1\nJOIN title t2 ON t1.id = t2.id;"
    );
}

#[test]
fn test_disconnected_universe_emits_only_singletons() {
    let enumeration = enumerate("SELECT * FROM a, b, c WHERE a.x = 1 AND b.y = 2;");
    assert_eq!(enumeration.plans.len(), 3);
    assert!(enumeration.plans.iter().all(|p| p.is_singleton()));
}

#[test]
fn test_clique_emits_all_nonempty_subsets() {
    let enumeration = enumerate(
        "SELECT * FROM a, b, c, d WHERE a.k = b.k AND b.k = c.k AND c.k = d.k;",
    );
    // 2^4 - 1
    assert_eq!(enumeration.plans.len(), 15);
}

#[test]
fn test_explicit_join_style() {
    let rows = run(
        "SELECT * FROM title t JOIN movie_info mi ON t.id = mi.movie_id WHERE t.year > 2000;",
    );

    assert_eq!(rows.len(), 3);
    assert_eq!(
        sql_for(&rows, "mi|||t"),
        "SELECT * FROM movie_info mi\nJOIN title t ON mi.movie_id = t.id\nWHERE t.year > 2000;"
    );
}

#[test]
fn test_max_level_omits_larger_subsets_silently() {
    let analyzed =
        query_analyze("SELECT * FROM a, b, c WHERE a.k = b.k AND b.k = c.k;").unwrap();
    let enumeration = subsets_enumerate(&analyzed.join_graph, &analyzed.aliases, 2);

    assert!(enumeration.plans.iter().all(|p| p.level <= 2));
    assert!(enumeration.diagnostics.is_empty());
}

#[test]
fn test_subset_keys_are_unique() {
    let enumeration = enumerate(
        "SELECT * FROM a, b, c, d WHERE a.k = b.k AND b.k = c.k AND c.k = d.k AND a.n > 1;",
    );
    let mut keys: Vec<String> = enumeration.plans.iter().map(|p| p.key()).collect();
    let total = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), total);
}

#[test]
fn test_every_applicable_predicate_appears_exactly_once() {
    let rows = run(
        "SELECT * FROM a, b, c WHERE a.x = b.x AND b.y = c.y AND a.z = c.z AND a.n > 1 AND (a.u = 1 OR c.v = 2);",
    );

    let sql = sql_for(&rows, "a|||b|||c");
    for predicate in [
        "a.x = b.x",
        "b.y = c.y",
        "a.z = c.z",
        "a.n > 1",
        "(a.u = 1 OR c.v = 2)",
    ] {
        assert_eq!(
            sql.matches(predicate).count(),
            1,
            "predicate {predicate} should appear exactly once in:\n{sql}"
        );
    }
}

#[test]
fn test_identical_input_produces_identical_output() {
    let sql = "SELECT * FROM a, b, c WHERE a.x = b.x AND b.y = c.y AND a.n > 3;";
    assert_eq!(run(sql), run(sql));
}

#[test]
fn test_malformed_input_is_rejected_not_panicked() {
    assert!(query_analyze("SELECT 1").is_err());
    assert!(query_analyze("").is_err());
}

#[test]
fn test_between_and_quoted_literals_survive_the_pipeline() {
    let rows = run(
        "SELECT * FROM a, b WHERE a.x = b.y AND a.n BETWEEN 1 AND 10 AND b.name = 'x AND y';",
    );

    assert_eq!(
        sql_for(&rows, "a|||b"),
        "SELECT * FROM a\nJOIN b ON a.x = b.y\nWHERE a.n BETWEEN 1 AND 10\n  AND b.name = 'x AND y';"
    );
}
