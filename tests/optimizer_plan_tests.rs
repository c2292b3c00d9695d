//! Optimizer behavior through the public surface: EXPLAIN plan shapes and
//! result equivalence between optimized and unoptimized execution.

use opaldb::config::EngineOptions;
use opaldb::value::Value;
use opaldb::{Engine, Output};
use std::collections::HashMap;
use std::sync::Arc;

fn open_engine(dir: &std::path::Path) -> Arc<Engine> {
    Engine::open(EngineOptions::with_data_dir(dir)).expect("engine open failed")
}

fn rows(output: &Output) -> Vec<Vec<Value>> {
    match output {
        Output::Rows { batches, .. } => batches
            .iter()
            .flat_map(|b| b.rows.iter().map(|(_, values)| values.clone()))
            .collect(),
        Output::Status { message } => panic!("expected rows, got status '{}'", message),
    }
}

fn status(output: &Output) -> &str {
    match output {
        Output::Status { message } => message,
        Output::Rows { .. } => panic!("expected status, got rows"),
    }
}

fn seed_indexed_table(session: &mut opaldb::Session) {
    session.submit("CREATE TABLE t (id INT PRIMARY KEY, name VARCHAR)").unwrap();
    session.submit("CREATE INDEX idx_name ON t (name)").unwrap();
    session
        .submit(
            "INSERT INTO t VALUES (1, 'Alice'), (2, 'Bob'), (3, 'Carol'), \
             (4, 'Bob'), (5, 'Dave'), (6, 'Erin')",
        )
        .unwrap();
}

#[test]
fn indexed_equality_uses_index_scan() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    seed_indexed_table(&mut session);

    let out = session.submit("EXPLAIN SELECT * FROM t WHERE name = 'Bob'").unwrap();
    let plan = status(&out).to_string();
    // Exactly one IndexScan rooted at the predicate, and no residual filter
    // on the same predicate.
    assert_eq!(plan.matches("IndexScan").count(), 1, "plan:\n{}", plan);
    assert!(plan.contains("idx_name"), "plan:\n{}", plan);
    assert!(!plan.contains("Filter"), "plan:\n{}", plan);

    // And the result is exactly the Bob rows.
    let out = session.submit("SELECT * FROM t WHERE name = 'Bob'").unwrap();
    let got = rows(&out);
    assert_eq!(got.len(), 2);
    assert!(got.iter().all(|r| r[1] == Value::Str("Bob".into())));
}

#[test]
fn unindexed_predicate_keeps_filter_over_scan() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE u (id INT PRIMARY KEY, v INT)").unwrap();
    session.submit("INSERT INTO u VALUES (1, 10), (2, 20)").unwrap();

    let out = session.submit("EXPLAIN SELECT * FROM u WHERE v > 15").unwrap();
    let plan = status(&out).to_string();
    assert!(plan.contains("Filter"), "plan:\n{}", plan);
    assert!(plan.contains("Scan(u)"), "plan:\n{}", plan);
    assert!(!plan.contains("IndexScan"), "plan:\n{}", plan);
}

#[test]
fn optimized_and_unoptimized_agree_as_multisets() {
    let run = |optimize: bool| -> Vec<Vec<Value>> {
        let dir = tempfile::tempdir().unwrap();
        let mut options = EngineOptions::with_data_dir(dir.path());
        options.enable_optimizer = optimize;
        let engine = Engine::open(options).unwrap();
        let mut session = engine.session();
        seed_indexed_table(&mut session);
        session.submit("CREATE TABLE o (oid INT PRIMARY KEY, uid INT)").unwrap();
        session
            .submit("INSERT INTO o VALUES (100, 1), (101, 2), (102, 2), (103, 5)")
            .unwrap();
        let out = session
            .submit(
                "SELECT t.name, o.oid FROM t JOIN o ON t.id = o.uid WHERE t.name = 'Bob'",
            )
            .unwrap();
        rows(&out)
    };

    let count_rows = |rows: Vec<Vec<Value>>| -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for r in rows {
            let key = r.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("|");
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    };

    let optimized = count_rows(run(true));
    let unoptimized = count_rows(run(false));
    assert_eq!(optimized, unoptimized);
    assert_eq!(optimized.values().sum::<usize>(), 2); // Bob id=2 joins oids 101,102
}

#[test]
fn explain_reports_costs_and_estimates() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    seed_indexed_table(&mut session);

    let out = session.submit("EXPLAIN SELECT name FROM t WHERE id > 2").unwrap();
    let plan = status(&out).to_string();
    assert!(plan.contains("Query Plan:"), "plan:\n{}", plan);
    assert!(plan.contains("cost="), "plan:\n{}", plan);
    assert!(plan.contains("rows="), "plan:\n{}", plan);
    assert!(plan.contains("Estimated cost:"), "plan:\n{}", plan);
}

#[test]
fn explain_analyze_profiles_operators() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    seed_indexed_table(&mut session);

    let out = session.submit("EXPLAIN ANALYZE SELECT * FROM t ORDER BY name").unwrap();
    let text = status(&out).to_string();
    assert!(text.contains("Execution Profile:"), "got:\n{}", text);
    assert!(text.contains("time="), "got:\n{}", text);
    assert!(text.contains("rows=6"), "got:\n{}", text);
    assert!(text.contains("Rows returned: 6"), "got:\n{}", text);
}

#[test]
fn constant_folding_shows_in_plan() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE c (id INT PRIMARY KEY, v INT)").unwrap();
    session.submit("INSERT INTO c VALUES (1, 5)").unwrap();

    let out = session.submit("EXPLAIN SELECT * FROM c WHERE v = 2 + 3").unwrap();
    let plan = status(&out).to_string();
    // 2 + 3 folded into 5 before execution.
    assert!(plan.contains("v = 5"), "plan:\n{}", plan);
    let out = session.submit("SELECT id FROM c WHERE v = 2 + 3").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(1)]]);
}

#[test]
fn join_order_survives_with_correct_results() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE big (id INT PRIMARY KEY)").unwrap();
    session.submit("CREATE TABLE small (id INT PRIMARY KEY)").unwrap();
    for i in 0..50 {
        session.submit(&format!("INSERT INTO big VALUES ({})", i)).unwrap();
    }
    session.submit("INSERT INTO small VALUES (7), (13)").unwrap();

    let out = session
        .submit("SELECT big.id FROM big JOIN small ON big.id = small.id ORDER BY big.id")
        .unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(7)], vec![Value::Int(13)]]);
}

#[test]
fn index_scan_streams_matches_beyond_batch_size() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = EngineOptions::with_data_dir(dir.path());
    options.batch_size = 8;
    let engine = Engine::open(options).unwrap();
    let mut session = engine.session();
    session.submit("CREATE TABLE t (id INT PRIMARY KEY, name VARCHAR)").unwrap();
    session.submit("CREATE INDEX idx_name ON t (name)").unwrap();
    for i in 0..30 {
        let name = if i % 3 == 0 { "Bob" } else { "other" };
        session.submit(&format!("INSERT INTO t VALUES ({}, '{}')", i, name)).unwrap();
    }

    // 10 duplicate-key matches against a batch size of 8: the index scan
    // must emit all of them across batches.
    let out = session.submit("EXPLAIN SELECT * FROM t WHERE name = 'Bob'").unwrap();
    assert!(status(&out).contains("IndexScan"));
    let out = session.submit("SELECT id FROM t WHERE name = 'Bob'").unwrap();
    match &out {
        Output::Rows { batches, .. } => assert!(batches.iter().all(|b| b.len() <= 8)),
        _ => panic!("expected rows"),
    }
    let mut ids: Vec<i64> = rows(&out)
        .into_iter()
        .map(|r| match r[0] {
            Value::Int(n) => n,
            ref other => panic!("unexpected {:?}", other),
        })
        .collect();
    ids.sort();
    assert_eq!(ids, (0..30).filter(|i| i % 3 == 0).collect::<Vec<i64>>());
}

#[test]
fn index_scan_key_respects_pk_index() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE p (id INT PRIMARY KEY, v INT)").unwrap();
    for i in 0..100 {
        session.submit(&format!("INSERT INTO p VALUES ({}, {})", i, i)).unwrap();
    }
    // Equality on the PK uses the implicit pk index.
    let out = session.submit("EXPLAIN SELECT * FROM p WHERE id = 42").unwrap();
    let plan = status(&out).to_string();
    assert!(plan.contains("IndexScan"), "plan:\n{}", plan);
    assert!(plan.contains("pk_p"), "plan:\n{}", plan);
    let out = session.submit("SELECT v FROM p WHERE id = 42").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(42)]]);
}
