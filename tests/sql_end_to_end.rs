//! End-to-end SQL tests through the session API: DDL, DML, scans, joins,
//! aggregation, sorting, limits, subqueries and error surfaces.

use opaldb::config::EngineOptions;
use opaldb::value::Value;
use opaldb::{Engine, EngineError, Output};
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

#[test]
fn create_insert_select_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();

    let out = session
        .submit("CREATE TABLE users (id INT PRIMARY KEY, name VARCHAR, age INT)")
        .unwrap();
    assert_eq!(status(&out), "Table 'users' created.");

    let out = session
        .submit("INSERT INTO users VALUES (1, 'Alice', 30), (2, 'Bob', 25)")
        .unwrap();
    assert_eq!(status(&out), "2 rows inserted.");

    let out = session.submit("SELECT * FROM users").unwrap();
    let got = rows(&out);
    assert_eq!(got.len(), 2);
    assert_eq!(got[0], vec![Value::Int(1), Value::Str("Alice".into()), Value::Int(30)]);

    let out = session.submit("SELECT name FROM users WHERE age > 27").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Str("Alice".into())]]);
}

#[test]
fn insert_then_select_same_pk_in_one_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE t (id INT PRIMARY KEY, name VARCHAR)").unwrap();

    session.submit("BEGIN").unwrap();
    session.submit("INSERT INTO t VALUES (42, 'inside')").unwrap();
    let out = session.submit("SELECT * FROM t WHERE id = 42").unwrap();
    assert_eq!(rows(&out).len(), 1);
    session.submit("COMMIT").unwrap();
}

#[test]
fn aggregation_with_group_by() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE t (id INT PRIMARY KEY, name VARCHAR)").unwrap();
    session
        .submit(
            "INSERT INTO t VALUES (1, 'Alice'), (2, 'Bob'), (3, 'CQG'), (4, 'Bob'), (5, 'Alice')",
        )
        .unwrap();

    let out = session.submit("SELECT name, COUNT(*) FROM t GROUP BY name").unwrap();
    let mut got: Vec<(String, i64)> = rows(&out)
        .into_iter()
        .map(|r| match (&r[0], &r[1]) {
            (Value::Str(n), Value::Int(c)) => (n.clone(), *c),
            other => panic!("unexpected row {:?}", other),
        })
        .collect();
    got.sort();
    assert_eq!(
        got,
        vec![("Alice".to_string(), 2), ("Bob".to_string(), 2), ("CQG".to_string(), 1)]
    );
}

#[test]
fn count_star_matches_row_count() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE t (id INT PRIMARY KEY, v INT)").unwrap();
    for i in 0..57 {
        session.submit(&format!("INSERT INTO t VALUES ({}, {})", i, i % 7)).unwrap();
    }
    let out = session.submit("SELECT COUNT(*) FROM t").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(57)]]);
}

#[test]
fn aggregate_functions_and_having() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE sales (id INT PRIMARY KEY, region VARCHAR, amount INT)").unwrap();
    session
        .submit(
            "INSERT INTO sales VALUES (1, 'east', 10), (2, 'east', 30), \
             (3, 'west', 5), (4, 'west', 7), (5, 'north', 100)",
        )
        .unwrap();

    let out = session
        .submit(
            "SELECT region, SUM(amount), AVG(amount), MIN(amount), MAX(amount) \
             FROM sales GROUP BY region HAVING COUNT(*) > 1 ORDER BY region",
        )
        .unwrap();
    let got = rows(&out);
    assert_eq!(got.len(), 2);
    assert_eq!(got[0][0], Value::Str("east".into()));
    assert_eq!(got[0][1], Value::Float(40.0));
    assert_eq!(got[0][2], Value::Float(20.0));
    assert_eq!(got[0][3], Value::Int(10));
    assert_eq!(got[0][4], Value::Int(30));
    assert_eq!(got[1][0], Value::Str("west".into()));
}

#[test]
fn sort_is_stable_within_equal_keys() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE t (id INT PRIMARY KEY, name VARCHAR)").unwrap();
    session
        .submit("INSERT INTO t VALUES (1, 'Bob'), (2, 'Alice'), (3, 'Bob')")
        .unwrap();
    let out = session.submit("SELECT * FROM t ORDER BY name ASC").unwrap();
    let got = rows(&out);
    assert_eq!(
        got,
        vec![
            vec![Value::Int(2), Value::Str("Alice".into())],
            vec![Value::Int(1), Value::Str("Bob".into())],
            vec![Value::Int(3), Value::Str("Bob".into())],
        ]
    );
}

#[test]
fn order_by_desc_with_limit_offset() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE t (id INT PRIMARY KEY, v INT)").unwrap();
    for i in 1..=10 {
        session.submit(&format!("INSERT INTO t VALUES ({}, {})", i, i * 10)).unwrap();
    }
    let out = session.submit("SELECT id FROM t ORDER BY v DESC LIMIT 3 OFFSET 2").unwrap();
    assert_eq!(
        rows(&out),
        vec![vec![Value::Int(8)], vec![Value::Int(7)], vec![Value::Int(6)]]
    );
}

#[test]
fn joins_inner_and_left() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE users (id INT PRIMARY KEY, name VARCHAR)").unwrap();
    session.submit("CREATE TABLE orders (oid INT PRIMARY KEY, uid INT, total INT)").unwrap();
    session.submit("INSERT INTO users VALUES (1, 'Alice'), (2, 'Bob'), (3, 'Carol')").unwrap();
    session
        .submit("INSERT INTO orders VALUES (10, 1, 100), (11, 1, 50), (12, 2, 70)")
        .unwrap();

    let out = session
        .submit(
            "SELECT users.name, orders.total FROM users \
             JOIN orders ON users.id = orders.uid ORDER BY orders.total DESC",
        )
        .unwrap();
    let got = rows(&out);
    assert_eq!(got.len(), 3);
    assert_eq!(got[0], vec![Value::Str("Alice".into()), Value::Int(100)]);
    assert_eq!(got[1], vec![Value::Str("Bob".into()), Value::Int(70)]);

    let out = session
        .submit(
            "SELECT users.name, orders.total FROM users \
             LEFT JOIN orders ON users.id = orders.uid WHERE users.id = 3",
        )
        .unwrap();
    let got = rows(&out);
    assert_eq!(got, vec![vec![Value::Str("Carol".into()), Value::Null]]);
}

#[test]
fn cartesian_product_from_comma_tables() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE a (x INT PRIMARY KEY)").unwrap();
    session.submit("CREATE TABLE b (y INT PRIMARY KEY)").unwrap();
    session.submit("INSERT INTO a VALUES (1), (2)").unwrap();
    session.submit("INSERT INTO b VALUES (10), (20), (30)").unwrap();
    let out = session.submit("SELECT a.x, b.y FROM a, b").unwrap();
    assert_eq!(rows(&out).len(), 6);
}

#[test]
fn arithmetic_update_is_not_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE t (id INT PRIMARY KEY, x INT, y INT)").unwrap();
    session.submit("INSERT INTO t VALUES (1, 100, 5), (2, 200, 5), (3, 300, 9)").unwrap();

    for _ in 0..3 {
        let out = session.submit("UPDATE t SET x = x - 1 WHERE y = 5").unwrap();
        assert_eq!(status(&out), "2 rows updated.");
    }
    let out = session.submit("SELECT x FROM t ORDER BY id").unwrap();
    assert_eq!(
        rows(&out),
        vec![vec![Value::Int(97)], vec![Value::Int(197)], vec![Value::Int(300)]]
    );
}

#[test]
fn delete_with_and_without_filter() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE t (id INT PRIMARY KEY, v INT)").unwrap();
    for i in 0..10 {
        session.submit(&format!("INSERT INTO t VALUES ({}, {})", i, i)).unwrap();
    }
    let out = session.submit("DELETE FROM t WHERE v >= 5").unwrap();
    assert_eq!(status(&out), "5 rows deleted.");
    let out = session.submit("SELECT COUNT(*) FROM t").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(5)]]);
    let out = session.submit("DELETE FROM t").unwrap();
    assert_eq!(status(&out), "5 rows deleted.");
    let out = session.submit("SELECT COUNT(*) FROM t").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(0)]]);
}

#[test]
fn primary_key_violation_is_constraint_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE t (id INT PRIMARY KEY, v INT)").unwrap();
    session.submit("INSERT INTO t VALUES (1, 1)").unwrap();
    let err = session.submit("INSERT INTO t VALUES (1, 2)").unwrap_err();
    assert!(matches!(err, EngineError::Constraint(_)), "got {:?}", err);
    // The failed statement left nothing behind.
    let out = session.submit("SELECT COUNT(*) FROM t").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(1)]]);
}

#[test]
fn semantic_errors_abort_statement_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE t (id INT PRIMARY KEY, v INT)").unwrap();

    let err = session.submit("SELECT missing FROM t").unwrap_err();
    assert!(matches!(err, EngineError::Semantic { .. }));
    let err = session.submit("SELECT * FROM nope").unwrap_err();
    assert!(matches!(err, EngineError::Semantic { .. }));
    let err = session.submit("INSERT INTO t VALUES (1)").unwrap_err();
    assert!(matches!(err, EngineError::Semantic { .. }));
    // The session keeps working.
    session.submit("INSERT INTO t VALUES (1, 1)").unwrap();
}

#[test]
fn subqueries_scalar_in_and_exists() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE t (id INT PRIMARY KEY, v INT)").unwrap();
    session.submit("CREATE TABLE s (id INT PRIMARY KEY)").unwrap();
    session.submit("INSERT INTO t VALUES (1, 10), (2, 20), (3, 30)").unwrap();
    session.submit("INSERT INTO s VALUES (1), (3)").unwrap();

    let out = session.submit("SELECT id FROM t WHERE id IN (SELECT id FROM s)").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(1)], vec![Value::Int(3)]]);

    let out = session
        .submit("SELECT id FROM t WHERE v = (SELECT MAX(v) FROM t)")
        .unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(3)]]);

    let out = session
        .submit("SELECT COUNT(*) FROM t WHERE EXISTS (SELECT id FROM s WHERE id = 99)")
        .unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(0)]]);

    let out = session
        .submit("SELECT id FROM t WHERE id NOT IN (SELECT id FROM s)")
        .unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(2)]]);
}

#[test]
fn between_and_in_list_filters() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE t (id INT PRIMARY KEY, v INT)").unwrap();
    for i in 1..=10 {
        session.submit(&format!("INSERT INTO t VALUES ({}, {})", i, i)).unwrap();
    }
    let out = session.submit("SELECT COUNT(*) FROM t WHERE v BETWEEN 3 AND 7").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(5)]]);
    let out = session.submit("SELECT COUNT(*) FROM t WHERE v IN (2, 4, 6, 99)").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(3)]]);
}

#[test]
fn batches_never_exceed_batch_size() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = EngineOptions::with_data_dir(dir.path());
    options.batch_size = 16;
    let engine = Engine::open(options).unwrap();
    let mut session = engine.session();
    session.submit("CREATE TABLE t (id INT PRIMARY KEY)").unwrap();
    for i in 0..100 {
        session.submit(&format!("INSERT INTO t VALUES ({})", i)).unwrap();
    }
    let out = session.submit("SELECT * FROM t").unwrap();
    match &out {
        Output::Rows { batches, .. } => {
            assert!(batches.iter().all(|b| b.len() <= 16));
            assert_eq!(batches.iter().map(|b| b.len()).sum::<usize>(), 100);
        }
        _ => panic!("expected rows"),
    }
}

#[test]
fn show_statements_reflect_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE t (id INT PRIMARY KEY, name VARCHAR NOT NULL)").unwrap();
    session.submit("CREATE INDEX idx_name ON t (name)").unwrap();

    let out = session.submit("SHOW TABLES").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Str("t".into())]]);

    let out = session.submit("SHOW COLUMNS FROM t").unwrap();
    let cols = rows(&out);
    assert_eq!(cols.len(), 2);
    assert_eq!(cols[0][0], Value::Str("id".into()));
    assert_eq!(cols[0][3], Value::Str("PRI".into()));

    let out = session.submit("SHOW INDEX FROM t").unwrap();
    let idx = rows(&out);
    // The implicit PK index plus the explicit secondary index.
    assert_eq!(idx.len(), 2);

    let out = session.submit("SHOW DATABASES").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Str("default".into())]]);
}

#[test]
fn databases_namespace_tables() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE DATABASE analytics").unwrap();
    session.submit("USE analytics").unwrap();
    assert_eq!(session.current_database(), "analytics");
    session.submit("CREATE TABLE events (id INT PRIMARY KEY)").unwrap();
    session.submit("INSERT INTO events VALUES (1)").unwrap();

    session.submit("USE default").unwrap();
    let err = session.submit("SELECT * FROM events").unwrap_err();
    assert!(matches!(err, EngineError::Semantic { .. }));

    session.submit("USE analytics").unwrap();
    let out = session.submit("SELECT COUNT(*) FROM events").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(1)]]);
}

#[test]
fn views_and_triggers_are_catalog_objects() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE t (id INT PRIMARY KEY, v INT)").unwrap();

    session.submit("CREATE VIEW big AS SELECT id FROM t WHERE v > 10").unwrap();
    let out = session.submit("SHOW VIEWS").unwrap();
    let views = rows(&out);
    assert_eq!(views.len(), 1);
    assert_eq!(views[0][0], Value::Str("big".into()));

    session.submit("ALTER VIEW big AS SELECT id FROM t WHERE v > 100").unwrap();
    let out = session.submit("SHOW VIEWS").unwrap();
    assert!(rows(&out)[0][1].to_string().contains("100"));

    session
        .submit("CREATE TRIGGER audit AFTER INSERT ON t FOR EACH ROW INSERT INTO t VALUES (0, 0)")
        .unwrap();
    let out = session.submit("SHOW TRIGGERS").unwrap();
    let triggers = rows(&out);
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0][0], Value::Str("audit".into()));
    assert_eq!(triggers[0][2], Value::Str("AFTER".into()));

    session.submit("DROP TRIGGER audit").unwrap();
    session.submit("DROP VIEW big").unwrap();
    let out = session.submit("SHOW VIEWS").unwrap();
    assert_eq!(out.row_count(), 0);
}

#[test]
fn default_values_fill_missing_insert_columns() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session
        .submit("CREATE TABLE t (id INT PRIMARY KEY, state VARCHAR DEFAULT 'new', n INT)")
        .unwrap();
    session.submit("INSERT INTO t (id) VALUES (1)").unwrap();
    let out = session.submit("SELECT state, n FROM t").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Str("new".into()), Value::Null]]);
}

#[test]
fn select_without_from() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    let out = session.submit("SELECT 1 + 2 AS three").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(3)]]);
}

#[test]
fn drop_table_if_exists() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    let out = session.submit("DROP TABLE IF EXISTS ghost").unwrap();
    assert!(status(&out).contains("skipped"));
    let err = session.submit("DROP TABLE ghost").unwrap_err();
    assert!(matches!(err, EngineError::Semantic { .. }));
}
