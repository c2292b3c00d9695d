//! Session-level behavior: cursors, explicit transaction control, and the
//! must-rollback state after runtime errors.

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
fn cursor_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = EngineOptions::with_data_dir(dir.path());
    options.batch_size = 4;
    let engine = Engine::open(options).unwrap();
    let mut session = engine.session();
    session.submit("CREATE TABLE t (id INT PRIMARY KEY)").unwrap();
    for i in 0..10 {
        session.submit(&format!("INSERT INTO t VALUES ({})", i)).unwrap();
    }

    let out = session.submit("DECLARE c1 CURSOR FOR SELECT id FROM t ORDER BY id").unwrap();
    assert_eq!(status(&out), "Cursor 'c1' declared.");

    // FETCH before OPEN is rejected.
    let err = session.submit("FETCH c1").unwrap_err();
    assert!(matches!(err, EngineError::Exec(_)));

    let out = session.submit("OPEN c1").unwrap();
    assert_eq!(status(&out), "Cursor 'c1' opened.");

    // Each fetch delegates one next(): one batch of at most batch_size.
    let mut seen = Vec::new();
    loop {
        let out = session.submit("FETCH c1").unwrap();
        let got = rows(&out);
        if got.is_empty() {
            break;
        }
        assert!(got.len() <= 4);
        seen.extend(got.into_iter().map(|r| r[0].clone()));
    }
    assert_eq!(seen.len(), 10);
    assert_eq!(seen[0], Value::Int(0));
    assert_eq!(seen[9], Value::Int(9));

    let out = session.submit("CLOSE c1").unwrap();
    assert_eq!(status(&out), "Cursor 'c1' closed.");
    let err = session.submit("FETCH c1").unwrap_err();
    assert!(matches!(err, EngineError::Exec(_)));
}

#[test]
fn duplicate_cursor_and_double_open_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE t (id INT PRIMARY KEY)").unwrap();
    session.submit("DECLARE c CURSOR FOR SELECT * FROM t").unwrap();
    let err = session.submit("DECLARE c CURSOR FOR SELECT * FROM t").unwrap_err();
    assert!(matches!(err, EngineError::Exec(_)));
    session.submit("OPEN c").unwrap();
    let err = session.submit("OPEN c").unwrap_err();
    assert!(matches!(err, EngineError::Exec(_)));
}

#[test]
fn tcl_errors_without_active_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    let err = session.submit("COMMIT").unwrap_err();
    assert!(matches!(err, EngineError::Txn(_)));
    let err = session.submit("ROLLBACK").unwrap_err();
    assert!(matches!(err, EngineError::Txn(_)));

    session.submit("BEGIN").unwrap();
    let err = session.submit("BEGIN").unwrap_err();
    assert!(matches!(err, EngineError::Txn(_)));
    session.submit("ROLLBACK").unwrap();
}

#[test]
fn runtime_error_in_explicit_txn_forces_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE t (id INT PRIMARY KEY)").unwrap();
    session.submit("INSERT INTO t VALUES (1)").unwrap();

    session.submit("BEGIN").unwrap();
    session.submit("INSERT INTO t VALUES (2)").unwrap();
    // Constraint violation aborts the transaction.
    let err = session.submit("INSERT INTO t VALUES (1)").unwrap_err();
    assert!(matches!(err, EngineError::Constraint(_)));

    // Only ROLLBACK is accepted now.
    let err = session.submit("SELECT * FROM t").unwrap_err();
    assert!(matches!(err, EngineError::Txn(_)));
    let err = session.submit("COMMIT").unwrap_err();
    assert!(matches!(err, EngineError::Txn(_)));
    session.submit("ROLLBACK").unwrap();

    // The aborted transaction's insert is gone; pre-existing data remains.
    let out = session.submit("SELECT id FROM t").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(1)]]);
}

#[test]
fn compile_errors_do_not_poison_explicit_txn() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    session.submit("CREATE TABLE t (id INT PRIMARY KEY)").unwrap();

    session.submit("BEGIN").unwrap();
    session.submit("INSERT INTO t VALUES (1)").unwrap();
    // A parse error and a semantic error abort only the statement.
    assert!(session.submit("SELEC oops").is_err());
    assert!(session.submit("SELECT nope FROM t").is_err());
    session.submit("INSERT INTO t VALUES (2)").unwrap();
    session.submit("COMMIT").unwrap();

    let out = session.submit("SELECT COUNT(*) FROM t").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(2)]]);
}

#[test]
fn multi_statement_submit_returns_last_output() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut session = engine.session();
    let out = session
        .submit("CREATE TABLE t (id INT PRIMARY KEY); INSERT INTO t VALUES (1); SELECT * FROM t;")
        .unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(1)]]);
}

#[test]
fn transaction_isolation_between_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut a = engine.session();
    a.submit("CREATE TABLE t (id INT PRIMARY KEY)").unwrap();

    a.submit("BEGIN").unwrap();
    a.submit("INSERT INTO t VALUES (1)").unwrap();
    a.submit("ROLLBACK").unwrap();

    let mut b = engine.session();
    let out = b.submit("SELECT COUNT(*) FROM t").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(0)]]);
}
