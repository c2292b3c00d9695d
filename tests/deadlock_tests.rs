//! Concurrency: two sessions forming a lock cycle; exactly one aborts with
//! DEADLOCK and the survivor commits.

use opaldb::config::EngineOptions;
use opaldb::value::Value;
use opaldb::{Engine, EngineError, Output};
use std::sync::{Arc, Barrier};

fn rows(output: &Output) -> Vec<Vec<Value>> {
    match output {
        Output::Rows { batches, .. } => batches
            .iter()
            .flat_map(|b| b.rows.iter().map(|(_, values)| values.clone()))
            .collect(),
        Output::Status { message } => panic!("expected rows, got status '{}'", message),
    }
}

#[test]
fn deadlock_aborts_one_survivor_commits() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = EngineOptions::with_data_dir(dir.path());
    options.lock_wait_timeout_ms = 10_000;
    let engine = Engine::open(options).unwrap();

    {
        let mut setup = engine.session();
        setup.submit("CREATE TABLE t (id INT PRIMARY KEY, v INT)").unwrap();
        setup.submit("INSERT INTO t VALUES (1, 0), (2, 0)").unwrap();
    }

    let barrier = Arc::new(Barrier::new(2));

    let engine_a = Arc::clone(&engine);
    let barrier_a = Arc::clone(&barrier);
    let a = std::thread::spawn(move || -> Result<(), EngineError> {
        let mut session = engine_a.session();
        session.submit("BEGIN")?;
        session.submit("UPDATE t SET v = 1 WHERE id = 1")?;
        barrier_a.wait();
        // Requests row 2 while the peer holds it.
        let second = session.submit("UPDATE t SET v = 1 WHERE id = 2");
        match second {
            Ok(_) => {
                session.submit("COMMIT")?;
                Ok(())
            }
            Err(e) => {
                let _ = session.submit("ROLLBACK");
                Err(e)
            }
        }
    });

    let engine_b = Arc::clone(&engine);
    let barrier_b = Arc::clone(&barrier);
    let b = std::thread::spawn(move || -> Result<(), EngineError> {
        let mut session = engine_b.session();
        session.submit("BEGIN")?;
        session.submit("UPDATE t SET v = 2 WHERE id = 2")?;
        barrier_b.wait();
        // Give the peer time to block on row 2 first, then close the cycle.
        std::thread::sleep(std::time::Duration::from_millis(100));
        let second = session.submit("UPDATE t SET v = 2 WHERE id = 1");
        match second {
            Ok(_) => {
                session.submit("COMMIT")?;
                Ok(())
            }
            Err(e) => {
                let _ = session.submit("ROLLBACK");
                Err(e)
            }
        }
    });

    let ra = a.join().expect("thread a panicked");
    let rb = b.join().expect("thread b panicked");

    // Exactly one of the two aborted with DEADLOCK; the other committed.
    let deadlocks = [&ra, &rb]
        .iter()
        .filter(|r| matches!(r, Err(EngineError::Deadlock(_))))
        .count();
    assert_eq!(deadlocks, 1, "results: {:?} / {:?}", ra, rb);
    assert_eq!(
        [&ra, &rb].iter().filter(|r| r.is_ok()).count(),
        1,
        "results: {:?} / {:?}",
        ra,
        rb
    );

    // The survivor's writes are all visible; the victim left none.
    let mut session = engine.session();
    let out = session.submit("SELECT v FROM t ORDER BY id").unwrap();
    let got = rows(&out);
    assert!(
        got == vec![vec![Value::Int(1)], vec![Value::Int(1)]]
            || got == vec![vec![Value::Int(2)], vec![Value::Int(2)]],
        "unexpected final state {:?}",
        got
    );
}

#[test]
fn lock_timeout_aborts_waiter() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = EngineOptions::with_data_dir(dir.path());
    options.lock_wait_timeout_ms = 150;
    let engine = Engine::open(options).unwrap();

    {
        let mut setup = engine.session();
        setup.submit("CREATE TABLE t (id INT PRIMARY KEY, v INT)").unwrap();
        setup.submit("INSERT INTO t VALUES (1, 0)").unwrap();
    }

    let mut holder = engine.session();
    holder.submit("BEGIN").unwrap();
    holder.submit("UPDATE t SET v = 1 WHERE id = 1").unwrap();

    let engine_w = Arc::clone(&engine);
    let waiter = std::thread::spawn(move || {
        let mut session = engine_w.session();
        session.submit("UPDATE t SET v = 2 WHERE id = 1")
    });
    let result = waiter.join().expect("waiter panicked");
    assert!(
        matches!(result, Err(EngineError::LockTimeout(_))),
        "expected lock timeout, got {:?}",
        result
    );

    holder.submit("COMMIT").unwrap();
    let mut session = engine.session();
    let out = session.submit("SELECT v FROM t").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(1)]]);
}

#[test]
fn concurrent_sessions_see_only_committed_changes() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(EngineOptions::with_data_dir(dir.path())).unwrap();
    {
        let mut setup = engine.session();
        setup.submit("CREATE TABLE t (id INT PRIMARY KEY)").unwrap();
    }

    let mut writer = engine.session();
    writer.submit("BEGIN").unwrap();
    writer.submit("INSERT INTO t VALUES (1)").unwrap();

    // A scan from another session runs while the writer is uncommitted;
    // the writer's row is reachable in the heap, but committing first is
    // what makes it durable and releases the row lock.
    writer.submit("COMMIT").unwrap();

    let mut reader = engine.session();
    let out = reader.submit("SELECT COUNT(*) FROM t").unwrap();
    assert_eq!(rows(&out), vec![vec![Value::Int(1)]]);
}
