//! Lock manager: shared/exclusive locks at row granularity, table locks for
//! DDL and scans, wait-for-graph deadlock detection.
//!
//! Waits block on a condvar with a timeout. On each wait the manager adds
//! wait-for edges and probes for a cycle; a cycle aborts the youngest
//! participating transaction (the one with the highest id), either by
//! failing its own request or by flagging it as a victim so its next wakeup
//! fails with DEADLOCK.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::storage::RowId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockTarget {
    /// Whole-catalog lock held by DDL.
    Catalog,
    Table(String),
    Row(String, RowId),
}

impl std::fmt::Display for LockTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockTarget::Catalog => write!(f, "catalog"),
            LockTarget::Table(t) => write!(f, "table({})", t),
            LockTarget::Row(t, rid) => write!(f, "row({}, {}:{})", t, rid.page_id, rid.slot),
        }
    }
}

#[derive(Default)]
struct LockState {
    /// Holder transaction ids with their granted mode.
    holders: HashMap<u64, LockMode>,
}

impl LockState {
    fn compatible(&self, txn_id: u64, mode: LockMode) -> bool {
        self.holders.iter().all(|(holder, held)| {
            *holder == txn_id
                || (mode == LockMode::Shared && *held == LockMode::Shared)
        })
    }

    fn conflicting_holders(&self, txn_id: u64, mode: LockMode) -> Vec<u64> {
        self.holders
            .iter()
            .filter(|(holder, held)| {
                **holder != txn_id
                    && !(mode == LockMode::Shared && **held == LockMode::Shared)
            })
            .map(|(h, _)| *h)
            .collect()
    }
}

#[derive(Default)]
struct LockTables {
    locks: HashMap<LockTarget, LockState>,
    /// txn -> set of txns it waits for.
    waits_for: HashMap<u64, HashSet<u64>>,
    /// Transactions picked as deadlock victims, pending wakeup.
    victims: HashSet<u64>,
    /// Locks held per transaction, for release_all.
    held: HashMap<u64, Vec<LockTarget>>,
}

impl LockTables {
    /// DFS cycle probe from `start`. Returns the cycle members if present.
    fn find_cycle(&self, start: u64) -> Option<Vec<u64>> {
        let mut path = Vec::new();
        let mut visited = HashSet::new();
        self.dfs(start, start, &mut path, &mut visited)
    }

    fn dfs(
        &self,
        current: u64,
        start: u64,
        path: &mut Vec<u64>,
        visited: &mut HashSet<u64>,
    ) -> Option<Vec<u64>> {
        if !visited.insert(current) {
            return None;
        }
        path.push(current);
        if let Some(nexts) = self.waits_for.get(&current) {
            for &next in nexts {
                if next == start {
                    return Some(path.clone());
                }
                if let Some(cycle) = self.dfs(next, start, path, visited) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        None
    }
}

pub struct LockManager {
    tables: Mutex<LockTables>,
    cv: Condvar,
    timeout: Duration,
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        Self { tables: Mutex::new(LockTables::default()), cv: Condvar::new(), timeout }
    }

    pub fn lock_shared(&self, txn_id: u64, target: LockTarget) -> EngineResult<()> {
        self.lock(txn_id, target, LockMode::Shared)
    }

    pub fn lock_exclusive(&self, txn_id: u64, target: LockTarget) -> EngineResult<()> {
        self.lock(txn_id, target, LockMode::Exclusive)
    }

    fn lock(&self, txn_id: u64, target: LockTarget, mode: LockMode) -> EngineResult<()> {
        let mut tables = self.tables.lock();
        loop {
            if tables.victims.remove(&txn_id) {
                tables.waits_for.remove(&txn_id);
                self.cv.notify_all();
                return Err(EngineError::Deadlock(txn_id));
            }
            let state = tables.locks.entry(target.clone()).or_default();
            if state.compatible(txn_id, mode) {
                // Grant (upgrade replaces the held mode).
                let prior = state.holders.insert(txn_id, mode);
                if prior.is_none() {
                    tables.held.entry(txn_id).or_default().push(target.clone());
                }
                tables.waits_for.remove(&txn_id);
                return Ok(());
            }

            // Record wait edges and probe for a deadlock.
            let blockers = state.conflicting_holders(txn_id, mode);
            tables.waits_for.insert(txn_id, blockers.iter().copied().collect());
            if let Some(cycle) = tables.find_cycle(txn_id) {
                let victim = cycle.iter().copied().max().expect("cycle non-empty");
                debug!(
                    target: "opaldb::lock",
                    "deadlock cycle {:?}, victim txn {}", cycle, victim
                );
                if victim == txn_id {
                    tables.waits_for.remove(&txn_id);
                    self.cv.notify_all();
                    return Err(EngineError::Deadlock(txn_id));
                }
                tables.victims.insert(victim);
                self.cv.notify_all();
            }

            let timed_out = self.cv.wait_for(&mut tables, self.timeout).timed_out();
            if timed_out && !tables.victims.contains(&txn_id) {
                tables.waits_for.remove(&txn_id);
                return Err(EngineError::LockTimeout(target.to_string()));
            }
        }
    }

    /// Drop one lock early (short S locks during READ COMMITTED reads).
    pub fn unlock(&self, txn_id: u64, target: &LockTarget) {
        let mut tables = self.tables.lock();
        if let Some(state) = tables.locks.get_mut(target) {
            state.holders.remove(&txn_id);
            if state.holders.is_empty() {
                tables.locks.remove(target);
            }
        }
        if let Some(held) = tables.held.get_mut(&txn_id) {
            held.retain(|t| t != target);
        }
        self.cv.notify_all();
    }

    /// Release every lock held by the transaction (commit/abort).
    pub fn release_all(&self, txn_id: u64) {
        let mut tables = self.tables.lock();
        let held = tables.held.remove(&txn_id).unwrap_or_default();
        for target in held {
            if let Some(state) = tables.locks.get_mut(&target) {
                state.holders.remove(&txn_id);
                if state.holders.is_empty() {
                    tables.locks.remove(&target);
                }
            }
        }
        tables.waits_for.remove(&txn_id);
        tables.victims.remove(&txn_id);
        self.cv.notify_all();
    }

    /// Locks currently held by a transaction, for diagnostics.
    pub fn held_locks(&self, txn_id: u64) -> Vec<LockTarget> {
        self.tables.lock().held.get(&txn_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn row(t: &str, page: u64, slot: u32) -> LockTarget {
        LockTarget::Row(t.into(), RowId { page_id: page, slot })
    }

    #[test]
    fn shared_locks_coexist() {
        let mgr = LockManager::new(Duration::from_millis(200));
        mgr.lock_shared(1, row("t", 0, 0)).unwrap();
        mgr.lock_shared(2, row("t", 0, 0)).unwrap();
        assert_eq!(mgr.held_locks(1).len(), 1);
        mgr.release_all(1);
        mgr.release_all(2);
    }

    #[test]
    fn exclusive_blocks_until_release() {
        let mgr = Arc::new(LockManager::new(Duration::from_secs(2)));
        mgr.lock_exclusive(1, row("t", 0, 0)).unwrap();
        let m2 = Arc::clone(&mgr);
        let handle = std::thread::spawn(move || m2.lock_exclusive(2, row("t", 0, 0)));
        std::thread::sleep(Duration::from_millis(50));
        mgr.release_all(1);
        handle.join().unwrap().unwrap();
        mgr.release_all(2);
    }

    #[test]
    fn same_txn_reacquires_and_upgrades() {
        let mgr = LockManager::new(Duration::from_millis(200));
        mgr.lock_shared(1, row("t", 0, 1)).unwrap();
        mgr.lock_exclusive(1, row("t", 0, 1)).unwrap();
        assert_eq!(mgr.held_locks(1).len(), 1);
        mgr.release_all(1);
    }

    #[test]
    fn lock_timeout_fires() {
        let mgr = LockManager::new(Duration::from_millis(100));
        mgr.lock_exclusive(1, row("t", 0, 2)).unwrap();
        let err = mgr.lock_exclusive(2, row("t", 0, 2)).unwrap_err();
        assert!(matches!(err, EngineError::LockTimeout(_)));
        mgr.release_all(1);
        mgr.release_all(2);
    }

    #[test]
    fn deadlock_aborts_exactly_one_youngest() {
        let mgr = Arc::new(LockManager::new(Duration::from_secs(5)));
        mgr.lock_exclusive(1, row("t", 0, 10)).unwrap();
        mgr.lock_exclusive(2, row("t", 0, 20)).unwrap();

        let m1 = Arc::clone(&mgr);
        let h1 = std::thread::spawn(move || {
            let r = m1.lock_exclusive(1, row("t", 0, 20));
            if r.is_err() {
                m1.release_all(1);
            }
            r
        });
        std::thread::sleep(Duration::from_millis(50));
        let m2 = Arc::clone(&mgr);
        let h2 = std::thread::spawn(move || {
            let r = m2.lock_exclusive(2, row("t", 0, 10));
            if r.is_err() {
                m2.release_all(2);
            }
            r
        });

        let r1 = h1.join().unwrap();
        let r2 = h2.join().unwrap();
        // Exactly one aborted with DEADLOCK, and it is the youngest (txn 2).
        match (&r1, &r2) {
            (Ok(()), Err(EngineError::Deadlock(victim))) => assert_eq!(*victim, 2),
            other => panic!("expected txn 2 as deadlock victim, got {:?}", other),
        }
        mgr.release_all(1);
    }
}
