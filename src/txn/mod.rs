//! Transactions: lifecycle, undo tracking, and the manager that couples
//! them to the WAL and lock manager.

pub mod lock;
pub mod recovery;
pub mod wal;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::catalog::{Catalog, IndexInfo, TableInfo, TriggerInfo, ViewInfo};
use crate::error::{EngineError, EngineResult};
use crate::storage::{RowId, StorageEngine};
use crate::value::Value;

use self::lock::LockManager;
use self::wal::{LogManager, LogPayload, LogRecordKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// Inverse operations recorded forward-order; abort applies them
/// newest-first through the storage engine's unlogged image hooks.
#[derive(Debug, Clone)]
pub enum UndoEntry {
    Insert { db: String, table: String, row_id: RowId },
    Update { db: String, table: String, row_id: RowId, before: Vec<Value> },
    Delete { db: String, table: String, row_id: RowId, before: Vec<Value> },
    CreateTable { db: String, table: String },
    DropTable { db: String, info: TableInfo, rows: Vec<(RowId, Vec<Value>)> },
    CreateIndex { db: String, table: String, index: String },
    DropIndex { db: String, table: String, info: IndexInfo },
    CreateView { db: String, name: String },
    DropView { db: String, info: ViewInfo },
    AlterView { db: String, before: ViewInfo },
    CreateTrigger { db: String, name: String },
    DropTrigger { db: String, info: TriggerInfo },
}

#[derive(Debug)]
struct TxnInner {
    state: TxnState,
    last_lsn: u64,
    undo: Vec<UndoEntry>,
}

/// A single transaction, shared by the session and every operator bound to
/// it. Interior state is mutex-guarded so storage can chain WAL records
/// while the executor drives the operators.
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    isolation: IsolationLevel,
    inner: Mutex<TxnInner>,
}

impl Transaction {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn state(&self) -> TxnState {
        self.inner.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == TxnState::Active
    }

    pub fn last_lsn(&self) -> u64 {
        self.inner.lock().last_lsn
    }

    /// Chain a new WAL record: returns the previous `last_lsn` and stores
    /// the new one.
    pub fn chain_lsn(&self, new_lsn: u64) -> u64 {
        let mut inner = self.inner.lock();
        let prev = inner.last_lsn;
        inner.last_lsn = new_lsn;
        prev
    }

    pub fn push_undo(&self, entry: UndoEntry) {
        self.inner.lock().undo.push(entry);
    }

    fn take_undo(&self) -> Vec<UndoEntry> {
        std::mem::take(&mut self.inner.lock().undo)
    }

    fn set_state(&self, state: TxnState) {
        self.inner.lock().state = state;
    }

    pub fn ensure_active(&self) -> EngineResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(EngineError::txn(format!(
                "transaction {} is no longer active",
                self.id
            )))
        }
    }
}

pub struct TransactionManager {
    next_id: AtomicU64,
    log: Arc<LogManager>,
    locks: Arc<LockManager>,
    active: Mutex<HashMap<u64, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(log: Arc<LogManager>, locks: Arc<LockManager>, first_id: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first_id.max(1)),
            log,
            locks,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Start a transaction: allocate a monotone id and write BEGIN.
    pub fn begin(&self, isolation: IsolationLevel) -> EngineResult<Arc<Transaction>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let lsn = self.log.append(id, 0, LogRecordKind::Begin, LogPayload::None)?;
        let txn = Arc::new(Transaction {
            id,
            isolation,
            inner: Mutex::new(TxnInner { state: TxnState::Active, last_lsn: lsn, undo: Vec::new() }),
        });
        self.active.lock().insert(id, Arc::clone(&txn));
        debug!(target: "opaldb::txn", "txn {} begin ({:?})", id, isolation);
        Ok(txn)
    }

    /// Commit: COMMIT record, flush through it, release locks. A flush
    /// failure is FATAL (the client was not yet told the commit happened,
    /// but the engine cannot trust the log tail).
    pub fn commit(&self, txn: &Arc<Transaction>) -> EngineResult<()> {
        txn.ensure_active()?;
        let prev = txn.last_lsn();
        let lsn = self.log.append(txn.id(), prev, LogRecordKind::Commit, LogPayload::None)?;
        txn.chain_lsn(lsn);
        self.log
            .flush_to_lsn(lsn)
            .map_err(|e| EngineError::fatal(format!("wal flush failed at commit: {}", e)))?;
        txn.set_state(TxnState::Committed);
        self.locks.release_all(txn.id());
        self.active.lock().remove(&txn.id());
        debug!(target: "opaldb::txn", "txn {} committed at lsn {}", txn.id(), lsn);
        Ok(())
    }

    /// Abort: apply the undo list newest-first through the storage image
    /// hooks, write ABORT, release locks.
    pub fn abort(
        &self,
        txn: &Arc<Transaction>,
        storage: &dyn StorageEngine,
        catalog: &Catalog,
    ) -> EngineResult<()> {
        if txn.state() != TxnState::Active {
            // Aborting twice is a no-op; the session may retry on errors.
            return Ok(());
        }
        let mut undo = txn.take_undo();
        undo.reverse();
        for entry in undo {
            apply_undo(entry, storage, catalog)?;
        }
        let prev = txn.last_lsn();
        let lsn = self.log.append(txn.id(), prev, LogRecordKind::Abort, LogPayload::None)?;
        txn.chain_lsn(lsn);
        txn.set_state(TxnState::Aborted);
        self.locks.release_all(txn.id());
        self.active.lock().remove(&txn.id());
        debug!(target: "opaldb::txn", "txn {} aborted", txn.id());
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

fn apply_undo(
    entry: UndoEntry,
    storage: &dyn StorageEngine,
    catalog: &Catalog,
) -> EngineResult<()> {
    match entry {
        UndoEntry::Insert { db, table, row_id } => {
            storage.apply_delete_image(&db, &table, row_id)?;
            catalog.stats_after_dml(&db, &table, 0, 1);
        }
        UndoEntry::Update { db, table, row_id, before } => {
            storage.apply_update_image(&db, &table, row_id, before)?;
        }
        UndoEntry::Delete { db, table, row_id, before } => {
            storage.apply_insert_image(&db, &table, row_id, before)?;
            catalog.stats_after_dml(&db, &table, 1, 0);
        }
        UndoEntry::CreateTable { db, table } => {
            storage.apply_drop_table(&db, &table)?;
            let _ = catalog.remove_table(&db, &table);
        }
        UndoEntry::DropTable { db, info, rows } => {
            storage.apply_create_table(&db, &info.name, &info.columns)?;
            for idx in info.indexes.values() {
                storage.apply_create_index(&db, &info.name, idx.clone())?;
            }
            let restored = rows.len() as u64;
            let table_name = info.name.clone();
            catalog.insert_table(&db, info)?;
            for (row_id, values) in rows {
                storage.apply_insert_image(&db, &table_name, row_id, values)?;
            }
            catalog.stats_after_dml(&db, &table_name, restored, 0);
        }
        UndoEntry::CreateIndex { db, table, index } => {
            storage.apply_drop_index(&db, &table, &index)?;
            catalog.with_table_mut(&db, &table, |t| {
                t.indexes.remove(&index.to_lowercase());
                Ok(())
            })?;
        }
        UndoEntry::DropIndex { db, table, info } => {
            storage.apply_create_index(&db, &table, info.clone())?;
            catalog.with_table_mut(&db, &table, |t| {
                t.indexes.insert(info.name.to_lowercase(), info.clone());
                Ok(())
            })?;
        }
        UndoEntry::CreateView { db, name } => {
            let _ = catalog.remove_view(&db, &name);
        }
        UndoEntry::DropView { db, info } => {
            catalog.insert_view(&db, info)?;
        }
        UndoEntry::AlterView { db, before } => {
            catalog.replace_view(&db, before)?;
        }
        UndoEntry::CreateTrigger { db, name } => {
            let _ = catalog.remove_trigger(&db, &name);
        }
        UndoEntry::DropTrigger { db, info } => {
            catalog.insert_trigger(&db, info)?;
        }
    }
    Ok(())
}
