//! Engine wiring: catalog, storage, WAL, locks and transactions assembled
//! behind one handle. Opening an engine runs crash recovery; shutting it
//! down checkpoints so the next open starts from a clean snapshot.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use crate::catalog::Catalog;
use crate::config::EngineOptions;
use crate::error::EngineResult;
use crate::plan::optimizer::{AdaptiveState, CostConstants, PerfSample};
use crate::session::Session;
use crate::storage::heap::HeapStorage;
use crate::storage::{SharedStorage, StorageEngine};
use crate::txn::lock::LockManager;
use crate::txn::recovery;
use crate::txn::wal::LogManager;
use crate::txn::TransactionManager;

pub struct Engine {
    options: EngineOptions,
    catalog: Arc<Catalog>,
    storage: Arc<HeapStorage>,
    log: Arc<LogManager>,
    txns: TransactionManager,
    adaptive: Mutex<AdaptiveState>,
}

impl Engine {
    /// Open (or create) the database under `options.data_dir`, running
    /// WAL recovery before accepting statements.
    pub fn open(options: EngineOptions) -> EngineResult<Arc<Engine>> {
        std::fs::create_dir_all(&options.data_dir)?;
        let catalog = Arc::new(Catalog::open(&options.data_dir)?);
        let log = Arc::new(LogManager::open(&options.data_dir)?);
        let storage = Arc::new(HeapStorage::new(
            &options.data_dir,
            Arc::clone(&catalog),
            Arc::clone(&log),
        )?);
        storage.load_snapshots()?;

        let report = recovery::recover(&log, storage.as_ref(), &catalog)?;
        info!(
            target: "opaldb::engine",
            "engine open at '{}' ({} redone, {} undone)",
            options.data_dir.display(), report.redone, report.undone
        );

        let locks = Arc::new(LockManager::new(Duration::from_millis(
            options.lock_wait_timeout_ms,
        )));
        let txns =
            TransactionManager::new(Arc::clone(&log), locks, report.max_txn_id + 1);

        Ok(Arc::new(Engine {
            options,
            catalog,
            storage,
            log,
            txns,
            adaptive: Mutex::new(AdaptiveState::default()),
        }))
    }

    pub fn session(self: &Arc<Self>) -> Session {
        Session::new(Arc::clone(self))
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_shared(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog)
    }

    pub fn storage(&self) -> &Arc<HeapStorage> {
        &self.storage
    }

    pub fn storage_shared(&self) -> SharedStorage {
        Arc::clone(&self.storage) as SharedStorage
    }

    pub fn txns(&self) -> &TransactionManager {
        &self.txns
    }

    /// Current (adaptively tuned) cost constants.
    pub fn cost_constants(&self) -> CostConstants {
        self.adaptive.lock().constants()
    }

    /// Feed execution telemetry into adaptive cost tuning.
    pub fn record_telemetry(&self, sample: PerfSample) {
        self.adaptive.lock().record(sample);
    }

    /// Durable snapshot: flush table heaps and the catalog, then truncate
    /// the WAL behind a CHECKPOINT record.
    pub fn checkpoint(&self) -> EngineResult<()> {
        self.storage.flush_all_tables()?;
        self.catalog.save()?;
        self.log.checkpoint()?;
        Ok(())
    }

    /// Clean shutdown: checkpoint everything committed so far.
    pub fn shutdown(&self) -> EngineResult<()> {
        self.checkpoint()?;
        info!(target: "opaldb::engine", "engine shut down cleanly");
        Ok(())
    }
}
