//! Storage engine contract.
//!
//! Operators and WAL recovery consume this trait; the crate ships a
//! reference heap implementation (`heap`). The logged methods take an
//! ACTIVE transaction, append the WAL record before the in-memory change
//! becomes visible, and record undo entries on the transaction. The
//! `apply_*` image hooks are the unlogged paths used by abort and crash
//! recovery to force storage into a known state.

pub mod heap;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::catalog::{ColumnInfo, IndexInfo, TriggerInfo, ViewInfo};
use crate::error::EngineResult;
use crate::txn::Transaction;
use crate::value::Value;

/// Storage-opaque row address: (page, slot). Consumers treat it as a token
/// for update/delete; only the storage engine interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId {
    pub page_id: u64,
    pub slot: u32,
}

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.page_id, self.slot)
    }
}

pub type SharedStorage = Arc<dyn StorageEngine>;

pub trait StorageEngine: Send + Sync {
    // ---- table DDL ----

    fn create_table(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        name: &str,
        columns: &[ColumnInfo],
    ) -> EngineResult<String>;

    fn drop_table(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        name: &str,
        if_exists: bool,
    ) -> EngineResult<String>;

    // ---- row DML ----

    fn insert_row(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        table: &str,
        values: Vec<Value>,
    ) -> EngineResult<RowId>;

    fn update_row(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        table: &str,
        row_id: RowId,
        new_values: Vec<Value>,
    ) -> EngineResult<()>;

    fn delete_row(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        table: &str,
        row_id: RowId,
    ) -> EngineResult<()>;

    // ---- reads ----

    /// Forward scan in insertion order (page then slot).
    fn scan(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        table: &str,
    ) -> EngineResult<Box<dyn Iterator<Item = (RowId, Vec<Value>)> + Send>>;

    fn get_row(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        table: &str,
        row_id: RowId,
    ) -> EngineResult<Option<(RowId, Vec<Value>)>>;

    /// First row id matching the key, per the single-lookup contract.
    fn find_by_index(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        table: &str,
        index_name: &str,
        key: &[Value],
    ) -> EngineResult<Option<RowId>>;

    /// Every row id matching the key, in index order.
    fn find_all_by_index(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        table: &str,
        index_name: &str,
        key: &[Value],
    ) -> EngineResult<Vec<RowId>>;

    // ---- index DDL ----

    fn create_index(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        table: &str,
        index: IndexInfo,
    ) -> EngineResult<(bool, String)>;

    fn drop_index(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        table: &str,
        index_name: &str,
    ) -> EngineResult<()>;

    // ---- view / trigger DDL (catalog-backed, WAL-logged here) ----

    fn create_view(&self, txn: &Arc<Transaction>, db: &str, info: ViewInfo) -> EngineResult<()>;
    fn alter_view(&self, txn: &Arc<Transaction>, db: &str, info: ViewInfo) -> EngineResult<()>;
    fn delete_view(&self, txn: &Arc<Transaction>, db: &str, name: &str) -> EngineResult<()>;
    fn create_trigger(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        info: TriggerInfo,
    ) -> EngineResult<()>;
    fn delete_trigger(&self, txn: &Arc<Transaction>, db: &str, name: &str) -> EngineResult<()>;

    // ---- durability ----

    /// Persist every table heap as a snapshot file.
    fn flush_all_tables(&self) -> EngineResult<()>;

    /// Live (rows, pages) for statistics reconciliation after recovery.
    fn table_stats(&self, db: &str, table: &str) -> EngineResult<(u64, u64)>;

    // ---- unlogged image hooks (abort + recovery) ----

    /// Place a row image at an exact row id, growing pages as needed.
    fn apply_insert_image(
        &self,
        db: &str,
        table: &str,
        row_id: RowId,
        values: Vec<Value>,
    ) -> EngineResult<()>;

    fn apply_update_image(
        &self,
        db: &str,
        table: &str,
        row_id: RowId,
        values: Vec<Value>,
    ) -> EngineResult<()>;

    fn apply_delete_image(&self, db: &str, table: &str, row_id: RowId) -> EngineResult<()>;

    fn apply_create_table(&self, db: &str, table: &str, columns: &[ColumnInfo])
        -> EngineResult<()>;

    fn apply_drop_table(&self, db: &str, table: &str) -> EngineResult<()>;

    fn apply_create_index(&self, db: &str, table: &str, index: IndexInfo) -> EngineResult<()>;

    fn apply_drop_index(&self, db: &str, table: &str, index_name: &str) -> EngineResult<()>;
}
