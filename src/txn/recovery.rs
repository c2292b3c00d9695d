//! Crash recovery: two-pass redo/undo over the WAL.
//!
//! Pass 1 (redo) replays, from the last checkpoint forward, every record of
//! a committed transaction onto the snapshot state through the unlogged
//! image hooks. Pass 2 (undo) walks the records of transactions that began
//! but neither committed nor aborted, newest-first, applying inverse
//! images. Afterward the in-memory catalog reflects all committed DDL and
//! table statistics are recomputed from storage truth.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::catalog::{Catalog, TableInfo};
use crate::error::EngineResult;
use crate::storage::StorageEngine;
use crate::txn::wal::{LogManager, LogPayload, LogRecord, LogRecordKind};

#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub max_txn_id: u64,
    pub redone: usize,
    pub undone: usize,
}

pub fn recover(
    log: &LogManager,
    storage: &dyn StorageEngine,
    catalog: &Catalog,
) -> EngineResult<RecoveryReport> {
    let records = log.read_all()?;
    let mut report = RecoveryReport::default();
    if records.is_empty() {
        return Ok(report);
    }
    report.max_txn_id = records.iter().map(|r| r.txn_id).max().unwrap_or(0);

    let checkpoint_at = records
        .iter()
        .rposition(|r| r.kind == LogRecordKind::Checkpoint)
        .map(|i| i + 1)
        .unwrap_or(0);
    let tail = &records[checkpoint_at..];

    let mut committed: HashSet<u64> = HashSet::new();
    let mut finished: HashSet<u64> = HashSet::new();
    let mut began: HashSet<u64> = HashSet::new();
    for r in &records {
        match r.kind {
            LogRecordKind::Begin => {
                began.insert(r.txn_id);
            }
            LogRecordKind::Commit => {
                committed.insert(r.txn_id);
                finished.insert(r.txn_id);
            }
            LogRecordKind::Abort => {
                finished.insert(r.txn_id);
            }
            _ => {}
        }
    }

    // Redo committed work after the checkpoint.
    for r in tail {
        if !committed.contains(&r.txn_id) {
            continue;
        }
        if redo(r, storage, catalog)? {
            report.redone += 1;
        }
    }

    // Undo in-flight transactions (BEGIN without COMMIT/ABORT), newest-first.
    let losers: Vec<u64> = began.difference(&finished).copied().collect();
    if !losers.is_empty() {
        let mut by_txn: HashMap<u64, Vec<&LogRecord>> = HashMap::new();
        for r in &records {
            if losers.contains(&r.txn_id) {
                by_txn.entry(r.txn_id).or_default().push(r);
            }
        }
        for (txn_id, mut recs) in by_txn {
            recs.reverse();
            debug!(target: "opaldb::txn", "recovery undoing txn {} ({} record(s))", txn_id, recs.len());
            for r in recs {
                if undo(r, storage, catalog)? {
                    report.undone += 1;
                }
            }
        }
    }

    // Reconcile statistics with storage truth.
    for db in catalog.list_databases() {
        for table in catalog.list_tables(&db) {
            if let Ok((rows, pages)) = storage.table_stats(&db, &table) {
                let _ = catalog.with_table_mut(&db, &table, |t| {
                    t.row_count = rows;
                    t.page_count = pages;
                    Ok(())
                });
            }
        }
    }

    info!(
        target: "opaldb::txn",
        "recovery complete: {} redone, {} undone, max txn id {}",
        report.redone, report.undone, report.max_txn_id
    );
    Ok(report)
}

/// Re-apply one committed record. Returns whether it changed state.
fn redo(r: &LogRecord, storage: &dyn StorageEngine, catalog: &Catalog) -> EngineResult<bool> {
    match (&r.kind, &r.payload) {
        (LogRecordKind::Insert, LogPayload::Row { db, table, row_id, after: Some(after), .. }) => {
            storage.apply_insert_image(db, table, *row_id, after.clone())?;
            Ok(true)
        }
        (LogRecordKind::Update, LogPayload::Row { db, table, row_id, after: Some(after), .. }) => {
            storage.apply_update_image(db, table, *row_id, after.clone())?;
            Ok(true)
        }
        (LogRecordKind::Delete, LogPayload::Row { db, table, row_id, .. }) => {
            storage.apply_delete_image(db, table, *row_id)?;
            Ok(true)
        }
        (LogRecordKind::CreateTable, LogPayload::Table { db, table, columns, indexes, .. }) => {
            if !catalog.has_table(db, table) {
                storage.apply_create_table(db, table, columns)?;
                let mut info = TableInfo::new(table, columns.clone());
                for idx in indexes {
                    storage.apply_create_index(db, table, idx.clone())?;
                    info.indexes.insert(idx.name.to_lowercase(), idx.clone());
                }
                catalog.insert_table(db, info)?;
                return Ok(true);
            }
            Ok(false)
        }
        (LogRecordKind::DropTable, LogPayload::Table { db, table, .. }) => {
            storage.apply_drop_table(db, table)?;
            let _ = catalog.remove_table(db, table);
            Ok(true)
        }
        (LogRecordKind::CreateIndex, LogPayload::Index { db, table, index }) => {
            let known = catalog
                .get_table(db, table)
                .map(|t| t.indexes.contains_key(&index.name.to_lowercase()))
                .unwrap_or(false);
            if !known {
                storage.apply_create_index(db, table, index.clone())?;
                catalog.with_table_mut(db, table, |t| {
                    t.indexes.insert(index.name.to_lowercase(), index.clone());
                    Ok(())
                })?;
                return Ok(true);
            }
            Ok(false)
        }
        (LogRecordKind::DropIndex, LogPayload::Index { db, table, index }) => {
            storage.apply_drop_index(db, table, &index.name)?;
            let _ = catalog.with_table_mut(db, table, |t| {
                t.indexes.remove(&index.name.to_lowercase());
                Ok(())
            });
            Ok(true)
        }
        (LogRecordKind::CreateView, LogPayload::View { db, after: Some(v), .. }) => {
            if catalog.get_view(db, &v.name).is_none() {
                catalog.insert_view(db, v.clone())?;
                return Ok(true);
            }
            Ok(false)
        }
        (LogRecordKind::AlterView, LogPayload::View { db, after: Some(v), .. }) => {
            catalog.replace_view(db, v.clone())?;
            Ok(true)
        }
        (LogRecordKind::DropView, LogPayload::View { db, before: Some(v), .. }) => {
            let _ = catalog.remove_view(db, &v.name);
            Ok(true)
        }
        (LogRecordKind::CreateTrigger, LogPayload::Trigger { db, after: Some(t), .. }) => {
            if catalog.get_trigger(db, &t.name).is_none() {
                catalog.insert_trigger(db, t.clone())?;
                return Ok(true);
            }
            Ok(false)
        }
        (LogRecordKind::DropTrigger, LogPayload::Trigger { db, before: Some(t), .. }) => {
            let _ = catalog.remove_trigger(db, &t.name);
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Apply the inverse of one record from an unfinished transaction.
fn undo(r: &LogRecord, storage: &dyn StorageEngine, catalog: &Catalog) -> EngineResult<bool> {
    match (&r.kind, &r.payload) {
        (LogRecordKind::Insert, LogPayload::Row { db, table, row_id, .. }) => {
            storage.apply_delete_image(db, table, *row_id)?;
            Ok(true)
        }
        (LogRecordKind::Update, LogPayload::Row { db, table, row_id, before: Some(before), .. }) => {
            storage.apply_update_image(db, table, *row_id, before.clone())?;
            Ok(true)
        }
        (LogRecordKind::Delete, LogPayload::Row { db, table, row_id, before: Some(before), .. }) => {
            storage.apply_insert_image(db, table, *row_id, before.clone())?;
            Ok(true)
        }
        (LogRecordKind::CreateTable, LogPayload::Table { db, table, .. }) => {
            storage.apply_drop_table(db, table)?;
            let _ = catalog.remove_table(db, table);
            Ok(true)
        }
        (LogRecordKind::DropTable, LogPayload::Table { db, table, columns, rows, indexes }) => {
            storage.apply_create_table(db, table, columns)?;
            let mut info = TableInfo::new(table, columns.clone());
            for idx in indexes {
                storage.apply_create_index(db, table, idx.clone())?;
                info.indexes.insert(idx.name.to_lowercase(), idx.clone());
            }
            if !catalog.has_table(db, table) {
                catalog.insert_table(db, info)?;
            }
            for (row_id, values) in rows {
                storage.apply_insert_image(db, table, *row_id, values.clone())?;
            }
            Ok(true)
        }
        (LogRecordKind::CreateIndex, LogPayload::Index { db, table, index }) => {
            storage.apply_drop_index(db, table, &index.name)?;
            let _ = catalog.with_table_mut(db, table, |t| {
                t.indexes.remove(&index.name.to_lowercase());
                Ok(())
            });
            Ok(true)
        }
        (LogRecordKind::DropIndex, LogPayload::Index { db, table, index }) => {
            storage.apply_create_index(db, table, index.clone())?;
            catalog.with_table_mut(db, table, |t| {
                t.indexes.insert(index.name.to_lowercase(), index.clone());
                Ok(())
            })?;
            Ok(true)
        }
        (LogRecordKind::CreateView, LogPayload::View { db, after: Some(v), .. }) => {
            let _ = catalog.remove_view(db, &v.name);
            Ok(true)
        }
        (LogRecordKind::AlterView, LogPayload::View { db, before: Some(v), .. }) => {
            catalog.replace_view(db, v.clone())?;
            Ok(true)
        }
        (LogRecordKind::DropView, LogPayload::View { db, before: Some(v), .. }) => {
            if catalog.get_view(db, &v.name).is_none() {
                catalog.insert_view(db, v.clone())?;
            }
            Ok(true)
        }
        (LogRecordKind::CreateTrigger, LogPayload::Trigger { db, after: Some(t), .. }) => {
            let _ = catalog.remove_trigger(db, &t.name);
            Ok(true)
        }
        (LogRecordKind::DropTrigger, LogPayload::Trigger { db, before: Some(t), .. }) => {
            if catalog.get_trigger(db, &t.name).is_none() {
                catalog.insert_trigger(db, t.clone())?;
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}
