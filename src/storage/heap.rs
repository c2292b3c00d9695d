//! Reference heap storage engine.
//!
//! Tables are in-memory slotted pages with BTree secondary indexes,
//! persisted as bincode snapshot files under `<data_dir>/tables/` at
//! checkpoint time. Crash consistency comes from the WAL: every logged
//! mutation appends its record (with before/after images) before touching
//! the page, and recovery replays images through the unlogged hooks.
//!
//! The primary key is backed by an implicit unique index named
//! `pk_<table>`, created with the table.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{Catalog, ColumnInfo, IndexInfo, IndexMethod, TriggerInfo, ViewInfo};
use crate::error::{EngineError, EngineResult};
use crate::storage::{RowId, StorageEngine};
use crate::txn::wal::{LogManager, LogPayload, LogRecordKind};
use crate::txn::{Transaction, UndoEntry};
use crate::value::{OrdValue, Value};

/// Rows per slotted page. Mirrors the page-count statistic in the catalog.
pub const PAGE_CAPACITY: usize = crate::catalog::ROWS_PER_PAGE as usize;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Page {
    slots: Vec<Option<Vec<Value>>>,
}

#[derive(Debug, Clone)]
struct IndexData {
    info: IndexInfo,
    map: BTreeMap<Vec<OrdValue>, Vec<RowId>>,
}

#[derive(Debug, Clone)]
struct TableHeap {
    columns: Vec<ColumnInfo>,
    pages: Vec<Page>,
    indexes: HashMap<String, IndexData>,
}

/// Snapshot file layout for one table.
#[derive(Serialize, Deserialize)]
struct TableSnapshot {
    columns: Vec<ColumnInfo>,
    rows: Vec<(RowId, Vec<Value>)>,
    indexes: Vec<IndexInfo>,
}

impl TableHeap {
    fn new(columns: Vec<ColumnInfo>) -> Self {
        Self { columns, pages: Vec::new(), indexes: HashMap::new() }
    }

    fn rows(&self) -> Vec<(RowId, Vec<Value>)> {
        let mut out = Vec::new();
        for (pid, page) in self.pages.iter().enumerate() {
            for (sid, slot) in page.slots.iter().enumerate() {
                if let Some(values) = slot {
                    out.push((
                        RowId { page_id: pid as u64, slot: sid as u32 },
                        values.clone(),
                    ));
                }
            }
        }
        out
    }

    fn get(&self, row_id: RowId) -> Option<&Vec<Value>> {
        self.pages
            .get(row_id.page_id as usize)?
            .slots
            .get(row_id.slot as usize)?
            .as_ref()
    }

    /// Next free append position (tail of the last page).
    fn allocate(&mut self) -> RowId {
        if let Some((pid, page)) = self.pages.iter_mut().enumerate().last() {
            if page.slots.len() < PAGE_CAPACITY {
                let slot = page.slots.len() as u32;
                page.slots.push(None);
                return RowId { page_id: pid as u64, slot };
            }
        }
        self.pages.push(Page::default());
        let pid = self.pages.len() - 1;
        self.pages[pid].slots.push(None);
        RowId { page_id: pid as u64, slot: 0 }
    }

    /// Grow pages so `row_id` addresses a valid slot (recovery placement).
    fn ensure_slot(&mut self, row_id: RowId) {
        while self.pages.len() <= row_id.page_id as usize {
            self.pages.push(Page::default());
        }
        let page = &mut self.pages[row_id.page_id as usize];
        while page.slots.len() <= row_id.slot as usize {
            page.slots.push(None);
        }
    }

    fn put(&mut self, row_id: RowId, values: Vec<Value>) {
        self.ensure_slot(row_id);
        self.pages[row_id.page_id as usize].slots[row_id.slot as usize] = Some(values);
    }

    fn clear_slot(&mut self, row_id: RowId) -> Option<Vec<Value>> {
        self.ensure_slot(row_id);
        self.pages[row_id.page_id as usize].slots[row_id.slot as usize].take()
    }

    fn index_key(&self, info: &IndexInfo, values: &[Value]) -> EngineResult<Vec<OrdValue>> {
        let mut key = Vec::with_capacity(info.columns.len());
        for col in &info.columns {
            let idx = self
                .columns
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(col))
                .ok_or_else(|| {
                    EngineError::storage(format!("index column '{}' missing from row", col))
                })?;
            key.push(OrdValue(values[idx].clone()));
        }
        Ok(key)
    }

    fn index_insert(&mut self, row_id: RowId, values: &[Value]) -> EngineResult<()> {
        let names: Vec<String> = self.indexes.keys().cloned().collect();
        for name in names {
            let info = self.indexes[&name].info.clone();
            let key = self.index_key(&info, values)?;
            let data = self.indexes.get_mut(&name).expect("index present");
            let entry = data.map.entry(key).or_default();
            if info.unique && !entry.is_empty() {
                return Err(EngineError::constraint(format!(
                    "duplicate key for unique index '{}'",
                    info.name
                )));
            }
            entry.push(row_id);
        }
        Ok(())
    }

    fn index_remove(&mut self, row_id: RowId, values: &[Value]) -> EngineResult<()> {
        let names: Vec<String> = self.indexes.keys().cloned().collect();
        for name in names {
            let info = self.indexes[&name].info.clone();
            let key = self.index_key(&info, values)?;
            let data = self.indexes.get_mut(&name).expect("index present");
            if let Some(entry) = data.map.get_mut(&key) {
                entry.retain(|r| *r != row_id);
                if entry.is_empty() {
                    data.map.remove(&key);
                }
            }
        }
        Ok(())
    }

    /// Uniqueness probe before any mutation happens.
    fn check_unique(&self, values: &[Value], exclude: Option<RowId>) -> EngineResult<()> {
        for data in self.indexes.values() {
            if !data.info.unique {
                continue;
            }
            let key = self.index_key(&data.info, values)?;
            if let Some(entry) = data.map.get(&key) {
                let conflict = entry.iter().any(|r| Some(*r) != exclude);
                if conflict {
                    return Err(EngineError::constraint(format!(
                        "duplicate key for unique index '{}'",
                        data.info.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Arity, NOT NULL and type coercion against the declared columns.
    fn normalize_row(&self, values: Vec<Value>) -> EngineResult<Vec<Value>> {
        if values.len() != self.columns.len() {
            return Err(EngineError::storage(format!(
                "row has {} values but table has {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        let mut out = Vec::with_capacity(values.len());
        for (value, col) in values.into_iter().zip(&self.columns) {
            if value.is_null() {
                if !col.nullable {
                    return Err(EngineError::constraint(format!(
                        "NULL value in NOT NULL column '{}'",
                        col.name
                    )));
                }
                out.push(Value::Null);
                continue;
            }
            out.push(value.coerce_to(col.data_type).map_err(|e| {
                EngineError::constraint(format!("column '{}': {}", col.name, e))
            })?);
        }
        Ok(out)
    }
}

fn heap_key(db: &str, table: &str) -> String {
    format!("{}.{}", db.to_lowercase(), table.to_lowercase())
}

/// Implicit unique index backing the primary key.
pub fn primary_index_info(table: &str, columns: &[ColumnInfo]) -> Option<IndexInfo> {
    let pk = columns.iter().find(|c| c.is_primary_key)?;
    Some(IndexInfo {
        name: format!("pk_{}", table.to_lowercase()),
        columns: vec![pk.name.clone()],
        unique: true,
        method: IndexMethod::Btree,
        file_name: format!("{}_pk.idx", table.to_lowercase()),
        key_types: vec![pk.data_type],
    })
}

pub struct HeapStorage {
    data_dir: PathBuf,
    catalog: Arc<Catalog>,
    log: Arc<LogManager>,
    tables: RwLock<HashMap<String, TableHeap>>,
}

impl HeapStorage {
    pub fn new(data_dir: &Path, catalog: Arc<Catalog>, log: Arc<LogManager>) -> EngineResult<Self> {
        fs::create_dir_all(data_dir.join("tables"))?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            catalog,
            log,
            tables: RwLock::new(HashMap::new()),
        })
    }

    fn snapshot_path(&self, key: &str) -> PathBuf {
        self.data_dir.join("tables").join(format!("{}.tbl", key))
    }

    /// Load every table snapshot into memory. Called at engine open,
    /// before WAL replay.
    pub fn load_snapshots(&self) -> EngineResult<()> {
        let dir = self.data_dir.join("tables");
        let mut tables = self.tables.write();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("tbl") {
                continue;
            }
            let key = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_string(),
                None => continue,
            };
            let bytes = fs::read(&path)?;
            let snap: TableSnapshot = bincode::deserialize(&bytes)
                .map_err(|e| EngineError::io(format!("snapshot '{}' corrupt: {}", key, e)))?;
            let mut heap = TableHeap::new(snap.columns);
            for info in snap.indexes {
                heap.indexes
                    .insert(info.name.to_lowercase(), IndexData { info, map: BTreeMap::new() });
            }
            for (row_id, values) in snap.rows {
                heap.put(row_id, values.clone());
                heap.index_insert(row_id, &values)?;
            }
            debug!(target: "opaldb::storage", "loaded snapshot for '{}'", key);
            tables.insert(key, heap);
        }
        Ok(())
    }

    fn append_wal(
        &self,
        txn: &Arc<Transaction>,
        kind: LogRecordKind,
        payload: LogPayload,
    ) -> EngineResult<u64> {
        let prev = txn.last_lsn();
        let lsn = self.log.append(txn.id(), prev, kind, payload)?;
        txn.chain_lsn(lsn);
        Ok(lsn)
    }

    fn with_heap<R>(
        &self,
        db: &str,
        table: &str,
        f: impl FnOnce(&TableHeap) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let tables = self.tables.read();
        let heap = tables
            .get(&heap_key(db, table))
            .ok_or_else(|| EngineError::storage(format!("table '{}' has no heap", table)))?;
        f(heap)
    }

    fn with_heap_mut<R>(
        &self,
        db: &str,
        table: &str,
        f: impl FnOnce(&mut TableHeap) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let mut tables = self.tables.write();
        let heap = tables
            .get_mut(&heap_key(db, table))
            .ok_or_else(|| EngineError::storage(format!("table '{}' has no heap", table)))?;
        f(heap)
    }
}

impl StorageEngine for HeapStorage {
    fn create_table(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        name: &str,
        columns: &[ColumnInfo],
    ) -> EngineResult<String> {
        txn.ensure_active()?;
        if self.catalog.has_table(db, name) {
            return Err(EngineError::semantic(vec![format!(
                "table '{}' already exists",
                name
            )]));
        }
        let pk_index = primary_index_info(name, columns);
        let indexes: Vec<IndexInfo> = pk_index.iter().cloned().collect();
        self.append_wal(
            txn,
            LogRecordKind::CreateTable,
            LogPayload::Table {
                db: db.to_string(),
                table: name.to_string(),
                columns: columns.to_vec(),
                rows: Vec::new(),
                indexes: indexes.clone(),
            },
        )?;

        let mut heap = TableHeap::new(columns.to_vec());
        for info in &indexes {
            heap.indexes
                .insert(info.name.to_lowercase(), IndexData { info: info.clone(), map: BTreeMap::new() });
        }
        self.tables.write().insert(heap_key(db, name), heap);

        let mut table_info = crate::catalog::TableInfo::new(name, columns.to_vec());
        for info in indexes {
            table_info.indexes.insert(info.name.to_lowercase(), info);
        }
        self.catalog.insert_table(db, table_info)?;
        txn.push_undo(UndoEntry::CreateTable { db: db.to_string(), table: name.to_string() });
        debug!(target: "opaldb::storage", "created table '{}.{}'", db, name);
        Ok(format!("Table '{}' created.", name))
    }

    fn drop_table(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        name: &str,
        if_exists: bool,
    ) -> EngineResult<String> {
        txn.ensure_active()?;
        if !self.catalog.has_table(db, name) {
            if if_exists {
                return Ok(format!("Table '{}' does not exist, skipped.", name));
            }
            return Err(EngineError::semantic(vec![format!(
                "table '{}' does not exist",
                name
            )]));
        }
        let info = self.catalog.get_table(db, name)?;
        let rows = self.with_heap(db, name, |h| Ok(h.rows()))?;
        self.append_wal(
            txn,
            LogRecordKind::DropTable,
            LogPayload::Table {
                db: db.to_string(),
                table: info.name.clone(),
                columns: info.columns.clone(),
                rows: rows.clone(),
                indexes: info.indexes.values().cloned().collect(),
            },
        )?;
        self.tables.write().remove(&heap_key(db, name));
        let removed = self.catalog.remove_table(db, name)?;
        txn.push_undo(UndoEntry::DropTable { db: db.to_string(), info: removed, rows });
        let _ = fs::remove_file(self.snapshot_path(&heap_key(db, name)));
        Ok(format!("Table '{}' dropped.", name))
    }

    fn insert_row(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        table: &str,
        values: Vec<Value>,
    ) -> EngineResult<RowId> {
        txn.ensure_active()?;
        let mut tables = self.tables.write();
        let heap = tables
            .get_mut(&heap_key(db, table))
            .ok_or_else(|| EngineError::storage(format!("table '{}' has no heap", table)))?;
        let values = heap.normalize_row(values)?;
        heap.check_unique(&values, None)?;
        let row_id = heap.allocate();
        drop(tables);

        // Log before the row becomes visible.
        self.append_wal(
            txn,
            LogRecordKind::Insert,
            LogPayload::Row {
                db: db.to_string(),
                table: table.to_string(),
                row_id,
                before: None,
                after: Some(values.clone()),
            },
        )?;

        self.with_heap_mut(db, table, |heap| {
            heap.put(row_id, values.clone());
            heap.index_insert(row_id, &values)
        })?;
        txn.push_undo(UndoEntry::Insert {
            db: db.to_string(),
            table: table.to_string(),
            row_id,
        });
        self.catalog.stats_after_dml(db, table, 1, 0);
        Ok(row_id)
    }

    fn update_row(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        table: &str,
        row_id: RowId,
        new_values: Vec<Value>,
    ) -> EngineResult<()> {
        txn.ensure_active()?;
        let (before, new_values) = self.with_heap(db, table, |heap| {
            let before = heap
                .get(row_id)
                .cloned()
                .ok_or_else(|| EngineError::storage(format!("row {} not found", row_id)))?;
            let normalized = heap.normalize_row(new_values)?;
            heap.check_unique(&normalized, Some(row_id))?;
            Ok((before, normalized))
        })?;

        self.append_wal(
            txn,
            LogRecordKind::Update,
            LogPayload::Row {
                db: db.to_string(),
                table: table.to_string(),
                row_id,
                before: Some(before.clone()),
                after: Some(new_values.clone()),
            },
        )?;

        self.with_heap_mut(db, table, |heap| {
            heap.index_remove(row_id, &before)?;
            heap.put(row_id, new_values.clone());
            heap.index_insert(row_id, &new_values)
        })?;
        txn.push_undo(UndoEntry::Update {
            db: db.to_string(),
            table: table.to_string(),
            row_id,
            before,
        });
        Ok(())
    }

    fn delete_row(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        table: &str,
        row_id: RowId,
    ) -> EngineResult<()> {
        txn.ensure_active()?;
        let before = self.with_heap(db, table, |heap| {
            heap.get(row_id)
                .cloned()
                .ok_or_else(|| EngineError::storage(format!("row {} not found", row_id)))
        })?;

        self.append_wal(
            txn,
            LogRecordKind::Delete,
            LogPayload::Row {
                db: db.to_string(),
                table: table.to_string(),
                row_id,
                before: Some(before.clone()),
                after: None,
            },
        )?;

        self.with_heap_mut(db, table, |heap| {
            heap.index_remove(row_id, &before)?;
            heap.clear_slot(row_id);
            Ok(())
        })?;
        txn.push_undo(UndoEntry::Delete {
            db: db.to_string(),
            table: table.to_string(),
            row_id,
            before,
        });
        self.catalog.stats_after_dml(db, table, 0, 1);
        Ok(())
    }

    fn scan(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        table: &str,
    ) -> EngineResult<Box<dyn Iterator<Item = (RowId, Vec<Value>)> + Send>> {
        txn.ensure_active()?;
        let rows = self.with_heap(db, table, |h| Ok(h.rows()))?;
        Ok(Box::new(rows.into_iter()))
    }

    fn get_row(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        table: &str,
        row_id: RowId,
    ) -> EngineResult<Option<(RowId, Vec<Value>)>> {
        txn.ensure_active()?;
        self.with_heap(db, table, |h| Ok(h.get(row_id).cloned().map(|v| (row_id, v))))
    }

    fn find_by_index(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        table: &str,
        index_name: &str,
        key: &[Value],
    ) -> EngineResult<Option<RowId>> {
        Ok(self.find_all_by_index(txn, db, table, index_name, key)?.into_iter().next())
    }

    fn find_all_by_index(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        table: &str,
        index_name: &str,
        key: &[Value],
    ) -> EngineResult<Vec<RowId>> {
        txn.ensure_active()?;
        self.with_heap(db, table, |heap| {
            let data = heap
                .indexes
                .get(&index_name.to_lowercase())
                .ok_or_else(|| EngineError::storage(format!("index '{}' not found", index_name)))?;
            let key: Vec<OrdValue> = key.iter().map(|v| OrdValue(v.clone())).collect();
            Ok(data.map.get(&key).cloned().unwrap_or_default())
        })
    }

    fn create_index(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        table: &str,
        index: IndexInfo,
    ) -> EngineResult<(bool, String)> {
        txn.ensure_active()?;
        let exists = self.with_heap(db, table, |h| {
            Ok(h.indexes.contains_key(&index.name.to_lowercase()))
        })?;
        if exists {
            return Ok((false, format!("Index '{}' already exists.", index.name)));
        }

        self.append_wal(
            txn,
            LogRecordKind::CreateIndex,
            LogPayload::Index {
                db: db.to_string(),
                table: table.to_string(),
                index: index.clone(),
            },
        )?;
        self.apply_create_index(db, table, index.clone())?;
        self.catalog.with_table_mut(db, table, |t| {
            t.indexes.insert(index.name.to_lowercase(), index.clone());
            Ok(())
        })?;
        txn.push_undo(UndoEntry::CreateIndex {
            db: db.to_string(),
            table: table.to_string(),
            index: index.name.clone(),
        });
        Ok((true, format!("Index '{}' created.", index.name)))
    }

    fn drop_index(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        table: &str,
        index_name: &str,
    ) -> EngineResult<()> {
        txn.ensure_active()?;
        let info = self.with_heap(db, table, |heap| {
            heap.indexes
                .get(&index_name.to_lowercase())
                .map(|d| d.info.clone())
                .ok_or_else(|| EngineError::storage(format!("index '{}' not found", index_name)))
        })?;
        self.append_wal(
            txn,
            LogRecordKind::DropIndex,
            LogPayload::Index {
                db: db.to_string(),
                table: table.to_string(),
                index: info.clone(),
            },
        )?;
        self.apply_drop_index(db, table, index_name)?;
        self.catalog.with_table_mut(db, table, |t| {
            t.indexes.remove(&index_name.to_lowercase());
            Ok(())
        })?;
        txn.push_undo(UndoEntry::DropIndex {
            db: db.to_string(),
            table: table.to_string(),
            info,
        });
        Ok(())
    }

    fn create_view(&self, txn: &Arc<Transaction>, db: &str, info: ViewInfo) -> EngineResult<()> {
        txn.ensure_active()?;
        self.append_wal(
            txn,
            LogRecordKind::CreateView,
            LogPayload::View { db: db.to_string(), before: None, after: Some(info.clone()) },
        )?;
        let name = info.name.clone();
        self.catalog.insert_view(db, info)?;
        txn.push_undo(UndoEntry::CreateView { db: db.to_string(), name });
        Ok(())
    }

    fn alter_view(&self, txn: &Arc<Transaction>, db: &str, info: ViewInfo) -> EngineResult<()> {
        txn.ensure_active()?;
        let before = self
            .catalog
            .get_view(db, &info.name)
            .ok_or_else(|| EngineError::semantic(vec![format!("view '{}' does not exist", info.name)]))?;
        self.append_wal(
            txn,
            LogRecordKind::AlterView,
            LogPayload::View {
                db: db.to_string(),
                before: Some(before.clone()),
                after: Some(info.clone()),
            },
        )?;
        self.catalog.replace_view(db, info)?;
        txn.push_undo(UndoEntry::AlterView { db: db.to_string(), before });
        Ok(())
    }

    fn delete_view(&self, txn: &Arc<Transaction>, db: &str, name: &str) -> EngineResult<()> {
        txn.ensure_active()?;
        let before = self
            .catalog
            .get_view(db, name)
            .ok_or_else(|| EngineError::semantic(vec![format!("view '{}' does not exist", name)]))?;
        self.append_wal(
            txn,
            LogRecordKind::DropView,
            LogPayload::View { db: db.to_string(), before: Some(before.clone()), after: None },
        )?;
        self.catalog.remove_view(db, name)?;
        txn.push_undo(UndoEntry::DropView { db: db.to_string(), info: before });
        Ok(())
    }

    fn create_trigger(
        &self,
        txn: &Arc<Transaction>,
        db: &str,
        info: TriggerInfo,
    ) -> EngineResult<()> {
        txn.ensure_active()?;
        self.append_wal(
            txn,
            LogRecordKind::CreateTrigger,
            LogPayload::Trigger { db: db.to_string(), before: None, after: Some(info.clone()) },
        )?;
        let name = info.name.clone();
        self.catalog.insert_trigger(db, info)?;
        txn.push_undo(UndoEntry::CreateTrigger { db: db.to_string(), name });
        Ok(())
    }

    fn delete_trigger(&self, txn: &Arc<Transaction>, db: &str, name: &str) -> EngineResult<()> {
        txn.ensure_active()?;
        let before = self.catalog.get_trigger(db, name).ok_or_else(|| {
            EngineError::semantic(vec![format!("trigger '{}' does not exist", name)])
        })?;
        self.append_wal(
            txn,
            LogRecordKind::DropTrigger,
            LogPayload::Trigger { db: db.to_string(), before: Some(before.clone()), after: None },
        )?;
        self.catalog.remove_trigger(db, name)?;
        txn.push_undo(UndoEntry::DropTrigger { db: db.to_string(), info: before });
        Ok(())
    }

    fn flush_all_tables(&self) -> EngineResult<()> {
        let tables = self.tables.read();
        for (key, heap) in tables.iter() {
            let snap = TableSnapshot {
                columns: heap.columns.clone(),
                rows: heap.rows(),
                indexes: heap.indexes.values().map(|d| d.info.clone()).collect(),
            };
            let bytes = bincode::serialize(&snap)
                .map_err(|e| EngineError::io(format!("snapshot serialize failed: {}", e)))?;
            let path = self.snapshot_path(key);
            let tmp = path.with_extension("tbl.tmp");
            fs::write(&tmp, &bytes)?;
            fs::rename(&tmp, &path)?;
        }
        debug!(target: "opaldb::storage", "flushed {} table snapshot(s)", tables.len());
        Ok(())
    }

    fn table_stats(&self, db: &str, table: &str) -> EngineResult<(u64, u64)> {
        self.with_heap(db, table, |heap| {
            let rows = heap.rows().len() as u64;
            let pages = heap.pages.iter().filter(|p| p.slots.iter().any(|s| s.is_some())).count();
            Ok((rows, pages as u64))
        })
    }

    // ---- unlogged image hooks ----

    fn apply_insert_image(
        &self,
        db: &str,
        table: &str,
        row_id: RowId,
        values: Vec<Value>,
    ) -> EngineResult<()> {
        // Idempotent: replay over an already-applied image re-keys cleanly.
        self.with_heap_mut(db, table, |heap| {
            if let Some(old) = heap.get(row_id).cloned() {
                heap.index_remove(row_id, &old)?;
            }
            heap.put(row_id, values.clone());
            heap.index_insert(row_id, &values)
        })
    }

    fn apply_update_image(
        &self,
        db: &str,
        table: &str,
        row_id: RowId,
        values: Vec<Value>,
    ) -> EngineResult<()> {
        self.with_heap_mut(db, table, |heap| {
            if let Some(old) = heap.get(row_id).cloned() {
                heap.index_remove(row_id, &old)?;
            }
            heap.put(row_id, values.clone());
            heap.index_insert(row_id, &values)
        })
    }

    fn apply_delete_image(&self, db: &str, table: &str, row_id: RowId) -> EngineResult<()> {
        self.with_heap_mut(db, table, |heap| {
            if let Some(old) = heap.clear_slot(row_id) {
                heap.index_remove(row_id, &old)?;
            }
            Ok(())
        })
    }

    fn apply_create_table(
        &self,
        db: &str,
        table: &str,
        columns: &[ColumnInfo],
    ) -> EngineResult<()> {
        self.tables
            .write()
            .entry(heap_key(db, table))
            .or_insert_with(|| TableHeap::new(columns.to_vec()));
        Ok(())
    }

    fn apply_drop_table(&self, db: &str, table: &str) -> EngineResult<()> {
        self.tables.write().remove(&heap_key(db, table));
        let _ = fs::remove_file(self.snapshot_path(&heap_key(db, table)));
        Ok(())
    }

    fn apply_create_index(&self, db: &str, table: &str, index: IndexInfo) -> EngineResult<()> {
        self.with_heap_mut(db, table, |heap| {
            let mut map: BTreeMap<Vec<OrdValue>, Vec<RowId>> = BTreeMap::new();
            for (row_id, values) in heap.rows() {
                let key = heap.index_key(&index, &values)?;
                let entry = map.entry(key).or_default();
                if index.unique && !entry.is_empty() {
                    return Err(EngineError::constraint(format!(
                        "duplicate key for unique index '{}'",
                        index.name
                    )));
                }
                entry.push(row_id);
            }
            heap.indexes
                .insert(index.name.to_lowercase(), IndexData { info: index, map });
            Ok(())
        })
    }

    fn apply_drop_index(&self, db: &str, table: &str, index_name: &str) -> EngineResult<()> {
        self.with_heap_mut(db, table, |heap| {
            heap.indexes.remove(&index_name.to_lowercase());
            Ok(())
        })
    }
}
