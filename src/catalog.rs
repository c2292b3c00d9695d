//! In-memory catalog (symbol table) with JSON persistence.
//!
//! The catalog is the reflection layer shared by the semantic analyzer and
//! optimizer (read) and the executor (mutate under transaction). It holds one
//! namespace per database; each database owns tables, views and triggers.
//! Persistence is a single pretty-printed JSON file under the data directory,
//! written at checkpoint/clean shutdown; crash consistency comes from the WAL
//! (every DDL is logged before its catalog effect becomes visible).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::value::{DataType, Value};

pub const DEFAULT_DATABASE: &str = "default";

/// Rows per heap page; page_count statistics derive from it.
pub const ROWS_PER_PAGE: u64 = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub default: Option<Value>,
    pub is_primary_key: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexMethod {
    Btree,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub method: IndexMethod,
    pub file_name: String,
    pub key_types: Vec<DataType>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnStats {
    pub distinct: u64,
    pub null_count: u64,
    pub min: Option<Value>,
    pub max: Option<Value>,
    /// Most common values with their occurrence counts.
    pub mcv: Vec<(Value, u64)>,
    /// Equi-depth histogram bucket boundaries.
    pub histogram: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: BTreeMap<String, IndexInfo>,
    pub row_count: u64,
    pub page_count: u64,
    pub column_stats: BTreeMap<String, ColumnStats>,
}

impl TableInfo {
    pub fn new(name: &str, columns: Vec<ColumnInfo>) -> Self {
        Self {
            name: name.to_string(),
            columns,
            indexes: BTreeMap::new(),
            row_count: 0,
            page_count: 0,
            column_stats: BTreeMap::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_key(&self) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.is_primary_key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewInfo {
    pub name: String,
    pub definition_sql: String,
    pub creator: String,
    pub is_updatable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerTiming {
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerEvent {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub name: String,
    pub table: String,
    pub timing: TriggerTiming,
    pub events: Vec<TriggerEvent>,
    pub row_level: bool,
    pub when_sql: Option<String>,
    pub body_sql: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseCatalog {
    pub tables: BTreeMap<String, TableInfo>,
    pub views: BTreeMap<String, ViewInfo>,
    pub triggers: BTreeMap<String, TriggerInfo>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogInner {
    databases: BTreeMap<String, DatabaseCatalog>,
}

/// Thread-safe catalog handle. Readers take the lock briefly and clone what
/// they need; the optimizer works from a `DatabaseCatalog` snapshot.
pub struct Catalog {
    inner: RwLock<CatalogInner>,
    path: Option<PathBuf>,
}

impl Catalog {
    pub fn new_in_memory() -> Self {
        let mut inner = CatalogInner::default();
        inner.databases.insert(DEFAULT_DATABASE.to_string(), DatabaseCatalog::default());
        Self { inner: RwLock::new(inner), path: None }
    }

    /// Open (or initialize) the catalog file under the data directory.
    pub fn open(data_dir: &Path) -> EngineResult<Self> {
        let path = data_dir.join("catalog.json");
        let inner = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str(&text)
                .map_err(|e| EngineError::io(format!("catalog file corrupt: {}", e)))?
        } else {
            let mut fresh = CatalogInner::default();
            fresh.databases.insert(DEFAULT_DATABASE.to_string(), DatabaseCatalog::default());
            fresh
        };
        Ok(Self { inner: RwLock::new(inner), path: Some(path) })
    }

    /// Persist the catalog file. Called at checkpoint and clean shutdown.
    pub fn save(&self) -> EngineResult<()> {
        let path = match &self.path {
            Some(p) => p.clone(),
            None => return Ok(()),
        };
        let inner = self.inner.read();
        let text = serde_json::to_string_pretty(&*inner)
            .map_err(|e| EngineError::io(format!("catalog serialize failed: {}", e)))?;
        std::fs::write(&path, text)?;
        debug!(target: "opaldb::catalog", "catalog saved to '{}'", path.display());
        Ok(())
    }

    // ---- databases ----

    pub fn create_database(&self, name: &str) -> EngineResult<()> {
        let mut inner = self.inner.write();
        if inner.databases.contains_key(name) {
            return Err(EngineError::semantic(vec![format!("database '{}' already exists", name)]));
        }
        inner.databases.insert(name.to_string(), DatabaseCatalog::default());
        Ok(())
    }

    pub fn drop_database(&self, name: &str) -> EngineResult<()> {
        let mut inner = self.inner.write();
        if inner.databases.remove(name).is_none() {
            return Err(EngineError::semantic(vec![format!("database '{}' does not exist", name)]));
        }
        Ok(())
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.inner.read().databases.contains_key(name)
    }

    pub fn list_databases(&self) -> Vec<String> {
        self.inner.read().databases.keys().cloned().collect()
    }

    /// Immutable statistics snapshot of one database, taken at plan time.
    pub fn snapshot(&self, db: &str) -> EngineResult<DatabaseCatalog> {
        self.inner
            .read()
            .databases
            .get(db)
            .cloned()
            .ok_or_else(|| EngineError::semantic(vec![format!("database '{}' does not exist", db)]))
    }

    // ---- tables ----

    pub fn get_table(&self, db: &str, name: &str) -> EngineResult<TableInfo> {
        let inner = self.inner.read();
        inner
            .databases
            .get(db)
            .and_then(|d| d.tables.get(&name.to_lowercase()))
            .cloned()
            .ok_or_else(|| EngineError::semantic(vec![format!("table '{}' does not exist", name)]))
    }

    pub fn has_table(&self, db: &str, name: &str) -> bool {
        let inner = self.inner.read();
        inner
            .databases
            .get(db)
            .map(|d| d.tables.contains_key(&name.to_lowercase()))
            .unwrap_or(false)
    }

    pub fn list_tables(&self, db: &str) -> Vec<String> {
        let inner = self.inner.read();
        inner
            .databases
            .get(db)
            .map(|d| d.tables.values().map(|t| t.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn insert_table(&self, db: &str, info: TableInfo) -> EngineResult<()> {
        let mut inner = self.inner.write();
        let dbc = inner
            .databases
            .get_mut(db)
            .ok_or_else(|| EngineError::semantic(vec![format!("database '{}' does not exist", db)]))?;
        let key = info.name.to_lowercase();
        if dbc.tables.contains_key(&key) {
            return Err(EngineError::semantic(vec![format!(
                "table '{}' already exists",
                info.name
            )]));
        }
        dbc.tables.insert(key, info);
        Ok(())
    }

    pub fn remove_table(&self, db: &str, name: &str) -> EngineResult<TableInfo> {
        let mut inner = self.inner.write();
        let dbc = inner
            .databases
            .get_mut(db)
            .ok_or_else(|| EngineError::semantic(vec![format!("database '{}' does not exist", db)]))?;
        dbc.tables
            .remove(&name.to_lowercase())
            .ok_or_else(|| EngineError::semantic(vec![format!("table '{}' does not exist", name)]))
    }

    /// Apply a closure to a table entry in place (stats maintenance, index
    /// registration). Errors if the table is gone.
    pub fn with_table_mut<F, R>(&self, db: &str, name: &str, f: F) -> EngineResult<R>
    where
        F: FnOnce(&mut TableInfo) -> EngineResult<R>,
    {
        let mut inner = self.inner.write();
        let table = inner
            .databases
            .get_mut(db)
            .and_then(|d| d.tables.get_mut(&name.to_lowercase()))
            .ok_or_else(|| EngineError::semantic(vec![format!("table '{}' does not exist", name)]))?;
        f(table)
    }

    /// Row/page count maintenance after DML, feeding the cost model.
    pub fn stats_after_dml(&self, db: &str, table: &str, inserted: u64, deleted: u64) {
        let _ = self.with_table_mut(db, table, |t| {
            t.row_count = t.row_count.saturating_add(inserted).saturating_sub(deleted);
            t.page_count = t.row_count.div_ceil(ROWS_PER_PAGE);
            Ok(())
        });
    }

    // ---- indexes ----

    pub fn has_index_on(&self, db: &str, table: &str, column: &str) -> bool {
        self.get_index_by_column(db, table, column).is_some()
    }

    pub fn get_index_by_column(&self, db: &str, table: &str, column: &str) -> Option<String> {
        let inner = self.inner.read();
        let t = inner.databases.get(db)?.tables.get(&table.to_lowercase())?;
        t.indexes
            .values()
            .find(|idx| idx.columns.len() == 1 && idx.columns[0].eq_ignore_ascii_case(column))
            .map(|idx| idx.name.clone())
    }

    pub fn get_column_stats(&self, db: &str, table: &str, column: &str) -> Option<ColumnStats> {
        let inner = self.inner.read();
        let t = inner.databases.get(db)?.tables.get(&table.to_lowercase())?;
        t.column_stats.get(&column.to_lowercase()).cloned()
    }

    pub fn set_column_stats(&self, db: &str, table: &str, column: &str, stats: ColumnStats) {
        let _ = self.with_table_mut(db, table, |t| {
            t.column_stats.insert(column.to_lowercase(), stats);
            Ok(())
        });
    }

    // ---- views ----

    pub fn get_view(&self, db: &str, name: &str) -> Option<ViewInfo> {
        self.inner
            .read()
            .databases
            .get(db)
            .and_then(|d| d.views.get(&name.to_lowercase()))
            .cloned()
    }

    pub fn list_views(&self, db: &str) -> Vec<ViewInfo> {
        self.inner
            .read()
            .databases
            .get(db)
            .map(|d| d.views.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn insert_view(&self, db: &str, info: ViewInfo) -> EngineResult<()> {
        let mut inner = self.inner.write();
        let dbc = inner
            .databases
            .get_mut(db)
            .ok_or_else(|| EngineError::semantic(vec![format!("database '{}' does not exist", db)]))?;
        let key = info.name.to_lowercase();
        if dbc.views.contains_key(&key) {
            return Err(EngineError::semantic(vec![format!("view '{}' already exists", info.name)]));
        }
        dbc.views.insert(key, info);
        Ok(())
    }

    pub fn replace_view(&self, db: &str, info: ViewInfo) -> EngineResult<Option<ViewInfo>> {
        let mut inner = self.inner.write();
        let dbc = inner
            .databases
            .get_mut(db)
            .ok_or_else(|| EngineError::semantic(vec![format!("database '{}' does not exist", db)]))?;
        Ok(dbc.views.insert(info.name.to_lowercase(), info))
    }

    pub fn remove_view(&self, db: &str, name: &str) -> EngineResult<ViewInfo> {
        let mut inner = self.inner.write();
        let dbc = inner
            .databases
            .get_mut(db)
            .ok_or_else(|| EngineError::semantic(vec![format!("database '{}' does not exist", db)]))?;
        dbc.views
            .remove(&name.to_lowercase())
            .ok_or_else(|| EngineError::semantic(vec![format!("view '{}' does not exist", name)]))
    }

    // ---- triggers ----

    pub fn get_trigger(&self, db: &str, name: &str) -> Option<TriggerInfo> {
        self.inner
            .read()
            .databases
            .get(db)
            .and_then(|d| d.triggers.get(&name.to_lowercase()))
            .cloned()
    }

    pub fn list_triggers(&self, db: &str) -> Vec<TriggerInfo> {
        self.inner
            .read()
            .databases
            .get(db)
            .map(|d| d.triggers.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn insert_trigger(&self, db: &str, info: TriggerInfo) -> EngineResult<()> {
        let mut inner = self.inner.write();
        let dbc = inner
            .databases
            .get_mut(db)
            .ok_or_else(|| EngineError::semantic(vec![format!("database '{}' does not exist", db)]))?;
        let key = info.name.to_lowercase();
        if dbc.triggers.contains_key(&key) {
            return Err(EngineError::semantic(vec![format!(
                "trigger '{}' already exists",
                info.name
            )]));
        }
        dbc.triggers.insert(key, info);
        Ok(())
    }

    pub fn remove_trigger(&self, db: &str, name: &str) -> EngineResult<TriggerInfo> {
        let mut inner = self.inner.write();
        let dbc = inner
            .databases
            .get_mut(db)
            .ok_or_else(|| EngineError::semantic(vec![format!("database '{}' does not exist", db)]))?;
        dbc.triggers
            .remove(&name.to_lowercase())
            .ok_or_else(|| EngineError::semantic(vec![format!("trigger '{}' does not exist", name)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, ty: DataType, pk: bool) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            data_type: ty,
            nullable: !pk,
            default: None,
            is_primary_key: pk,
        }
    }

    #[test]
    fn table_lifecycle() {
        let cat = Catalog::new_in_memory();
        let info = TableInfo::new("users", vec![col("id", DataType::Int, true)]);
        cat.insert_table(DEFAULT_DATABASE, info).unwrap();
        assert!(cat.has_table(DEFAULT_DATABASE, "USERS"));
        assert!(cat.insert_table(DEFAULT_DATABASE, TableInfo::new("users", vec![])).is_err());
        let got = cat.get_table(DEFAULT_DATABASE, "users").unwrap();
        assert_eq!(got.columns.len(), 1);
        cat.remove_table(DEFAULT_DATABASE, "users").unwrap();
        assert!(!cat.has_table(DEFAULT_DATABASE, "users"));
    }

    #[test]
    fn index_lookup_by_column() {
        let cat = Catalog::new_in_memory();
        let mut info = TableInfo::new(
            "t",
            vec![col("id", DataType::Int, true), col("name", DataType::Varchar, false)],
        );
        info.indexes.insert(
            "idx_name".into(),
            IndexInfo {
                name: "idx_name".into(),
                columns: vec!["name".into()],
                unique: false,
                method: IndexMethod::Btree,
                file_name: "t_idx_name.idx".into(),
                key_types: vec![DataType::Varchar],
            },
        );
        cat.insert_table(DEFAULT_DATABASE, info).unwrap();
        assert!(cat.has_index_on(DEFAULT_DATABASE, "t", "NAME"));
        assert_eq!(
            cat.get_index_by_column(DEFAULT_DATABASE, "t", "name").as_deref(),
            Some("idx_name")
        );
        assert!(!cat.has_index_on(DEFAULT_DATABASE, "t", "missing"));
    }

    #[test]
    fn dml_stats_maintenance() {
        let cat = Catalog::new_in_memory();
        cat.insert_table(DEFAULT_DATABASE, TableInfo::new("t", vec![col("id", DataType::Int, true)]))
            .unwrap();
        cat.stats_after_dml(DEFAULT_DATABASE, "t", 300, 0);
        let t = cat.get_table(DEFAULT_DATABASE, "t").unwrap();
        assert_eq!(t.row_count, 300);
        assert_eq!(t.page_count, 2);
        cat.stats_after_dml(DEFAULT_DATABASE, "t", 0, 300);
        let t = cat.get_table(DEFAULT_DATABASE, "t").unwrap();
        assert_eq!(t.row_count, 0);
        assert_eq!(t.page_count, 0);
    }

    #[test]
    fn persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cat = Catalog::open(dir.path()).unwrap();
            cat.create_database("analytics").unwrap();
            cat.insert_table("analytics", TableInfo::new("events", vec![col("id", DataType::Int, true)]))
                .unwrap();
            cat.save().unwrap();
        }
        let cat = Catalog::open(dir.path()).unwrap();
        assert!(cat.has_database("analytics"));
        assert!(cat.has_table("analytics", "events"));
    }
}
