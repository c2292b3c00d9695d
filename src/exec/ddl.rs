//! DDL operators. Each runs under the exclusive catalog lock for the
//! duration of its `execute()` and routes the change through the storage
//! engine so the WAL record precedes catalog visibility.

use crate::catalog::{ColumnInfo, IndexInfo, IndexMethod, TriggerInfo, ViewInfo};
use crate::error::{EngineError, EngineResult};
use crate::exec::{ExecContext, PhysicalOperator, Schema};
use crate::txn::lock::LockTarget;

fn lock_catalog(ctx: &ExecContext) -> EngineResult<()> {
    ctx.locks.lock_exclusive(ctx.txn.id(), LockTarget::Catalog)
}

pub struct CreateTable {
    name: String,
    columns: Vec<ColumnInfo>,
    schema: Schema,
}

impl CreateTable {
    pub fn new(name: String, columns: Vec<ColumnInfo>) -> Self {
        Self { name, columns, schema: Schema::default() }
    }
}

impl PhysicalOperator for CreateTable {
    fn name(&self) -> String {
        format!("CreateTable({})", self.name)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn execute(&mut self, ctx: &mut ExecContext) -> EngineResult<String> {
        lock_catalog(ctx)?;
        ctx.storage.create_table(&ctx.txn, &ctx.db, &self.name, &self.columns)
    }
}

pub struct DropTable {
    name: String,
    if_exists: bool,
    schema: Schema,
}

impl DropTable {
    pub fn new(name: String, if_exists: bool) -> Self {
        Self { name, if_exists, schema: Schema::default() }
    }
}

impl PhysicalOperator for DropTable {
    fn name(&self) -> String {
        format!("DropTable({})", self.name)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn execute(&mut self, ctx: &mut ExecContext) -> EngineResult<String> {
        lock_catalog(ctx)?;
        ctx.storage.drop_table(&ctx.txn, &ctx.db, &self.name, self.if_exists)
    }
}

pub struct CreateIndex {
    name: String,
    table: String,
    columns: Vec<String>,
    unique: bool,
    schema: Schema,
}

impl CreateIndex {
    pub fn new(name: String, table: String, columns: Vec<String>, unique: bool) -> Self {
        Self { name, table, columns, unique, schema: Schema::default() }
    }
}

impl PhysicalOperator for CreateIndex {
    fn name(&self) -> String {
        format!("CreateIndex({} ON {})", self.name, self.table)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn execute(&mut self, ctx: &mut ExecContext) -> EngineResult<String> {
        lock_catalog(ctx)?;
        let table_info = ctx.catalog.get_table(&ctx.db, &self.table)?;
        let key_types = self
            .columns
            .iter()
            .map(|c| {
                table_info
                    .column(c)
                    .map(|col| col.data_type)
                    .ok_or_else(|| {
                        EngineError::semantic(vec![format!(
                            "index column '{}' not in table '{}'",
                            c, self.table
                        )])
                    })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        let info = IndexInfo {
            name: self.name.clone(),
            columns: self.columns.clone(),
            unique: self.unique,
            method: IndexMethod::Btree,
            file_name: format!("{}_{}.idx", self.table.to_lowercase(), self.name.to_lowercase()),
            key_types,
        };
        let (created, message) = ctx.storage.create_index(&ctx.txn, &ctx.db, &self.table, info)?;
        if !created {
            return Err(EngineError::semantic(vec![message]));
        }
        Ok(message)
    }
}

pub struct DropIndex {
    name: String,
    table: Option<String>,
    schema: Schema,
}

impl DropIndex {
    pub fn new(name: String, table: Option<String>) -> Self {
        Self { name, table, schema: Schema::default() }
    }
}

impl PhysicalOperator for DropIndex {
    fn name(&self) -> String {
        format!("DropIndex({})", self.name)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn execute(&mut self, ctx: &mut ExecContext) -> EngineResult<String> {
        lock_catalog(ctx)?;
        let table = match &self.table {
            Some(t) => t.clone(),
            None => {
                // Resolve the owning table from the catalog.
                let needle = self.name.to_lowercase();
                ctx.catalog
                    .list_tables(&ctx.db)
                    .into_iter()
                    .find(|t| {
                        ctx.catalog
                            .get_table(&ctx.db, t)
                            .map(|info| info.indexes.contains_key(&needle))
                            .unwrap_or(false)
                    })
                    .ok_or_else(|| {
                        EngineError::semantic(vec![format!(
                            "index '{}' does not exist",
                            self.name
                        )])
                    })?
            }
        };
        ctx.storage.drop_index(&ctx.txn, &ctx.db, &table, &self.name)?;
        Ok(format!("Index '{}' dropped.", self.name))
    }
}

pub struct CreateView {
    name: String,
    definition_sql: String,
    schema: Schema,
}

impl CreateView {
    pub fn new(name: String, definition_sql: String) -> Self {
        Self { name, definition_sql, schema: Schema::default() }
    }
}

impl PhysicalOperator for CreateView {
    fn name(&self) -> String {
        format!("CreateView({})", self.name)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn execute(&mut self, ctx: &mut ExecContext) -> EngineResult<String> {
        lock_catalog(ctx)?;
        let info = ViewInfo {
            name: self.name.clone(),
            definition_sql: self.definition_sql.clone(),
            creator: std::env::var("USER").unwrap_or_else(|_| "opaldb".to_string()),
            is_updatable: false,
        };
        ctx.storage.create_view(&ctx.txn, &ctx.db, info)?;
        Ok(format!("View '{}' created.", self.name))
    }
}

pub struct AlterView {
    name: String,
    definition_sql: String,
    schema: Schema,
}

impl AlterView {
    pub fn new(name: String, definition_sql: String) -> Self {
        Self { name, definition_sql, schema: Schema::default() }
    }
}

impl PhysicalOperator for AlterView {
    fn name(&self) -> String {
        format!("AlterView({})", self.name)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn execute(&mut self, ctx: &mut ExecContext) -> EngineResult<String> {
        lock_catalog(ctx)?;
        let existing = ctx.catalog.get_view(&ctx.db, &self.name).ok_or_else(|| {
            EngineError::semantic(vec![format!("view '{}' does not exist", self.name)])
        })?;
        let info = ViewInfo {
            definition_sql: self.definition_sql.clone(),
            ..existing
        };
        ctx.storage.alter_view(&ctx.txn, &ctx.db, info)?;
        Ok(format!("View '{}' altered.", self.name))
    }
}

pub struct DropView {
    name: String,
    schema: Schema,
}

impl DropView {
    pub fn new(name: String) -> Self {
        Self { name, schema: Schema::default() }
    }
}

impl PhysicalOperator for DropView {
    fn name(&self) -> String {
        format!("DropView({})", self.name)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn execute(&mut self, ctx: &mut ExecContext) -> EngineResult<String> {
        lock_catalog(ctx)?;
        ctx.storage.delete_view(&ctx.txn, &ctx.db, &self.name)?;
        Ok(format!("View '{}' dropped.", self.name))
    }
}

pub struct CreateTrigger {
    info: TriggerInfo,
    schema: Schema,
}

impl CreateTrigger {
    pub fn new(info: TriggerInfo) -> Self {
        Self { info, schema: Schema::default() }
    }
}

impl PhysicalOperator for CreateTrigger {
    fn name(&self) -> String {
        format!("CreateTrigger({} ON {})", self.info.name, self.info.table)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn execute(&mut self, ctx: &mut ExecContext) -> EngineResult<String> {
        lock_catalog(ctx)?;
        if !ctx.catalog.has_table(&ctx.db, &self.info.table) {
            return Err(EngineError::semantic(vec![format!(
                "table '{}' does not exist",
                self.info.table
            )]));
        }
        ctx.storage.create_trigger(&ctx.txn, &ctx.db, self.info.clone())?;
        Ok(format!("Trigger '{}' created.", self.info.name))
    }
}

pub struct DropTrigger {
    name: String,
    schema: Schema,
}

impl DropTrigger {
    pub fn new(name: String) -> Self {
        Self { name, schema: Schema::default() }
    }
}

impl PhysicalOperator for DropTrigger {
    fn name(&self) -> String {
        format!("DropTrigger({})", self.name)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn execute(&mut self, ctx: &mut ExecContext) -> EngineResult<String> {
        lock_catalog(ctx)?;
        ctx.storage.delete_trigger(&ctx.txn, &ctx.db, &self.name)?;
        Ok(format!("Trigger '{}' dropped.", self.name))
    }
}

/// CREATE/DROP DATABASE mutate the catalog file directly (not WAL-logged;
/// the §3 record set has no database kinds, so recovery never replays them).
pub struct CreateDatabase {
    name: String,
    schema: Schema,
}

impl CreateDatabase {
    pub fn new(name: String) -> Self {
        Self { name, schema: Schema::default() }
    }
}

impl PhysicalOperator for CreateDatabase {
    fn name(&self) -> String {
        format!("CreateDatabase({})", self.name)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn execute(&mut self, ctx: &mut ExecContext) -> EngineResult<String> {
        lock_catalog(ctx)?;
        ctx.catalog.create_database(&self.name)?;
        ctx.catalog.save()?;
        Ok(format!("Database '{}' created.", self.name))
    }
}

pub struct DropDatabase {
    name: String,
    schema: Schema,
}

impl DropDatabase {
    pub fn new(name: String) -> Self {
        Self { name, schema: Schema::default() }
    }
}

impl PhysicalOperator for DropDatabase {
    fn name(&self) -> String {
        format!("DropDatabase({})", self.name)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn execute(&mut self, ctx: &mut ExecContext) -> EngineResult<String> {
        lock_catalog(ctx)?;
        if self.name == crate::catalog::DEFAULT_DATABASE {
            return Err(EngineError::semantic(vec![
                "the default database cannot be dropped".to_string(),
            ]));
        }
        ctx.catalog.drop_database(&self.name)?;
        ctx.catalog.save()?;
        Ok(format!("Database '{}' dropped.", self.name))
    }
}
