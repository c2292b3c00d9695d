//! DML operators: Insert, Update, Delete. All terminal; each acquires row
//! X locks before mutating and routes the change through the storage
//! engine, which appends the WAL record ahead of the in-memory effect.

use tracing::debug;

use crate::error::EngineResult;
use crate::exec::eval::Evaluator;
use crate::exec::{drain, ExecContext, PhysicalOperator, Schema};
use crate::storage::RowId;
use crate::txn::lock::LockTarget;
use crate::value::Value;

fn table_key(db: &str, table: &str) -> String {
    format!("{}.{}", db.to_lowercase(), table.to_lowercase())
}

/// Inserts pre-evaluated rows. Values were computed at build time (INSERT
/// sources are constant expressions), with DEFAULT/NULL fill-in for columns
/// missing from a named column list.
pub struct Insert {
    db: String,
    table: String,
    rows: Vec<Vec<Value>>,
    schema: Schema,
}

impl Insert {
    pub fn new(db: String, table: String, rows: Vec<Vec<Value>>) -> Self {
        Self { db, table, rows, schema: Schema::default() }
    }
}

impl PhysicalOperator for Insert {
    fn name(&self) -> String {
        format!("Insert({}, {} row(s))", self.table, self.rows.len())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn execute(&mut self, ctx: &mut ExecContext) -> EngineResult<String> {
        ctx.txn.ensure_active()?;
        let rows = std::mem::take(&mut self.rows);
        let count = rows.len();
        for values in rows {
            let row_id = ctx.storage.insert_row(&ctx.txn, &self.db, &self.table, values)?;
            // Hold the new row exclusively until commit.
            ctx.locks.lock_exclusive(
                ctx.txn.id(),
                LockTarget::Row(table_key(&self.db, &self.table), row_id),
            )?;
        }
        debug!(target: "opaldb::exec", "inserted {} row(s) into '{}'", count, self.table);
        Ok(format!("{} rows inserted.", count))
    }
}

/// Updates each row produced by the child (typically SeqScan+Filter) by
/// replacing the set columns with evaluated expressions over the original
/// row.
pub struct Update {
    child: Box<dyn PhysicalOperator>,
    db: String,
    table: String,
    /// (column index, new-value expression over the original row)
    sets: Vec<(usize, Evaluator)>,
    set_labels: Vec<String>,
    schema: Schema,
}

impl Update {
    pub fn new(
        child: Box<dyn PhysicalOperator>,
        db: String,
        table: String,
        sets: Vec<(usize, Evaluator)>,
        set_labels: Vec<String>,
    ) -> Self {
        Self { child, db, table, sets, set_labels, schema: Schema::default() }
    }
}

impl PhysicalOperator for Update {
    fn name(&self) -> String {
        format!("Update({}, SET {})", self.table, self.set_labels.join(", "))
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }

    fn execute(&mut self, ctx: &mut ExecContext) -> EngineResult<String> {
        ctx.txn.ensure_active()?;
        let batches = drain(self.child.as_mut(), ctx)?;
        let key = table_key(&self.db, &self.table);
        let mut count = 0usize;
        for batch in batches {
            for (row_id, values) in batch.rows {
                ctx.locks
                    .lock_exclusive(ctx.txn.id(), LockTarget::Row(key.clone(), row_id))?;
                let mut new_values = values.clone();
                for (idx, eval) in &self.sets {
                    new_values[*idx] = eval(&values)?;
                }
                ctx.storage.update_row(&ctx.txn, &self.db, &self.table, row_id, new_values)?;
                count += 1;
            }
        }
        debug!(target: "opaldb::exec", "updated {} row(s) in '{}'", count, self.table);
        Ok(format!("{} rows updated.", count))
    }
}

/// Collects target row ids from the child, sorts them descending by
/// (page, slot) to avoid slot-invalidation hazards, then deletes.
pub struct Delete {
    child: Box<dyn PhysicalOperator>,
    db: String,
    table: String,
    schema: Schema,
}

impl Delete {
    pub fn new(child: Box<dyn PhysicalOperator>, db: String, table: String) -> Self {
        Self { child, db, table, schema: Schema::default() }
    }
}

impl PhysicalOperator for Delete {
    fn name(&self) -> String {
        format!("Delete({})", self.table)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }

    fn execute(&mut self, ctx: &mut ExecContext) -> EngineResult<String> {
        ctx.txn.ensure_active()?;
        let batches = drain(self.child.as_mut(), ctx)?;
        let mut row_ids: Vec<RowId> = batches
            .into_iter()
            .flat_map(|b| b.rows.into_iter().map(|(rid, _)| rid))
            .collect();
        row_ids.sort_by(|a, b| b.cmp(a));
        row_ids.dedup();
        let key = table_key(&self.db, &self.table);
        let count = row_ids.len();
        for row_id in row_ids {
            ctx.locks
                .lock_exclusive(ctx.txn.id(), LockTarget::Row(key.clone(), row_id))?;
            ctx.storage.delete_row(&ctx.txn, &self.db, &self.table, row_id)?;
        }
        debug!(target: "opaldb::exec", "deleted {} row(s) from '{}'", count, self.table);
        Ok(format!("{} rows deleted.", count))
    }
}
