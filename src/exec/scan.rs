//! Scan operators: sequential heap scan and equality index lookup.

use crate::error::EngineResult;
use crate::exec::{Batch, ExecContext, PhysicalOperator, Schema};
use crate::storage::RowId;
use crate::txn::lock::LockTarget;
use crate::value::Value;

/// Forward scan in insertion order. Takes a table-level S lock for the
/// duration of the scan and releases it at end-of-stream (READ COMMITTED
/// keeps read locks only while reading).
pub struct SeqScan {
    db: String,
    table: String,
    schema: Schema,
    rows: Option<Box<dyn Iterator<Item = (RowId, Vec<Value>)> + Send>>,
    done: bool,
}

impl SeqScan {
    pub fn new(db: String, table: String, schema: Schema) -> Self {
        Self { db, table, schema, rows: None, done: false }
    }

    fn lock_target(&self) -> LockTarget {
        LockTarget::Table(format!("{}.{}", self.db.to_lowercase(), self.table.to_lowercase()))
    }
}

impl PhysicalOperator for SeqScan {
    fn name(&self) -> String {
        format!("SeqScan({})", self.table)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self, ctx: &mut ExecContext) -> EngineResult<Option<Batch>> {
        if self.done {
            return Ok(None);
        }
        if self.rows.is_none() {
            ctx.locks.lock_shared(ctx.txn.id(), self.lock_target())?;
            self.rows = Some(ctx.storage.scan(&ctx.txn, &self.db, &self.table)?);
            ctx.pages_touched += 1;
        }
        let iter = self.rows.as_mut().expect("scanner initialized");
        let mut batch = Batch::new();
        for (row_id, values) in iter.by_ref() {
            batch.rows.push((row_id, values));
            if batch.len() >= ctx.batch_size {
                break;
            }
        }
        ctx.pages_touched += (batch.len() / crate::storage::heap::PAGE_CAPACITY.max(1)) as u64;
        if batch.is_empty() {
            self.done = true;
            self.rows = None;
            ctx.locks.unlock(ctx.txn.id(), &self.lock_target());
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }
}

/// Equality index lookup. The lookup resolves every matching row id on the
/// first `next()`; batches stream out bounded by the batch size (a
/// non-unique index can match arbitrarily many rows), in index order.
pub struct IndexScan {
    db: String,
    table: String,
    index: String,
    key: Vec<Value>,
    schema: Schema,
    row_ids: Option<std::vec::IntoIter<crate::storage::RowId>>,
    done: bool,
}

impl IndexScan {
    pub fn new(db: String, table: String, index: String, key: Vec<Value>, schema: Schema) -> Self {
        Self { db, table, index, key, schema, row_ids: None, done: false }
    }

    fn lock_target(&self) -> LockTarget {
        LockTarget::Table(format!("{}.{}", self.db.to_lowercase(), self.table.to_lowercase()))
    }
}

impl PhysicalOperator for IndexScan {
    fn name(&self) -> String {
        let keys: Vec<String> = self.key.iter().map(|v| v.to_string()).collect();
        format!("IndexScan({}, {}, key=({}))", self.table, self.index, keys.join(", "))
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self, ctx: &mut ExecContext) -> EngineResult<Option<Batch>> {
        if self.done {
            return Ok(None);
        }
        if self.row_ids.is_none() {
            ctx.locks.lock_shared(ctx.txn.id(), self.lock_target())?;
            let row_ids = ctx.storage.find_all_by_index(
                &ctx.txn,
                &self.db,
                &self.table,
                &self.index,
                &self.key,
            )?;
            ctx.pages_touched += 1;
            self.row_ids = Some(row_ids.into_iter());
        }
        let iter = self.row_ids.as_mut().expect("lookup resolved");
        let mut batch = Batch::new();
        for row_id in iter.by_ref() {
            if let Some((rid, values)) =
                ctx.storage.get_row(&ctx.txn, &self.db, &self.table, row_id)?
            {
                batch.rows.push((rid, values));
            }
            if batch.len() >= ctx.batch_size {
                break;
            }
        }
        if batch.is_empty() {
            self.done = true;
            self.row_ids = None;
            ctx.locks.unlock(ctx.txn.id(), &self.lock_target());
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }
}

/// One synthetic empty row, input of a FROM-less projection.
pub struct ConstRow {
    schema: Schema,
    done: bool,
}

impl ConstRow {
    pub fn new() -> Self {
        Self { schema: Schema::default(), done: false }
    }
}

impl Default for ConstRow {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicalOperator for ConstRow {
    fn name(&self) -> String {
        "ConstRow".to_string()
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self, _ctx: &mut ExecContext) -> EngineResult<Option<Batch>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let mut batch = Batch::new();
        batch.rows.push((RowId { page_id: 0, slot: 0 }, Vec::new()));
        Ok(Some(batch))
    }
}
