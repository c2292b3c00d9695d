//! Filter and Project operators.

use crate::error::EngineResult;
use crate::exec::eval::Evaluator;
use crate::exec::{Batch, ExecContext, PhysicalOperator, Schema};

/// Keeps rows whose predicate evaluates truthy, rebuffering residuals so
/// emitted batches respect the batch size.
pub struct Filter {
    child: Box<dyn PhysicalOperator>,
    predicate: Evaluator,
    label: String,
    buffer: Batch,
    exhausted: bool,
    done: bool,
}

impl Filter {
    pub fn new(child: Box<dyn PhysicalOperator>, predicate: Evaluator, label: String) -> Self {
        Self { child, predicate, label, buffer: Batch::new(), exhausted: false, done: false }
    }
}

impl PhysicalOperator for Filter {
    fn name(&self) -> String {
        format!("Filter({})", self.label)
    }

    fn schema(&self) -> &Schema {
        self.child.schema()
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }

    fn next(&mut self, ctx: &mut ExecContext) -> EngineResult<Option<Batch>> {
        if self.done {
            return Ok(None);
        }
        while self.buffer.len() < ctx.batch_size && !self.exhausted {
            match self.child.next(ctx)? {
                None => self.exhausted = true,
                Some(batch) => {
                    for (row_id, values) in batch.rows {
                        if (self.predicate)(&values)?.is_truthy() {
                            self.buffer.rows.push((row_id, values));
                        }
                    }
                }
            }
            ctx.note_buffered(self.buffer.len());
        }
        if self.buffer.is_empty() {
            self.done = true;
            return Ok(None);
        }
        let take = self.buffer.len().min(ctx.batch_size);
        let rest = self.buffer.rows.split_off(take);
        let out = std::mem::replace(&mut self.buffer.rows, rest);
        Ok(Some(Batch { rows: out }))
    }
}

/// Computes the projected expressions per row, preserving row ids.
pub struct Project {
    child: Box<dyn PhysicalOperator>,
    exprs: Vec<Evaluator>,
    schema: Schema,
    labels: Vec<String>,
}

impl Project {
    pub fn new(
        child: Box<dyn PhysicalOperator>,
        exprs: Vec<Evaluator>,
        schema: Schema,
        labels: Vec<String>,
    ) -> Self {
        Self { child, exprs, schema, labels }
    }
}

impl PhysicalOperator for Project {
    fn name(&self) -> String {
        format!("Project({})", self.labels.join(", "))
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }

    fn next(&mut self, ctx: &mut ExecContext) -> EngineResult<Option<Batch>> {
        let batch = match self.child.next(ctx)? {
            Some(b) => b,
            None => return Ok(None),
        };
        let mut out = Batch::new();
        for (row_id, values) in batch.rows {
            let mut projected = Vec::with_capacity(self.exprs.len());
            for expr in &self.exprs {
                projected.push(expr(&values)?);
            }
            out.rows.push((row_id, projected));
        }
        Ok(Some(out))
    }
}

/// Sort (blocking) and Limit.
pub struct Sort {
    child: Box<dyn PhysicalOperator>,
    /// (column index in child output, ascending)
    keys: Vec<(usize, bool)>,
    labels: Vec<String>,
    sorted: Option<std::vec::IntoIter<(crate::storage::RowId, Vec<crate::value::Value>)>>,
}

impl Sort {
    pub fn new(
        child: Box<dyn PhysicalOperator>,
        keys: Vec<(usize, bool)>,
        labels: Vec<String>,
    ) -> Self {
        Self { child, keys, labels, sorted: None }
    }
}

impl PhysicalOperator for Sort {
    fn name(&self) -> String {
        format!("Sort({})", self.labels.join(", "))
    }

    fn schema(&self) -> &Schema {
        self.child.schema()
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }

    fn next(&mut self, ctx: &mut ExecContext) -> EngineResult<Option<Batch>> {
        if self.sorted.is_none() {
            let mut rows = Vec::new();
            while let Some(batch) = self.child.next(ctx)? {
                rows.extend(batch.rows);
                ctx.note_buffered(rows.len());
            }
            let keys = self.keys.clone();
            // Stable sort preserves row-id order within equal keys.
            rows.sort_by(|(_, a), (_, b)| {
                for (idx, asc) in &keys {
                    let ord = a[*idx].total_cmp(&b[*idx]);
                    let ord = if *asc { ord } else { ord.reverse() };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
            self.sorted = Some(rows.into_iter());
        }
        let iter = self.sorted.as_mut().expect("sorted rows ready");
        let mut batch = Batch::new();
        for row in iter.by_ref() {
            batch.rows.push(row);
            if batch.len() >= ctx.batch_size {
                break;
            }
        }
        if batch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }
}

/// Skips `offset` rows then emits up to `limit` rows.
pub struct Limit {
    child: Box<dyn PhysicalOperator>,
    limit: Option<u64>,
    offset: u64,
    skipped: u64,
    emitted: u64,
    done: bool,
}

impl Limit {
    pub fn new(child: Box<dyn PhysicalOperator>, limit: Option<u64>, offset: Option<u64>) -> Self {
        Self {
            child,
            limit,
            offset: offset.unwrap_or(0),
            skipped: 0,
            emitted: 0,
            done: false,
        }
    }
}

impl PhysicalOperator for Limit {
    fn name(&self) -> String {
        match self.limit {
            Some(l) => format!("Limit({}, offset {})", l, self.offset),
            None => format!("Limit(all, offset {})", self.offset),
        }
    }

    fn schema(&self) -> &Schema {
        self.child.schema()
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }

    fn next(&mut self, ctx: &mut ExecContext) -> EngineResult<Option<Batch>> {
        if self.done {
            return Ok(None);
        }
        loop {
            let batch = match self.child.next(ctx)? {
                Some(b) => b,
                None => {
                    self.done = true;
                    return Ok(None);
                }
            };
            let mut out = Batch::new();
            for row in batch.rows {
                if self.skipped < self.offset {
                    self.skipped += 1;
                    continue;
                }
                if let Some(limit) = self.limit {
                    if self.emitted >= limit {
                        self.done = true;
                        break;
                    }
                }
                self.emitted += 1;
                out.rows.push(row);
            }
            if !out.is_empty() {
                return Ok(Some(out));
            }
            if self.done {
                return Ok(None);
            }
        }
    }
}
