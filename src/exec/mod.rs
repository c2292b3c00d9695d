//! Volcano execution engine: batched pull operators.
//!
//! Every physical operator implements `PhysicalOperator` and exactly one of
//! `next()` (producing operators, emitting batches of at most the
//! configured batch size) or `execute()` (terminal DML/DDL/utility
//! operators returning a status string). Scheduling is single-threaded
//! cooperative pull: the executor calls `next()` on the root until `None`,
//! checking the session cancel flag between batches.

pub mod agg;
pub mod build;
pub mod ddl;
pub mod dml;
pub mod eval;
pub mod explain;
pub mod filter;
pub mod join;
pub mod scan;
pub mod show;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::catalog::Catalog;
use crate::error::{EngineError, EngineResult};
use crate::storage::{RowId, SharedStorage};
use crate::txn::lock::LockManager;
use crate::txn::Transaction;
use crate::value::{DataType, Value};

/// Ordered output columns with case-insensitive, optionally qualified
/// name lookup.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entries: Vec<SchemaColumn>,
    lookup: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct SchemaColumn {
    pub qualifier: Option<String>,
    pub name: String,
    pub data_type: DataType,
}

impl Schema {
    pub fn new(entries: Vec<SchemaColumn>) -> Self {
        let mut lookup = HashMap::new();
        for (i, col) in entries.iter().enumerate() {
            lookup.entry(col.name.to_lowercase()).or_insert(i);
            if let Some(q) = &col.qualifier {
                lookup
                    .entry(format!("{}.{}", q.to_lowercase(), col.name.to_lowercase()))
                    .or_insert(i);
            }
        }
        Self { entries, lookup }
    }

    pub fn bare(cols: Vec<(String, DataType)>) -> Self {
        Self::new(
            cols.into_iter()
                .map(|(name, data_type)| SchemaColumn { qualifier: None, name, data_type })
                .collect(),
        )
    }

    pub fn columns(&self) -> &[SchemaColumn] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a bare or `qualifier.name` reference to a positional index.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.lookup.get(&name.to_lowercase()).copied()
    }

    pub fn index_of_qualified(&self, qualifier: Option<&str>, name: &str) -> Option<usize> {
        match qualifier {
            Some(q) => self.index_of(&format!("{}.{}", q, name)),
            None => self.index_of(name),
        }
    }

    /// Join output schema: left columns then right columns; bare-name
    /// collisions resolve to the leftmost occurrence.
    pub fn concat(&self, other: &Schema) -> Schema {
        let mut entries = self.entries.clone();
        entries.extend(other.entries.iter().cloned());
        Schema::new(entries)
    }
}

pub type Row = Vec<Value>;

/// A bounded list of rows; never longer than the configured batch size.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub rows: Vec<(RowId, Row)>,
}

impl Batch {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Shared execution state bound to one statement run.
pub struct ExecContext {
    pub storage: SharedStorage,
    pub catalog: Arc<Catalog>,
    pub locks: Arc<LockManager>,
    pub txn: Arc<Transaction>,
    pub db: String,
    pub batch_size: usize,
    pub cancel: Arc<AtomicBool>,
    /// Telemetry proxies fed back to the adaptive cost model.
    pub rows_processed: u64,
    pub pages_touched: u64,
    pub peak_buffered: u64,
}

impl ExecContext {
    pub fn check_cancelled(&self) -> EngineResult<()> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(EngineError::exec("statement cancelled"))
        } else {
            Ok(())
        }
    }

    pub fn note_buffered(&mut self, rows: usize) {
        self.peak_buffered = self.peak_buffered.max(rows as u64);
    }
}

/// Per-operator EXPLAIN ANALYZE counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpProfile {
    pub time_ms: f64,
    pub rows: u64,
    pub calls: u64,
}

pub trait PhysicalOperator: Send {
    /// Operator label with its salient arguments, e.g. `SeqScan(users)`.
    fn name(&self) -> String;

    fn schema(&self) -> &Schema;

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        Vec::new()
    }

    /// Producing operators override this.
    fn next(&mut self, _ctx: &mut ExecContext) -> EngineResult<Option<Batch>> {
        Err(EngineError::exec(format!("operator {} does not produce rows", self.name())))
    }

    /// Terminal operators override this.
    fn execute(&mut self, _ctx: &mut ExecContext) -> EngineResult<String> {
        Err(EngineError::exec(format!("operator {} is not executable", self.name())))
    }

    fn profile(&self) -> Option<&OpProfile> {
        None
    }
}

/// Pull the root to completion, enforcing the batch bound and the cancel
/// flag between batches.
pub fn drain(
    root: &mut dyn PhysicalOperator,
    ctx: &mut ExecContext,
) -> EngineResult<Vec<Batch>> {
    let mut out = Vec::new();
    while let Some(batch) = root.next(ctx)? {
        ctx.check_cancelled()?;
        debug_assert!(batch.len() <= ctx.batch_size, "batch exceeds batch_size");
        ctx.rows_processed += batch.len() as u64;
        if !batch.is_empty() {
            out.push(batch);
        }
    }
    Ok(out)
}

/// Timing wrapper inserted around every node for EXPLAIN ANALYZE.
pub struct Profiled {
    inner: Box<dyn PhysicalOperator>,
    profile: OpProfile,
}

impl Profiled {
    pub fn wrap(inner: Box<dyn PhysicalOperator>) -> Box<dyn PhysicalOperator> {
        Box::new(Self { inner, profile: OpProfile::default() })
    }
}

impl PhysicalOperator for Profiled {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn schema(&self) -> &Schema {
        self.inner.schema()
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        self.inner.children()
    }

    fn next(&mut self, ctx: &mut ExecContext) -> EngineResult<Option<Batch>> {
        let start = Instant::now();
        let result = self.inner.next(ctx);
        self.profile.time_ms += start.elapsed().as_secs_f64() * 1000.0;
        self.profile.calls += 1;
        if let Ok(Some(batch)) = &result {
            self.profile.rows += batch.len() as u64;
        }
        result
    }

    fn execute(&mut self, ctx: &mut ExecContext) -> EngineResult<String> {
        let start = Instant::now();
        let result = self.inner.execute(ctx);
        self.profile.time_ms += start.elapsed().as_secs_f64() * 1000.0;
        self.profile.calls += 1;
        result
    }

    fn profile(&self) -> Option<&OpProfile> {
        self.inner.profile().or(Some(&self.profile))
    }
}

/// Indented physical tree rendering, with profile annotations when present.
pub fn format_physical(op: &dyn PhysicalOperator, out: &mut String, depth: usize) {
    use std::fmt::Write as _;
    let indent = "  ".repeat(depth);
    match op.profile() {
        Some(p) => {
            let _ = writeln!(
                out,
                "{}-> {} (time={:.3}ms rows={} calls={})",
                indent,
                op.name(),
                p.time_ms,
                p.rows,
                p.calls
            );
        }
        None => {
            let _ = writeln!(out, "{}-> {}", indent, op.name());
        }
    }
    for child in op.children() {
        format_physical(child, out, depth + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_lookup_bare_and_qualified() {
        let schema = Schema::new(vec![
            SchemaColumn { qualifier: Some("u".into()), name: "id".into(), data_type: DataType::Int },
            SchemaColumn {
                qualifier: Some("o".into()),
                name: "id".into(),
                data_type: DataType::Int,
            },
            SchemaColumn {
                qualifier: Some("o".into()),
                name: "total".into(),
                data_type: DataType::Float,
            },
        ]);
        assert_eq!(schema.index_of("id"), Some(0));
        assert_eq!(schema.index_of("u.id"), Some(0));
        assert_eq!(schema.index_of("o.id"), Some(1));
        assert_eq!(schema.index_of("O.TOTAL"), Some(2));
        assert_eq!(schema.index_of("missing"), None);
    }

    #[test]
    fn schema_concat_prefers_left_on_collision() {
        let left = Schema::bare(vec![("id".into(), DataType::Int)]);
        let right = Schema::bare(vec![("id".into(), DataType::Varchar)]);
        let joined = left.concat(&right);
        assert_eq!(joined.len(), 2);
        assert_eq!(joined.index_of("id"), Some(0));
    }
}
