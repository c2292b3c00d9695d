//! Join operators: nested-loop (any condition, all join types), hash
//! (equi-join), and sort-merge (equi-join over key-ordered inputs).
//!
//! Output rows concatenate left and right values; the row id is taken from
//! the left side (or the non-null side for outer padding).

use std::collections::HashMap;

use crate::error::EngineResult;
use crate::exec::eval::Evaluator;
use crate::exec::{Batch, ExecContext, PhysicalOperator, Schema};
use crate::sql::ast::JoinType;
use crate::storage::RowId;
use crate::value::{GroupKey, Value};

type MaterializedRows = Vec<(RowId, Vec<Value>)>;

fn drain_child(
    child: &mut Box<dyn PhysicalOperator>,
    ctx: &mut ExecContext,
) -> EngineResult<MaterializedRows> {
    let mut rows = Vec::new();
    while let Some(batch) = child.next(ctx)? {
        rows.extend(batch.rows);
        ctx.note_buffered(rows.len());
    }
    Ok(rows)
}

fn null_row(width: usize) -> Vec<Value> {
    vec![Value::Null; width]
}

/// Builds both sides fully on first pull, then streams the (filtered)
/// product. Handles inner, cartesian and outer joins; outer rows pad the
/// unmatched side with NULLs.
pub struct NestedLoopJoin {
    left: Box<dyn PhysicalOperator>,
    right: Box<dyn PhysicalOperator>,
    join_type: JoinType,
    cond: Option<Evaluator>,
    schema: Schema,
    state: Option<ProductState>,
}

struct ProductState {
    left_rows: MaterializedRows,
    right_rows: MaterializedRows,
    li: usize,
    ri: usize,
    left_matched: Vec<bool>,
    right_matched: Vec<bool>,
    /// Phase 2: emitting unmatched outer rows.
    outer_at: usize,
    phase: Phase,
}

#[derive(PartialEq)]
enum Phase {
    Product,
    LeftOuter,
    RightOuter,
    Done,
}

impl NestedLoopJoin {
    pub fn new(
        left: Box<dyn PhysicalOperator>,
        right: Box<dyn PhysicalOperator>,
        join_type: JoinType,
        cond: Option<Evaluator>,
        schema: Schema,
    ) -> Self {
        Self { left, right, join_type, cond, schema, state: None }
    }
}

impl PhysicalOperator for NestedLoopJoin {
    fn name(&self) -> String {
        format!("NestedLoopJoin[{}]", self.join_type)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }

    fn next(&mut self, ctx: &mut ExecContext) -> EngineResult<Option<Batch>> {
        if self.state.is_none() {
            let left_rows = drain_child(&mut self.left, ctx)?;
            let right_rows = drain_child(&mut self.right, ctx)?;
            let left_matched = vec![false; left_rows.len()];
            let right_matched = vec![false; right_rows.len()];
            self.state = Some(ProductState {
                left_rows,
                right_rows,
                li: 0,
                ri: 0,
                left_matched,
                right_matched,
                outer_at: 0,
                phase: Phase::Product,
            });
        }
        let left_width = self.left.schema().len();
        let right_width = self.right.schema().len();
        let state = self.state.as_mut().expect("join state built");
        let mut batch = Batch::new();

        while batch.len() < ctx.batch_size && state.phase == Phase::Product {
            if state.li >= state.left_rows.len() {
                state.phase = match self.join_type {
                    JoinType::Left | JoinType::Full => Phase::LeftOuter,
                    JoinType::Right => Phase::RightOuter,
                    _ => Phase::Done,
                };
                break;
            }
            let (lid, lvals) = &state.left_rows[state.li];
            if state.ri >= state.right_rows.len() {
                state.li += 1;
                state.ri = 0;
                continue;
            }
            let (_, rvals) = &state.right_rows[state.ri];
            let mut combined = Vec::with_capacity(lvals.len() + rvals.len());
            combined.extend(lvals.iter().cloned());
            combined.extend(rvals.iter().cloned());
            let keep = match &self.cond {
                Some(cond) => cond(&combined)?.is_truthy(),
                None => true,
            };
            if keep {
                state.left_matched[state.li] = true;
                state.right_matched[state.ri] = true;
                batch.rows.push((*lid, combined));
            }
            state.ri += 1;
        }

        // Outer padding phases.
        while batch.len() < ctx.batch_size && state.phase == Phase::LeftOuter {
            if state.outer_at >= state.left_rows.len() {
                state.phase = if self.join_type == JoinType::Full {
                    state.outer_at = 0;
                    Phase::RightOuter
                } else {
                    Phase::Done
                };
                break;
            }
            let i = state.outer_at;
            state.outer_at += 1;
            if !state.left_matched[i] {
                let (lid, lvals) = &state.left_rows[i];
                let mut combined = lvals.clone();
                combined.extend(null_row(right_width));
                batch.rows.push((*lid, combined));
            }
        }
        while batch.len() < ctx.batch_size && state.phase == Phase::RightOuter {
            if state.outer_at >= state.right_rows.len() {
                state.phase = Phase::Done;
                break;
            }
            let i = state.outer_at;
            state.outer_at += 1;
            if !state.right_matched[i] {
                let (rid, rvals) = &state.right_rows[i];
                let mut combined = null_row(left_width);
                combined.extend(rvals.iter().cloned());
                batch.rows.push((*rid, combined));
            }
        }

        if batch.is_empty() {
            if state.phase == Phase::Done {
                return Ok(None);
            }
            // Phase transition produced nothing yet; try again.
            return self.next(ctx);
        }
        Ok(Some(batch))
    }
}

/// Equi-join: builds a hash table on the right side keyed by the join key
/// tuple, probes with left rows.
pub struct HashJoin {
    left: Box<dyn PhysicalOperator>,
    right: Box<dyn PhysicalOperator>,
    left_keys: Vec<Evaluator>,
    right_keys: Vec<Evaluator>,
    schema: Schema,
    state: Option<HashState>,
}

struct HashState {
    table: HashMap<Vec<GroupKey>, Vec<usize>>,
    right_rows: MaterializedRows,
    left_rows: std::vec::IntoIter<(RowId, Vec<Value>)>,
    /// Matches pending emission from the current probe row.
    pending: Vec<(RowId, Vec<Value>)>,
}

impl HashJoin {
    pub fn new(
        left: Box<dyn PhysicalOperator>,
        right: Box<dyn PhysicalOperator>,
        left_keys: Vec<Evaluator>,
        right_keys: Vec<Evaluator>,
        schema: Schema,
    ) -> Self {
        Self { left, right, left_keys, right_keys, schema, state: None }
    }
}

impl PhysicalOperator for HashJoin {
    fn name(&self) -> String {
        "HashJoin".to_string()
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }

    fn next(&mut self, ctx: &mut ExecContext) -> EngineResult<Option<Batch>> {
        if self.state.is_none() {
            let right_rows = drain_child(&mut self.right, ctx)?;
            let mut table: HashMap<Vec<GroupKey>, Vec<usize>> = HashMap::new();
            for (i, (_, values)) in right_rows.iter().enumerate() {
                let mut key = Vec::with_capacity(self.right_keys.len());
                for k in &self.right_keys {
                    key.push(k(values)?.group_key());
                }
                table.entry(key).or_default().push(i);
            }
            let left_rows = drain_child(&mut self.left, ctx)?;
            self.state = Some(HashState {
                table,
                right_rows,
                left_rows: left_rows.into_iter(),
                pending: Vec::new(),
            });
        }

        let state = self.state.as_mut().expect("hash state built");
        let mut batch = Batch::new();
        loop {
            while let Some(row) = state.pending.pop() {
                batch.rows.push(row);
                if batch.len() >= ctx.batch_size {
                    return Ok(Some(batch));
                }
            }
            let (lid, lvals) = match state.left_rows.next() {
                Some(r) => r,
                None => {
                    return if batch.is_empty() { Ok(None) } else { Ok(Some(batch)) };
                }
            };
            let mut key = Vec::with_capacity(self.left_keys.len());
            let mut null_key = false;
            for k in &self.left_keys {
                let v = k(&lvals)?;
                if v.is_null() {
                    null_key = true;
                }
                key.push(v.group_key());
            }
            if null_key {
                continue; // NULL keys never match
            }
            if let Some(matches) = state.table.get(&key) {
                // Reverse so pop() emits in right-row order.
                for &ri in matches.iter().rev() {
                    let (_, rvals) = &state.right_rows[ri];
                    let mut combined = lvals.clone();
                    combined.extend(rvals.iter().cloned());
                    state.pending.push((lid, combined));
                }
            }
        }
    }
}

/// Equi-join by sorting both sides on their key tuples and merging equal
/// key groups.
pub struct SortMergeJoin {
    left: Box<dyn PhysicalOperator>,
    right: Box<dyn PhysicalOperator>,
    left_keys: Vec<Evaluator>,
    right_keys: Vec<Evaluator>,
    schema: Schema,
    output: Option<std::vec::IntoIter<(RowId, Vec<Value>)>>,
}

impl SortMergeJoin {
    pub fn new(
        left: Box<dyn PhysicalOperator>,
        right: Box<dyn PhysicalOperator>,
        left_keys: Vec<Evaluator>,
        right_keys: Vec<Evaluator>,
        schema: Schema,
    ) -> Self {
        Self { left, right, left_keys, right_keys, schema, output: None }
    }

    fn build(&mut self, ctx: &mut ExecContext) -> EngineResult<()> {
        let key_of = |evals: &[Evaluator], values: &[Value]| -> EngineResult<Vec<Value>> {
            evals.iter().map(|e| e(values)).collect()
        };
        let mut left: Vec<(Vec<Value>, RowId, Vec<Value>)> = Vec::new();
        for (rid, values) in drain_child(&mut self.left, ctx)? {
            left.push((key_of(&self.left_keys, &values)?, rid, values));
        }
        let mut right: Vec<(Vec<Value>, RowId, Vec<Value>)> = Vec::new();
        for (rid, values) in drain_child(&mut self.right, ctx)? {
            right.push((key_of(&self.right_keys, &values)?, rid, values));
        }
        let cmp_keys = |a: &[Value], b: &[Value]| {
            for (x, y) in a.iter().zip(b.iter()) {
                let ord = x.total_cmp(y);
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        };
        left.sort_by(|a, b| cmp_keys(&a.0, &b.0));
        right.sort_by(|a, b| cmp_keys(&a.0, &b.0));

        let mut out = Vec::new();
        let (mut li, mut ri) = (0usize, 0usize);
        while li < left.len() && ri < right.len() {
            match cmp_keys(&left[li].0, &right[ri].0) {
                std::cmp::Ordering::Less => li += 1,
                std::cmp::Ordering::Greater => ri += 1,
                std::cmp::Ordering::Equal => {
                    // Emit the full equal-key block product.
                    let key = left[li].0.clone();
                    let l_start = li;
                    while li < left.len() && cmp_keys(&left[li].0, &key).is_eq() {
                        li += 1;
                    }
                    let r_start = ri;
                    while ri < right.len() && cmp_keys(&right[ri].0, &key).is_eq() {
                        ri += 1;
                    }
                    // NULL keys never join.
                    if key.iter().any(|v| v.is_null()) {
                        continue;
                    }
                    for l in &left[l_start..li] {
                        for r in &right[r_start..ri] {
                            let mut combined = l.2.clone();
                            combined.extend(r.2.iter().cloned());
                            out.push((l.1, combined));
                        }
                    }
                }
            }
        }
        self.output = Some(out.into_iter());
        Ok(())
    }
}

impl PhysicalOperator for SortMergeJoin {
    fn name(&self) -> String {
        "SortMergeJoin".to_string()
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }

    fn next(&mut self, ctx: &mut ExecContext) -> EngineResult<Option<Batch>> {
        if self.output.is_none() {
            self.build(ctx)?;
        }
        let iter = self.output.as_mut().expect("merge output built");
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
