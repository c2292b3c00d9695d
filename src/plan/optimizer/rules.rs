//! Rule-based rewrites: constant folding, filter merging, predicate
//! pushdown, index-scan substitution, redundant sort elimination.
//!
//! Rules apply top-down then bottom-up until a fixpoint, capped by the
//! engine options. Every rule preserves the plan's result multiset.

use tracing::debug;

use crate::catalog::DatabaseCatalog;
use crate::plan::logical::LogicalPlan;
use crate::sql::ast::{Expr, JoinType, SelectItem, UnaryOp};
use crate::value::{BinOpKind, Value};

pub struct RuleContext<'a> {
    pub stats: &'a DatabaseCatalog,
}

impl<'a> RuleContext<'a> {
    /// Single-column equality index on `table(column)`, if one exists.
    fn index_on(&self, table: &str, column: &str) -> Option<String> {
        let info = self.stats.tables.get(&table.to_lowercase())?;
        info.indexes
            .values()
            .find(|idx| idx.columns.len() == 1 && idx.columns[0].eq_ignore_ascii_case(column))
            .map(|idx| idx.name.clone())
    }

    fn table_has_column(&self, table: &str, column: &str) -> bool {
        self.stats
            .tables
            .get(&table.to_lowercase())
            .map(|t| t.column(column).is_some())
            .unwrap_or(false)
    }
}

/// One rewrite pass over the whole tree. Returns the new tree and whether
/// anything changed.
pub fn apply_rules_once(plan: LogicalPlan, ctx: &RuleContext) -> (LogicalPlan, bool) {
    let mut changed = false;
    let plan = rewrite(plan, ctx, &mut changed);
    (plan, changed)
}

fn rewrite(plan: LogicalPlan, ctx: &RuleContext, changed: &mut bool) -> LogicalPlan {
    // Top-down: rewrite this node first, then recurse.
    let plan = rewrite_node(plan, ctx, changed);
    let plan = rewrite_children(plan, ctx, changed);
    // Bottom-up: children may have exposed a new local opportunity.
    rewrite_node(plan, ctx, changed)
}

fn rewrite_children(plan: LogicalPlan, ctx: &RuleContext, changed: &mut bool) -> LogicalPlan {
    match plan {
        LogicalPlan::Filter { input, predicate } => LogicalPlan::Filter {
            input: Box::new(rewrite(*input, ctx, changed)),
            predicate,
        },
        LogicalPlan::Project { input, items } => LogicalPlan::Project {
            input: Box::new(rewrite(*input, ctx, changed)),
            items,
        },
        LogicalPlan::Sort { input, keys } => LogicalPlan::Sort {
            input: Box::new(rewrite(*input, ctx, changed)),
            keys,
        },
        LogicalPlan::Aggregate { input, group_by, aggs } => LogicalPlan::Aggregate {
            input: Box::new(rewrite(*input, ctx, changed)),
            group_by,
            aggs,
        },
        LogicalPlan::Limit { input, limit, offset } => LogicalPlan::Limit {
            input: Box::new(rewrite(*input, ctx, changed)),
            limit,
            offset,
        },
        LogicalPlan::Join { left, right, join_type, method, on } => LogicalPlan::Join {
            left: Box::new(rewrite(*left, ctx, changed)),
            right: Box::new(rewrite(*right, ctx, changed)),
            join_type,
            method,
            on,
        },
        LogicalPlan::Explain { analyze, input } => LogicalPlan::Explain {
            analyze,
            input: Box::new(rewrite(*input, ctx, changed)),
        },
        other => other,
    }
}

fn rewrite_node(plan: LogicalPlan, ctx: &RuleContext, changed: &mut bool) -> LogicalPlan {
    match plan {
        LogicalPlan::Filter { input, predicate } => {
            let folded = fold_expr(predicate, changed);
            // TRUE filters vanish.
            if matches!(folded, Expr::Literal { value: Value::Bool(true), .. }) {
                *changed = true;
                debug!(target: "opaldb::optimizer", "rule: removed constant-true filter");
                return *input;
            }
            match *input {
                // Merge adjacent filters into one conjunction.
                LogicalPlan::Filter { input: inner, predicate: inner_pred } => {
                    *changed = true;
                    LogicalPlan::Filter {
                        input: inner,
                        predicate: and(folded, inner_pred),
                    }
                }
                // Push below a bare-column projection.
                LogicalPlan::Project { input: inner, items }
                    if pushable_through_project(&folded, &items) =>
                {
                    *changed = true;
                    debug!(target: "opaldb::optimizer", "rule: pushed filter below project");
                    LogicalPlan::Project {
                        input: Box::new(LogicalPlan::Filter { input: inner, predicate: folded }),
                        items,
                    }
                }
                // Push single-side conjuncts below an inner/cartesian join.
                LogicalPlan::Join { left, right, join_type, method, on }
                    if matches!(join_type, JoinType::Inner | JoinType::Cross) =>
                {
                    push_through_join(folded, left, right, join_type, method, on, ctx, changed)
                }
                // Equality on an indexed scan column becomes an index scan.
                LogicalPlan::Scan { table, alias } => {
                    index_scan_rule(folded, table, alias, ctx, changed)
                }
                inner => LogicalPlan::Filter { input: Box::new(inner), predicate: folded },
            }
        }
        LogicalPlan::Project { input, items } => {
            let items: Vec<SelectItem> = items
                .into_iter()
                .map(|i| SelectItem { expr: fold_expr(i.expr, changed), alias: i.alias })
                .collect();
            match *input {
                // Merge a pass-through inner projection.
                LogicalPlan::Project { input: inner, items: inner_items }
                    if inner_items
                        .iter()
                        .all(|i| matches!(i.expr, Expr::Column { .. }) && i.alias.is_none()) =>
                {
                    *changed = true;
                    LogicalPlan::Project { input: inner, items }
                }
                inner => LogicalPlan::Project { input: Box::new(inner), items },
            }
        }
        LogicalPlan::Sort { input, keys } => {
            // A sort over an equality index scan on the same column is
            // redundant: every matching row carries the same key value.
            if keys.len() == 1 && keys[0].1 {
                if let Some(col) = ordered_source_column(&input) {
                    if col.eq_ignore_ascii_case(&keys[0].0) {
                        *changed = true;
                        debug!(target: "opaldb::optimizer", "rule: removed sort satisfied by index order");
                        return *input;
                    }
                }
            }
            LogicalPlan::Sort { input, keys }
        }
        LogicalPlan::Join { left, right, join_type, method, on } => LogicalPlan::Join {
            left,
            right,
            join_type,
            method,
            on: on.map(|e| fold_expr(e, changed)),
        },
        other => other,
    }
}

/// Constant folding over literal-only sub-expressions.
pub fn fold_expr(expr: Expr, changed: &mut bool) -> Expr {
    match expr {
        Expr::Binary { left, op, right, pos } => {
            let left = fold_expr(*left, changed);
            let right = fold_expr(*right, changed);
            if let (Expr::Literal { value: l, .. }, Expr::Literal { value: r, .. }) =
                (&left, &right)
            {
                if let Ok(v) = Value::binary_op(op, l, r) {
                    *changed = true;
                    return Expr::Literal { value: v, pos };
                }
            }
            Expr::Binary { left: Box::new(left), op, right: Box::new(right), pos }
        }
        Expr::Unary { op, expr, pos } => {
            let inner = fold_expr(*expr, changed);
            if let Expr::Literal { value, .. } = &inner {
                match op {
                    UnaryOp::Neg => {
                        if let Ok(v) = value.negate() {
                            *changed = true;
                            return Expr::Literal { value: v, pos };
                        }
                    }
                    UnaryOp::Not => {
                        *changed = true;
                        return Expr::Literal { value: Value::Bool(!value.is_truthy()), pos };
                    }
                }
            }
            Expr::Unary { op, expr: Box::new(inner), pos }
        }
        Expr::Between { expr, low, high, negated, pos } => Expr::Between {
            expr: Box::new(fold_expr(*expr, changed)),
            low: Box::new(fold_expr(*low, changed)),
            high: Box::new(fold_expr(*high, changed)),
            negated,
            pos,
        },
        Expr::InList { expr, list, negated, pos } => Expr::InList {
            expr: Box::new(fold_expr(*expr, changed)),
            list: list.into_iter().map(|e| fold_expr(e, changed)).collect(),
            negated,
            pos,
        },
        other => other,
    }
}

fn and(a: Expr, b: Expr) -> Expr {
    let pos = a.pos();
    Expr::Binary { left: Box::new(a), op: BinOpKind::And, right: Box::new(b), pos }
}

/// Split a conjunction into its conjuncts.
pub fn split_conjuncts(expr: Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Binary { left, op: BinOpKind::And, right, .. } => {
            split_conjuncts(*left, out);
            split_conjuncts(*right, out);
        }
        other => out.push(other),
    }
}

fn conjoin(mut exprs: Vec<Expr>) -> Option<Expr> {
    let first = exprs.pop()?;
    Some(exprs.into_iter().rev().fold(first, |acc, e| and(e, acc)))
}

/// A filter can slide below a projection when every referenced column passes
/// through as a bare, unaliased column.
fn pushable_through_project(predicate: &Expr, items: &[SelectItem]) -> bool {
    let mut cols = Vec::new();
    predicate.collect_columns(&mut cols);
    if cols.is_empty() {
        return false;
    }
    cols.iter().all(|(_, name)| {
        items.iter().any(|i| {
            i.alias.is_none()
                && matches!(&i.expr, Expr::Column { name: n, .. } if n.eq_ignore_ascii_case(name))
        })
    })
}

/// Which join side binds every column of `expr`: 0 = left, 1 = right,
/// None = both/neither.
fn owning_side(expr: &Expr, left: &LogicalPlan, right: &LogicalPlan, ctx: &RuleContext) -> Option<usize> {
    let mut cols = Vec::new();
    expr.collect_columns(&mut cols);
    if cols.is_empty() {
        return None;
    }
    let sides = [left.bound_tables(), right.bound_tables()];
    let mut owner: Option<usize> = None;
    for (table_ref, name) in cols {
        let mut found: Option<usize> = None;
        for (i, side) in sides.iter().enumerate() {
            let matches = match table_ref {
                Some(alias) => side.iter().any(|(eff, _)| eff.eq_ignore_ascii_case(alias)),
                None => side.iter().any(|(_, t)| ctx.table_has_column(t, name)),
            };
            if matches {
                if found.is_some() {
                    return None; // ambiguous unqualified column
                }
                found = Some(i);
            }
        }
        match (owner, found) {
            (_, None) => return None,
            (None, Some(i)) => owner = Some(i),
            (Some(o), Some(i)) if o == i => {}
            _ => return None,
        }
    }
    owner
}

#[allow(clippy::too_many_arguments)]
fn push_through_join(
    predicate: Expr,
    left: Box<LogicalPlan>,
    right: Box<LogicalPlan>,
    join_type: JoinType,
    method: crate::plan::logical::JoinMethod,
    on: Option<Expr>,
    ctx: &RuleContext,
    changed: &mut bool,
) -> LogicalPlan {
    let mut conjuncts = Vec::new();
    split_conjuncts(predicate, &mut conjuncts);

    let mut left_preds = Vec::new();
    let mut right_preds = Vec::new();
    let mut residual = Vec::new();
    for c in conjuncts {
        match owning_side(&c, &left, &right, ctx) {
            Some(0) => left_preds.push(c),
            Some(1) => right_preds.push(c),
            _ => residual.push(c),
        }
    }

    if left_preds.is_empty() && right_preds.is_empty() {
        let predicate = conjoin(residual).expect("residual holds all conjuncts");
        return LogicalPlan::Filter {
            input: Box::new(LogicalPlan::Join { left, right, join_type, method, on }),
            predicate,
        };
    }

    *changed = true;
    debug!(
        target: "opaldb::optimizer",
        "rule: pushed {}+{} predicate(s) below join",
        left_preds.len(),
        right_preds.len()
    );
    let new_left = match conjoin(left_preds) {
        Some(p) => Box::new(LogicalPlan::Filter { input: left, predicate: p }),
        None => left,
    };
    let new_right = match conjoin(right_preds) {
        Some(p) => Box::new(LogicalPlan::Filter { input: right, predicate: p }),
        None => right,
    };
    let join = LogicalPlan::Join { left: new_left, right: new_right, join_type, method, on };
    match conjoin(residual) {
        Some(p) => LogicalPlan::Filter { input: Box::new(join), predicate: p },
        None => join,
    }
}

/// `Filter(col = literal, Scan(t))` with a covering index becomes
/// `IndexScan(t, idx, key)`; other conjuncts stay in a residual filter.
fn index_scan_rule(
    predicate: Expr,
    table: String,
    alias: Option<String>,
    ctx: &RuleContext,
    changed: &mut bool,
) -> LogicalPlan {
    let mut conjuncts = Vec::new();
    split_conjuncts(predicate, &mut conjuncts);

    let mut chosen: Option<(usize, String, String, Value)> = None;
    for (i, c) in conjuncts.iter().enumerate() {
        if let Expr::Binary { left, op: BinOpKind::Eq, right, .. } = c {
            let (col, lit) = match (left.as_ref(), right.as_ref()) {
                (Expr::Column { name, .. }, Expr::Literal { value, .. }) => {
                    (name.clone(), value.clone())
                }
                (Expr::Literal { value, .. }, Expr::Column { name, .. }) => {
                    (name.clone(), value.clone())
                }
                _ => continue,
            };
            if let Some(index) = ctx.index_on(&table, &col) {
                chosen = Some((i, index, col, lit));
                break;
            }
        }
    }

    match chosen {
        Some((i, index, column, key)) => {
            *changed = true;
            debug!(
                target: "opaldb::optimizer",
                "rule: '{}' equality on '{}' uses index '{}'", table, column, index
            );
            conjuncts.remove(i);
            let scan = LogicalPlan::IndexScan { table, alias, index, column, key };
            match conjoin(conjuncts) {
                Some(p) => LogicalPlan::Filter { input: Box::new(scan), predicate: p },
                None => scan,
            }
        }
        None => LogicalPlan::Filter {
            input: Box::new(LogicalPlan::Scan { table, alias }),
            predicate: conjoin(conjuncts).expect("conjuncts non-empty"),
        },
    }
}

/// The column whose order the subtree already provides, looking through
/// filters and bare projections down to an index scan.
fn ordered_source_column(plan: &LogicalPlan) -> Option<String> {
    match plan {
        LogicalPlan::IndexScan { column, .. } => Some(column.clone()),
        LogicalPlan::Filter { input, .. } => ordered_source_column(input),
        LogicalPlan::Project { input, items } => {
            let col = ordered_source_column(input)?;
            // The ordering column must survive the projection.
            let survives = items.iter().any(|i| {
                matches!(&i.expr, Expr::Column { name, .. } if name.eq_ignore_ascii_case(&col))
            });
            if survives {
                Some(col)
            } else {
                None
            }
        }
        _ => None,
    }
}
