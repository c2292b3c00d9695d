//! Query optimizer: rewrite phase, rule pass, cost-based candidate
//! selection.
//!
//! The optimizer is non-fatal by construction: any internal failure logs a
//! warning and the pre-optimization plan runs instead. Candidate costing is
//! a pure function of the plan and the statistics snapshot, so evaluating
//! candidates in parallel (when enabled) cannot change the outcome.

pub mod cost;
pub mod rules;

use tracing::{debug, warn};

use crate::catalog::DatabaseCatalog;
use crate::config::EngineOptions;
use crate::error::{EngineError, EngineResult};
use crate::plan::logical::{JoinMethod, LogicalPlan};
use crate::sql::ast::{Expr, JoinType};
use crate::value::BinOpKind;

pub use cost::{AdaptiveState, CostConstants, CostInfo, CostModel, PerfSample};

/// Outcome summary, surfaced through EXPLAIN and the debug log.
#[derive(Debug, Clone)]
pub struct OptimizeReport {
    pub rule_iterations: usize,
    pub candidates_considered: usize,
    pub chosen_cost: f64,
    pub estimated_rows: f64,
    /// Set when optimization failed and the input plan was kept.
    pub fallback_reason: Option<String>,
}

pub struct Optimizer<'a> {
    stats: &'a DatabaseCatalog,
    constants: CostConstants,
    options: &'a EngineOptions,
}

impl<'a> Optimizer<'a> {
    pub fn new(
        stats: &'a DatabaseCatalog,
        constants: CostConstants,
        options: &'a EngineOptions,
    ) -> Self {
        Self { stats, constants, options }
    }

    /// Optimize a logical plan. Never fails: errors fall back to the input.
    pub fn optimize(&self, plan: LogicalPlan) -> (LogicalPlan, OptimizeReport) {
        if !self.options.enable_optimizer || !plan.is_relational() {
            let model = CostModel::new(self.constants, self.stats);
            let report = OptimizeReport {
                rule_iterations: 0,
                candidates_considered: 1,
                chosen_cost: model.cost(&plan).total(),
                estimated_rows: model.estimate_rows(&plan),
                fallback_reason: None,
            };
            return (plan, report);
        }

        let original = plan.clone();
        match self.try_optimize(plan) {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    target: "opaldb::optimizer",
                    "optimization failed, using unoptimized plan: {}", e
                );
                let model = CostModel::new(self.constants, self.stats);
                let report = OptimizeReport {
                    rule_iterations: 0,
                    candidates_considered: 1,
                    chosen_cost: model.cost(&original).total(),
                    estimated_rows: model.estimate_rows(&original),
                    fallback_reason: Some(e.to_string()),
                };
                (original, report)
            }
        }
    }

    fn try_optimize(&self, plan: LogicalPlan) -> EngineResult<(LogicalPlan, OptimizeReport)> {
        // Phase 1+2: rewrites and rules to a fixpoint, capped.
        let ctx = rules::RuleContext { stats: self.stats };
        let mut plan = plan;
        let mut iterations = 0;
        for _ in 0..self.options.rule_pass_cap.max(1) {
            let (next, changed) = rules::apply_rules_once(plan, &ctx);
            plan = next;
            iterations += 1;
            if !changed {
                break;
            }
        }

        // Phase 3: candidate generation and cost-based selection.
        let mut candidates = self.join_order_candidates(&plan)?;
        if candidates.is_empty() {
            candidates.push(plan.clone());
        }
        for cand in &mut candidates {
            *cand = self.assign_join_methods(std::mem::replace(cand, LogicalPlan::ConstRow));
        }

        let model = CostModel::new(self.constants, self.stats);
        let costs: Vec<f64> = if self.options.parallel_cost_eval && candidates.len() > 1 {
            std::thread::scope(|scope| {
                let handles: Vec<_> = candidates
                    .iter()
                    .map(|c| {
                        let model = CostModel::new(self.constants, self.stats);
                        scope.spawn(move || model.cost(c).total())
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().expect("cost worker panicked")).collect()
            })
        } else {
            candidates.iter().map(|c| model.cost(c).total()).collect()
        };

        let best = costs
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .ok_or_else(|| EngineError::optimizer("no candidate plans"))?;

        let chosen_cost = costs[best];
        let chosen = candidates.swap_remove(best);
        let report = OptimizeReport {
            rule_iterations: iterations,
            candidates_considered: costs.len(),
            chosen_cost,
            estimated_rows: model.estimate_rows(&chosen),
            fallback_reason: None,
        };
        debug!(
            target: "opaldb::optimizer",
            "optimized in {} rule pass(es), {} candidate(s), cost {:.4}",
            report.rule_iterations, report.candidates_considered, report.chosen_cost
        );
        Ok((chosen, report))
    }

    // ---- join ordering ----

    /// Enumerate join-order permutations for the topmost inner/cartesian
    /// join chain, splicing each reordered chain back into the full tree.
    fn join_order_candidates(&self, plan: &LogicalPlan) -> EngineResult<Vec<LogicalPlan>> {
        match plan {
            LogicalPlan::Join { join_type, .. }
                if matches!(join_type, JoinType::Inner | JoinType::Cross) =>
            {
                let mut leaves = Vec::new();
                let mut conds = Vec::new();
                collect_chain(plan, &mut leaves, &mut conds);
                if leaves.len() < 2 || leaves.len() > self.options.join_enumeration_cap {
                    return Ok(vec![plan.clone()]);
                }
                let mut orders = Vec::new();
                let mut indices: Vec<usize> = (0..leaves.len()).collect();
                permutations(&mut indices, 0, &mut orders);
                let mut out = Vec::with_capacity(orders.len());
                for order in orders {
                    if let Some(tree) = rebuild_chain(&leaves, &conds, &order, self.stats) {
                        out.push(tree);
                    }
                }
                if out.is_empty() {
                    out.push(plan.clone());
                }
                Ok(out)
            }
            // Recurse through unary operators; splice child candidates.
            LogicalPlan::Filter { input, predicate } => {
                Ok(self
                    .join_order_candidates(input)?
                    .into_iter()
                    .map(|c| LogicalPlan::Filter {
                        input: Box::new(c),
                        predicate: predicate.clone(),
                    })
                    .collect())
            }
            LogicalPlan::Project { input, items } => Ok(self
                .join_order_candidates(input)?
                .into_iter()
                .map(|c| LogicalPlan::Project { input: Box::new(c), items: items.clone() })
                .collect()),
            LogicalPlan::Sort { input, keys } => Ok(self
                .join_order_candidates(input)?
                .into_iter()
                .map(|c| LogicalPlan::Sort { input: Box::new(c), keys: keys.clone() })
                .collect()),
            LogicalPlan::Aggregate { input, group_by, aggs } => Ok(self
                .join_order_candidates(input)?
                .into_iter()
                .map(|c| LogicalPlan::Aggregate {
                    input: Box::new(c),
                    group_by: group_by.clone(),
                    aggs: aggs.clone(),
                })
                .collect()),
            LogicalPlan::Limit { input, limit, offset } => Ok(self
                .join_order_candidates(input)?
                .into_iter()
                .map(|c| LogicalPlan::Limit {
                    input: Box::new(c),
                    limit: *limit,
                    offset: *offset,
                })
                .collect()),
            other => Ok(vec![other.clone()]),
        }
    }

    // ---- join method selection ----

    /// Pick a physical method for every join node: HASH when the smaller
    /// side fits the memory budget and the condition is an equi-join;
    /// SORT_MERGE when both inputs already provide the key order; else
    /// NESTED_LOOP.
    fn assign_join_methods(&self, plan: LogicalPlan) -> LogicalPlan {
        let model = CostModel::new(self.constants, self.stats);
        self.assign_methods_rec(plan, &model)
    }

    fn assign_methods_rec(&self, plan: LogicalPlan, model: &CostModel) -> LogicalPlan {
        match plan {
            LogicalPlan::Join { left, right, join_type, on, .. } => {
                let left = Box::new(self.assign_methods_rec(*left, model));
                let right = Box::new(self.assign_methods_rec(*right, model));
                let method = self.choose_method(&left, &right, on.as_ref(), model);
                LogicalPlan::Join { left, right, join_type, method, on }
            }
            LogicalPlan::Filter { input, predicate } => LogicalPlan::Filter {
                input: Box::new(self.assign_methods_rec(*input, model)),
                predicate,
            },
            LogicalPlan::Project { input, items } => LogicalPlan::Project {
                input: Box::new(self.assign_methods_rec(*input, model)),
                items,
            },
            LogicalPlan::Sort { input, keys } => LogicalPlan::Sort {
                input: Box::new(self.assign_methods_rec(*input, model)),
                keys,
            },
            LogicalPlan::Aggregate { input, group_by, aggs } => LogicalPlan::Aggregate {
                input: Box::new(self.assign_methods_rec(*input, model)),
                group_by,
                aggs,
            },
            LogicalPlan::Limit { input, limit, offset } => LogicalPlan::Limit {
                input: Box::new(self.assign_methods_rec(*input, model)),
                limit,
                offset,
            },
            other => other,
        }
    }

    fn choose_method(
        &self,
        left: &LogicalPlan,
        right: &LogicalPlan,
        on: Option<&Expr>,
        model: &CostModel,
    ) -> JoinMethod {
        let cond = match on {
            Some(c) => c,
            None => return JoinMethod::NestedLoop,
        };
        if equi_join_keys(cond, left, right).is_none() {
            return JoinMethod::NestedLoop;
        }
        let m = model.estimate_rows(left);
        let n = model.estimate_rows(right);
        if m.min(n) <= self.options.join_memory_budget_rows as f64 {
            JoinMethod::Hash
        } else if sorted_on_keys(left, cond) && sorted_on_keys(right, cond) {
            JoinMethod::SortMerge
        } else {
            JoinMethod::NestedLoop
        }
    }
}

/// Flatten a chain of inner/cartesian joins into leaf subtrees and join
/// conditions.
fn collect_chain(plan: &LogicalPlan, leaves: &mut Vec<LogicalPlan>, conds: &mut Vec<Expr>) {
    match plan {
        LogicalPlan::Join { left, right, join_type, on, .. }
            if matches!(join_type, JoinType::Inner | JoinType::Cross) =>
        {
            collect_chain(left, leaves, conds);
            collect_chain(right, leaves, conds);
            if let Some(c) = on {
                let mut split = Vec::new();
                rules::split_conjuncts(c.clone(), &mut split);
                conds.extend(split);
            }
        }
        other => leaves.push(other.clone()),
    }
}

fn permutations(indices: &mut Vec<usize>, k: usize, out: &mut Vec<Vec<usize>>) {
    if k == indices.len() {
        out.push(indices.clone());
        return;
    }
    for i in k..indices.len() {
        indices.swap(k, i);
        permutations(indices, k + 1, out);
        indices.swap(k, i);
    }
}

/// Rebuild a left-deep join tree in the given leaf order, attaching each
/// condition at the lowest join where all its columns are bound. Returns
/// None when a condition cannot be placed (the order is then skipped).
fn rebuild_chain(
    leaves: &[LogicalPlan],
    conds: &[Expr],
    order: &[usize],
    stats: &DatabaseCatalog,
) -> Option<LogicalPlan> {
    let mut remaining: Vec<Expr> = conds.to_vec();
    let mut tree = leaves[order[0]].clone();
    for &i in &order[1..] {
        let right = leaves[i].clone();
        // Conditions placeable once `right` joins the tree.
        let mut bound = tree.bound_tables();
        bound.extend(right.bound_tables());
        let (placeable, rest): (Vec<Expr>, Vec<Expr>) = remaining
            .into_iter()
            .partition(|c| condition_bound(c, &bound, stats));
        remaining = rest;
        let on = merge_conds(placeable);
        let join_type = if on.is_some() { JoinType::Inner } else { JoinType::Cross };
        tree = LogicalPlan::Join {
            left: Box::new(tree),
            right: Box::new(right),
            join_type,
            method: JoinMethod::NestedLoop,
            on,
        };
    }
    if remaining.is_empty() {
        Some(tree)
    } else {
        None
    }
}

fn merge_conds(conds: Vec<Expr>) -> Option<Expr> {
    let mut it = conds.into_iter();
    let first = it.next()?;
    Some(it.fold(first, |acc, e| Expr::Binary {
        left: Box::new(acc),
        op: BinOpKind::And,
        pos: e.pos(),
        right: Box::new(e),
    }))
}

fn condition_bound(cond: &Expr, bound: &[(String, String)], stats: &DatabaseCatalog) -> bool {
    let mut cols = Vec::new();
    cond.collect_columns(&mut cols);
    !cols.is_empty()
        && cols.iter().all(|(table_ref, name)| match table_ref {
            Some(alias) => bound.iter().any(|(eff, _)| eff.eq_ignore_ascii_case(alias)),
            None => bound.iter().any(|(_, t)| {
                stats
                    .tables
                    .get(&t.to_lowercase())
                    .map(|info| info.column(name).is_some())
                    .unwrap_or(false)
            }),
        })
}

/// Extract equi-join key column pairs `(left_col, right_col)` from a
/// condition; None when any conjunct is not a two-sided column equality.
pub fn equi_join_keys(
    cond: &Expr,
    left: &LogicalPlan,
    right: &LogicalPlan,
) -> Option<Vec<(Expr, Expr)>> {
    let mut conjuncts = Vec::new();
    rules::split_conjuncts(cond.clone(), &mut conjuncts);
    let left_tables = left.bound_tables();
    let right_tables = right.bound_tables();
    let side_of = |e: &Expr| -> Option<usize> {
        if let Expr::Column { table: Some(alias), .. } = e {
            if left_tables.iter().any(|(eff, _)| eff.eq_ignore_ascii_case(alias)) {
                return Some(0);
            }
            if right_tables.iter().any(|(eff, _)| eff.eq_ignore_ascii_case(alias)) {
                return Some(1);
            }
        }
        None
    };
    let mut keys = Vec::new();
    for c in conjuncts {
        match c {
            Expr::Binary { left: l, op: BinOpKind::Eq, right: r, .. } => {
                match (side_of(&l), side_of(&r)) {
                    (Some(0), Some(1)) => keys.push((*l, *r)),
                    (Some(1), Some(0)) => keys.push((*r, *l)),
                    _ => return None,
                }
            }
            _ => return None,
        }
    }
    if keys.is_empty() {
        None
    } else {
        Some(keys)
    }
}

/// Whether a subtree already emits rows ordered on its side of the join
/// keys (index scans provide key order).
fn sorted_on_keys(plan: &LogicalPlan, _cond: &Expr) -> bool {
    matches!(plan, LogicalPlan::IndexScan { .. } | LogicalPlan::Sort { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnInfo, DatabaseCatalog, IndexInfo, IndexMethod, TableInfo};
    use crate::sql::ast::Pos;
    use crate::value::{DataType, Value};

    fn make_table(name: &str, rows: u64, cols: &[(&str, DataType)]) -> TableInfo {
        let mut t = TableInfo::new(
            name,
            cols.iter()
                .enumerate()
                .map(|(i, (n, ty))| ColumnInfo {
                    name: (*n).into(),
                    data_type: *ty,
                    nullable: i != 0,
                    default: None,
                    is_primary_key: i == 0,
                })
                .collect(),
        );
        t.row_count = rows;
        t.page_count = rows.div_ceil(crate::catalog::ROWS_PER_PAGE);
        t
    }

    fn stats() -> DatabaseCatalog {
        let mut db = DatabaseCatalog::default();
        let mut t = make_table("t", 10_000, &[("id", DataType::Int), ("name", DataType::Varchar)]);
        t.indexes.insert(
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
        db.tables.insert("t".into(), t);
        db.tables
            .insert("small".into(), make_table("small", 10, &[("id", DataType::Int)]));
        db.tables
            .insert("big".into(), make_table("big", 1_000_000, &[("id", DataType::Int)]));
        db
    }

    fn opts() -> EngineOptions {
        EngineOptions::default()
    }

    #[test]
    fn index_scan_chosen_for_indexed_equality() {
        let stats = stats();
        let options = opts();
        let opt = Optimizer::new(&stats, CostConstants::default(), &options);
        let plan = LogicalPlan::Filter {
            input: Box::new(LogicalPlan::Scan { table: "t".into(), alias: None }),
            predicate: Expr::Binary {
                left: Box::new(Expr::Column { table: None, name: "name".into(), pos: Pos::default() }),
                op: BinOpKind::Eq,
                right: Box::new(Expr::Literal {
                    value: Value::Str("Bob".into()),
                    pos: Pos::default(),
                }),
                pos: Pos::default(),
            },
        };
        let (optimized, report) = opt.optimize(plan);
        assert!(report.fallback_reason.is_none());
        // Exactly one IndexScan and no residual filter on the predicate.
        fn count_nodes(p: &LogicalPlan, idx: &mut usize, filt: &mut usize) {
            match p {
                LogicalPlan::IndexScan { .. } => *idx += 1,
                LogicalPlan::Filter { .. } => *filt += 1,
                _ => {}
            }
            for c in p.children() {
                count_nodes(c, idx, filt);
            }
        }
        let (mut idx, mut filt) = (0, 0);
        count_nodes(&optimized, &mut idx, &mut filt);
        assert_eq!(idx, 1, "plan: {}", optimized.format_tree());
        assert_eq!(filt, 0, "plan: {}", optimized.format_tree());
    }

    #[test]
    fn join_order_puts_small_side_first() {
        let stats = stats();
        let options = opts();
        let opt = Optimizer::new(&stats, CostConstants::default(), &options);
        let plan = LogicalPlan::Join {
            left: Box::new(LogicalPlan::Scan { table: "big".into(), alias: None }),
            right: Box::new(LogicalPlan::Scan { table: "small".into(), alias: None }),
            join_type: JoinType::Cross,
            method: JoinMethod::NestedLoop,
            on: None,
        };
        let (optimized, report) = opt.optimize(plan);
        assert!(report.candidates_considered >= 2);
        // Both orders cost the same for a pure cartesian product, so just
        // verify the chain survived with both tables bound.
        let tables = optimized.bound_tables();
        assert_eq!(tables.len(), 2);
    }

    #[test]
    fn hash_join_selected_within_budget() {
        let stats = stats();
        let options = opts();
        let opt = Optimizer::new(&stats, CostConstants::default(), &options);
        let on = Expr::Binary {
            left: Box::new(Expr::Column {
                table: Some("small".into()),
                name: "id".into(),
                pos: Pos::default(),
            }),
            op: BinOpKind::Eq,
            right: Box::new(Expr::Column {
                table: Some("big".into()),
                name: "id".into(),
                pos: Pos::default(),
            }),
            pos: Pos::default(),
        };
        let plan = LogicalPlan::Join {
            left: Box::new(LogicalPlan::Scan { table: "small".into(), alias: None }),
            right: Box::new(LogicalPlan::Scan { table: "big".into(), alias: None }),
            join_type: JoinType::Inner,
            method: JoinMethod::NestedLoop,
            on: Some(on),
        };
        let (optimized, _) = opt.optimize(plan);
        fn find_method(p: &LogicalPlan) -> Option<JoinMethod> {
            if let LogicalPlan::Join { method, .. } = p {
                return Some(*method);
            }
            p.children().into_iter().find_map(find_method)
        }
        assert_eq!(find_method(&optimized), Some(JoinMethod::Hash));
    }

    #[test]
    fn optimizer_disabled_passes_through() {
        let stats = stats();
        let mut options = opts();
        options.enable_optimizer = false;
        let opt = Optimizer::new(&stats, CostConstants::default(), &options);
        let plan = LogicalPlan::Filter {
            input: Box::new(LogicalPlan::Scan { table: "t".into(), alias: None }),
            predicate: Expr::Literal { value: Value::Bool(true), pos: Pos::default() },
        };
        let (optimized, _) = opt.optimize(plan.clone());
        assert_eq!(optimized, plan);
    }

    #[test]
    fn parallel_and_serial_costing_agree() {
        let stats = stats();
        let mut options = opts();
        let plan = LogicalPlan::Join {
            left: Box::new(LogicalPlan::Scan { table: "big".into(), alias: None }),
            right: Box::new(LogicalPlan::Scan { table: "small".into(), alias: None }),
            join_type: JoinType::Cross,
            method: JoinMethod::NestedLoop,
            on: None,
        };
        let opt = Optimizer::new(&stats, CostConstants::default(), &options);
        let (serial, r1) = opt.optimize(plan.clone());
        options.parallel_cost_eval = true;
        let opt = Optimizer::new(&stats, CostConstants::default(), &options);
        let (parallel, r2) = opt.optimize(plan);
        assert_eq!(serial, parallel);
        assert_eq!(r1.candidates_considered, r2.candidates_considered);
        assert!((r1.chosen_cost - r2.chosen_cost).abs() < 1e-12);
    }
}
