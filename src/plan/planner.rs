//! Logical planner: lowers an analyzed AST statement into a logical tree.
//!
//! SELECT lowering builds leaves first: FROM tables become a left-deep chain
//! of CARTESIAN joins, explicit JOINs attach with their ON condition, WHERE
//! becomes a Filter above the join tree, aggregates produce an Aggregate
//! node (HAVING filters above it), and Project/Sort/Limit wrap the top.

use tracing::debug;

use crate::catalog::Catalog;
use crate::error::{EngineError, EngineResult};
use crate::plan::logical::{AggSpec, JoinMethod, LogicalPlan};
use crate::sql::ast::{Expr, JoinType, SelectItem, SelectStatement, Statement};

pub struct Planner<'a> {
    catalog: &'a Catalog,
    db: &'a str,
}

impl<'a> Planner<'a> {
    pub fn new(catalog: &'a Catalog, db: &'a str) -> Self {
        Self { catalog, db }
    }

    pub fn plan(&self, stmt: &Statement) -> EngineResult<LogicalPlan> {
        let plan = match stmt {
            Statement::Select(q) => self.plan_select(q)?,
            Statement::Insert { table, columns, rows, .. } => LogicalPlan::Insert {
                table: table.clone(),
                columns: columns.clone(),
                rows: rows.clone(),
            },
            Statement::Update { table, sets, filter, .. } => LogicalPlan::Update {
                table: table.clone(),
                sets: sets.clone(),
                filter: filter.clone(),
            },
            Statement::Delete { table, filter, .. } => {
                LogicalPlan::Delete { table: table.clone(), filter: filter.clone() }
            }
            Statement::CreateTable { name, columns, .. } => {
                LogicalPlan::CreateTable { name: name.clone(), columns: columns.clone() }
            }
            Statement::DropTable { name, if_exists, .. } => {
                LogicalPlan::DropTable { name: name.clone(), if_exists: *if_exists }
            }
            Statement::CreateIndex { name, table, columns, unique, .. } => LogicalPlan::CreateIndex {
                name: name.clone(),
                table: table.clone(),
                columns: columns.clone(),
                unique: *unique,
            },
            Statement::DropIndex { name, table, .. } => {
                LogicalPlan::DropIndex { name: name.clone(), table: table.clone() }
            }
            Statement::CreateView { name, definition_sql, .. } => LogicalPlan::CreateView {
                name: name.clone(),
                definition_sql: definition_sql.clone(),
            },
            Statement::AlterView { name, definition_sql, .. } => LogicalPlan::AlterView {
                name: name.clone(),
                definition_sql: definition_sql.clone(),
            },
            Statement::DropView { name, .. } => LogicalPlan::DropView { name: name.clone() },
            Statement::CreateTrigger {
                name,
                table,
                timing,
                events,
                row_level,
                when_sql,
                body_sql,
                ..
            } => LogicalPlan::CreateTrigger {
                name: name.clone(),
                table: table.clone(),
                timing: *timing,
                events: events.clone(),
                row_level: *row_level,
                when_sql: when_sql.clone(),
                body_sql: body_sql.clone(),
            },
            Statement::DropTrigger { name, .. } => {
                LogicalPlan::DropTrigger { name: name.clone() }
            }
            Statement::CreateDatabase { name, .. } => {
                LogicalPlan::CreateDatabase { name: name.clone() }
            }
            Statement::DropDatabase { name, .. } => {
                LogicalPlan::DropDatabase { name: name.clone() }
            }
            Statement::UseDatabase { name, .. } => {
                LogicalPlan::UseDatabase { name: name.clone() }
            }
            Statement::ShowDatabases { .. } => LogicalPlan::ShowDatabases,
            Statement::ShowTables { .. } => LogicalPlan::ShowTables,
            Statement::ShowColumns { table, .. } => {
                LogicalPlan::ShowColumns { table: table.clone() }
            }
            Statement::ShowIndex { table, .. } => LogicalPlan::ShowIndex { table: table.clone() },
            Statement::ShowViews { .. } => LogicalPlan::ShowViews,
            Statement::ShowTriggers { .. } => LogicalPlan::ShowTriggers,
            Statement::Explain { analyze, inner, .. } => LogicalPlan::Explain {
                analyze: *analyze,
                input: Box::new(self.plan(inner)?),
            },
            Statement::Begin { .. } => LogicalPlan::BeginTransaction,
            Statement::Commit { .. } => LogicalPlan::CommitTransaction,
            Statement::Rollback { .. } => LogicalPlan::RollbackTransaction,
            Statement::DeclareCursor { name, query, .. } => LogicalPlan::DeclareCursor {
                name: name.clone(),
                query: query.clone(),
            },
            Statement::OpenCursor { name, .. } => LogicalPlan::OpenCursor { name: name.clone() },
            Statement::FetchCursor { name, .. } => LogicalPlan::FetchCursor { name: name.clone() },
            Statement::CloseCursor { name, .. } => LogicalPlan::CloseCursor { name: name.clone() },
        };
        debug!(target: "opaldb::planner", "lowered {} into {}", stmt.describe(), plan.label());
        Ok(plan)
    }

    pub fn plan_select(&self, q: &SelectStatement) -> EngineResult<LogicalPlan> {
        // FROM: left-deep cartesian chain, then explicit joins.
        let mut plan: Option<LogicalPlan> = None;
        for tref in &q.from {
            let scan = LogicalPlan::Scan { table: tref.name.clone(), alias: tref.alias.clone() };
            plan = Some(match plan {
                None => scan,
                Some(left) => LogicalPlan::Join {
                    left: Box::new(left),
                    right: Box::new(scan),
                    join_type: JoinType::Cross,
                    method: JoinMethod::NestedLoop,
                    on: None,
                },
            });
        }
        for join in &q.joins {
            let left = plan.ok_or_else(|| {
                EngineError::plan("JOIN requires a preceding FROM table")
            })?;
            let right = LogicalPlan::Scan {
                table: join.table.name.clone(),
                alias: join.table.alias.clone(),
            };
            let (join_type, on) = match join.join_type {
                JoinType::Cross => (JoinType::Cross, None),
                jt => (jt, Some(join.on.clone())),
            };
            plan = Some(LogicalPlan::Join {
                left: Box::new(left),
                right: Box::new(right),
                join_type,
                method: JoinMethod::NestedLoop,
                on,
            });
        }

        let mut plan = match plan {
            Some(p) => p,
            // SELECT without FROM: a pure projection over one synthetic row.
            None => return self.plan_const_select(q),
        };

        if let Some(w) = &q.where_clause {
            plan = LogicalPlan::Filter { input: Box::new(plan), predicate: w.clone() };
        }

        let aggs = collect_aggregates(q);
        let mut sort_below_project = false;
        if !aggs.is_empty() || !q.group_by.is_empty() {
            // Group key: explicit GROUP BY, else derived from the
            // non-aggregate select items (the lenient mode path).
            let group_by: Vec<Expr> = if !q.group_by.is_empty() {
                q.group_by.clone()
            } else {
                q.items
                    .iter()
                    .filter(|i| !i.expr.contains_aggregate())
                    .map(|i| i.expr.clone())
                    .collect()
            };
            plan = LogicalPlan::Aggregate { input: Box::new(plan), group_by, aggs };
            if let Some(h) = &q.having {
                plan = LogicalPlan::Filter {
                    input: Box::new(plan),
                    predicate: rewrite_aggregate_refs(h),
                };
            }
            let items: Vec<SelectItem> = q
                .items
                .iter()
                .map(|i| SelectItem {
                    expr: rewrite_aggregate_refs(&i.expr),
                    alias: i.alias.clone(),
                })
                .collect();
            plan = LogicalPlan::Project { input: Box::new(plan), items };
        } else {
            let items = self.expand_wildcards(q)?;
            // ORDER BY keys that are not output columns sort the
            // pre-projection rows; projection preserves row order.
            let output_names: std::collections::HashSet<String> =
                items.iter().map(|i| i.output_name().to_lowercase()).collect();
            sort_below_project = q
                .order_by
                .iter()
                .any(|k| !output_names.contains(&k.column.to_lowercase()));
            if sort_below_project && !q.order_by.is_empty() {
                let keys = q.order_by.iter().map(|k| (k.column.clone(), k.asc)).collect();
                plan = LogicalPlan::Sort { input: Box::new(plan), keys };
            }
            plan = LogicalPlan::Project { input: Box::new(plan), items };
        }

        if !q.order_by.is_empty() && !sort_below_project {
            let keys = q.order_by.iter().map(|k| (k.column.clone(), k.asc)).collect();
            plan = LogicalPlan::Sort { input: Box::new(plan), keys };
        }

        if q.limit.is_some() || q.offset.is_some() {
            plan = LogicalPlan::Limit {
                input: Box::new(plan),
                limit: q.limit,
                offset: q.offset,
            };
        }

        Ok(plan)
    }

    /// SELECT with no FROM clause: literals only, one synthetic row.
    fn plan_const_select(&self, q: &SelectStatement) -> EngineResult<LogicalPlan> {
        for item in &q.items {
            if matches!(item.expr, Expr::Wildcard { .. }) {
                return Err(EngineError::plan("SELECT * requires a FROM clause"));
            }
        }
        Ok(LogicalPlan::Project {
            input: Box::new(LogicalPlan::ConstRow),
            items: q.items.clone(),
        })
    }

    /// Expand `*` select items into qualified column references in table
    /// declaration order.
    fn expand_wildcards(&self, q: &SelectStatement) -> EngineResult<Vec<SelectItem>> {
        let mut items = Vec::new();
        let multi_table = q.from.len() + q.joins.len() > 1;
        for item in &q.items {
            if let Expr::Wildcard { pos } = &item.expr {
                for tref in q.from.iter().chain(q.joins.iter().map(|j| &j.table)) {
                    let info = self.catalog.get_table(self.db, &tref.name)?;
                    let eff = tref.effective_name().to_string();
                    for col in &info.columns {
                        items.push(SelectItem {
                            expr: Expr::Column {
                                table: if multi_table { Some(eff.clone()) } else { None },
                                name: col.name.clone(),
                                pos: *pos,
                            },
                            alias: None,
                        });
                    }
                }
            } else {
                items.push(item.clone());
            }
        }
        Ok(items)
    }
}

/// Collect the distinct aggregates appearing in the select list and HAVING,
/// keyed by display name in first-appearance order.
fn collect_aggregates(q: &SelectStatement) -> Vec<AggSpec> {
    let mut specs: Vec<AggSpec> = Vec::new();
    let mut visit = |expr: &Expr| {
        let mut stack = vec![expr];
        while let Some(e) = stack.pop() {
            match e {
                Expr::Aggregate { func, arg, distinct, .. } => {
                    let name = e.display_name();
                    if !specs.iter().any(|s| s.output_name == name) {
                        specs.push(AggSpec {
                            func: *func,
                            arg: arg.as_deref().cloned(),
                            distinct: *distinct,
                            output_name: name,
                        });
                    }
                }
                Expr::Unary { expr, .. } => stack.push(expr),
                Expr::Binary { left, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
                Expr::Between { expr, low, high, .. } => {
                    stack.push(high);
                    stack.push(low);
                    stack.push(expr);
                }
                Expr::InList { expr, list, .. } => {
                    for i in list.iter().rev() {
                        stack.push(i);
                    }
                    stack.push(expr);
                }
                _ => {}
            }
        }
    };
    for item in &q.items {
        visit(&item.expr);
    }
    if let Some(h) = &q.having {
        visit(h);
    }
    specs
}

/// Replace aggregate sub-expressions with references to the Aggregate node's
/// synthesized output columns.
pub fn rewrite_aggregate_refs(expr: &Expr) -> Expr {
    match expr {
        Expr::Aggregate { pos, .. } => Expr::Column {
            table: None,
            name: expr.display_name(),
            pos: *pos,
        },
        Expr::Unary { op, expr, pos } => Expr::Unary {
            op: *op,
            expr: Box::new(rewrite_aggregate_refs(expr)),
            pos: *pos,
        },
        Expr::Binary { left, op, right, pos } => Expr::Binary {
            left: Box::new(rewrite_aggregate_refs(left)),
            op: *op,
            right: Box::new(rewrite_aggregate_refs(right)),
            pos: *pos,
        },
        Expr::Between { expr, low, high, negated, pos } => Expr::Between {
            expr: Box::new(rewrite_aggregate_refs(expr)),
            low: Box::new(rewrite_aggregate_refs(low)),
            high: Box::new(rewrite_aggregate_refs(high)),
            negated: *negated,
            pos: *pos,
        },
        Expr::InList { expr, list, negated, pos } => Expr::InList {
            expr: Box::new(rewrite_aggregate_refs(expr)),
            list: list.iter().map(rewrite_aggregate_refs).collect(),
            negated: *negated,
            pos: *pos,
        },
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, ColumnInfo, TableInfo, DEFAULT_DATABASE};
    use crate::sql::parser::parse_single;
    use crate::value::DataType;

    fn catalog() -> Catalog {
        let cat = Catalog::new_in_memory();
        for (table, cols) in [
            ("users", vec![("id", DataType::Int, true), ("name", DataType::Varchar, false)]),
            ("orders", vec![("id", DataType::Int, true), ("uid", DataType::Int, false)]),
        ] {
            let cols = cols
                .into_iter()
                .map(|(n, t, pk)| ColumnInfo {
                    name: n.into(),
                    data_type: t,
                    nullable: !pk,
                    default: None,
                    is_primary_key: pk,
                })
                .collect();
            cat.insert_table(DEFAULT_DATABASE, TableInfo::new(table, cols)).unwrap();
        }
        cat
    }

    fn plan(sql: &str) -> LogicalPlan {
        let cat = catalog();
        let stmt = parse_single(sql).expect("parse failed");
        Planner::new(&cat, DEFAULT_DATABASE).plan(&stmt).expect("plan failed")
    }

    #[test]
    fn simple_select_shape() {
        let p = plan("SELECT name FROM users WHERE id = 1");
        // Project -> Filter -> Scan
        match p {
            LogicalPlan::Project { input, .. } => match *input {
                LogicalPlan::Filter { input, .. } => {
                    assert!(matches!(*input, LogicalPlan::Scan { .. }))
                }
                other => panic!("expected Filter, got {}", other.label()),
            },
            other => panic!("expected Project, got {}", other.label()),
        }
    }

    #[test]
    fn multi_table_from_becomes_cartesian_chain() {
        let p = plan("SELECT users.name FROM users, orders");
        match p {
            LogicalPlan::Project { input, .. } => match *input {
                LogicalPlan::Join { join_type: JoinType::Cross, on: None, .. } => {}
                other => panic!("expected cartesian join, got {}", other.label()),
            },
            _ => panic!("expected Project root"),
        }
    }

    #[test]
    fn explicit_join_keeps_condition() {
        let p = plan("SELECT users.name FROM users JOIN orders ON users.id = orders.uid");
        match p {
            LogicalPlan::Project { input, .. } => match *input {
                LogicalPlan::Join { join_type: JoinType::Inner, on: Some(_), .. } => {}
                other => panic!("expected inner join, got {}", other.label()),
            },
            _ => panic!("expected Project root"),
        }
    }

    #[test]
    fn aggregate_with_having_and_order() {
        let p = plan(
            "SELECT name, COUNT(*) FROM users GROUP BY name HAVING COUNT(*) > 1 ORDER BY name",
        );
        // Sort -> Project -> Filter(HAVING) -> Aggregate -> Scan
        let sort = match p {
            LogicalPlan::Sort { input, .. } => *input,
            other => panic!("expected Sort root, got {}", other.label()),
        };
        let project = match sort {
            LogicalPlan::Project { input, items } => {
                // aggregate item rewritten to a column ref
                assert!(matches!(items[1].expr, Expr::Column { .. }));
                *input
            }
            other => panic!("expected Project, got {}", other.label()),
        };
        let filter = match project {
            LogicalPlan::Filter { input, .. } => *input,
            other => panic!("expected HAVING filter, got {}", other.label()),
        };
        match filter {
            LogicalPlan::Aggregate { group_by, aggs, .. } => {
                assert_eq!(group_by.len(), 1);
                assert_eq!(aggs.len(), 1);
                assert_eq!(aggs[0].output_name, "COUNT(*)");
            }
            other => panic!("expected Aggregate, got {}", other.label()),
        }
    }

    #[test]
    fn wildcard_expands_in_table_order() {
        let p = plan("SELECT * FROM users");
        match p {
            LogicalPlan::Project { items, .. } => {
                let names: Vec<String> = items.iter().map(|i| i.output_name()).collect();
                assert_eq!(names, vec!["id", "name"]);
            }
            _ => panic!("expected Project root"),
        }
    }

    #[test]
    fn limit_offset_wrap_top() {
        let p = plan("SELECT name FROM users ORDER BY name LIMIT 5 OFFSET 2");
        match p {
            LogicalPlan::Limit { limit: Some(5), offset: Some(2), input } => {
                assert!(matches!(*input, LogicalPlan::Sort { .. }));
            }
            other => panic!("expected Limit root, got {}", other.label()),
        }
    }
}
