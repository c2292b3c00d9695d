//! Physical builder: maps an optimized logical tree to physical operators
//! bound to the storage engine, catalog and transaction.
//!
//! Expression trees compile to evaluators over resolved column indices.
//! Uncorrelated subqueries are materialized here, once, by executing their
//! own compiled plans and splicing the results back in as literals.

use tracing::debug;

use crate::catalog::{ColumnInfo, TableInfo, TriggerInfo};
use crate::config::EngineOptions;
use crate::error::{EngineError, EngineResult};
use crate::exec::agg::{AggInstance, HashAggregate};
use crate::exec::ddl;
use crate::exec::dml;
use crate::exec::eval::{compile, infer_type, Evaluator};
use crate::exec::explain::Explain;
use crate::exec::filter::{Filter, Limit, Project, Sort};
use crate::exec::join::{HashJoin, NestedLoopJoin, SortMergeJoin};
use crate::exec::scan::{ConstRow, IndexScan, SeqScan};
use crate::exec::show;
use crate::exec::{drain, ExecContext, PhysicalOperator, Profiled, Schema, SchemaColumn};
use crate::plan::logical::{JoinMethod, LogicalPlan};
use crate::plan::optimizer::{equi_join_keys, CostConstants, CostModel, Optimizer};
use crate::plan::planner::Planner;
use crate::sql::ast::{ColumnDef, Expr, JoinType, SelectStatement};
use crate::value::{DataType, Value};

pub struct PhysicalBuilder<'a> {
    options: &'a EngineOptions,
    constants: CostConstants,
    profile: bool,
}

impl<'a> PhysicalBuilder<'a> {
    pub fn new(options: &'a EngineOptions, constants: CostConstants) -> Self {
        Self { options, constants, profile: false }
    }

    pub fn with_profiling(options: &'a EngineOptions, constants: CostConstants) -> Self {
        Self { options, constants, profile: true }
    }

    fn wrap(&self, op: Box<dyn PhysicalOperator>) -> Box<dyn PhysicalOperator> {
        if self.profile {
            Profiled::wrap(op)
        } else {
            op
        }
    }

    pub fn build(
        &self,
        plan: &LogicalPlan,
        ctx: &mut ExecContext,
    ) -> EngineResult<Box<dyn PhysicalOperator>> {
        let op: Box<dyn PhysicalOperator> = match plan {
            LogicalPlan::ConstRow => Box::new(ConstRow::new()),
            LogicalPlan::Scan { table, alias } => {
                let schema = self.table_schema(ctx, table, alias.as_deref())?;
                Box::new(SeqScan::new(ctx.db.clone(), table.clone(), schema))
            }
            LogicalPlan::IndexScan { table, alias, index, column, key } => {
                let info = ctx.catalog.get_table(&ctx.db, table)?;
                let key_type = info
                    .column(column)
                    .map(|c| c.data_type)
                    .unwrap_or(DataType::Unknown);
                let key = key.coerce_to(key_type)?;
                let schema = self.table_schema(ctx, table, alias.as_deref())?;
                Box::new(IndexScan::new(
                    ctx.db.clone(),
                    table.clone(),
                    index.clone(),
                    vec![key],
                    schema,
                ))
            }
            LogicalPlan::Filter { input, predicate } => {
                let child = self.build(input, ctx)?;
                let predicate = self.resolve_subqueries(predicate, ctx)?;
                let label = predicate.display_name();
                let eval = compile(&predicate, child.schema())?;
                Box::new(Filter::new(child, eval, label))
            }
            LogicalPlan::Project { input, items } => {
                let child = self.build(input, ctx)?;
                let mut exprs: Vec<Evaluator> = Vec::with_capacity(items.len());
                let mut columns = Vec::with_capacity(items.len());
                let mut labels = Vec::with_capacity(items.len());
                for item in items {
                    let expr = self.resolve_subqueries(&item.expr, ctx)?;
                    let data_type = infer_type(&expr, child.schema());
                    exprs.push(compile(&expr, child.schema())?);
                    columns.push(SchemaColumn {
                        qualifier: None,
                        name: item.output_name(),
                        data_type,
                    });
                    labels.push(item.output_name());
                }
                Box::new(Project::new(child, exprs, Schema::new(columns), labels))
            }
            LogicalPlan::Join { left, right, join_type, method, on } => {
                self.build_join(left, right, *join_type, *method, on.as_ref(), ctx)?
            }
            LogicalPlan::Sort { input, keys } => {
                let child = self.build(input, ctx)?;
                let mut resolved = Vec::with_capacity(keys.len());
                let mut labels = Vec::with_capacity(keys.len());
                for (name, asc) in keys {
                    let idx = child.schema().index_of(name).ok_or_else(|| {
                        EngineError::plan(format!("ORDER BY column '{}' not in input", name))
                    })?;
                    resolved.push((idx, *asc));
                    labels.push(format!("{} {}", name, if *asc { "ASC" } else { "DESC" }));
                }
                Box::new(Sort::new(child, resolved, labels))
            }
            LogicalPlan::Aggregate { input, group_by, aggs } => {
                let child = self.build(input, ctx)?;
                let mut group_exprs = Vec::with_capacity(group_by.len());
                let mut columns = Vec::new();
                for g in group_by {
                    let name = match g {
                        Expr::Column { name, .. } => name.clone(),
                        other => other.display_name(),
                    };
                    columns.push(SchemaColumn {
                        qualifier: None,
                        name,
                        data_type: infer_type(g, child.schema()),
                    });
                    group_exprs.push(compile(g, child.schema())?);
                }
                let mut instances = Vec::with_capacity(aggs.len());
                for spec in aggs {
                    let arg = match &spec.arg {
                        Some(a) => {
                            let resolved = self.resolve_subqueries(a, ctx)?;
                            Some(compile(&resolved, child.schema())?)
                        }
                        None => None,
                    };
                    let data_type = match spec.func {
                        crate::sql::ast::AggFunc::Count => DataType::Int,
                        crate::sql::ast::AggFunc::Sum | crate::sql::ast::AggFunc::Avg => {
                            DataType::Float
                        }
                        _ => spec
                            .arg
                            .as_ref()
                            .map(|a| infer_type(a, child.schema()))
                            .unwrap_or(DataType::Unknown),
                    };
                    columns.push(SchemaColumn {
                        qualifier: None,
                        name: spec.output_name.clone(),
                        data_type,
                    });
                    instances.push(AggInstance {
                        func: spec.func,
                        arg,
                        distinct: spec.distinct,
                        label: spec.output_name.clone(),
                    });
                }
                Box::new(HashAggregate::new(child, group_exprs, instances, Schema::new(columns)))
            }
            LogicalPlan::Limit { input, limit, offset } => {
                let child = self.build(input, ctx)?;
                Box::new(Limit::new(child, *limit, *offset))
            }
            LogicalPlan::Insert { table, columns, rows } => {
                let info = ctx.catalog.get_table(&ctx.db, table)?;
                let materialized = self.materialize_insert_rows(&info, columns.as_deref(), rows, ctx)?;
                Box::new(dml::Insert::new(ctx.db.clone(), table.clone(), materialized))
            }
            LogicalPlan::Update { table, sets, filter } => {
                let info = ctx.catalog.get_table(&ctx.db, table)?;
                let child = self.build_dml_source(table, filter.as_ref(), ctx)?;
                let schema = self.table_schema(ctx, table, None)?;
                let mut resolved_sets = Vec::with_capacity(sets.len());
                let mut labels = Vec::with_capacity(sets.len());
                for (col, expr) in sets {
                    let idx = info.column_index(col).ok_or_else(|| {
                        EngineError::plan(format!("unknown column '{}' in UPDATE", col))
                    })?;
                    let expr = self.resolve_subqueries(expr, ctx)?;
                    resolved_sets.push((idx, compile(&expr, &schema)?));
                    labels.push(format!("{} = {}", col, expr.display_name()));
                }
                Box::new(dml::Update::new(child, ctx.db.clone(), table.clone(), resolved_sets, labels))
            }
            LogicalPlan::Delete { table, filter } => {
                let child = self.build_dml_source(table, filter.as_ref(), ctx)?;
                Box::new(dml::Delete::new(child, ctx.db.clone(), table.clone()))
            }
            LogicalPlan::CreateTable { name, columns } => {
                let infos = self.column_defs_to_infos(columns, ctx)?;
                Box::new(ddl::CreateTable::new(name.clone(), infos))
            }
            LogicalPlan::DropTable { name, if_exists } => {
                Box::new(ddl::DropTable::new(name.clone(), *if_exists))
            }
            LogicalPlan::CreateIndex { name, table, columns, unique } => Box::new(
                ddl::CreateIndex::new(name.clone(), table.clone(), columns.clone(), *unique),
            ),
            LogicalPlan::DropIndex { name, table } => {
                Box::new(ddl::DropIndex::new(name.clone(), table.clone()))
            }
            LogicalPlan::CreateView { name, definition_sql } => {
                Box::new(ddl::CreateView::new(name.clone(), definition_sql.clone()))
            }
            LogicalPlan::AlterView { name, definition_sql } => {
                Box::new(ddl::AlterView::new(name.clone(), definition_sql.clone()))
            }
            LogicalPlan::DropView { name } => Box::new(ddl::DropView::new(name.clone())),
            LogicalPlan::CreateTrigger {
                name,
                table,
                timing,
                events,
                row_level,
                when_sql,
                body_sql,
            } => Box::new(ddl::CreateTrigger::new(TriggerInfo {
                name: name.clone(),
                table: table.clone(),
                timing: *timing,
                events: events.clone(),
                row_level: *row_level,
                when_sql: when_sql.clone(),
                body_sql: body_sql.clone(),
            })),
            LogicalPlan::DropTrigger { name } => Box::new(ddl::DropTrigger::new(name.clone())),
            LogicalPlan::CreateDatabase { name } => {
                Box::new(ddl::CreateDatabase::new(name.clone()))
            }
            LogicalPlan::DropDatabase { name } => Box::new(ddl::DropDatabase::new(name.clone())),
            LogicalPlan::ShowDatabases => {
                Box::new(show::ShowDatabases::new(show::ShowDatabases::output_schema(), None))
            }
            LogicalPlan::ShowTables => {
                Box::new(show::ShowTables::new(show::ShowTables::output_schema(), None))
            }
            LogicalPlan::ShowColumns { table } => Box::new(show::ShowColumns::new(
                show::ShowColumns::output_schema(),
                Some(table.clone()),
            )),
            LogicalPlan::ShowIndex { table } => Box::new(show::ShowIndex::new(
                show::ShowIndex::output_schema(),
                Some(table.clone()),
            )),
            LogicalPlan::ShowViews => {
                Box::new(show::ShowViews::new(show::ShowViews::output_schema(), None))
            }
            LogicalPlan::ShowTriggers => {
                Box::new(show::ShowTriggers::new(show::ShowTriggers::output_schema(), None))
            }
            LogicalPlan::Explain { analyze, input } => {
                return self.build_explain(*analyze, input, ctx);
            }
            LogicalPlan::UseDatabase { .. }
            | LogicalPlan::DeclareCursor { .. }
            | LogicalPlan::OpenCursor { .. }
            | LogicalPlan::FetchCursor { .. }
            | LogicalPlan::CloseCursor { .. }
            | LogicalPlan::BeginTransaction
            | LogicalPlan::CommitTransaction
            | LogicalPlan::RollbackTransaction => {
                return Err(EngineError::plan(format!(
                    "{} is handled by the session, not the executor",
                    plan.label()
                )));
            }
        };
        Ok(self.wrap(op))
    }

    /// Compile a SELECT statement end-to-end (plan, optimize, build). Used
    /// for cursors and subquery materialization.
    pub fn compile_select(
        &self,
        query: &SelectStatement,
        ctx: &mut ExecContext,
    ) -> EngineResult<Box<dyn PhysicalOperator>> {
        let planner = Planner::new(&ctx.catalog, &ctx.db);
        let logical = planner.plan_select(query)?;
        let snapshot = ctx.catalog.snapshot(&ctx.db)?;
        let optimizer = Optimizer::new(&snapshot, self.constants, self.options);
        let (optimized, _) = optimizer.optimize(logical);
        self.build(&optimized, ctx)
    }

    fn table_schema(
        &self,
        ctx: &ExecContext,
        table: &str,
        alias: Option<&str>,
    ) -> EngineResult<Schema> {
        let info = ctx.catalog.get_table(&ctx.db, table)?;
        let qualifier = alias.unwrap_or(&info.name).to_string();
        Ok(Schema::new(
            info.columns
                .iter()
                .map(|c| SchemaColumn {
                    qualifier: Some(qualifier.clone()),
                    name: c.name.clone(),
                    data_type: c.data_type,
                })
                .collect(),
        ))
    }

    fn build_join(
        &self,
        left: &LogicalPlan,
        right: &LogicalPlan,
        join_type: JoinType,
        method: JoinMethod,
        on: Option<&Expr>,
        ctx: &mut ExecContext,
    ) -> EngineResult<Box<dyn PhysicalOperator>> {
        let left_op = self.build(left, ctx)?;
        let right_op = self.build(right, ctx)?;
        let schema = left_op.schema().concat(right_op.schema());

        // Hash and sort-merge apply to inner equi-joins only; everything
        // else (outer joins, arbitrary conditions) goes through the
        // nested-loop operator.
        if matches!(join_type, JoinType::Inner)
            && matches!(method, JoinMethod::Hash | JoinMethod::SortMerge)
        {
            if let Some(cond) = on {
                if let Some(keys) = equi_join_keys(cond, left, right) {
                    let mut lkeys = Vec::with_capacity(keys.len());
                    let mut rkeys = Vec::with_capacity(keys.len());
                    for (l, r) in &keys {
                        lkeys.push(compile(l, left_op.schema())?);
                        rkeys.push(compile(r, right_op.schema())?);
                    }
                    return Ok(match method {
                        JoinMethod::Hash => {
                            Box::new(HashJoin::new(left_op, right_op, lkeys, rkeys, schema))
                        }
                        _ => Box::new(SortMergeJoin::new(left_op, right_op, lkeys, rkeys, schema)),
                    });
                }
            }
        }

        let cond = match on {
            Some(c) => {
                let resolved = self.resolve_subqueries(c, ctx)?;
                Some(compile(&resolved, &schema)?)
            }
            None => None,
        };
        Ok(Box::new(NestedLoopJoin::new(left_op, right_op, join_type, cond, schema)))
    }

    fn build_dml_source(
        &self,
        table: &str,
        filter: Option<&Expr>,
        ctx: &mut ExecContext,
    ) -> EngineResult<Box<dyn PhysicalOperator>> {
        let schema = self.table_schema(ctx, table, None)?;
        let mut child: Box<dyn PhysicalOperator> =
            Box::new(SeqScan::new(ctx.db.clone(), table.to_string(), schema));
        if let Some(f) = filter {
            let resolved = self.resolve_subqueries(f, ctx)?;
            let label = resolved.display_name();
            let eval = compile(&resolved, child.schema())?;
            child = Box::new(Filter::new(child, eval, label));
        }
        Ok(child)
    }

    fn column_defs_to_infos(
        &self,
        defs: &[ColumnDef],
        ctx: &mut ExecContext,
    ) -> EngineResult<Vec<ColumnInfo>> {
        defs.iter()
            .map(|def| {
                let default = match &def.default {
                    Some(expr) => {
                        let v = self.eval_constant(expr, ctx)?;
                        Some(v.coerce_to(def.data_type)?)
                    }
                    None => None,
                };
                Ok(ColumnInfo {
                    name: def.name.clone(),
                    data_type: def.data_type,
                    nullable: !def.not_null,
                    default,
                    is_primary_key: def.primary_key,
                })
            })
            .collect()
    }

    /// Evaluate a constant expression (INSERT values, DEFAULT clauses).
    fn eval_constant(&self, expr: &Expr, ctx: &mut ExecContext) -> EngineResult<Value> {
        let resolved = self.resolve_subqueries(expr, ctx)?;
        let eval = compile(&resolved, &Schema::default())?;
        eval(&[])
    }

    fn materialize_insert_rows(
        &self,
        info: &TableInfo,
        columns: Option<&[String]>,
        rows: &[Vec<Expr>],
        ctx: &mut ExecContext,
    ) -> EngineResult<Vec<Vec<Value>>> {
        // Map each provided value position to a table column index.
        let targets: Vec<usize> = match columns {
            Some(cols) => cols
                .iter()
                .map(|c| {
                    info.column_index(c).ok_or_else(|| {
                        EngineError::plan(format!(
                            "unknown column '{}' in table '{}'",
                            c, info.name
                        ))
                    })
                })
                .collect::<EngineResult<_>>()?,
            None => (0..info.columns.len()).collect(),
        };
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != targets.len() {
                return Err(EngineError::plan(format!(
                    "INSERT row has {} values but {} target column(s)",
                    row.len(),
                    targets.len()
                )));
            }
            // Start from defaults/NULLs, then fill the listed columns.
            let mut values: Vec<Value> = info
                .columns
                .iter()
                .map(|c| c.default.clone().unwrap_or(Value::Null))
                .collect();
            for (expr, target) in row.iter().zip(&targets) {
                let v = self.eval_constant(expr, ctx)?;
                values[*target] = v;
            }
            out.push(values);
        }
        Ok(out)
    }

    fn build_explain(
        &self,
        analyze: bool,
        input: &LogicalPlan,
        ctx: &mut ExecContext,
    ) -> EngineResult<Box<dyn PhysicalOperator>> {
        let snapshot = ctx.catalog.snapshot(&ctx.db)?;
        let optimizer = Optimizer::new(&snapshot, self.constants, self.options);
        let (optimized, report) = optimizer.optimize(input.clone());
        let model = CostModel::new(self.constants, &snapshot);
        let mut text = render_with_costs(&optimized, &model);
        text.push_str(&format!(
            "Estimated cost: {:.4}, estimated rows: {:.0}, candidates considered: {}\n",
            report.chosen_cost, report.estimated_rows, report.candidates_considered
        ));
        if let Some(reason) = &report.fallback_reason {
            text.push_str(&format!("Optimizer fallback: {}\n", reason));
        }

        let child_is_relational = optimized.is_relational();
        let child = if analyze {
            let inner_builder = PhysicalBuilder::with_profiling(self.options, self.constants);
            Some(inner_builder.build(&optimized, ctx)?)
        } else {
            None
        };
        debug!(target: "opaldb::exec", "explain built (analyze={})", analyze);
        Ok(Box::new(Explain::new(text, analyze, child, child_is_relational)))
    }

    /// Replace subquery expressions with their materialized results.
    fn resolve_subqueries(&self, expr: &Expr, ctx: &mut ExecContext) -> EngineResult<Expr> {
        Ok(match expr {
            Expr::Subquery { query, pos } => {
                let values = self.run_subquery(query, ctx)?;
                if values.len() > 1 {
                    return Err(EngineError::exec(
                        "scalar subquery returned more than one row",
                    ));
                }
                Expr::Literal {
                    value: values.into_iter().next().unwrap_or(Value::Null),
                    pos: *pos,
                }
            }
            Expr::InSubquery { expr: probe, query, negated, pos } => {
                let probe = self.resolve_subqueries(probe, ctx)?;
                let values = self.run_subquery(query, ctx)?;
                Expr::InList {
                    expr: Box::new(probe),
                    list: values
                        .into_iter()
                        .map(|v| Expr::Literal { value: v, pos: *pos })
                        .collect(),
                    negated: *negated,
                    pos: *pos,
                }
            }
            Expr::Exists { query, negated, pos } => {
                let values = self.run_subquery(query, ctx)?;
                Expr::Literal { value: Value::Bool(values.is_empty() == *negated), pos: *pos }
            }
            Expr::Unary { op, expr, pos } => Expr::Unary {
                op: *op,
                expr: Box::new(self.resolve_subqueries(expr, ctx)?),
                pos: *pos,
            },
            Expr::Binary { left, op, right, pos } => Expr::Binary {
                left: Box::new(self.resolve_subqueries(left, ctx)?),
                op: *op,
                right: Box::new(self.resolve_subqueries(right, ctx)?),
                pos: *pos,
            },
            Expr::Between { expr, low, high, negated, pos } => Expr::Between {
                expr: Box::new(self.resolve_subqueries(expr, ctx)?),
                low: Box::new(self.resolve_subqueries(low, ctx)?),
                high: Box::new(self.resolve_subqueries(high, ctx)?),
                negated: *negated,
                pos: *pos,
            },
            Expr::InList { expr, list, negated, pos } => Expr::InList {
                expr: Box::new(self.resolve_subqueries(expr, ctx)?),
                list: list
                    .iter()
                    .map(|e| self.resolve_subqueries(e, ctx))
                    .collect::<EngineResult<_>>()?,
                negated: *negated,
                pos: *pos,
            },
            other => other.clone(),
        })
    }

    /// Execute a subquery to completion, returning its first column.
    fn run_subquery(
        &self,
        query: &SelectStatement,
        ctx: &mut ExecContext,
    ) -> EngineResult<Vec<Value>> {
        let sub_builder = PhysicalBuilder::new(self.options, self.constants);
        let mut op = sub_builder.compile_select(query, ctx)?;
        let batches = drain(op.as_mut(), ctx)?;
        let mut out = Vec::new();
        for batch in batches {
            for (_, mut values) in batch.rows {
                if values.is_empty() {
                    return Err(EngineError::exec("subquery produced an empty row"));
                }
                out.push(values.swap_remove(0));
            }
        }
        debug!(target: "opaldb::exec", "subquery materialized {} value(s)", out.len());
        Ok(out)
    }
}

/// Logical tree rendering with per-node cost estimates (EXPLAIN body).
fn render_with_costs(plan: &LogicalPlan, model: &CostModel) -> String {
    fn walk(plan: &LogicalPlan, model: &CostModel, out: &mut String, depth: usize) {
        use std::fmt::Write as _;
        if plan.is_relational() {
            let cost = model.cost(plan).total();
            let rows = model.estimate_rows(plan);
            let _ = writeln!(
                out,
                "{}-> {} (cost={:.4} rows={:.0})",
                "  ".repeat(depth),
                plan.label(),
                cost,
                rows
            );
        } else {
            let _ = writeln!(out, "{}-> {}", "  ".repeat(depth), plan.label());
        }
        for child in plan.children() {
            walk(child, model, out, depth + 1);
        }
    }
    let mut out = String::new();
    walk(plan, model, &mut out, 0);
    out
}

