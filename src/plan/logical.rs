//! Logical plan operators.
//!
//! A rooted tree of tagged variants, produced by the planner and rewritten
//! by the optimizer. Relational operators derive their output schema from
//! the catalog; DML/DDL/utility operators are terminal and carry the
//! statement payload through to the physical builder.

use std::fmt::Write as _;

use crate::catalog::{TriggerEvent, TriggerTiming};
use crate::sql::ast::{ColumnDef, Expr, JoinType, SelectItem, SelectStatement};
use crate::value::Value;

/// Physical join algorithm selected by the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMethod {
    NestedLoop,
    Hash,
    SortMerge,
}

impl std::fmt::Display for JoinMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JoinMethod::NestedLoop => "nested_loop",
            JoinMethod::Hash => "hash",
            JoinMethod::SortMerge => "sort_merge",
        };
        write!(f, "{}", s)
    }
}

/// One aggregate computed by an Aggregate node, keyed by its display name.
#[derive(Debug, Clone, PartialEq)]
pub struct AggSpec {
    pub func: crate::sql::ast::AggFunc,
    pub arg: Option<Expr>,
    pub distinct: bool,
    /// Synthesized output column name, e.g. `COUNT(*)`.
    pub output_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    /// Single synthetic empty row, the input of a FROM-less SELECT.
    ConstRow,
    Scan {
        table: String,
        alias: Option<String>,
    },
    /// Equality index lookup synthesized by the optimizer from
    /// `Filter(col = literal, Scan)`.
    IndexScan {
        table: String,
        alias: Option<String>,
        index: String,
        column: String,
        key: Value,
    },
    Filter {
        input: Box<LogicalPlan>,
        predicate: Expr,
    },
    Project {
        input: Box<LogicalPlan>,
        items: Vec<SelectItem>,
    },
    Join {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        join_type: JoinType,
        method: JoinMethod,
        on: Option<Expr>,
    },
    Sort {
        input: Box<LogicalPlan>,
        keys: Vec<(String, bool)>,
    },
    Aggregate {
        input: Box<LogicalPlan>,
        group_by: Vec<Expr>,
        aggs: Vec<AggSpec>,
    },
    Limit {
        input: Box<LogicalPlan>,
        limit: Option<u64>,
        offset: Option<u64>,
    },
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Expr>>,
    },
    Update {
        table: String,
        sets: Vec<(String, Expr)>,
        filter: Option<Expr>,
    },
    Delete {
        table: String,
        filter: Option<Expr>,
    },
    CreateTable {
        name: String,
        columns: Vec<ColumnDef>,
    },
    DropTable {
        name: String,
        if_exists: bool,
    },
    CreateIndex {
        name: String,
        table: String,
        columns: Vec<String>,
        unique: bool,
    },
    DropIndex {
        name: String,
        table: Option<String>,
    },
    CreateView {
        name: String,
        definition_sql: String,
    },
    AlterView {
        name: String,
        definition_sql: String,
    },
    DropView {
        name: String,
    },
    CreateTrigger {
        name: String,
        table: String,
        timing: TriggerTiming,
        events: Vec<TriggerEvent>,
        row_level: bool,
        when_sql: Option<String>,
        body_sql: String,
    },
    DropTrigger {
        name: String,
    },
    CreateDatabase {
        name: String,
    },
    DropDatabase {
        name: String,
    },
    UseDatabase {
        name: String,
    },
    ShowDatabases,
    ShowTables,
    ShowColumns {
        table: String,
    },
    ShowIndex {
        table: String,
    },
    ShowViews,
    ShowTriggers,
    Explain {
        analyze: bool,
        input: Box<LogicalPlan>,
    },
    DeclareCursor {
        name: String,
        query: Box<SelectStatement>,
    },
    OpenCursor {
        name: String,
    },
    FetchCursor {
        name: String,
    },
    CloseCursor {
        name: String,
    },
    BeginTransaction,
    CommitTransaction,
    RollbackTransaction,
}

impl LogicalPlan {
    pub fn children(&self) -> Vec<&LogicalPlan> {
        match self {
            LogicalPlan::Filter { input, .. }
            | LogicalPlan::Project { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Aggregate { input, .. }
            | LogicalPlan::Limit { input, .. }
            | LogicalPlan::Explain { input, .. } => vec![input],
            LogicalPlan::Join { left, right, .. } => vec![left, right],
            _ => vec![],
        }
    }

    /// Effective table bindings produced by this subtree, used by predicate
    /// pushdown to decide which join side owns a column.
    pub fn bound_tables(&self) -> Vec<(String, String)> {
        match self {
            LogicalPlan::Scan { table, alias } => {
                vec![(alias.clone().unwrap_or_else(|| table.clone()), table.clone())]
            }
            LogicalPlan::IndexScan { table, alias, .. } => {
                vec![(alias.clone().unwrap_or_else(|| table.clone()), table.clone())]
            }
            _ => {
                let mut out = Vec::new();
                for c in self.children() {
                    out.extend(c.bound_tables());
                }
                out
            }
        }
    }

    /// One-line operator label for EXPLAIN output.
    pub fn label(&self) -> String {
        match self {
            LogicalPlan::ConstRow => "ConstRow".to_string(),
            LogicalPlan::Scan { table, alias } => match alias {
                Some(a) if !a.eq_ignore_ascii_case(table) => format!("Scan({} AS {})", table, a),
                _ => format!("Scan({})", table),
            },
            LogicalPlan::IndexScan { table, index, column, key, .. } => {
                format!("IndexScan({}, {}, {}={})", table, index, column, key)
            }
            LogicalPlan::Filter { predicate, .. } => {
                format!("Filter({})", predicate.display_name())
            }
            LogicalPlan::Project { items, .. } => {
                let cols: Vec<String> = items.iter().map(|i| i.output_name()).collect();
                format!("Project({})", cols.join(", "))
            }
            LogicalPlan::Join { join_type, method, on, .. } => match on {
                Some(cond) => format!("{}Join[{}]({})", join_type, method, cond.display_name()),
                None => format!("{}Join[{}]", join_type, method),
            },
            LogicalPlan::Sort { keys, .. } => {
                let ks: Vec<String> = keys
                    .iter()
                    .map(|(c, asc)| format!("{} {}", c, if *asc { "ASC" } else { "DESC" }))
                    .collect();
                format!("Sort({})", ks.join(", "))
            }
            LogicalPlan::Aggregate { group_by, aggs, .. } => {
                let gs: Vec<String> = group_by.iter().map(|g| g.display_name()).collect();
                let asr: Vec<String> = aggs.iter().map(|a| a.output_name.clone()).collect();
                if gs.is_empty() {
                    format!("Aggregate({})", asr.join(", "))
                } else {
                    format!("Aggregate({} GROUP BY {})", asr.join(", "), gs.join(", "))
                }
            }
            LogicalPlan::Limit { limit, offset, .. } => {
                format!("Limit({:?}, offset {:?})", limit, offset)
            }
            LogicalPlan::Insert { table, rows, .. } => {
                format!("Insert({}, {} row(s))", table, rows.len())
            }
            LogicalPlan::Update { table, sets, .. } => {
                format!("Update({}, {} column(s))", table, sets.len())
            }
            LogicalPlan::Delete { table, .. } => format!("Delete({})", table),
            LogicalPlan::CreateTable { name, .. } => format!("CreateTable({})", name),
            LogicalPlan::DropTable { name, .. } => format!("DropTable({})", name),
            LogicalPlan::CreateIndex { name, table, .. } => {
                format!("CreateIndex({} ON {})", name, table)
            }
            LogicalPlan::DropIndex { name, .. } => format!("DropIndex({})", name),
            LogicalPlan::CreateView { name, .. } => format!("CreateView({})", name),
            LogicalPlan::AlterView { name, .. } => format!("AlterView({})", name),
            LogicalPlan::DropView { name } => format!("DropView({})", name),
            LogicalPlan::CreateTrigger { name, table, .. } => {
                format!("CreateTrigger({} ON {})", name, table)
            }
            LogicalPlan::DropTrigger { name } => format!("DropTrigger({})", name),
            LogicalPlan::CreateDatabase { name } => format!("CreateDatabase({})", name),
            LogicalPlan::DropDatabase { name } => format!("DropDatabase({})", name),
            LogicalPlan::UseDatabase { name } => format!("UseDatabase({})", name),
            LogicalPlan::ShowDatabases => "ShowDatabases".to_string(),
            LogicalPlan::ShowTables => "ShowTables".to_string(),
            LogicalPlan::ShowColumns { table } => format!("ShowColumns({})", table),
            LogicalPlan::ShowIndex { table } => format!("ShowIndex({})", table),
            LogicalPlan::ShowViews => "ShowViews".to_string(),
            LogicalPlan::ShowTriggers => "ShowTriggers".to_string(),
            LogicalPlan::Explain { analyze, .. } => {
                if *analyze {
                    "ExplainAnalyze".to_string()
                } else {
                    "Explain".to_string()
                }
            }
            LogicalPlan::DeclareCursor { name, .. } => format!("DeclareCursor({})", name),
            LogicalPlan::OpenCursor { name } => format!("OpenCursor({})", name),
            LogicalPlan::FetchCursor { name } => format!("FetchCursor({})", name),
            LogicalPlan::CloseCursor { name } => format!("CloseCursor({})", name),
            LogicalPlan::BeginTransaction => "BeginTransaction".to_string(),
            LogicalPlan::CommitTransaction => "CommitTransaction".to_string(),
            LogicalPlan::RollbackTransaction => "RollbackTransaction".to_string(),
        }
    }

    /// Indented tree rendering used by EXPLAIN and the optimizer decision log.
    pub fn format_tree(&self) -> String {
        let mut out = String::new();
        self.format_into(&mut out, 0);
        out
    }

    fn format_into(&self, out: &mut String, depth: usize) {
        let _ = writeln!(out, "{}-> {}", "  ".repeat(depth), self.label());
        for child in self.children() {
            child.format_into(out, depth + 1);
        }
    }

    /// Whether this node produces row batches (as opposed to a status).
    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            LogicalPlan::ConstRow
                | LogicalPlan::Scan { .. }
                | LogicalPlan::IndexScan { .. }
                | LogicalPlan::Filter { .. }
                | LogicalPlan::Project { .. }
                | LogicalPlan::Join { .. }
                | LogicalPlan::Sort { .. }
                | LogicalPlan::Aggregate { .. }
                | LogicalPlan::Limit { .. }
        )
    }
}
