//! Abstract syntax tree for the supported SQL subset.
//!
//! One `Expr` type is threaded through the whole pipeline: the parser builds
//! it, the semantic analyzer annotates types against it, the planner embeds
//! it in logical operators and the physical builder compiles it into
//! evaluators. Column identity is canonically `(optional table, column,
//! optional alias)` everywhere.

use std::fmt;

use crate::catalog::{TriggerEvent, TriggerTiming};
use crate::value::{BinOpKind, DataType, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

impl Pos {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal {
        value: Value,
        pos: Pos,
    },
    Column {
        table: Option<String>,
        name: String,
        pos: Pos,
    },
    /// `*` in a select list (expanded by the planner) or in `COUNT(*)`.
    Wildcard {
        pos: Pos,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
        pos: Pos,
    },
    Binary {
        left: Box<Expr>,
        op: BinOpKind,
        right: Box<Expr>,
        pos: Pos,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
        pos: Pos,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
        pos: Pos,
    },
    InSubquery {
        expr: Box<Expr>,
        query: Box<SelectStatement>,
        negated: bool,
        pos: Pos,
    },
    /// Uncorrelated scalar subquery.
    Subquery {
        query: Box<SelectStatement>,
        pos: Pos,
    },
    Exists {
        query: Box<SelectStatement>,
        negated: bool,
        pos: Pos,
    },
    Aggregate {
        func: AggFunc,
        arg: Option<Box<Expr>>,
        distinct: bool,
        pos: Pos,
    },
}

impl Expr {
    pub fn pos(&self) -> Pos {
        match self {
            Expr::Literal { pos, .. }
            | Expr::Column { pos, .. }
            | Expr::Wildcard { pos }
            | Expr::Unary { pos, .. }
            | Expr::Binary { pos, .. }
            | Expr::Between { pos, .. }
            | Expr::InList { pos, .. }
            | Expr::InSubquery { pos, .. }
            | Expr::Subquery { pos, .. }
            | Expr::Exists { pos, .. }
            | Expr::Aggregate { pos, .. } => *pos,
        }
    }

    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Aggregate { .. } => true,
            Expr::Unary { expr, .. } => expr.contains_aggregate(),
            Expr::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expr::Between { expr, low, high, .. } => {
                expr.contains_aggregate() || low.contains_aggregate() || high.contains_aggregate()
            }
            Expr::InList { expr, list, .. } => {
                expr.contains_aggregate() || list.iter().any(|e| e.contains_aggregate())
            }
            Expr::InSubquery { expr, .. } => expr.contains_aggregate(),
            _ => false,
        }
    }

    /// Collect every column reference in evaluation order.
    pub fn collect_columns<'a>(&'a self, out: &mut Vec<(&'a Option<String>, &'a str)>) {
        match self {
            Expr::Column { table, name, .. } => out.push((table, name.as_str())),
            Expr::Unary { expr, .. } => expr.collect_columns(out),
            Expr::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::Between { expr, low, high, .. } => {
                expr.collect_columns(out);
                low.collect_columns(out);
                high.collect_columns(out);
            }
            Expr::InList { expr, list, .. } => {
                expr.collect_columns(out);
                for e in list {
                    e.collect_columns(out);
                }
            }
            Expr::InSubquery { expr, .. } => expr.collect_columns(out),
            Expr::Aggregate { arg: Some(arg), .. } => arg.collect_columns(out),
            _ => {}
        }
    }

    /// Canonical display form, also used as the synthesized output column
    /// name for aggregates (`COUNT(*)`, `SUM(amount)`).
    pub fn display_name(&self) -> String {
        match self {
            Expr::Literal { value, .. } => value.to_string(),
            Expr::Column { table, name, .. } => match table {
                Some(t) => format!("{}.{}", t, name),
                None => name.clone(),
            },
            Expr::Wildcard { .. } => "*".to_string(),
            Expr::Unary { op, expr, .. } => match op {
                UnaryOp::Neg => format!("-{}", expr.display_name()),
                UnaryOp::Not => format!("NOT {}", expr.display_name()),
            },
            Expr::Binary { left, op, right, .. } => {
                format!("{} {} {}", left.display_name(), op, right.display_name())
            }
            Expr::Between { expr, low, high, negated, .. } => format!(
                "{}{} BETWEEN {} AND {}",
                expr.display_name(),
                if *negated { " NOT" } else { "" },
                low.display_name(),
                high.display_name()
            ),
            Expr::InList { expr, negated, .. } => format!(
                "{}{} IN (...)",
                expr.display_name(),
                if *negated { " NOT" } else { "" }
            ),
            Expr::InSubquery { expr, negated, .. } => format!(
                "{}{} IN (subquery)",
                expr.display_name(),
                if *negated { " NOT" } else { "" }
            ),
            Expr::Subquery { .. } => "(subquery)".to_string(),
            Expr::Exists { negated, .. } => {
                format!("{}EXISTS (subquery)", if *negated { "NOT " } else { "" })
            }
            Expr::Aggregate { func, arg, distinct, .. } => {
                let inner = match arg {
                    Some(e) => e.display_name(),
                    None => "*".to_string(),
                };
                if *distinct {
                    format!("{}(DISTINCT {})", func, inner)
                } else {
                    format!("{}({})", func, inner)
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectItem {
    /// Output column name: alias if present, else the display form.
    pub fn output_name(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.expr.display_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT",
            JoinType::Right => "RIGHT",
            JoinType::Full => "FULL",
            JoinType::Cross => "CARTESIAN",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub join_type: JoinType,
    pub table: TableRef,
    pub on: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    /// Output column name or alias.
    pub column: String,
    pub asc: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub items: Vec<SelectItem>,
    pub from: Vec<TableRef>,
    pub joins: Vec<JoinClause>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub not_null: bool,
    pub primary_key: bool,
    pub default: Option<Expr>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateDatabase { name: String, pos: Pos },
    DropDatabase { name: String, pos: Pos },
    UseDatabase { name: String, pos: Pos },
    ShowDatabases { pos: Pos },
    ShowTables { pos: Pos },
    ShowColumns { table: String, pos: Pos },
    ShowIndex { table: String, pos: Pos },
    ShowViews { pos: Pos },
    ShowTriggers { pos: Pos },
    CreateTable {
        name: String,
        columns: Vec<ColumnDef>,
        pos: Pos,
    },
    DropTable {
        name: String,
        if_exists: bool,
        pos: Pos,
    },
    CreateIndex {
        name: String,
        table: String,
        columns: Vec<String>,
        unique: bool,
        pos: Pos,
    },
    DropIndex {
        name: String,
        table: Option<String>,
        pos: Pos,
    },
    CreateView {
        name: String,
        definition_sql: String,
        pos: Pos,
    },
    AlterView {
        name: String,
        definition_sql: String,
        pos: Pos,
    },
    DropView {
        name: String,
        pos: Pos,
    },
    CreateTrigger {
        name: String,
        table: String,
        timing: TriggerTiming,
        events: Vec<TriggerEvent>,
        row_level: bool,
        when_sql: Option<String>,
        body_sql: String,
        pos: Pos,
    },
    DropTrigger {
        name: String,
        pos: Pos,
    },
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Expr>>,
        pos: Pos,
    },
    Update {
        table: String,
        sets: Vec<(String, Expr)>,
        filter: Option<Expr>,
        pos: Pos,
    },
    Delete {
        table: String,
        filter: Option<Expr>,
        pos: Pos,
    },
    Select(Box<SelectStatement>),
    Explain {
        analyze: bool,
        inner: Box<Statement>,
        pos: Pos,
    },
    Begin { pos: Pos },
    Commit { pos: Pos },
    Rollback { pos: Pos },
    DeclareCursor {
        name: String,
        query: Box<SelectStatement>,
        pos: Pos,
    },
    OpenCursor { name: String, pos: Pos },
    FetchCursor { name: String, pos: Pos },
    CloseCursor { name: String, pos: Pos },
}

impl Statement {
    /// Statement keyword for logging and error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Statement::CreateDatabase { .. } => "CREATE DATABASE",
            Statement::DropDatabase { .. } => "DROP DATABASE",
            Statement::UseDatabase { .. } => "USE",
            Statement::ShowDatabases { .. } => "SHOW DATABASES",
            Statement::ShowTables { .. } => "SHOW TABLES",
            Statement::ShowColumns { .. } => "SHOW COLUMNS",
            Statement::ShowIndex { .. } => "SHOW INDEX",
            Statement::ShowViews { .. } => "SHOW VIEWS",
            Statement::ShowTriggers { .. } => "SHOW TRIGGERS",
            Statement::CreateTable { .. } => "CREATE TABLE",
            Statement::DropTable { .. } => "DROP TABLE",
            Statement::CreateIndex { .. } => "CREATE INDEX",
            Statement::DropIndex { .. } => "DROP INDEX",
            Statement::CreateView { .. } => "CREATE VIEW",
            Statement::AlterView { .. } => "ALTER VIEW",
            Statement::DropView { .. } => "DROP VIEW",
            Statement::CreateTrigger { .. } => "CREATE TRIGGER",
            Statement::DropTrigger { .. } => "DROP TRIGGER",
            Statement::Insert { .. } => "INSERT",
            Statement::Update { .. } => "UPDATE",
            Statement::Delete { .. } => "DELETE",
            Statement::Select(_) => "SELECT",
            Statement::Explain { .. } => "EXPLAIN",
            Statement::Begin { .. } => "BEGIN",
            Statement::Commit { .. } => "COMMIT",
            Statement::Rollback { .. } => "ROLLBACK",
            Statement::DeclareCursor { .. } => "DECLARE CURSOR",
            Statement::OpenCursor { .. } => "OPEN",
            Statement::FetchCursor { .. } => "FETCH",
            Statement::CloseCursor { .. } => "CLOSE",
        }
    }
}
