//! Semantic analysis: name resolution and type checking against the catalog.
//!
//! Diagnostics accumulate into a list; analysis fails when any remain at the
//! end of a statement. Scopes are built from FROM clauses; subqueries get
//! their own scope and may not reference outer tables (only uncorrelated
//! subqueries are supported).

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::catalog::{Catalog, TableInfo};
use crate::config::EngineOptions;
use crate::error::{EngineError, EngineResult};
use crate::sql::ast::{
    ColumnDef, Expr, JoinType, SelectStatement, Statement, TableRef, UnaryOp,
};
use crate::value::{BinOpKind, DataType};

/// Table bindings visible to one SELECT level.
struct Scope {
    /// (effective name, table info) in FROM order.
    tables: Vec<(String, TableInfo)>,
}

impl Scope {
    fn resolve(&self, table: &Option<String>, column: &str) -> Result<DataType, String> {
        match table {
            Some(t) => {
                let entry = self
                    .tables
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(t))
                    .ok_or_else(|| format!("unknown table or alias '{}'", t))?;
                entry
                    .1
                    .column(column)
                    .map(|c| c.data_type)
                    .ok_or_else(|| format!("unknown column '{}.{}'", t, column))
            }
            None => {
                let mut found = None;
                for (name, info) in &self.tables {
                    if let Some(c) = info.column(column) {
                        if found.is_some() {
                            return Err(format!("ambiguous column '{}'", column));
                        }
                        found = Some((name.clone(), c.data_type));
                    }
                }
                found
                    .map(|(_, ty)| ty)
                    .ok_or_else(|| format!("unknown column '{}'", column))
            }
        }
    }
}

pub struct SemanticAnalyzer<'a> {
    catalog: &'a Catalog,
    db: &'a str,
    strict_group_by: bool,
    errors: Vec<String>,
}

impl<'a> SemanticAnalyzer<'a> {
    pub fn new(catalog: &'a Catalog, db: &'a str, options: &EngineOptions) -> Self {
        Self {
            catalog,
            db,
            strict_group_by: options.strict_group_by,
            errors: Vec::new(),
        }
    }

    /// Validate one statement. Returns all accumulated diagnostics at once.
    pub fn analyze(&mut self, stmt: &Statement) -> EngineResult<()> {
        debug!(target: "opaldb::semantic", "analyzing {}", stmt.describe());
        match stmt {
            Statement::Select(q) => {
                self.check_select(q);
            }
            Statement::Insert { table, columns, rows, .. } => {
                self.check_insert(table, columns.as_deref(), rows);
            }
            Statement::Update { table, sets, filter, .. } => {
                self.check_update(table, sets, filter.as_ref());
            }
            Statement::Delete { table, filter, .. } => {
                if let Some(info) = self.require_table(table) {
                    let scope =
                        Scope { tables: vec![(info.name.clone(), info)] };
                    if let Some(f) = filter {
                        self.check_predicate(f, &scope);
                    }
                }
            }
            Statement::CreateTable { name, columns, .. } => {
                self.check_create_table(name, columns);
            }
            Statement::DropTable { name, if_exists, .. } => {
                if !if_exists && !self.catalog.has_table(self.db, name) {
                    self.errors.push(format!("table '{}' does not exist", name));
                }
            }
            Statement::CreateIndex { name, table, columns, .. } => {
                if let Some(info) = self.require_table(table) {
                    for col in columns {
                        if info.column(col).is_none() {
                            self.errors
                                .push(format!("index column '{}' not in table '{}'", col, table));
                        }
                    }
                    if info.indexes.contains_key(&name.to_lowercase()) {
                        self.errors.push(format!("index '{}' already exists", name));
                    }
                }
            }
            Statement::DropIndex { name, table, .. } => {
                let found = match table {
                    Some(t) => self
                        .catalog
                        .get_table(self.db, t)
                        .map(|info| info.indexes.contains_key(&name.to_lowercase()))
                        .unwrap_or(false),
                    None => self
                        .catalog
                        .list_tables(self.db)
                        .iter()
                        .filter_map(|t| self.catalog.get_table(self.db, t).ok())
                        .any(|info| info.indexes.contains_key(&name.to_lowercase())),
                };
                if !found {
                    self.errors.push(format!("index '{}' does not exist", name));
                }
            }
            Statement::CreateView { name, .. } => {
                if self.catalog.get_view(self.db, name).is_some() {
                    self.errors.push(format!("view '{}' already exists", name));
                }
            }
            Statement::AlterView { name, .. } | Statement::DropView { name, .. } => {
                if self.catalog.get_view(self.db, name).is_none() {
                    self.errors.push(format!("view '{}' does not exist", name));
                }
            }
            Statement::CreateTrigger { name, table, .. } => {
                if self.catalog.get_trigger(self.db, name).is_some() {
                    self.errors.push(format!("trigger '{}' already exists", name));
                }
                self.require_table(table);
            }
            Statement::DropTrigger { name, .. } => {
                if self.catalog.get_trigger(self.db, name).is_none() {
                    self.errors.push(format!("trigger '{}' does not exist", name));
                }
            }
            Statement::ShowColumns { table, .. } | Statement::ShowIndex { table, .. } => {
                self.require_table(table);
            }
            Statement::UseDatabase { name, .. } => {
                if !self.catalog.has_database(name) {
                    self.errors.push(format!("database '{}' does not exist", name));
                }
            }
            Statement::Explain { inner, .. } => {
                self.analyze(inner)?;
            }
            Statement::DeclareCursor { query, .. } => {
                self.check_select(query);
            }
            // Database DDL existence checks run in the executor under the
            // catalog lock; TCL and the remaining SHOW/cursor forms have no
            // names to resolve here.
            _ => {}
        }
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::semantic(std::mem::take(&mut self.errors)))
        }
    }

    fn require_table(&mut self, name: &str) -> Option<TableInfo> {
        match self.catalog.get_table(self.db, name) {
            Ok(info) => Some(info),
            Err(_) => {
                self.errors.push(format!("table '{}' does not exist", name));
                None
            }
        }
    }

    // ---- SELECT ----

    fn check_select(&mut self, q: &SelectStatement) {
        let scope = match self.build_scope(&q.from, &q.joins) {
            Some(s) => s,
            None => return,
        };

        for join in &q.joins {
            if join.join_type != JoinType::Cross {
                self.check_predicate(&join.on, &scope);
            }
        }

        let mut has_aggregate = false;
        for item in &q.items {
            match &item.expr {
                Expr::Wildcard { .. } => {
                    if scope.tables.is_empty() {
                        self.errors.push("SELECT * requires a FROM clause".to_string());
                    }
                }
                e => {
                    if e.contains_aggregate() {
                        has_aggregate = true;
                    }
                    self.infer_type(e, &scope);
                }
            }
        }

        if let Some(w) = &q.where_clause {
            if w.contains_aggregate() {
                self.errors.push("aggregate functions are not allowed in WHERE".to_string());
            }
            self.check_predicate(w, &scope);
        }

        for g in &q.group_by {
            self.infer_type(g, &scope);
        }

        if let Some(h) = &q.having {
            if q.group_by.is_empty() && !has_aggregate && !h.contains_aggregate() {
                self.errors.push("HAVING requires GROUP BY or aggregates".to_string());
            }
            self.check_having(h, &scope);
        }

        // GROUP BY coverage: every non-aggregate select item must appear in
        // the group key.
        if has_aggregate || !q.group_by.is_empty() {
            let group_names: HashSet<String> = q
                .group_by
                .iter()
                .map(|g| g.display_name().to_lowercase())
                .collect();
            for item in &q.items {
                if item.expr.contains_aggregate() {
                    continue;
                }
                if matches!(item.expr, Expr::Wildcard { .. }) {
                    self.errors.push("SELECT * cannot be combined with aggregates".to_string());
                    continue;
                }
                let name = item.expr.display_name().to_lowercase();
                let bare = name.rsplit('.').next().unwrap_or(&name).to_string();
                if !group_names.contains(&name) && !group_names.contains(&bare) {
                    if self.strict_group_by {
                        self.errors.push(format!(
                            "non-aggregate select expression '{}' must appear in GROUP BY",
                            item.expr.display_name()
                        ));
                    } else {
                        warn!(
                            target: "opaldb::semantic",
                            "'{}' not in GROUP BY; grouping by it implicitly",
                            item.expr.display_name()
                        );
                    }
                }
            }
        }

        // ORDER BY columns must resolve to an output name or a scope column.
        let output_names: HashSet<String> =
            q.items.iter().map(|i| i.output_name().to_lowercase()).collect();
        for key in &q.order_by {
            let lname = key.column.to_lowercase();
            if output_names.contains(&lname) {
                continue;
            }
            let (table, col) = split_qualified(&key.column);
            if scope.resolve(&table, &col).is_err() {
                self.errors.push(format!("ORDER BY column '{}' not found", key.column));
            }
        }
    }

    fn build_scope(&mut self, from: &[TableRef], joins: &[crate::sql::ast::JoinClause]) -> Option<Scope> {
        let mut tables = Vec::new();
        let mut seen = HashSet::new();
        let mut ok = true;
        for tref in from.iter().chain(joins.iter().map(|j| &j.table)) {
            match self.catalog.get_table(self.db, &tref.name) {
                Ok(info) => {
                    let eff = tref.effective_name().to_string();
                    if !seen.insert(eff.to_lowercase()) {
                        self.errors.push(format!("duplicate table name or alias '{}'", eff));
                        ok = false;
                    }
                    tables.push((eff, info));
                }
                Err(_) => {
                    self.errors.push(format!("table '{}' does not exist", tref.name));
                    ok = false;
                }
            }
        }
        if ok {
            Some(Scope { tables })
        } else {
            None
        }
    }

    fn check_predicate(&mut self, expr: &Expr, scope: &Scope) {
        if let Some(ty) = self.infer_type(expr, scope) {
            if ty != DataType::Boolean && ty != DataType::Unknown {
                self.errors.push(format!(
                    "predicate must be BOOLEAN, got {} from '{}'",
                    ty,
                    expr.display_name()
                ));
            }
        }
    }

    /// HAVING may reference aggregates; everything else behaves like a
    /// normal predicate.
    fn check_having(&mut self, expr: &Expr, scope: &Scope) {
        self.check_predicate(expr, scope);
    }

    /// Infer the type of an expression, pushing diagnostics for mismatches.
    /// Returns None when a sub-expression already failed.
    fn infer_type(&mut self, expr: &Expr, scope: &Scope) -> Option<DataType> {
        match expr {
            Expr::Literal { value, .. } => Some(value.data_type()),
            Expr::Column { table, name, .. } => match scope.resolve(table, name) {
                Ok(ty) => Some(ty),
                Err(msg) => {
                    self.errors.push(msg);
                    None
                }
            },
            Expr::Wildcard { .. } => {
                self.errors.push("'*' is only valid in a select list or COUNT(*)".to_string());
                None
            }
            Expr::Unary { op, expr, .. } => {
                let inner = self.infer_type(expr, scope)?;
                match op {
                    UnaryOp::Neg => {
                        if !inner.is_numeric() && inner != DataType::Unknown {
                            self.errors.push(format!("cannot negate {} value", inner));
                            return None;
                        }
                        Some(inner)
                    }
                    UnaryOp::Not => Some(DataType::Boolean),
                }
            }
            Expr::Binary { left, op, right, .. } => {
                let lt = self.infer_type(left, scope);
                let rt = self.infer_type(right, scope);
                let (lt, rt) = (lt?, rt?);
                match op {
                    BinOpKind::And | BinOpKind::Or => Some(DataType::Boolean),
                    op if op.is_comparison() => {
                        if !lt.compatible_with(rt) {
                            self.errors.push(format!(
                                "cannot compare {} with {} in '{}'",
                                lt,
                                rt,
                                expr.display_name()
                            ));
                            return None;
                        }
                        Some(DataType::Boolean)
                    }
                    _ => {
                        // arithmetic
                        if (!lt.is_numeric() && lt != DataType::Unknown)
                            || (!rt.is_numeric() && rt != DataType::Unknown)
                        {
                            self.errors.push(format!(
                                "arithmetic requires numeric operands in '{}'",
                                expr.display_name()
                            ));
                            return None;
                        }
                        if lt == DataType::Float
                            || lt == DataType::Decimal
                            || rt == DataType::Float
                            || rt == DataType::Decimal
                        {
                            Some(DataType::Float)
                        } else {
                            Some(DataType::Int)
                        }
                    }
                }
            }
            Expr::Between { expr, low, high, .. } => {
                let t = self.infer_type(expr, scope);
                let lo = self.infer_type(low, scope);
                let hi = self.infer_type(high, scope);
                if let (Some(t), Some(lo), Some(hi)) = (t, lo, hi) {
                    if !t.compatible_with(lo) || !t.compatible_with(hi) {
                        self.errors.push("BETWEEN bounds must match the tested type".to_string());
                    }
                }
                Some(DataType::Boolean)
            }
            Expr::InList { expr, list, .. } => {
                if let Some(t) = self.infer_type(expr, scope) {
                    for item in list {
                        if let Some(it) = self.infer_type(item, scope) {
                            if !t.compatible_with(it) {
                                self.errors.push(format!(
                                    "IN list value type {} does not match {}",
                                    it, t
                                ));
                            }
                        }
                    }
                }
                Some(DataType::Boolean)
            }
            Expr::InSubquery { expr, query, .. } => {
                self.infer_type(expr, scope);
                self.check_subquery(query, 1);
                Some(DataType::Boolean)
            }
            Expr::Subquery { query, .. } => {
                self.check_subquery(query, 1);
                // The scalar type is the subquery's single output column;
                // resolved fully at physical build time.
                Some(DataType::Unknown)
            }
            Expr::Exists { query, .. } => {
                self.check_subquery(query, 0);
                Some(DataType::Boolean)
            }
            Expr::Aggregate { func, arg, .. } => {
                if let Some(arg) = arg {
                    let t = self.infer_type(arg, scope)?;
                    match func {
                        crate::sql::ast::AggFunc::Sum | crate::sql::ast::AggFunc::Avg => {
                            if !t.is_numeric() && t != DataType::Unknown {
                                self.errors
                                    .push(format!("{} requires a numeric argument, got {}", func, t));
                                return None;
                            }
                            Some(DataType::Float)
                        }
                        crate::sql::ast::AggFunc::Count => Some(DataType::Int),
                        crate::sql::ast::AggFunc::Min | crate::sql::ast::AggFunc::Max => Some(t),
                    }
                } else {
                    match func {
                        crate::sql::ast::AggFunc::Count => Some(DataType::Int),
                        f => {
                            self.errors.push(format!("{} requires an argument", f));
                            None
                        }
                    }
                }
            }
        }
    }

    /// Subqueries get a fresh scope: references to outer tables are rejected
    /// (only uncorrelated subqueries are supported). `expected_columns` 0
    /// means "any width" (EXISTS).
    fn check_subquery(&mut self, q: &SelectStatement, expected_columns: usize) {
        if expected_columns > 0 {
            let width = q
                .items
                .iter()
                .map(|i| if matches!(i.expr, Expr::Wildcard { .. }) { usize::MAX } else { 1 })
                .sum::<usize>();
            if width != usize::MAX && width != expected_columns {
                self.errors.push(format!(
                    "subquery must return exactly {} column(s)",
                    expected_columns
                ));
            }
        }
        self.check_select(q);
    }

    // ---- DML ----

    fn check_insert(&mut self, table: &str, columns: Option<&[String]>, rows: &[Vec<Expr>]) {
        let info = match self.require_table(table) {
            Some(i) => i,
            None => return,
        };

        let targets: Vec<(usize, DataType, bool)> = match columns {
            Some(cols) => {
                let mut seen = HashSet::new();
                let mut out = Vec::new();
                for c in cols {
                    if !seen.insert(c.to_lowercase()) {
                        self.errors.push(format!("duplicate column '{}' in INSERT list", c));
                        continue;
                    }
                    match info.column_index(c) {
                        Some(i) => out.push((
                            i,
                            info.columns[i].data_type,
                            info.columns[i].nullable,
                        )),
                        None => self
                            .errors
                            .push(format!("unknown column '{}' in table '{}'", c, table)),
                    }
                }
                // Columns omitted from the list must be nullable or defaulted.
                for col in &info.columns {
                    let listed = cols.iter().any(|c| c.eq_ignore_ascii_case(&col.name));
                    if !listed && !col.nullable && col.default.is_none() {
                        self.errors.push(format!(
                            "column '{}' requires a value (NOT NULL without DEFAULT)",
                            col.name
                        ));
                    }
                }
                out
            }
            None => info
                .columns
                .iter()
                .enumerate()
                .map(|(i, c)| (i, c.data_type, c.nullable))
                .collect(),
        };

        for (rowno, row) in rows.iter().enumerate() {
            if row.len() != targets.len() {
                self.errors.push(format!(
                    "INSERT row {} has {} values but {} target column(s)",
                    rowno + 1,
                    row.len(),
                    targets.len()
                ));
                continue;
            }
            let empty_scope = Scope { tables: vec![] };
            for (expr, (_, ty, nullable)) in row.iter().zip(&targets) {
                if let Expr::Literal { value, .. } = expr {
                    if value.is_null() {
                        if !*nullable {
                            self.errors.push("cannot insert NULL into NOT NULL column".to_string());
                        }
                        continue;
                    }
                }
                if let Some(et) = self.infer_type(expr, &empty_scope) {
                    if !ty.compatible_with(et) {
                        self.errors.push(format!(
                            "cannot insert {} value into {} column",
                            et, ty
                        ));
                    }
                }
            }
        }
    }

    fn check_update(&mut self, table: &str, sets: &[(String, Expr)], filter: Option<&Expr>) {
        let info = match self.require_table(table) {
            Some(i) => i,
            None => return,
        };
        let scope = Scope { tables: vec![(info.name.clone(), info.clone())] };
        let mut seen = HashSet::new();
        for (col, expr) in sets {
            if !seen.insert(col.to_lowercase()) {
                self.errors.push(format!("column '{}' assigned twice in UPDATE", col));
            }
            match info.column(col) {
                Some(c) => {
                    if let Some(et) = self.infer_type(expr, &scope) {
                        if !c.data_type.compatible_with(et) {
                            self.errors.push(format!(
                                "cannot assign {} value to {} column '{}'",
                                et, c.data_type, col
                            ));
                        }
                    }
                }
                None => {
                    self.errors.push(format!("unknown column '{}' in table '{}'", col, table));
                }
            }
        }
        if let Some(f) = filter {
            self.check_predicate(f, &scope);
        }
    }

    // ---- DDL ----

    fn check_create_table(&mut self, name: &str, columns: &[ColumnDef]) {
        if self.catalog.has_table(self.db, name) {
            self.errors.push(format!("table '{}' already exists", name));
        }
        if columns.is_empty() {
            self.errors.push("table must declare at least one column".to_string());
        }
        let mut seen = HashSet::new();
        for c in columns {
            if !seen.insert(c.name.to_lowercase()) {
                self.errors.push(format!("duplicate column '{}'", c.name));
            }
            if c.data_type == DataType::Unknown {
                self.errors.push(format!("column '{}' has unknown type", c.name));
            }
        }
        let pk_count = columns.iter().filter(|c| c.primary_key).count();
        if pk_count != 1 {
            self.errors.push(format!(
                "table must declare exactly one PRIMARY KEY column, found {}",
                pk_count
            ));
        }
    }
}

/// Split `t.col` into (Some(t), col); bare names pass through.
pub fn split_qualified(name: &str) -> (Option<String>, String) {
    match name.split_once('.') {
        Some((t, c)) => (Some(t.to_string()), c.to_string()),
        None => (None, name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, ColumnInfo, TableInfo, DEFAULT_DATABASE};
    use crate::sql::parser::parse_single;

    fn test_catalog() -> Catalog {
        let cat = Catalog::new_in_memory();
        let cols = vec![
            ColumnInfo {
                name: "id".into(),
                data_type: DataType::Int,
                nullable: false,
                default: None,
                is_primary_key: true,
            },
            ColumnInfo {
                name: "name".into(),
                data_type: DataType::Varchar,
                nullable: true,
                default: None,
                is_primary_key: false,
            },
            ColumnInfo {
                name: "age".into(),
                data_type: DataType::Int,
                nullable: true,
                default: None,
                is_primary_key: false,
            },
        ];
        cat.insert_table(DEFAULT_DATABASE, TableInfo::new("users", cols)).unwrap();
        cat
    }

    fn analyze(cat: &Catalog, sql: &str) -> EngineResult<()> {
        let stmt = parse_single(sql).expect("parse failed");
        let opts = EngineOptions::default();
        SemanticAnalyzer::new(cat, DEFAULT_DATABASE, &opts).analyze(&stmt)
    }

    #[test]
    fn valid_select_passes() {
        let cat = test_catalog();
        analyze(&cat, "SELECT id, name FROM users WHERE age > 18").unwrap();
    }

    #[test]
    fn unknown_table_and_column() {
        let cat = test_catalog();
        assert!(analyze(&cat, "SELECT * FROM missing").is_err());
        let err = analyze(&cat, "SELECT nope FROM users").unwrap_err();
        assert!(err.to_string().contains("unknown column 'nope'"));
    }

    #[test]
    fn type_mismatch_in_comparison() {
        let cat = test_catalog();
        let err = analyze(&cat, "SELECT id FROM users WHERE name > 5").unwrap_err();
        assert!(err.to_string().contains("cannot compare"));
    }

    #[test]
    fn multiple_errors_accumulate() {
        let cat = test_catalog();
        let err = analyze(&cat, "SELECT nope, wrong FROM users").unwrap_err();
        match err {
            EngineError::Semantic { messages } => assert_eq!(messages.len(), 2),
            other => panic!("expected semantic error, got {:?}", other),
        }
    }

    #[test]
    fn insert_arity_and_types() {
        let cat = test_catalog();
        analyze(&cat, "INSERT INTO users VALUES (1, 'Alice', 30)").unwrap();
        assert!(analyze(&cat, "INSERT INTO users VALUES (1, 'Alice')").is_err());
        assert!(analyze(&cat, "INSERT INTO users VALUES ('x', 'Alice', 30)").is_err());
        analyze(&cat, "INSERT INTO users (id, name) VALUES (2, 'Bob')").unwrap();
        assert!(analyze(&cat, "INSERT INTO users (name) VALUES ('NoId')").is_err());
    }

    #[test]
    fn update_checks_columns() {
        let cat = test_catalog();
        analyze(&cat, "UPDATE users SET age = age + 1 WHERE id = 1").unwrap();
        assert!(analyze(&cat, "UPDATE users SET nope = 1").is_err());
        assert!(analyze(&cat, "UPDATE users SET age = 'old'").is_err());
        assert!(analyze(&cat, "UPDATE users SET age = 1, age = 2").is_err());
    }

    #[test]
    fn create_table_requires_single_pk() {
        let cat = test_catalog();
        assert!(analyze(&cat, "CREATE TABLE t (a INT, b INT)").is_err());
        assert!(analyze(&cat, "CREATE TABLE t (a INT PRIMARY KEY, b INT PRIMARY KEY)").is_err());
        analyze(&cat, "CREATE TABLE t (a INT PRIMARY KEY, b INT)").unwrap();
        assert!(analyze(&cat, "CREATE TABLE t (a INT PRIMARY KEY, a TEXT)").is_err());
    }

    #[test]
    fn group_by_coverage_enforced() {
        let cat = test_catalog();
        analyze(&cat, "SELECT name, COUNT(*) FROM users GROUP BY name").unwrap();
        let err = analyze(&cat, "SELECT name, COUNT(*) FROM users").unwrap_err();
        assert!(err.to_string().contains("GROUP BY"));
    }

    #[test]
    fn aggregates_rejected_in_where() {
        let cat = test_catalog();
        let err = analyze(&cat, "SELECT id FROM users WHERE COUNT(*) > 1").unwrap_err();
        assert!(err.to_string().contains("not allowed in WHERE"));
    }

    #[test]
    fn correlated_subquery_rejected() {
        let cat = test_catalog();
        let cols = vec![ColumnInfo {
            name: "uid".into(),
            data_type: DataType::Int,
            nullable: true,
            default: None,
            is_primary_key: true,
        }];
        cat.insert_table(DEFAULT_DATABASE, TableInfo::new("orders", cols)).unwrap();
        // `users.id` is not visible inside the subquery scope.
        let err = analyze(
            &cat,
            "SELECT id FROM users WHERE id IN (SELECT uid FROM orders WHERE uid = users.id)",
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown table or alias 'users'"));
    }

    #[test]
    fn ambiguous_column_across_tables() {
        let cat = test_catalog();
        let cols = vec![
            ColumnInfo {
                name: "id".into(),
                data_type: DataType::Int,
                nullable: false,
                default: None,
                is_primary_key: true,
            },
            ColumnInfo {
                name: "name".into(),
                data_type: DataType::Varchar,
                nullable: true,
                default: None,
                is_primary_key: false,
            },
        ];
        cat.insert_table(DEFAULT_DATABASE, TableInfo::new("copies", cols)).unwrap();
        let err = analyze(&cat, "SELECT name FROM users, copies").unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }
}
