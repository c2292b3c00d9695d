use crate::catalog::{TriggerEvent, TriggerTiming};
use crate::sql::ast::*;
use crate::sql::parser::{parse, parse_single};
use crate::value::{BinOpKind, DataType, Value};

#[test]
fn select_star() {
    let stmt = parse_single("SELECT * FROM users").expect("parse failed");
    match stmt {
        Statement::Select(q) => {
            assert_eq!(q.items.len(), 1);
            assert!(matches!(q.items[0].expr, Expr::Wildcard { .. }));
            assert_eq!(q.from[0].name, "users");
        }
        _ => panic!("expected SELECT"),
    }
}

#[test]
fn select_with_everything() {
    let sql = "SELECT name, COUNT(*) AS n FROM t WHERE age >= 18 GROUP BY name \
               HAVING COUNT(*) > 1 ORDER BY name DESC LIMIT 10 OFFSET 5";
    let stmt = parse_single(sql).expect("parse failed");
    let q = match stmt {
        Statement::Select(q) => q,
        _ => panic!("expected SELECT"),
    };
    assert_eq!(q.items.len(), 2);
    assert_eq!(q.items[1].alias.as_deref(), Some("n"));
    assert!(q.where_clause.is_some());
    assert_eq!(q.group_by.len(), 1);
    assert!(q.having.is_some());
    assert_eq!(q.order_by, vec![OrderKey { column: "name".into(), asc: false }]);
    assert_eq!(q.limit, Some(10));
    assert_eq!(q.offset, Some(5));
}

#[test]
fn implicit_alias_without_as() {
    let stmt = parse_single("SELECT id ident FROM t x").expect("parse failed");
    let q = match stmt {
        Statement::Select(q) => q,
        _ => panic!("expected SELECT"),
    };
    assert_eq!(q.items[0].alias.as_deref(), Some("ident"));
    assert_eq!(q.from[0].alias.as_deref(), Some("x"));
}

#[test]
fn joins_and_comma_tables() {
    let sql = "SELECT a.x FROM a, b JOIN c ON a.x = c.x LEFT JOIN d ON c.y = d.y";
    let q = match parse_single(sql).expect("parse failed") {
        Statement::Select(q) => q,
        _ => panic!("expected SELECT"),
    };
    assert_eq!(q.from.len(), 2);
    assert_eq!(q.joins.len(), 2);
    assert_eq!(q.joins[0].join_type, JoinType::Inner);
    assert_eq!(q.joins[1].join_type, JoinType::Left);
}

#[test]
fn where_precedence() {
    let q = match parse_single("SELECT * FROM t WHERE a = 1 OR b = 2 AND c = 3").unwrap() {
        Statement::Select(q) => q,
        _ => panic!("expected SELECT"),
    };
    // OR binds loosest: (a=1) OR ((b=2) AND (c=3))
    match q.where_clause.unwrap() {
        Expr::Binary { op: BinOpKind::Or, right, .. } => match *right {
            Expr::Binary { op: BinOpKind::And, .. } => {}
            other => panic!("expected AND under OR, got {:?}", other),
        },
        other => panic!("expected OR at root, got {:?}", other),
    }
}

#[test]
fn between_and_in_list() {
    let q = match parse_single("SELECT * FROM t WHERE a BETWEEN 1 AND 10 AND b IN (1, 2, 3)")
        .unwrap()
    {
        Statement::Select(q) => q,
        _ => panic!("expected SELECT"),
    };
    let w = q.where_clause.unwrap();
    match w {
        Expr::Binary { op: BinOpKind::And, left, right, .. } => {
            assert!(matches!(*left, Expr::Between { .. }));
            match *right {
                Expr::InList { list, negated, .. } => {
                    assert_eq!(list.len(), 3);
                    assert!(!negated);
                }
                other => panic!("expected IN list, got {:?}", other),
            }
        }
        other => panic!("expected AND, got {:?}", other),
    }
}

#[test]
fn in_subquery_and_exists() {
    let q = match parse_single(
        "SELECT * FROM t WHERE id IN (SELECT id FROM s) AND EXISTS (SELECT * FROM u)",
    )
    .unwrap()
    {
        Statement::Select(q) => q,
        _ => panic!("expected SELECT"),
    };
    let w = q.where_clause.unwrap();
    match w {
        Expr::Binary { left, right, .. } => {
            assert!(matches!(*left, Expr::InSubquery { .. }));
            assert!(matches!(*right, Expr::Exists { negated: false, .. }));
        }
        other => panic!("expected AND, got {:?}", other),
    }
}

#[test]
fn scalar_subquery_in_select_list() {
    let q = match parse_single("SELECT (SELECT MAX(id) FROM t) FROM s").unwrap() {
        Statement::Select(q) => q,
        _ => panic!("expected SELECT"),
    };
    assert!(matches!(q.items[0].expr, Expr::Subquery { .. }));
}

#[test]
fn negative_literal_folds() {
    let q = match parse_single("SELECT * FROM t WHERE x = -5").unwrap() {
        Statement::Select(q) => q,
        _ => panic!("expected SELECT"),
    };
    match q.where_clause.unwrap() {
        Expr::Binary { right, .. } => match *right {
            Expr::Literal { value: Value::Int(-5), .. } => {}
            other => panic!("expected folded -5, got {:?}", other),
        },
        _ => panic!("expected comparison"),
    }
}

#[test]
fn create_table_with_constraints() {
    let stmt = parse_single(
        "CREATE TABLE users (id INT PRIMARY KEY, name VARCHAR(50) NOT NULL, \
         score FLOAT DEFAULT 0.0, active BOOLEAN)",
    )
    .expect("parse failed");
    match stmt {
        Statement::CreateTable { name, columns, .. } => {
            assert_eq!(name, "users");
            assert_eq!(columns.len(), 4);
            assert!(columns[0].primary_key);
            assert!(columns[0].not_null);
            assert_eq!(columns[1].data_type, DataType::Varchar);
            assert!(columns[1].not_null);
            assert!(columns[2].default.is_some());
            assert!(!columns[3].not_null);
        }
        _ => panic!("expected CREATE TABLE"),
    }
}

#[test]
fn create_table_table_level_pk() {
    let stmt =
        parse_single("CREATE TABLE t (id INT, name TEXT, PRIMARY KEY (id))").expect("parse failed");
    match stmt {
        Statement::CreateTable { columns, .. } => {
            assert!(columns[0].primary_key);
            assert!(!columns[1].primary_key);
        }
        _ => panic!("expected CREATE TABLE"),
    }
}

#[test]
fn table_level_pk_unknown_column_rejected() {
    assert!(parse_single("CREATE TABLE t (id INT, PRIMARY KEY (missing))").is_err());
}

#[test]
fn create_unique_index() {
    let stmt = parse_single("CREATE UNIQUE INDEX idx_name ON t (name)").expect("parse failed");
    match stmt {
        Statement::CreateIndex { name, table, columns, unique, .. } => {
            assert_eq!(name, "idx_name");
            assert_eq!(table, "t");
            assert_eq!(columns, vec!["name".to_string()]);
            assert!(unique);
        }
        _ => panic!("expected CREATE INDEX"),
    }
}

#[test]
fn create_view_preserves_definition() {
    let stmt = parse_single("CREATE VIEW adults AS SELECT name FROM users WHERE age >= 18")
        .expect("parse failed");
    match stmt {
        Statement::CreateView { name, definition_sql, .. } => {
            assert_eq!(name, "adults");
            assert!(definition_sql.to_uppercase().starts_with("SELECT"));
            assert!(definition_sql.contains(">= 18"));
        }
        _ => panic!("expected CREATE VIEW"),
    }
}

#[test]
fn create_trigger_full_form() {
    let stmt = parse_single(
        "CREATE TRIGGER audit_users AFTER INSERT OR DELETE ON users FOR EACH ROW \
         WHEN (id > 0) INSERT INTO audit VALUES (1)",
    )
    .expect("parse failed");
    match stmt {
        Statement::CreateTrigger { name, table, timing, events, row_level, when_sql, body_sql, .. } => {
            assert_eq!(name, "audit_users");
            assert_eq!(table, "users");
            assert_eq!(timing, TriggerTiming::After);
            assert_eq!(events, vec![TriggerEvent::Insert, TriggerEvent::Delete]);
            assert!(row_level);
            assert!(when_sql.unwrap().contains("> 0"));
            assert!(body_sql.to_uppercase().starts_with("INSERT"));
        }
        _ => panic!("expected CREATE TRIGGER"),
    }
}

#[test]
fn insert_forms() {
    let stmt = parse_single("INSERT INTO t (id, name) VALUES (1, 'Alice'), (2, 'Bob')")
        .expect("parse failed");
    match stmt {
        Statement::Insert { table, columns, rows, .. } => {
            assert_eq!(table, "t");
            assert_eq!(columns, Some(vec!["id".to_string(), "name".to_string()]));
            assert_eq!(rows.len(), 2);
        }
        _ => panic!("expected INSERT"),
    }
    let stmt = parse_single("INSERT INTO t VALUES (1, 'x')").expect("parse failed");
    match stmt {
        Statement::Insert { columns: None, rows, .. } => assert_eq!(rows.len(), 1),
        _ => panic!("expected positional INSERT"),
    }
}

#[test]
fn update_with_arithmetic() {
    let stmt = parse_single("UPDATE t SET x = x - 1, name = 'z' WHERE y = 5").expect("parse failed");
    match stmt {
        Statement::Update { table, sets, filter, .. } => {
            assert_eq!(table, "t");
            assert_eq!(sets.len(), 2);
            assert_eq!(sets[0].0, "x");
            assert!(matches!(sets[0].1, Expr::Binary { op: BinOpKind::Sub, .. }));
            assert!(filter.is_some());
        }
        _ => panic!("expected UPDATE"),
    }
}

#[test]
fn delete_without_filter() {
    match parse_single("DELETE FROM t").expect("parse failed") {
        Statement::Delete { filter: None, .. } => {}
        _ => panic!("expected unfiltered DELETE"),
    }
}

#[test]
fn show_statements() {
    assert!(matches!(parse_single("SHOW DATABASES").unwrap(), Statement::ShowDatabases { .. }));
    assert!(matches!(parse_single("SHOW TABLES").unwrap(), Statement::ShowTables { .. }));
    match parse_single("SHOW COLUMNS FROM t").unwrap() {
        Statement::ShowColumns { table, .. } => assert_eq!(table, "t"),
        _ => panic!("expected SHOW COLUMNS"),
    }
    match parse_single("SHOW INDEX FROM t").unwrap() {
        Statement::ShowIndex { table, .. } => assert_eq!(table, "t"),
        _ => panic!("expected SHOW INDEX"),
    }
    assert!(matches!(parse_single("SHOW VIEWS").unwrap(), Statement::ShowViews { .. }));
    assert!(matches!(parse_single("SHOW TRIGGERS").unwrap(), Statement::ShowTriggers { .. }));
}

#[test]
fn explain_variants() {
    match parse_single("EXPLAIN SELECT * FROM t").unwrap() {
        Statement::Explain { analyze: false, inner, .. } => {
            assert!(matches!(*inner, Statement::Select(_)))
        }
        _ => panic!("expected EXPLAIN"),
    }
    match parse_single("EXPLAIN ANALYZE SELECT * FROM t").unwrap() {
        Statement::Explain { analyze: true, .. } => {}
        _ => panic!("expected EXPLAIN ANALYZE"),
    }
}

#[test]
fn tcl_statements() {
    assert!(matches!(parse_single("BEGIN").unwrap(), Statement::Begin { .. }));
    assert!(matches!(parse_single("BEGIN TRANSACTION").unwrap(), Statement::Begin { .. }));
    assert!(matches!(parse_single("START TRANSACTION").unwrap(), Statement::Begin { .. }));
    assert!(matches!(parse_single("COMMIT").unwrap(), Statement::Commit { .. }));
    assert!(matches!(parse_single("ROLLBACK").unwrap(), Statement::Rollback { .. }));
}

#[test]
fn cursor_statements() {
    match parse_single("DECLARE c1 CURSOR FOR SELECT * FROM t").unwrap() {
        Statement::DeclareCursor { name, query, .. } => {
            assert_eq!(name, "c1");
            assert_eq!(query.from[0].name, "t");
        }
        _ => panic!("expected DECLARE CURSOR"),
    }
    assert!(matches!(parse_single("OPEN c1").unwrap(), Statement::OpenCursor { .. }));
    assert!(matches!(parse_single("FETCH c1").unwrap(), Statement::FetchCursor { .. }));
    assert!(matches!(parse_single("FETCH FROM c1").unwrap(), Statement::FetchCursor { .. }));
    assert!(matches!(parse_single("CLOSE c1").unwrap(), Statement::CloseCursor { .. }));
}

#[test]
fn multi_statement_split() {
    let stmts = parse("CREATE TABLE t (id INT PRIMARY KEY); INSERT INTO t VALUES (1);").unwrap();
    assert_eq!(stmts.len(), 2);
}

#[test]
fn parse_error_carries_position() {
    let err = parse_single("SELECT FROM t").unwrap_err();
    match err {
        crate::error::EngineError::Parse { line, col, .. } => {
            assert_eq!(line, 1);
            assert!(col > 1);
        }
        other => panic!("expected parse error, got {:?}", other),
    }
}

#[test]
fn garbage_after_statement_rejected() {
    assert!(parse("SELECT * FROM t garbage garbage").is_err());
}
