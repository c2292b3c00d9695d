//! DML statements: INSERT, UPDATE, DELETE.

use crate::error::EngineResult;
use crate::sql::ast::Statement;
use crate::sql::parser::Parser;

impl Parser {
    pub(crate) fn parse_insert(&mut self) -> EngineResult<Statement> {
        let pos = self.current_pos();
        self.expect_keyword("INSERT")?;
        self.expect_keyword("INTO")?;
        let table = self.expect_ident()?;

        let columns = if self.check_symbol("(") {
            self.advance();
            let mut cols = vec![self.expect_ident()?];
            while self.accept_symbol(",") {
                cols.push(self.expect_ident()?);
            }
            self.expect_symbol(")")?;
            Some(cols)
        } else {
            None
        };

        self.expect_keyword("VALUES")?;
        let mut rows = Vec::new();
        loop {
            self.expect_symbol("(")?;
            let mut row = vec![self.parse_expr()?];
            while self.accept_symbol(",") {
                row.push(self.parse_expr()?);
            }
            self.expect_symbol(")")?;
            rows.push(row);
            if !self.accept_symbol(",") {
                break;
            }
        }
        Ok(Statement::Insert { table, columns, rows, pos })
    }

    pub(crate) fn parse_update(&mut self) -> EngineResult<Statement> {
        let pos = self.current_pos();
        self.expect_keyword("UPDATE")?;
        let table = self.expect_ident()?;
        self.expect_keyword("SET")?;
        let mut sets = Vec::new();
        loop {
            let col = self.expect_ident()?;
            self.expect_symbol("=")?;
            let expr = self.parse_expr()?;
            sets.push((col, expr));
            if !self.accept_symbol(",") {
                break;
            }
        }
        let filter = if self.accept_keyword("WHERE") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(Statement::Update { table, sets, filter, pos })
    }

    pub(crate) fn parse_delete(&mut self) -> EngineResult<Statement> {
        let pos = self.current_pos();
        self.expect_keyword("DELETE")?;
        self.expect_keyword("FROM")?;
        let table = self.expect_ident()?;
        let filter = if self.accept_keyword("WHERE") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(Statement::Delete { table, filter, pos })
    }
}
