//! SHOW family, USE and EXPLAIN.

use crate::error::EngineResult;
use crate::sql::ast::Statement;
use crate::sql::parser::Parser;

impl Parser {
    pub(crate) fn parse_show(&mut self) -> EngineResult<Statement> {
        let pos = self.current_pos();
        self.expect_keyword("SHOW")?;
        if self.accept_keyword("DATABASES") {
            return Ok(Statement::ShowDatabases { pos });
        }
        if self.accept_keyword("TABLES") {
            return Ok(Statement::ShowTables { pos });
        }
        if self.accept_keyword("COLUMNS") {
            self.expect_keyword("FROM")?;
            let table = self.expect_ident()?;
            return Ok(Statement::ShowColumns { table, pos });
        }
        if self.accept_keyword("INDEX") {
            self.expect_keyword("FROM")?;
            let table = self.expect_ident()?;
            return Ok(Statement::ShowIndex { table, pos });
        }
        if self.accept_keyword("VIEWS") {
            return Ok(Statement::ShowViews { pos });
        }
        if self.accept_keyword("TRIGGERS") {
            return Ok(Statement::ShowTriggers { pos });
        }
        Err(self.error_expected("DATABASES, TABLES, COLUMNS, INDEX, VIEWS or TRIGGERS"))
    }

    pub(crate) fn parse_use(&mut self) -> EngineResult<Statement> {
        let pos = self.current_pos();
        self.expect_keyword("USE")?;
        let name = self.expect_ident()?;
        Ok(Statement::UseDatabase { name, pos })
    }

    pub(crate) fn parse_explain(&mut self) -> EngineResult<Statement> {
        let pos = self.current_pos();
        self.expect_keyword("EXPLAIN")?;
        let analyze = self.accept_keyword("ANALYZE");
        let inner = self.parse_statement()?;
        Ok(Statement::Explain { analyze, inner: Box::new(inner), pos })
    }
}
