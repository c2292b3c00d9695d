//! Cursor statements and transaction control.

use crate::error::EngineResult;
use crate::sql::ast::Statement;
use crate::sql::parser::Parser;

impl Parser {
    pub(crate) fn parse_tcl(&mut self) -> EngineResult<Statement> {
        let pos = self.current_pos();
        if self.accept_keyword("BEGIN") {
            self.accept_keyword("TRANSACTION");
            return Ok(Statement::Begin { pos });
        }
        if self.accept_keyword("START") {
            self.expect_keyword("TRANSACTION")?;
            return Ok(Statement::Begin { pos });
        }
        if self.accept_keyword("COMMIT") {
            return Ok(Statement::Commit { pos });
        }
        if self.accept_keyword("ROLLBACK") {
            return Ok(Statement::Rollback { pos });
        }
        Err(self.error_expected("BEGIN, COMMIT or ROLLBACK"))
    }

    pub(crate) fn parse_cursor(&mut self) -> EngineResult<Statement> {
        let pos = self.current_pos();
        if self.accept_keyword("DECLARE") {
            let name = self.expect_ident()?;
            self.expect_keyword("CURSOR")?;
            self.expect_keyword("FOR")?;
            let query = self.parse_select_body()?;
            return Ok(Statement::DeclareCursor { name, query: Box::new(query), pos });
        }
        if self.accept_keyword("OPEN") {
            let name = self.expect_ident()?;
            return Ok(Statement::OpenCursor { name, pos });
        }
        if self.accept_keyword("FETCH") {
            self.accept_keyword("FROM");
            let name = self.expect_ident()?;
            return Ok(Statement::FetchCursor { name, pos });
        }
        if self.accept_keyword("CLOSE") {
            let name = self.expect_ident()?;
            return Ok(Statement::CloseCursor { name, pos });
        }
        Err(self.error_expected("DECLARE, OPEN, FETCH or CLOSE"))
    }
}
