//! DROP and ALTER statements.

use crate::error::EngineResult;
use crate::sql::ast::Statement;
use crate::sql::parser::Parser;

impl Parser {
    pub(crate) fn parse_drop(&mut self) -> EngineResult<Statement> {
        let pos = self.current_pos();
        self.expect_keyword("DROP")?;
        if self.accept_keyword("DATABASE") {
            let name = self.expect_ident()?;
            return Ok(Statement::DropDatabase { name, pos });
        }
        if self.accept_keyword("TABLE") {
            let if_exists = self.parse_if_exists()?;
            let name = self.expect_ident()?;
            return Ok(Statement::DropTable { name, if_exists, pos });
        }
        if self.accept_keyword("INDEX") {
            let name = self.expect_ident()?;
            let table = if self.accept_keyword("ON") {
                Some(self.expect_ident()?)
            } else {
                None
            };
            return Ok(Statement::DropIndex { name, table, pos });
        }
        if self.accept_keyword("VIEW") {
            let name = self.expect_ident()?;
            return Ok(Statement::DropView { name, pos });
        }
        if self.accept_keyword("TRIGGER") {
            let name = self.expect_ident()?;
            return Ok(Statement::DropTrigger { name, pos });
        }
        Err(self.error_expected("DATABASE, TABLE, INDEX, VIEW or TRIGGER"))
    }

    pub(crate) fn parse_alter(&mut self) -> EngineResult<Statement> {
        let pos = self.current_pos();
        self.expect_keyword("ALTER")?;
        self.expect_keyword("VIEW")?;
        let name = self.expect_ident()?;
        self.expect_keyword("AS")?;
        let def_start = self.cursor_index();
        let _ = self.parse_select_body()?;
        let definition_sql = self.slice_sql(def_start, self.cursor_index());
        Ok(Statement::AlterView { name, definition_sql, pos })
    }

    fn parse_if_exists(&mut self) -> EngineResult<bool> {
        if self.check_keyword("IF") {
            self.advance();
            self.expect_keyword("EXISTS")?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
