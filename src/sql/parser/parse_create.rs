//! CREATE statements: DATABASE, TABLE, INDEX, VIEW, TRIGGER.

use crate::catalog::{TriggerEvent, TriggerTiming};
use crate::error::EngineResult;
use crate::sql::ast::{ColumnDef, Statement};
use crate::sql::parser::Parser;
use crate::value::DataType;

impl Parser {
    pub(crate) fn parse_create(&mut self) -> EngineResult<Statement> {
        let pos = self.current_pos();
        self.expect_keyword("CREATE")?;
        if self.accept_keyword("DATABASE") {
            let name = self.expect_ident()?;
            return Ok(Statement::CreateDatabase { name, pos });
        }
        if self.accept_keyword("TABLE") {
            return self.parse_create_table(pos);
        }
        if self.check_keyword("UNIQUE") || self.check_keyword("INDEX") {
            let unique = self.accept_keyword("UNIQUE");
            self.expect_keyword("INDEX")?;
            let name = self.expect_ident()?;
            self.expect_keyword("ON")?;
            let table = self.expect_ident()?;
            self.expect_symbol("(")?;
            let mut columns = vec![self.expect_ident()?];
            while self.accept_symbol(",") {
                columns.push(self.expect_ident()?);
            }
            self.expect_symbol(")")?;
            return Ok(Statement::CreateIndex { name, table, columns, unique, pos });
        }
        if self.accept_keyword("VIEW") {
            let name = self.expect_ident()?;
            self.expect_keyword("AS")?;
            let def_start = self.cursor_index();
            // Validate the definition parses as a SELECT, then keep its text.
            let _ = self.parse_select_body()?;
            let definition_sql = self.slice_sql(def_start, self.cursor_index());
            return Ok(Statement::CreateView { name, definition_sql, pos });
        }
        if self.accept_keyword("TRIGGER") {
            return self.parse_create_trigger(pos);
        }
        Err(self.error_expected("DATABASE, TABLE, INDEX, VIEW or TRIGGER"))
    }

    fn parse_create_table(&mut self, pos: crate::sql::ast::Pos) -> EngineResult<Statement> {
        let name = self.expect_ident()?;
        self.expect_symbol("(")?;
        let mut columns: Vec<ColumnDef> = Vec::new();
        loop {
            // Table-level PRIMARY KEY (col)
            if self.check_keyword("PRIMARY") {
                self.advance();
                self.expect_keyword("KEY")?;
                self.expect_symbol("(")?;
                let pk_col = self.expect_ident()?;
                self.expect_symbol(")")?;
                match columns.iter_mut().find(|c| c.name.eq_ignore_ascii_case(&pk_col)) {
                    Some(col) => {
                        col.primary_key = true;
                        col.not_null = true;
                    }
                    None => {
                        return Err(self.error_expected(&format!(
                            "PRIMARY KEY column '{}' among the declared columns",
                            pk_col
                        )))
                    }
                }
            } else {
                columns.push(self.parse_column_def()?);
            }
            if !self.accept_symbol(",") {
                break;
            }
        }
        self.expect_symbol(")")?;
        Ok(Statement::CreateTable { name, columns, pos })
    }

    fn parse_column_def(&mut self) -> EngineResult<ColumnDef> {
        let pos = self.current_pos();
        let name = self.expect_ident()?;
        let ty_tok = self.advance();
        let data_type = DataType::parse(&ty_tok.text)
            .ok_or_else(|| self.error_expected("column type"))?;
        // optional length / precision parameters, accepted and ignored
        if self.accept_symbol("(") {
            let _ = self.parse_unsigned("type length")?;
            if self.accept_symbol(",") {
                let _ = self.parse_unsigned("type scale")?;
            }
            self.expect_symbol(")")?;
        }
        let mut not_null = false;
        let mut primary_key = false;
        let mut default = None;
        loop {
            if self.check_keyword("NOT") {
                self.advance();
                self.expect_keyword("NULL")?;
                not_null = true;
            } else if self.check_keyword("PRIMARY") {
                self.advance();
                self.expect_keyword("KEY")?;
                primary_key = true;
                not_null = true;
            } else if self.accept_keyword("DEFAULT") {
                default = Some(self.parse_expr()?);
            } else {
                break;
            }
        }
        Ok(ColumnDef { name, data_type, not_null, primary_key, default, pos })
    }

    fn parse_create_trigger(&mut self, pos: crate::sql::ast::Pos) -> EngineResult<Statement> {
        let name = self.expect_ident()?;
        let timing = if self.accept_keyword("BEFORE") {
            TriggerTiming::Before
        } else if self.accept_keyword("AFTER") {
            TriggerTiming::After
        } else {
            return Err(self.error_expected("BEFORE or AFTER"));
        };
        let mut events = vec![self.parse_trigger_event()?];
        while self.accept_keyword("OR") {
            events.push(self.parse_trigger_event()?);
        }
        self.expect_keyword("ON")?;
        let table = self.expect_ident()?;
        let mut row_level = false;
        if self.check_keyword("FOR") {
            self.advance();
            self.expect_keyword("EACH")?;
            self.expect_keyword("ROW")?;
            row_level = true;
        }
        let when_sql = if self.accept_keyword("WHEN") {
            self.expect_symbol("(")?;
            let start = self.cursor_index();
            let _ = self.parse_expr()?;
            let sql = self.slice_sql(start, self.cursor_index());
            self.expect_symbol(")")?;
            Some(sql)
        } else {
            None
        };
        // The body is everything up to the statement terminator, preserved
        // verbatim for the catalog.
        let body_start = self.cursor_index();
        let body_end = self.index_of_statement_end();
        if body_end == body_start {
            return Err(self.error_expected("trigger body"));
        }
        let body_sql = self.slice_sql(body_start, body_end);
        while self.cursor_index() < body_end {
            self.advance();
        }
        Ok(Statement::CreateTrigger {
            name,
            table,
            timing,
            events,
            row_level,
            when_sql,
            body_sql,
            pos,
        })
    }

    fn parse_trigger_event(&mut self) -> EngineResult<TriggerEvent> {
        if self.accept_keyword("INSERT") {
            Ok(TriggerEvent::Insert)
        } else if self.accept_keyword("UPDATE") {
            Ok(TriggerEvent::Update)
        } else if self.accept_keyword("DELETE") {
            Ok(TriggerEvent::Delete)
        } else {
            Err(self.error_expected("INSERT, UPDATE or DELETE"))
        }
    }
}
