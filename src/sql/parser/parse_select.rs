//! SELECT grammar: select list, FROM with comma tables and explicit JOINs,
//! WHERE, GROUP BY, HAVING, ORDER BY, LIMIT/OFFSET.

use crate::error::EngineResult;
use crate::sql::ast::{
    Expr, JoinClause, JoinType, OrderKey, SelectItem, SelectStatement, Statement, TableRef,
};
use crate::sql::parser::Parser;
use crate::sql::token::TokenKind;

impl Parser {
    pub(crate) fn parse_select_statement(&mut self) -> EngineResult<Statement> {
        let body = self.parse_select_body()?;
        Ok(Statement::Select(Box::new(body)))
    }

    pub(crate) fn parse_select_body(&mut self) -> EngineResult<SelectStatement> {
        let pos = self.current_pos();
        self.expect_keyword("SELECT")?;

        let mut items = vec![self.parse_select_item()?];
        while self.accept_symbol(",") {
            items.push(self.parse_select_item()?);
        }

        let mut from = Vec::new();
        let mut joins = Vec::new();
        if self.accept_keyword("FROM") {
            from.push(self.parse_table_ref()?);
            loop {
                if self.accept_symbol(",") {
                    from.push(self.parse_table_ref()?);
                    continue;
                }
                if let Some(join_type) = self.peek_join_type() {
                    joins.push(self.parse_join_clause(join_type)?);
                    continue;
                }
                break;
            }
        }

        let where_clause = if self.accept_keyword("WHERE") {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if self.check_keyword("GROUP") {
            self.advance();
            self.expect_keyword("BY")?;
            group_by.push(self.parse_expr()?);
            while self.accept_symbol(",") {
                group_by.push(self.parse_expr()?);
            }
        }

        let having = if self.accept_keyword("HAVING") {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if self.check_keyword("ORDER") {
            self.advance();
            self.expect_keyword("BY")?;
            loop {
                let column = self.parse_order_column()?;
                let asc = if self.accept_keyword("DESC") {
                    false
                } else {
                    self.accept_keyword("ASC");
                    true
                };
                order_by.push(OrderKey { column, asc });
                if !self.accept_symbol(",") {
                    break;
                }
            }
        }

        let mut limit = None;
        let mut offset = None;
        if self.accept_keyword("LIMIT") {
            limit = Some(self.parse_unsigned("LIMIT count")?);
            if self.accept_keyword("OFFSET") {
                offset = Some(self.parse_unsigned("OFFSET count")?);
            }
        }

        Ok(SelectStatement {
            items,
            from,
            joins,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
            offset,
            pos,
        })
    }

    fn parse_select_item(&mut self) -> EngineResult<SelectItem> {
        let expr = self.parse_expr()?;
        let alias = if self.accept_keyword("AS") {
            Some(self.expect_ident()?)
        } else if self.peek().kind == TokenKind::Ident {
            Some(self.expect_ident()?)
        } else {
            None
        };
        Ok(SelectItem { expr, alias })
    }

    pub(crate) fn parse_table_ref(&mut self) -> EngineResult<TableRef> {
        let name = self.expect_ident()?;
        let alias = if self.accept_keyword("AS") {
            Some(self.expect_ident()?)
        } else if self.peek().kind == TokenKind::Ident {
            Some(self.expect_ident()?)
        } else {
            None
        };
        Ok(TableRef { name, alias })
    }

    fn peek_join_type(&self) -> Option<JoinType> {
        if self.check_keyword("JOIN") || self.check_keyword("INNER") {
            Some(JoinType::Inner)
        } else if self.check_keyword("LEFT") {
            Some(JoinType::Left)
        } else if self.check_keyword("RIGHT") {
            Some(JoinType::Right)
        } else if self.check_keyword("FULL") {
            Some(JoinType::Full)
        } else if self.check_keyword("CROSS") {
            Some(JoinType::Cross)
        } else {
            None
        }
    }

    fn parse_join_clause(&mut self, join_type: JoinType) -> EngineResult<JoinClause> {
        // consume the qualifier keyword(s)
        if !self.accept_keyword("JOIN") {
            self.advance(); // INNER/LEFT/RIGHT/FULL/CROSS
            self.accept_keyword("OUTER");
            self.expect_keyword("JOIN")?;
        }
        let table = self.parse_table_ref()?;
        if join_type == JoinType::Cross {
            // CROSS JOIN takes no ON clause; synthesize TRUE.
            return Ok(JoinClause {
                join_type,
                table,
                on: Expr::Literal {
                    value: crate::value::Value::Bool(true),
                    pos: self.current_pos(),
                },
            });
        }
        self.expect_keyword("ON")?;
        let on = self.parse_expr()?;
        Ok(JoinClause { join_type, table, on })
    }

    fn parse_order_column(&mut self) -> EngineResult<String> {
        let first = self.expect_ident()?;
        if self.accept_symbol(".") {
            let col = self.expect_ident()?;
            Ok(format!("{}.{}", first, col))
        } else {
            Ok(first)
        }
    }

    pub(crate) fn parse_unsigned(&mut self, what: &str) -> EngineResult<u64> {
        let tok = self.peek().clone();
        if tok.kind != TokenKind::IntLit {
            return Err(self.error_expected(what));
        }
        self.advance();
        tok.text.parse::<u64>().map_err(|_| self.error_expected(what))
    }
}
