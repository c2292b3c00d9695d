//! Expression grammar: precedence-climbing over the shared `Expr` tree.
//!
//! Precedence, loosest first: OR, AND, NOT, comparison/BETWEEN/IN, additive,
//! multiplicative, unary minus, primary.

use crate::error::EngineResult;
use crate::sql::ast::{AggFunc, Expr, Pos, UnaryOp};
use crate::sql::parser::Parser;
use crate::sql::token::TokenKind;
use crate::value::{BinOpKind, Value};

impl Parser {
    pub(crate) fn parse_expr(&mut self) -> EngineResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> EngineResult<Expr> {
        let mut left = self.parse_and()?;
        while self.check_keyword("OR") {
            let pos = self.current_pos();
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary {
                left: Box::new(left),
                op: BinOpKind::Or,
                right: Box::new(right),
                pos,
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> EngineResult<Expr> {
        let mut left = self.parse_not()?;
        while self.check_keyword("AND") {
            let pos = self.current_pos();
            self.advance();
            let right = self.parse_not()?;
            left = Expr::Binary {
                left: Box::new(left),
                op: BinOpKind::And,
                right: Box::new(right),
                pos,
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> EngineResult<Expr> {
        if self.check_keyword("NOT") && !self.peek_ahead(1).is_keyword("EXISTS") {
            let pos = self.current_pos();
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr::Unary { op: UnaryOp::Not, expr: Box::new(inner), pos });
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> EngineResult<Expr> {
        let left = self.parse_additive()?;

        // [NOT] BETWEEN lo AND hi / [NOT] IN (...)
        let negated = if self.check_keyword("NOT")
            && (self.peek_ahead(1).is_keyword("BETWEEN") || self.peek_ahead(1).is_keyword("IN"))
        {
            self.advance();
            true
        } else {
            false
        };

        if self.check_keyword("BETWEEN") {
            let pos = self.current_pos();
            self.advance();
            let low = self.parse_additive()?;
            self.expect_keyword("AND")?;
            let high = self.parse_additive()?;
            return Ok(Expr::Between {
                expr: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
                negated,
                pos,
            });
        }

        if self.check_keyword("IN") {
            let pos = self.current_pos();
            self.advance();
            self.expect_symbol("(")?;
            if self.check_keyword("SELECT") {
                let query = self.parse_select_body()?;
                self.expect_symbol(")")?;
                return Ok(Expr::InSubquery {
                    expr: Box::new(left),
                    query: Box::new(query),
                    negated,
                    pos,
                });
            }
            let mut list = vec![self.parse_expr()?];
            while self.accept_symbol(",") {
                list.push(self.parse_expr()?);
            }
            self.expect_symbol(")")?;
            return Ok(Expr::InList { expr: Box::new(left), list, negated, pos });
        }

        if negated {
            return Err(self.error_expected("BETWEEN or IN after NOT"));
        }

        for (sym, op) in [
            ("=", BinOpKind::Eq),
            ("!=", BinOpKind::NotEq),
            ("<=", BinOpKind::LtEq),
            (">=", BinOpKind::GtEq),
            ("<", BinOpKind::Lt),
            (">", BinOpKind::Gt),
        ] {
            if self.check_symbol(sym) {
                let pos = self.current_pos();
                self.advance();
                let right = self.parse_additive()?;
                return Ok(Expr::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                    pos,
                });
            }
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> EngineResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.check_symbol("+") {
                BinOpKind::Add
            } else if self.check_symbol("-") {
                BinOpKind::Sub
            } else {
                break;
            };
            let pos = self.current_pos();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary { left: Box::new(left), op, right: Box::new(right), pos };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> EngineResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.check_symbol("*") {
                BinOpKind::Mul
            } else if self.check_symbol("/") {
                BinOpKind::Div
            } else if self.check_symbol("%") {
                BinOpKind::Mod
            } else {
                break;
            };
            let pos = self.current_pos();
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary { left: Box::new(left), op, right: Box::new(right), pos };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> EngineResult<Expr> {
        if self.check_symbol("-") {
            let pos = self.current_pos();
            self.advance();
            let inner = self.parse_unary()?;
            // Fold negative numeric literals immediately.
            if let Expr::Literal { value, .. } = &inner {
                match value {
                    Value::Int(n) => return Ok(Expr::Literal { value: Value::Int(-n), pos }),
                    Value::Float(f) => return Ok(Expr::Literal { value: Value::Float(-f), pos }),
                    _ => {}
                }
            }
            return Ok(Expr::Unary { op: UnaryOp::Neg, expr: Box::new(inner), pos });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> EngineResult<Expr> {
        let tok = self.peek().clone();
        let pos = Pos::new(tok.line, tok.col);
        match tok.kind {
            TokenKind::IntLit => {
                self.advance();
                let n = tok
                    .text
                    .parse::<i64>()
                    .map_err(|_| self.error_expected("integer literal in range"))?;
                Ok(Expr::Literal { value: Value::Int(n), pos })
            }
            TokenKind::DecimalLit => {
                self.advance();
                let f = tok
                    .text
                    .parse::<f64>()
                    .map_err(|_| self.error_expected("decimal literal"))?;
                Ok(Expr::Literal { value: Value::Float(f), pos })
            }
            TokenKind::StringLit => {
                self.advance();
                Ok(Expr::Literal { value: Value::Str(tok.text), pos })
            }
            TokenKind::Symbol if tok.text == "*" => {
                self.advance();
                Ok(Expr::Wildcard { pos })
            }
            TokenKind::Symbol if tok.text == "(" => {
                self.advance();
                if self.check_keyword("SELECT") {
                    let query = self.parse_select_body()?;
                    self.expect_symbol(")")?;
                    return Ok(Expr::Subquery { query: Box::new(query), pos });
                }
                let inner = self.parse_expr()?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            TokenKind::Keyword => match tok.text.as_str() {
                "NULL" => {
                    self.advance();
                    Ok(Expr::Literal { value: Value::Null, pos })
                }
                "TRUE" => {
                    self.advance();
                    Ok(Expr::Literal { value: Value::Bool(true), pos })
                }
                "FALSE" => {
                    self.advance();
                    Ok(Expr::Literal { value: Value::Bool(false), pos })
                }
                "EXISTS" => {
                    self.advance();
                    self.expect_symbol("(")?;
                    let query = self.parse_select_body()?;
                    self.expect_symbol(")")?;
                    Ok(Expr::Exists { query: Box::new(query), negated: false, pos })
                }
                "NOT" if self.peek_ahead(1).is_keyword("EXISTS") => {
                    self.advance();
                    self.advance();
                    self.expect_symbol("(")?;
                    let query = self.parse_select_body()?;
                    self.expect_symbol(")")?;
                    Ok(Expr::Exists { query: Box::new(query), negated: true, pos })
                }
                "COUNT" | "SUM" | "AVG" | "MIN" | "MAX" => self.parse_aggregate(pos),
                _ => Err(self.error_expected("expression")),
            },
            TokenKind::Ident => self.parse_column_ref(pos),
            _ => Err(self.error_expected("expression")),
        }
    }

    fn parse_aggregate(&mut self, pos: Pos) -> EngineResult<Expr> {
        let func = match self.advance().text.as_str() {
            "COUNT" => AggFunc::Count,
            "SUM" => AggFunc::Sum,
            "AVG" => AggFunc::Avg,
            "MIN" => AggFunc::Min,
            "MAX" => AggFunc::Max,
            _ => unreachable!("caller checked aggregate keyword"),
        };
        self.expect_symbol("(")?;
        let distinct = self.accept_keyword("DISTINCT");
        let arg = if self.check_symbol("*") {
            self.advance();
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        self.expect_symbol(")")?;
        Ok(Expr::Aggregate { func, arg, distinct, pos })
    }

    fn parse_column_ref(&mut self, pos: Pos) -> EngineResult<Expr> {
        let first = self.expect_ident()?;
        if self.check_symbol(".") {
            self.advance();
            if self.check_symbol("*") {
                // `t.*` is not supported; report it clearly.
                return Err(self.error_expected("column name after '.'"));
            }
            let name = self.expect_ident()?;
            Ok(Expr::Column { table: Some(first), name, pos })
        } else {
            Ok(Expr::Column { table: None, name: first, pos })
        }
    }
}
