//! Recursive-descent SQL parser.
//!
//! One module per statement family keeps each production readable; the core
//! here owns the token cursor and the shared expect/accept helpers. The
//! parser produces a `Statement` per input statement, splitting on `;`.

mod parse_create;
mod parse_cursor_txn;
mod parse_dml;
mod parse_drop;
mod parse_expr;
mod parse_select;
mod parse_show;
#[cfg(test)]
mod tests;

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::sql::ast::{Pos, Statement};
use crate::sql::lexer::tokenize;
use crate::sql::token::{Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub(crate) fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or_else(|| self.tokens.last().expect("EOF token present"))
    }

    pub(crate) fn peek_ahead(&self, n: usize) -> &Token {
        self.tokens
            .get(self.pos + n)
            .unwrap_or_else(|| self.tokens.last().expect("EOF token present"))
    }

    pub(crate) fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    pub(crate) fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    pub(crate) fn current_pos(&self) -> Pos {
        let t = self.peek();
        Pos::new(t.line, t.col)
    }

    pub(crate) fn check_keyword(&self, kw: &str) -> bool {
        self.peek().is_keyword(kw)
    }

    pub(crate) fn accept_keyword(&mut self, kw: &str) -> bool {
        if self.check_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect_keyword(&mut self, kw: &str) -> EngineResult<Token> {
        if self.check_keyword(kw) {
            Ok(self.advance())
        } else {
            Err(self.error_expected(kw))
        }
    }

    pub(crate) fn check_symbol(&self, sym: &str) -> bool {
        self.peek().is_symbol(sym)
    }

    pub(crate) fn accept_symbol(&mut self, sym: &str) -> bool {
        if self.check_symbol(sym) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect_symbol(&mut self, sym: &str) -> EngineResult<Token> {
        if self.check_symbol(sym) {
            Ok(self.advance())
        } else {
            Err(self.error_expected(&format!("'{}'", sym)))
        }
    }

    /// Accept an identifier. Type keywords and a few non-reserved words are
    /// allowed as identifiers so `SELECT date FROM t` style input parses.
    pub(crate) fn expect_ident(&mut self) -> EngineResult<String> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Ident => {
                self.advance();
                Ok(tok.text)
            }
            _ => Err(self.error_expected("identifier")),
        }
    }

    pub(crate) fn error_expected(&self, expected: &str) -> EngineError {
        let got = self.peek();
        EngineError::parse(expected.to_string(), got.describe(), got.line, got.col)
    }

    /// Reconstruct SQL text from a token range, used to preserve view
    /// definitions and trigger bodies verbatim enough to re-parse.
    pub(crate) fn slice_sql(&self, from: usize, to: usize) -> String {
        let mut out = String::new();
        for tok in &self.tokens[from..to.min(self.tokens.len())] {
            if tok.kind == TokenKind::Eof {
                break;
            }
            if !out.is_empty() && !tok.is_symbol(",") && !tok.is_symbol(")") && !tok.is_symbol(".")
            {
                out.push(' ');
            }
            match tok.kind {
                TokenKind::StringLit => {
                    out.push('\'');
                    out.push_str(&tok.text.replace('\'', "''"));
                    out.push('\'');
                }
                _ => out.push_str(&tok.text),
            }
        }
        out
    }

    pub(crate) fn cursor_index(&self) -> usize {
        self.pos
    }

    /// Skip to just past the next top-level `;` (statement recovery and
    /// trigger-body scanning share this).
    pub(crate) fn index_of_statement_end(&self) -> usize {
        let mut i = self.pos;
        let mut depth = 0i32;
        while i < self.tokens.len() {
            let t = &self.tokens[i];
            match t.kind {
                TokenKind::Eof => break,
                TokenKind::Symbol if t.text == "(" => depth += 1,
                TokenKind::Symbol if t.text == ")" => depth -= 1,
                TokenKind::Symbol if t.text == ";" && depth == 0 => break,
                _ => {}
            }
            i += 1;
        }
        i
    }

    fn parse_statement(&mut self) -> EngineResult<Statement> {
        let tok = self.peek().clone();
        debug!(target: "opaldb::parser", "statement starts with '{}' at {}:{}", tok.describe(), tok.line, tok.col);
        match tok.kind {
            TokenKind::Keyword => match tok.text.as_str() {
                "SELECT" => self.parse_select_statement(),
                "INSERT" => self.parse_insert(),
                "UPDATE" => self.parse_update(),
                "DELETE" => self.parse_delete(),
                "CREATE" => self.parse_create(),
                "DROP" => self.parse_drop(),
                "ALTER" => self.parse_alter(),
                "SHOW" => self.parse_show(),
                "USE" => self.parse_use(),
                "EXPLAIN" => self.parse_explain(),
                "BEGIN" | "START" | "COMMIT" | "ROLLBACK" => self.parse_tcl(),
                "DECLARE" | "OPEN" | "FETCH" | "CLOSE" => self.parse_cursor(),
                _ => Err(self.error_expected("statement")),
            },
            _ => Err(self.error_expected("statement")),
        }
    }
}

/// Parse one or more `;`-separated statements.
pub fn parse(sql: &str) -> EngineResult<Vec<Statement>> {
    let tokens = tokenize(sql)?;
    let mut parser = Parser::new(tokens);
    let mut stmts = Vec::new();
    loop {
        while parser.accept_symbol(";") {}
        if parser.at_eof() {
            break;
        }
        stmts.push(parser.parse_statement()?);
        if !parser.at_eof() && !parser.check_symbol(";") {
            return Err(parser.error_expected("';' or end of input"));
        }
    }
    if stmts.is_empty() {
        return Err(EngineError::parse("statement", "end of input", 1, 1));
    }
    Ok(stmts)
}

/// Parse exactly one statement; trailing statements are a parse error.
pub fn parse_single(sql: &str) -> EngineResult<Statement> {
    let mut stmts = parse(sql)?;
    if stmts.len() != 1 {
        return Err(EngineError::parse(
            "a single statement",
            format!("{} statements", stmts.len()),
            1,
            1,
        ));
    }
    Ok(stmts.remove(0))
}
