//! SQL lexer: UTF-8 text in, position-tagged token stream out.
//!
//! Keywords are recognized case-insensitively and normalized to uppercase.
//! Line (`--`) and block (`/* */`, nesting) comments are stripped here so the
//! parser never sees them. Unterminated strings/comments and characters
//! outside the SQL surface fail with a lex error carrying the position.

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::sql::token::{is_keyword, Token, TokenKind};

pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input: input.as_bytes(), pos: 0, line: 1, col: 1 }
    }

    /// Tokenize the whole input, appending a final EOF token.
    pub fn tokenize(mut self) -> EngineResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            if self.pos >= self.input.len() {
                tokens.push(Token::eof(self.line, self.col));
                break;
            }
            tokens.push(self.next_token()?);
        }
        debug!(target: "opaldb::lexer", "tokenized {} tokens", tokens.len());
        Ok(tokens)
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.input.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn skip_whitespace_and_comments(&mut self) -> EngineResult<()> {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b'-') if self.peek2() == Some(b'-') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.peek2() == Some(b'*') => {
                    let (sl, sc) = (self.line, self.col);
                    self.bump();
                    self.bump();
                    let mut depth = 1u32;
                    loop {
                        match self.peek() {
                            None => {
                                return Err(EngineError::lex("unterminated block comment", sl, sc))
                            }
                            Some(b'/') if self.peek2() == Some(b'*') => {
                                self.bump();
                                self.bump();
                                depth += 1;
                            }
                            Some(b'*') if self.peek2() == Some(b'/') => {
                                self.bump();
                                self.bump();
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            Some(_) => {
                                self.bump();
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> EngineResult<Token> {
        let (line, col) = (self.line, self.col);
        let ch = match self.peek() {
            Some(c) => c,
            None => return Ok(Token::eof(line, col)),
        };

        if ch == b'\'' {
            return self.scan_string(line, col);
        }
        if ch.is_ascii_digit() {
            return self.scan_number(line, col);
        }
        if ch.is_ascii_alphabetic() || ch == b'_' {
            return Ok(self.scan_word(line, col));
        }

        // operators and punctuation
        self.bump();
        let text: String = match ch {
            b'<' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    "<=".into()
                } else if self.peek() == Some(b'>') {
                    self.bump();
                    "!=".into()
                } else {
                    "<".into()
                }
            }
            b'>' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    ">=".into()
                } else {
                    ">".into()
                }
            }
            b'!' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    "!=".into()
                } else {
                    return Err(EngineError::lex("unexpected character '!'", line, col));
                }
            }
            b'=' | b'+' | b'-' | b'*' | b'/' | b'%' | b'(' | b')' | b',' | b';' | b'.' => {
                (ch as char).to_string()
            }
            other => {
                return Err(EngineError::lex(
                    format!("illegal character '{}'", other as char),
                    line,
                    col,
                ))
            }
        };
        Ok(Token { kind: TokenKind::Symbol, text, line, col })
    }

    fn scan_string(&mut self, line: u32, col: u32) -> EngineResult<Token> {
        self.bump(); // opening quote
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(EngineError::lex("unterminated string literal", line, col)),
                Some(b'\'') => {
                    self.bump();
                    // '' escape folds to a single quote
                    if self.peek() == Some(b'\'') {
                        self.bump();
                        text.push('\'');
                    } else {
                        break;
                    }
                }
                Some(_) => {
                    // Re-decode at the byte position to keep UTF-8 intact.
                    let rest = &self.input[self.pos..];
                    let s = std::str::from_utf8(rest)
                        .map_err(|_| EngineError::lex("invalid UTF-8 in string", line, col))?;
                    let c = s.chars().next().unwrap();
                    text.push(c);
                    for _ in 0..c.len_utf8() {
                        self.bump();
                    }
                }
            }
        }
        Ok(Token { kind: TokenKind::StringLit, text, line, col })
    }

    fn scan_number(&mut self, line: u32, col: u32) -> EngineResult<Token> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c as char);
                self.bump();
            } else {
                break;
            }
        }
        let mut kind = TokenKind::IntLit;
        if self.peek() == Some(b'.') && self.peek2().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            kind = TokenKind::DecimalLit;
            text.push('.');
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c as char);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        if self
            .peek()
            .map(|c| c.is_ascii_alphabetic() || c == b'_')
            .unwrap_or(false)
        {
            return Err(EngineError::lex(
                format!("malformed numeric literal '{}'", text),
                line,
                col,
            ));
        }
        Ok(Token { kind, text, line, col })
    }

    fn scan_word(&mut self, line: u32, col: u32) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                text.push(c as char);
                self.bump();
            } else {
                break;
            }
        }
        if is_keyword(&text) {
            Token {
                kind: TokenKind::Keyword,
                text: text.to_ascii_uppercase(),
                line,
                col,
            }
        } else {
            Token { kind: TokenKind::Ident, text, line, col }
        }
    }
}

/// Convenience wrapper used by the parser and tests.
pub fn tokenize(sql: &str) -> EngineResult<Vec<Token>> {
    Lexer::new(sql).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<TokenKind> {
        tokenize(sql).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn basic_select_tokens() {
        let toks = tokenize("SELECT id, name FROM users WHERE id = 42;").unwrap();
        assert!(toks[0].is_keyword("SELECT"));
        assert_eq!(toks[1].kind, TokenKind::Ident);
        assert!(toks[2].is_symbol(","));
        assert!(toks.iter().any(|t| t.kind == TokenKind::IntLit && t.text == "42"));
        assert_eq!(toks.last().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn keywords_normalize_case() {
        let toks = tokenize("select * from t").unwrap();
        assert!(toks[0].is_keyword("SELECT"));
        assert!(toks[2].is_keyword("FROM"));
    }

    #[test]
    fn string_escape_folds() {
        let toks = tokenize("SELECT 'O''Brien'").unwrap();
        assert_eq!(toks[1].kind, TokenKind::StringLit);
        assert_eq!(toks[1].text, "O'Brien");
    }

    #[test]
    fn comments_are_stripped() {
        let toks = tokenize("-- leading\nSELECT /* inline /* nested */ gone */ 1").unwrap();
        assert!(toks[0].is_keyword("SELECT"));
        assert_eq!(toks[1].text, "1");
        assert_eq!(toks.len(), 3);
    }

    #[test]
    fn comment_marker_inside_string_survives() {
        let toks = tokenize("SELECT '-- not a comment'").unwrap();
        assert_eq!(toks[1].text, "-- not a comment");
    }

    #[test]
    fn positions_track_lines() {
        let toks = tokenize("SELECT\n  name\nFROM t").unwrap();
        let name = &toks[1];
        assert_eq!((name.line, name.col), (2, 3));
        let from = &toks[2];
        assert_eq!(from.line, 3);
    }

    #[test]
    fn decimal_vs_qualified_name() {
        let toks = tokenize("SELECT 3.14, t.col").unwrap();
        assert_eq!(toks[1].kind, TokenKind::DecimalLit);
        assert_eq!(toks[1].text, "3.14");
        assert_eq!(toks[3].kind, TokenKind::Ident);
        assert!(toks[4].is_symbol("."));
        assert_eq!(toks[5].kind, TokenKind::Ident);
    }

    #[test]
    fn unterminated_string_is_lex_error() {
        let err = tokenize("SELECT 'oops").unwrap_err();
        assert!(err.to_string().contains("unterminated string"));
    }

    #[test]
    fn unterminated_block_comment_is_lex_error() {
        let err = tokenize("/* never ends SELECT 1").unwrap_err();
        assert!(err.to_string().contains("unterminated block comment"));
    }

    #[test]
    fn illegal_character_reports_position() {
        let err = tokenize("SELECT @x").unwrap_err();
        match err {
            EngineError::Lex { line, col, .. } => {
                assert_eq!((line, col), (1, 8));
            }
            other => panic!("expected lex error, got {:?}", other),
        }
    }

    #[test]
    fn not_equals_variants() {
        let toks = tokenize("a != b <> c").unwrap();
        assert!(toks[1].is_symbol("!="));
        assert!(toks[3].is_symbol("!="));
        let _ = kinds("x <= 1 >= 2");
    }
}
