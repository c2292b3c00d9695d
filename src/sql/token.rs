//! Token model for the SQL lexer. Every token keeps its source position so
//! later stages can attach diagnostics to the original text.

use std::collections::HashSet;
use std::fmt;

use once_cell::sync::Lazy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Unquoted identifier (case-preserving, compared case-insensitively).
    Ident,
    /// Recognized SQL keyword; `text` is normalized to uppercase.
    Keyword,
    IntLit,
    DecimalLit,
    /// Single-quoted string with `''` escapes already folded.
    StringLit,
    /// Operator or punctuation: `= != < <= > >= + - * / % ( ) , ; .`
    Symbol,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
    pub col: u32,
}

impl Token {
    pub fn eof(line: u32, col: u32) -> Self {
        Token { kind: TokenKind::Eof, text: String::new(), line, col }
    }

    pub fn is_keyword(&self, kw: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text == kw
    }

    pub fn is_symbol(&self, sym: &str) -> bool {
        self.kind == TokenKind::Symbol && self.text == sym
    }

    /// Human-readable form for parse errors.
    pub fn describe(&self) -> String {
        match self.kind {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::StringLit => format!("'{}'", self.text),
            _ => self.text.clone(),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

/// Reserved words recognized by the lexer. Anything else scans as an
/// identifier.
pub static KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "SELECT", "FROM", "WHERE", "GROUP", "BY", "HAVING", "ORDER", "ASC", "DESC", "LIMIT",
        "OFFSET", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER", "ON", "AS", "AND",
        "OR", "NOT", "IN", "EXISTS", "BETWEEN", "NULL", "TRUE", "FALSE", "INSERT", "INTO",
        "VALUES", "UPDATE", "SET", "DELETE", "CREATE", "DROP", "ALTER", "TABLE", "INDEX",
        "UNIQUE", "VIEW", "TRIGGER", "DATABASE", "DATABASES", "USE", "SHOW", "TABLES", "COLUMNS",
        "VIEWS", "TRIGGERS", "PRIMARY", "KEY", "DEFAULT", "IF", "EXPLAIN", "ANALYZE", "BEGIN",
        "START", "TRANSACTION", "COMMIT", "ROLLBACK", "DECLARE", "CURSOR", "FOR", "OPEN", "FETCH",
        "CLOSE", "BEFORE", "AFTER", "EACH", "ROW", "WHEN", "COUNT", "SUM", "AVG", "MIN", "MAX",
        "DISTINCT", "INT", "INTEGER", "BIGINT", "SMALLINT", "FLOAT", "REAL", "DOUBLE", "DECIMAL",
        "NUMERIC", "VARCHAR", "CHAR", "TEXT", "DATE", "TIME", "TIMESTAMP", "DATETIME", "BOOLEAN",
        "BOOL",
    ]
    .into_iter()
    .collect()
});

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(word.to_ascii_uppercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_lookup_is_case_insensitive() {
        assert!(is_keyword("select"));
        assert!(is_keyword("Select"));
        assert!(!is_keyword("users"));
    }

    #[test]
    fn describe_eof() {
        assert_eq!(Token::eof(3, 1).describe(), "end of input");
    }
}
