//! Unified engine error model.
//! One typed enum covers every failure class from the lexer down to the WAL,
//! so frontends and tests can match on the kind instead of parsing messages.

use thiserror::Error;

/// Coarse error family, used by the session layer to decide whether a
/// statement failure must abort the enclosing transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lex,
    Parse,
    Semantic,
    Plan,
    Optimizer,
    Exec,
    Storage,
    Constraint,
    Txn,
    Io,
    Fatal,
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("lex error at {line}:{col}: {message}")]
    Lex { message: String, line: u32, col: u32 },

    #[error("parse error at {line}:{col}: expected {expected}, got {got}")]
    Parse {
        expected: String,
        got: String,
        line: u32,
        col: u32,
    },

    /// Semantic analysis accumulates every diagnostic before failing.
    #[error("semantic error: {}", messages.join("; "))]
    Semantic { messages: Vec<String> },

    #[error("plan error: {0}")]
    Plan(String),

    /// Non-fatal: the optimizer falls back to the unoptimized plan.
    #[error("optimizer error: {0}")]
    Optimizer(String),

    #[error("execution error: {0}")]
    Exec(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("transaction error: {0}")]
    Txn(String),

    #[error("deadlock detected: transaction {0} chosen as victim")]
    Deadlock(u64),

    #[error("lock wait timeout on {0}")]
    LockTimeout(String),

    #[error("io error: {0}")]
    Io(String),

    /// Engine state is unsafe to continue (e.g. WAL flush failed at commit).
    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    pub fn lex<S: Into<String>>(message: S, line: u32, col: u32) -> Self {
        EngineError::Lex { message: message.into(), line, col }
    }

    pub fn parse<E: Into<String>, G: Into<String>>(expected: E, got: G, line: u32, col: u32) -> Self {
        EngineError::Parse { expected: expected.into(), got: got.into(), line, col }
    }

    pub fn semantic(messages: Vec<String>) -> Self {
        EngineError::Semantic { messages }
    }

    pub fn plan<S: Into<String>>(msg: S) -> Self {
        EngineError::Plan(msg.into())
    }

    pub fn optimizer<S: Into<String>>(msg: S) -> Self {
        EngineError::Optimizer(msg.into())
    }

    pub fn exec<S: Into<String>>(msg: S) -> Self {
        EngineError::Exec(msg.into())
    }

    pub fn storage<S: Into<String>>(msg: S) -> Self {
        EngineError::Storage(msg.into())
    }

    pub fn constraint<S: Into<String>>(msg: S) -> Self {
        EngineError::Constraint(msg.into())
    }

    pub fn txn<S: Into<String>>(msg: S) -> Self {
        EngineError::Txn(msg.into())
    }

    pub fn io<S: Into<String>>(msg: S) -> Self {
        EngineError::Io(msg.into())
    }

    pub fn fatal<S: Into<String>>(msg: S) -> Self {
        EngineError::Fatal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Lex { .. } => ErrorKind::Lex,
            EngineError::Parse { .. } => ErrorKind::Parse,
            EngineError::Semantic { .. } => ErrorKind::Semantic,
            EngineError::Plan(_) => ErrorKind::Plan,
            EngineError::Optimizer(_) => ErrorKind::Optimizer,
            EngineError::Exec(_) => ErrorKind::Exec,
            EngineError::Storage(_) => ErrorKind::Storage,
            EngineError::Constraint(_) => ErrorKind::Constraint,
            EngineError::Txn(_) | EngineError::Deadlock(_) | EngineError::LockTimeout(_) => {
                ErrorKind::Txn
            }
            EngineError::Io(_) => ErrorKind::Io,
            EngineError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Statement-compilation failures leave no transactional side effect;
    /// everything at Exec or below must abort the enclosing transaction.
    pub fn aborts_transaction(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Exec
                | ErrorKind::Storage
                | ErrorKind::Constraint
                | ErrorKind::Txn
                | ErrorKind::Io
                | ErrorKind::Fatal
        )
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_mapping() {
        assert_eq!(EngineError::lex("bad char", 1, 2).kind(), ErrorKind::Lex);
        assert_eq!(EngineError::Deadlock(7).kind(), ErrorKind::Txn);
        assert_eq!(EngineError::LockTimeout("t.row(0,1)".into()).kind(), ErrorKind::Txn);
        assert_eq!(EngineError::fatal("wal flush").kind(), ErrorKind::Fatal);
    }

    #[test]
    fn abort_policy() {
        assert!(!EngineError::parse("IDENT", "EOF", 1, 1).aborts_transaction());
        assert!(!EngineError::optimizer("no candidates").aborts_transaction());
        assert!(EngineError::constraint("duplicate key").aborts_transaction());
        assert!(EngineError::storage("missing table").aborts_transaction());
    }

    #[test]
    fn semantic_joins_messages() {
        let e = EngineError::semantic(vec!["unknown column a".into(), "type mismatch".into()]);
        assert_eq!(e.to_string(), "semantic error: unknown column a; type mismatch");
    }
}
