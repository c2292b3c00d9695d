//! Runtime values and the SQL data types they materialize.
//!
//! Every pipeline stage shares this single representation: literals from the
//! parser, column values from storage, WAL before/after images, and operator
//! output all carry `Value`. Comparison and arithmetic implement the type
//! compatibility rules enforced by the semantic analyzer (numeric types
//! interoperate, string types interoperate, date/time types interoperate with
//! each other and with strings).

use std::cmp::Ordering;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Declared column types. DECIMAL values are carried as floats at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Int,
    Float,
    Decimal,
    Varchar,
    Char,
    Text,
    Date,
    Time,
    Timestamp,
    Boolean,
    Unknown,
}

impl DataType {
    pub fn parse(name: &str) -> Option<DataType> {
        match name.to_ascii_uppercase().as_str() {
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" => Some(DataType::Int),
            "FLOAT" | "REAL" | "DOUBLE" => Some(DataType::Float),
            "DECIMAL" | "NUMERIC" => Some(DataType::Decimal),
            "VARCHAR" => Some(DataType::Varchar),
            "CHAR" => Some(DataType::Char),
            "TEXT" => Some(DataType::Text),
            "DATE" => Some(DataType::Date),
            "TIME" => Some(DataType::Time),
            "TIMESTAMP" | "DATETIME" => Some(DataType::Timestamp),
            "BOOLEAN" | "BOOL" => Some(DataType::Boolean),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int | DataType::Float | DataType::Decimal)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, DataType::Varchar | DataType::Char | DataType::Text)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::Time | DataType::Timestamp)
    }

    /// Whether a value of `other` may be stored in / compared against a
    /// column of `self`.
    pub fn compatible_with(&self, other: DataType) -> bool {
        if *self == other || *self == DataType::Unknown || other == DataType::Unknown {
            return true;
        }
        (self.is_numeric() && other.is_numeric())
            || (self.is_string() && other.is_string())
            || (self.is_temporal() && (other.is_temporal() || other.is_string()))
            || (self.is_string() && other.is_temporal())
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Int => "INT",
            DataType::Float => "FLOAT",
            DataType::Decimal => "DECIMAL",
            DataType::Varchar => "VARCHAR",
            DataType::Char => "CHAR",
            DataType::Text => "TEXT",
            DataType::Date => "DATE",
            DataType::Time => "TIME",
            DataType::Timestamp => "TIMESTAMP",
            DataType::Boolean => "BOOLEAN",
            DataType::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Unknown,
            Value::Int(_) => DataType::Int,
            Value::Float(_) => DataType::Float,
            Value::Str(_) => DataType::Varchar,
            Value::Bool(_) => DataType::Boolean,
            Value::Date(_) => DataType::Date,
            Value::Time(_) => DataType::Time,
            Value::Timestamp(_) => DataType::Timestamp,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            _ => false,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Coerce a literal toward a declared column type. String literals parse
    /// into temporal types; ints widen to floats. Incompatible values error.
    pub fn coerce_to(&self, ty: DataType) -> EngineResult<Value> {
        match (self, ty) {
            (Value::Null, _) => Ok(Value::Null),
            (Value::Int(n), DataType::Float) | (Value::Int(n), DataType::Decimal) => {
                Ok(Value::Float(*n as f64))
            }
            (Value::Int(_), DataType::Int) => Ok(self.clone()),
            (Value::Float(_), DataType::Float) | (Value::Float(_), DataType::Decimal) => {
                Ok(self.clone())
            }
            (Value::Float(f), DataType::Int) => Ok(Value::Int(*f as i64)),
            (Value::Str(_), t) if t.is_string() => Ok(self.clone()),
            (Value::Str(s), DataType::Date) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|e| EngineError::exec(format!("invalid DATE literal '{}': {}", s, e))),
            (Value::Str(s), DataType::Time) => NaiveTime::parse_from_str(s, "%H:%M:%S")
                .map(Value::Time)
                .map_err(|e| EngineError::exec(format!("invalid TIME literal '{}': {}", s, e))),
            (Value::Str(s), DataType::Timestamp) => {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                    .map(Value::Timestamp)
                    .map_err(|e| {
                        EngineError::exec(format!("invalid TIMESTAMP literal '{}': {}", s, e))
                    })
            }
            (Value::Bool(_), DataType::Boolean) => Ok(self.clone()),
            (Value::Date(_), DataType::Date)
            | (Value::Time(_), DataType::Time)
            | (Value::Timestamp(_), DataType::Timestamp) => Ok(self.clone()),
            (v, t) if v.data_type().compatible_with(t) => Ok(self.clone()),
            (v, t) => Err(EngineError::exec(format!(
                "cannot store {} value into {} column",
                v.data_type(),
                t
            ))),
        }
    }

    /// Comparison across compatible types; `None` when either side is NULL
    /// or the types are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Str(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|b| a.cmp(&b)),
            (Value::Str(s), Value::Date(b)) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|a| a.cmp(b)),
            (Value::Timestamp(a), Value::Str(s)) => {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|b| a.cmp(&b))
            }
            (Value::Str(s), Value::Timestamp(b)) => {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|a| a.cmp(b))
            }
            _ => {
                let (a, b) = (self.as_f64()?, other.as_f64()?);
                a.partial_cmp(&b)
            }
        }
    }

    /// Total order used by Sort and the heap index. NULL sorts first, then
    /// numerics, booleans, strings, temporals; incomparable pairs order by
    /// type rank so the relation stays transitive.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Int(_) | Value::Float(_) => 1,
                Value::Bool(_) => 2,
                Value::Str(_) => 3,
                Value::Date(_) => 4,
                Value::Time(_) => 5,
                Value::Timestamp(_) => 6,
            }
        }
        if let Some(ord) = self.compare(other) {
            return ord;
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            _ => rank(self).cmp(&rank(other)),
        }
    }

    /// Equality as used by hash joins, DISTINCT and group keys.
    pub fn group_key(&self) -> GroupKey {
        match self {
            Value::Null => GroupKey::Null,
            Value::Int(n) => GroupKey::Int(*n),
            Value::Float(f) => {
                // Normalize integral floats so 1 and 1.0 land in one group.
                if f.fract() == 0.0 && f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64
                {
                    GroupKey::Int(*f as i64)
                } else {
                    GroupKey::Bits(f.to_bits())
                }
            }
            Value::Str(s) => GroupKey::Str(s.clone()),
            Value::Bool(b) => GroupKey::Bool(*b),
            Value::Date(d) => GroupKey::Str(d.to_string()),
            Value::Time(t) => GroupKey::Str(t.to_string()),
            Value::Timestamp(ts) => GroupKey::Str(ts.to_string()),
        }
    }

    /// Binary arithmetic and comparison evaluation.
    pub fn binary_op(op: BinOpKind, left: &Value, right: &Value) -> EngineResult<Value> {
        use BinOpKind::*;
        match op {
            Add | Sub | Mul | Div | Mod => Value::arith(op, left, right),
            Eq => Ok(Value::Bool(left.compare(right) == Some(Ordering::Equal))),
            NotEq => Ok(Value::Bool(matches!(
                left.compare(right),
                Some(Ordering::Less) | Some(Ordering::Greater)
            ))),
            Lt => Ok(Value::Bool(left.compare(right) == Some(Ordering::Less))),
            LtEq => Ok(Value::Bool(matches!(
                left.compare(right),
                Some(Ordering::Less) | Some(Ordering::Equal)
            ))),
            Gt => Ok(Value::Bool(left.compare(right) == Some(Ordering::Greater))),
            GtEq => Ok(Value::Bool(matches!(
                left.compare(right),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            ))),
            And => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
            Or => Ok(Value::Bool(left.is_truthy() || right.is_truthy())),
        }
    }

    /// Arithmetic of numeric operands yields FLOAT if any operand is float,
    /// else INT.
    fn arith(op: BinOpKind, left: &Value, right: &Value) -> EngineResult<Value> {
        if left.is_null() || right.is_null() {
            return Ok(Value::Null);
        }
        match (left, right) {
            (Value::Int(a), Value::Int(b)) => match op {
                BinOpKind::Add => Ok(Value::Int(a.wrapping_add(*b))),
                BinOpKind::Sub => Ok(Value::Int(a.wrapping_sub(*b))),
                BinOpKind::Mul => Ok(Value::Int(a.wrapping_mul(*b))),
                BinOpKind::Div => {
                    if *b == 0 {
                        Err(EngineError::exec("division by zero"))
                    } else {
                        Ok(Value::Int(a / b))
                    }
                }
                BinOpKind::Mod => {
                    if *b == 0 {
                        Err(EngineError::exec("division by zero"))
                    } else {
                        Ok(Value::Int(a % b))
                    }
                }
                _ => unreachable!("arith called with comparison op"),
            },
            _ => {
                let (a, b) = match (left.as_f64(), right.as_f64()) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(EngineError::exec(format!(
                            "arithmetic on non-numeric values {} and {}",
                            left.data_type(),
                            right.data_type()
                        )))
                    }
                };
                match op {
                    BinOpKind::Add => Ok(Value::Float(a + b)),
                    BinOpKind::Sub => Ok(Value::Float(a - b)),
                    BinOpKind::Mul => Ok(Value::Float(a * b)),
                    BinOpKind::Div => {
                        if b == 0.0 {
                            Err(EngineError::exec("division by zero"))
                        } else {
                            Ok(Value::Float(a / b))
                        }
                    }
                    BinOpKind::Mod => {
                        if b == 0.0 {
                            Err(EngineError::exec("division by zero"))
                        } else {
                            Ok(Value::Float(a % b))
                        }
                    }
                    _ => unreachable!("arith called with comparison op"),
                }
            }
        }
    }

    pub fn negate(&self) -> EngineResult<Value> {
        match self {
            Value::Null => Ok(Value::Null),
            Value::Int(n) => Ok(Value::Int(-n)),
            Value::Float(f) => Ok(Value::Float(-f)),
            v => Err(EngineError::exec(format!("cannot negate {} value", v.data_type()))),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => {
                if x.fract() == 0.0 && x.is_finite() {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{}", x)
                }
            }
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}", t),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// Total-order wrapper making `Value` usable as a BTree index key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdValue(pub Value);

impl PartialEq for OrdValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for OrdValue {}

impl PartialOrd for OrdValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Hashable key projection of a `Value`, used by hash join, hash aggregate
/// and IN-list membership.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Null,
    Int(i64),
    Bits(u64),
    Str(String),
    Bool(bool),
}

/// Binary operators shared by the AST, planner and evaluators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinOpKind {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOpKind::Eq
                | BinOpKind::NotEq
                | BinOpKind::Lt
                | BinOpKind::LtEq
                | BinOpKind::Gt
                | BinOpKind::GtEq
        )
    }

    pub fn is_range(&self) -> bool {
        matches!(self, BinOpKind::Lt | BinOpKind::LtEq | BinOpKind::Gt | BinOpKind::GtEq)
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinOpKind::Add | BinOpKind::Sub | BinOpKind::Mul | BinOpKind::Div | BinOpKind::Mod
        )
    }
}

impl fmt::Display for BinOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOpKind::Add => "+",
            BinOpKind::Sub => "-",
            BinOpKind::Mul => "*",
            BinOpKind::Div => "/",
            BinOpKind::Mod => "%",
            BinOpKind::Eq => "=",
            BinOpKind::NotEq => "!=",
            BinOpKind::Lt => "<",
            BinOpKind::LtEq => "<=",
            BinOpKind::Gt => ">",
            BinOpKind::GtEq => ">=",
            BinOpKind::And => "AND",
            BinOpKind::Or => "OR",
        };
        write!(f, "{}", s)
    }
}
