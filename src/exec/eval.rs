//! Expression compilation: typed AST expressions become evaluator closures
//! over resolved column indices.
//!
//! The physical builder materializes subqueries before compilation, so the
//! compiler only ever sees literals, columns, operators, BETWEEN and
//! IN-lists. Aggregates never reach this layer (the planner rewrites them
//! into column references over the Aggregate node's output).

use std::collections::HashSet;

use crate::error::{EngineError, EngineResult};
use crate::exec::Schema;
use crate::sql::ast::{Expr, UnaryOp};
use crate::value::{BinOpKind, DataType, GroupKey, Value};

pub type Evaluator = Box<dyn Fn(&[Value]) -> EngineResult<Value> + Send + Sync>;

/// Compile an expression against an input schema.
pub fn compile(expr: &Expr, schema: &Schema) -> EngineResult<Evaluator> {
    match expr {
        Expr::Literal { value, .. } => {
            let v = value.clone();
            Ok(Box::new(move |_| Ok(v.clone())))
        }
        Expr::Column { table, name, .. } => {
            let idx = schema
                .index_of_qualified(table.as_deref(), name)
                .ok_or_else(|| {
                    EngineError::plan(format!(
                        "column '{}' not found in operator input",
                        expr.display_name()
                    ))
                })?;
            Ok(Box::new(move |row| {
                row.get(idx)
                    .cloned()
                    .ok_or_else(|| EngineError::exec("row narrower than schema"))
            }))
        }
        Expr::Unary { op, expr, .. } => {
            let inner = compile(expr, schema)?;
            let op = *op;
            Ok(Box::new(move |row| {
                let v = inner(row)?;
                match op {
                    UnaryOp::Neg => v.negate(),
                    UnaryOp::Not => Ok(Value::Bool(!v.is_truthy())),
                }
            }))
        }
        Expr::Binary { left, op, right, .. } => {
            let l = compile(left, schema)?;
            let r = compile(right, schema)?;
            let op = *op;
            Ok(Box::new(move |row| {
                // Short-circuit boolean connectives.
                match op {
                    BinOpKind::And => {
                        if !l(row)?.is_truthy() {
                            return Ok(Value::Bool(false));
                        }
                        Ok(Value::Bool(r(row)?.is_truthy()))
                    }
                    BinOpKind::Or => {
                        if l(row)?.is_truthy() {
                            return Ok(Value::Bool(true));
                        }
                        Ok(Value::Bool(r(row)?.is_truthy()))
                    }
                    _ => Value::binary_op(op, &l(row)?, &r(row)?),
                }
            }))
        }
        Expr::Between { expr, low, high, negated, .. } => {
            let v = compile(expr, schema)?;
            let lo = compile(low, schema)?;
            let hi = compile(high, schema)?;
            let negated = *negated;
            Ok(Box::new(move |row| {
                let value = v(row)?;
                let ge = Value::binary_op(BinOpKind::GtEq, &value, &lo(row)?)?.is_truthy();
                let le = Value::binary_op(BinOpKind::LtEq, &value, &hi(row)?)?.is_truthy();
                Ok(Value::Bool((ge && le) != negated))
            }))
        }
        Expr::InList { expr, list, negated, .. } => {
            let v = compile(expr, schema)?;
            // Constant lists become a hash probe; mixed lists fall back to
            // pairwise comparison.
            let constants: Option<HashSet<GroupKey>> = list
                .iter()
                .map(|e| match e {
                    Expr::Literal { value, .. } if !value.is_null() => Some(value.group_key()),
                    _ => None,
                })
                .collect();
            let negated = *negated;
            match constants {
                Some(set) => Ok(Box::new(move |row| {
                    let value = v(row)?;
                    if value.is_null() {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(set.contains(&value.group_key()) != negated))
                })),
                None => {
                    let items: EngineResult<Vec<Evaluator>> =
                        list.iter().map(|e| compile(e, schema)).collect();
                    let items = items?;
                    Ok(Box::new(move |row| {
                        let value = v(row)?;
                        // NULL probes never match, negated or not, same as
                        // the constant-set path.
                        if value.is_null() {
                            return Ok(Value::Bool(false));
                        }
                        for item in &items {
                            if Value::binary_op(BinOpKind::Eq, &value, &item(row)?)?.is_truthy() {
                                return Ok(Value::Bool(!negated));
                            }
                        }
                        Ok(Value::Bool(negated))
                    }))
                }
            }
        }
        Expr::Wildcard { .. } => Err(EngineError::plan("'*' cannot be evaluated")),
        Expr::Aggregate { .. } => Err(EngineError::plan(format!(
            "aggregate '{}' reached the evaluator; planner must rewrite it",
            expr.display_name()
        ))),
        Expr::Subquery { .. } | Expr::InSubquery { .. } | Expr::Exists { .. } => {
            Err(EngineError::plan(
                "subquery reached the evaluator; builder must materialize it",
            ))
        }
    }
}

/// Static result type of an expression over a schema, for output schema
/// derivation. Unknown when it cannot be decided statically.
pub fn infer_type(expr: &Expr, schema: &Schema) -> DataType {
    match expr {
        Expr::Literal { value, .. } => value.data_type(),
        Expr::Column { table, name, .. } => schema
            .index_of_qualified(table.as_deref(), name)
            .map(|i| schema.columns()[i].data_type)
            .unwrap_or(DataType::Unknown),
        Expr::Unary { op: UnaryOp::Neg, expr, .. } => infer_type(expr, schema),
        Expr::Unary { op: UnaryOp::Not, .. } => DataType::Boolean,
        Expr::Binary { left, op, right, .. } => {
            if op.is_comparison() || matches!(op, BinOpKind::And | BinOpKind::Or) {
                DataType::Boolean
            } else {
                let lt = infer_type(left, schema);
                let rt = infer_type(right, schema);
                if lt == DataType::Float
                    || lt == DataType::Decimal
                    || rt == DataType::Float
                    || rt == DataType::Decimal
                {
                    DataType::Float
                } else if lt == DataType::Unknown || rt == DataType::Unknown {
                    DataType::Unknown
                } else {
                    DataType::Int
                }
            }
        }
        Expr::Between { .. } | Expr::InList { .. } | Expr::InSubquery { .. } | Expr::Exists { .. } => {
            DataType::Boolean
        }
        Expr::Aggregate { func, arg, .. } => match func {
            crate::sql::ast::AggFunc::Count => DataType::Int,
            crate::sql::ast::AggFunc::Sum | crate::sql::ast::AggFunc::Avg => DataType::Float,
            crate::sql::ast::AggFunc::Min | crate::sql::ast::AggFunc::Max => arg
                .as_ref()
                .map(|a| infer_type(a, schema))
                .unwrap_or(DataType::Unknown),
        },
        _ => DataType::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::ast::Pos;

    fn schema() -> Schema {
        Schema::bare(vec![
            ("id".into(), DataType::Int),
            ("name".into(), DataType::Varchar),
            ("score".into(), DataType::Float),
        ])
    }

    fn col(name: &str) -> Expr {
        Expr::Column { table: None, name: name.into(), pos: Pos::default() }
    }

    fn lit(v: Value) -> Expr {
        Expr::Literal { value: v, pos: Pos::default() }
    }

    #[test]
    fn column_and_arithmetic() {
        let s = schema();
        let e = Expr::Binary {
            left: Box::new(col("id")),
            op: BinOpKind::Sub,
            right: Box::new(lit(Value::Int(1))),
            pos: Pos::default(),
        };
        let eval = compile(&e, &s).unwrap();
        let row = vec![Value::Int(10), Value::Str("x".into()), Value::Float(0.5)];
        assert_eq!(eval(&row).unwrap(), Value::Int(9));
    }

    #[test]
    fn comparison_and_short_circuit() {
        let s = schema();
        // id > 5 AND score < 1.0
        let e = Expr::Binary {
            left: Box::new(Expr::Binary {
                left: Box::new(col("id")),
                op: BinOpKind::Gt,
                right: Box::new(lit(Value::Int(5))),
                pos: Pos::default(),
            }),
            op: BinOpKind::And,
            right: Box::new(Expr::Binary {
                left: Box::new(col("score")),
                op: BinOpKind::Lt,
                right: Box::new(lit(Value::Float(1.0))),
                pos: Pos::default(),
            }),
            pos: Pos::default(),
        };
        let eval = compile(&e, &s).unwrap();
        let row = vec![Value::Int(10), Value::Str("x".into()), Value::Float(0.5)];
        assert_eq!(eval(&row).unwrap(), Value::Bool(true));
        let row = vec![Value::Int(1), Value::Str("x".into()), Value::Float(0.5)];
        assert_eq!(eval(&row).unwrap(), Value::Bool(false));
    }

    #[test]
    fn between_and_in_list() {
        let s = schema();
        let between = Expr::Between {
            expr: Box::new(col("id")),
            low: Box::new(lit(Value::Int(5))),
            high: Box::new(lit(Value::Int(15))),
            negated: false,
            pos: Pos::default(),
        };
        let eval = compile(&between, &s).unwrap();
        assert_eq!(
            eval(&[Value::Int(10), Value::Null, Value::Null]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval(&[Value::Int(20), Value::Null, Value::Null]).unwrap(),
            Value::Bool(false)
        );

        let inlist = Expr::InList {
            expr: Box::new(col("name")),
            list: vec![lit(Value::Str("a".into())), lit(Value::Str("b".into()))],
            negated: true,
            pos: Pos::default(),
        };
        let eval = compile(&inlist, &s).unwrap();
        assert_eq!(
            eval(&[Value::Null, Value::Str("c".into()), Value::Null]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval(&[Value::Null, Value::Str("a".into()), Value::Null]).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn null_probe_never_matches_in_list() {
        let s = schema();
        // Constant list (hash-probe path) and mixed list (pairwise path)
        // must agree: a NULL probe is false even when negated.
        for list in [
            vec![lit(Value::Int(1)), lit(Value::Int(2))],
            vec![lit(Value::Int(1)), col("id")],
        ] {
            for negated in [false, true] {
                let e = Expr::InList {
                    expr: Box::new(col("score")),
                    list: list.clone(),
                    negated,
                    pos: Pos::default(),
                };
                let eval = compile(&e, &s).unwrap();
                let row = vec![Value::Int(1), Value::Str("x".into()), Value::Null];
                assert_eq!(eval(&row).unwrap(), Value::Bool(false), "negated={}", negated);
            }
        }
    }

    #[test]
    fn unknown_column_is_plan_error() {
        let s = schema();
        match compile(&col("missing"), &s) {
            Err(err) => assert!(matches!(err, EngineError::Plan(_))),
            Ok(_) => panic!("expected compile to fail for unknown column"),
        }
    }

    #[test]
    fn type_inference() {
        let s = schema();
        assert_eq!(infer_type(&col("score"), &s), DataType::Float);
        let arith = Expr::Binary {
            left: Box::new(col("id")),
            op: BinOpKind::Add,
            right: Box::new(lit(Value::Int(1))),
            pos: Pos::default(),
        };
        assert_eq!(infer_type(&arith, &s), DataType::Int);
        let mixed = Expr::Binary {
            left: Box::new(col("id")),
            op: BinOpKind::Add,
            right: Box::new(col("score")),
            pos: Pos::default(),
        };
        assert_eq!(infer_type(&mixed, &s), DataType::Float);
    }
}
