//! Hash aggregation: blocking build over the child, then emits one row per
//! group with synthetic row ids.

use std::collections::{HashMap, HashSet};

use crate::error::{EngineError, EngineResult};
use crate::exec::eval::Evaluator;
use crate::exec::{Batch, ExecContext, PhysicalOperator, Schema};
use crate::sql::ast::AggFunc;
use crate::storage::RowId;
use crate::value::{GroupKey, Value};

pub struct AggInstance {
    pub func: AggFunc,
    pub arg: Option<Evaluator>,
    pub distinct: bool,
    pub label: String,
}

enum Accumulator {
    Count(i64),
    Sum(f64),
    Avg { sum: f64, count: i64 },
    Min(Option<Value>),
    Max(Option<Value>),
}

impl Accumulator {
    fn new(func: AggFunc) -> Self {
        match func {
            AggFunc::Count => Accumulator::Count(0),
            AggFunc::Sum => Accumulator::Sum(0.0),
            AggFunc::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
            AggFunc::Min => Accumulator::Min(None),
            AggFunc::Max => Accumulator::Max(None),
        }
    }

    fn update(&mut self, value: Option<&Value>) -> EngineResult<()> {
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::Sum(sum) => {
                *sum += numeric(value)?;
            }
            Accumulator::Avg { sum, count } => {
                *sum += numeric(value)?;
                *count += 1;
            }
            Accumulator::Min(best) => {
                if let Some(v) = value {
                    let replace = match best {
                        None => true,
                        Some(b) => v.total_cmp(b) == std::cmp::Ordering::Less,
                    };
                    if replace {
                        *best = Some(v.clone());
                    }
                }
            }
            Accumulator::Max(best) => {
                if let Some(v) = value {
                    let replace = match best {
                        None => true,
                        Some(b) => v.total_cmp(b) == std::cmp::Ordering::Greater,
                    };
                    if replace {
                        *best = Some(v.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// Final value. AVG of zero rows is 0 by contract.
    fn finish(&self) -> Value {
        match self {
            Accumulator::Count(n) => Value::Int(*n),
            Accumulator::Sum(sum) => Value::Float(*sum),
            Accumulator::Avg { sum, count } => {
                if *count == 0 {
                    Value::Int(0)
                } else {
                    Value::Float(sum / *count as f64)
                }
            }
            Accumulator::Min(v) | Accumulator::Max(v) => v.clone().unwrap_or(Value::Null),
        }
    }
}

fn numeric(value: Option<&Value>) -> EngineResult<f64> {
    match value {
        Some(Value::Int(n)) => Ok(*n as f64),
        Some(Value::Float(f)) => Ok(*f),
        Some(Value::Null) | None => Ok(0.0),
        Some(v) => Err(EngineError::exec(format!(
            "aggregate argument must be numeric, got {}",
            v.data_type()
        ))),
    }
}

struct GroupState {
    key_values: Vec<Value>,
    accs: Vec<Accumulator>,
    distinct_seen: Vec<HashSet<GroupKey>>,
}

pub struct HashAggregate {
    child: Box<dyn PhysicalOperator>,
    group_exprs: Vec<Evaluator>,
    aggs: Vec<AggInstance>,
    schema: Schema,
    /// Groups in first-seen order; built on the first `next()`.
    output: Option<std::vec::IntoIter<(RowId, Vec<Value>)>>,
}

impl HashAggregate {
    pub fn new(
        child: Box<dyn PhysicalOperator>,
        group_exprs: Vec<Evaluator>,
        aggs: Vec<AggInstance>,
        schema: Schema,
    ) -> Self {
        Self { child, group_exprs, aggs, schema, output: None }
    }

    fn build(&mut self, ctx: &mut ExecContext) -> EngineResult<()> {
        let mut groups: HashMap<Vec<GroupKey>, usize> = HashMap::new();
        let mut states: Vec<GroupState> = Vec::new();

        while let Some(batch) = self.child.next(ctx)? {
            for (_, values) in batch.rows {
                let mut key = Vec::with_capacity(self.group_exprs.len());
                let mut key_values = Vec::with_capacity(self.group_exprs.len());
                for g in &self.group_exprs {
                    let v = g(&values)?;
                    key.push(v.group_key());
                    key_values.push(v);
                }
                let idx = match groups.get(&key) {
                    Some(i) => *i,
                    None => {
                        let state = GroupState {
                            key_values,
                            accs: self.aggs.iter().map(|a| Accumulator::new(a.func)).collect(),
                            distinct_seen: self.aggs.iter().map(|_| HashSet::new()).collect(),
                        };
                        states.push(state);
                        groups.insert(key, states.len() - 1);
                        states.len() - 1
                    }
                };
                let state = &mut states[idx];
                for (i, agg) in self.aggs.iter().enumerate() {
                    let arg_value = match &agg.arg {
                        Some(eval) => Some(eval(&values)?),
                        None => None,
                    };
                    if agg.distinct {
                        let probe = arg_value
                            .as_ref()
                            .map(|v| v.group_key())
                            .unwrap_or(GroupKey::Null);
                        if !state.distinct_seen[i].insert(probe) {
                            continue;
                        }
                    }
                    state.accs[i].update(arg_value.as_ref())?;
                }
            }
            ctx.note_buffered(states.len());
        }

        // No groups and no group key: aggregates over an empty input still
        // produce one row (COUNT(*) = 0).
        if states.is_empty() && self.group_exprs.is_empty() {
            states.push(GroupState {
                key_values: Vec::new(),
                accs: self.aggs.iter().map(|a| Accumulator::new(a.func)).collect(),
                distinct_seen: Vec::new(),
            });
        }

        let rows: Vec<(RowId, Vec<Value>)> = states
            .into_iter()
            .enumerate()
            .map(|(i, state)| {
                let mut row = state.key_values;
                for acc in &state.accs {
                    row.push(acc.finish());
                }
                (RowId { page_id: 0, slot: i as u32 }, row)
            })
            .collect();
        self.output = Some(rows.into_iter());
        Ok(())
    }
}

impl PhysicalOperator for HashAggregate {
    fn name(&self) -> String {
        let aggs: Vec<&str> = self.aggs.iter().map(|a| a.label.as_str()).collect();
        format!("HashAggregate({})", aggs.join(", "))
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }

    fn next(&mut self, ctx: &mut ExecContext) -> EngineResult<Option<Batch>> {
        if self.output.is_none() {
            self.build(ctx)?;
        }
        let iter = self.output.as_mut().expect("aggregate built");
        let mut batch = Batch::new();
        for row in iter.by_ref() {
            batch.rows.push(row);
            if batch.len() >= ctx.batch_size {
                break;
            }
        }
        if batch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }
}
