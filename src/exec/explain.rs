//! EXPLAIN and EXPLAIN ANALYZE.
//!
//! Plain EXPLAIN prints the optimized logical tree with cost estimates.
//! EXPLAIN ANALYZE additionally runs the profiled physical plan to
//! completion and appends the physical tree annotated with per-operator
//! {time_ms, rows, calls}.

use crate::error::EngineResult;
use crate::exec::{drain, format_physical, ExecContext, PhysicalOperator, Schema};

pub struct Explain {
    /// Pre-rendered logical plan text with cost annotations.
    logical_text: String,
    analyze: bool,
    /// Profiled physical plan, present for ANALYZE.
    child: Option<Box<dyn PhysicalOperator>>,
    /// Whether the child produces rows (vs a terminal operator).
    child_is_relational: bool,
    schema: Schema,
}

impl Explain {
    pub fn new(
        logical_text: String,
        analyze: bool,
        child: Option<Box<dyn PhysicalOperator>>,
        child_is_relational: bool,
    ) -> Self {
        Self { logical_text, analyze, child, child_is_relational, schema: Schema::default() }
    }
}

impl PhysicalOperator for Explain {
    fn name(&self) -> String {
        if self.analyze {
            "ExplainAnalyze".to_string()
        } else {
            "Explain".to_string()
        }
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        self.child.as_deref().map(|c| vec![c]).unwrap_or_default()
    }

    fn execute(&mut self, ctx: &mut ExecContext) -> EngineResult<String> {
        let mut out = String::new();
        out.push_str("Query Plan:\n");
        out.push_str(&self.logical_text);
        if !self.analyze {
            return Ok(out);
        }
        let child = match self.child.as_mut() {
            Some(c) => c,
            None => return Ok(out),
        };
        let mut total_rows = 0u64;
        if self.child_is_relational {
            for batch in drain(child.as_mut(), ctx)? {
                total_rows += batch.len() as u64;
            }
        } else {
            let status = child.execute(ctx)?;
            out.push_str(&format!("Result: {}\n", status));
        }
        out.push_str("Execution Profile:\n");
        format_physical(child.as_ref(), &mut out, 0);
        if self.child_is_relational {
            out.push_str(&format!("Rows returned: {}\n", total_rows));
        }
        Ok(out)
    }
}
