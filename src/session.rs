//! Session: the statement driver behind `submit(sql)`.
//!
//! The session owns what no operator may reach back into: the current
//! database, the explicit-transaction state, and the cursor table. Cursor
//! and transaction statements are handled here; everything else runs the
//! full compile pipeline (analyze, plan, optimize, build, execute) under
//! either the explicit transaction or a per-statement auto-commit
//! transaction. After a runtime error inside an explicit transaction the
//! session refuses further statements until ROLLBACK.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::catalog::DEFAULT_DATABASE;
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::exec::build::PhysicalBuilder;
use crate::exec::{drain, Batch, ExecContext, PhysicalOperator};
use crate::plan::logical::LogicalPlan;
use crate::plan::optimizer::{Optimizer, PerfSample};
use crate::plan::planner::Planner;
use crate::sql::ast::Statement;
use crate::sql::parser::parse;
use crate::sql::semantic::SemanticAnalyzer;
use crate::txn::{IsolationLevel, Transaction};
use crate::value::DataType;

/// Result of one submitted statement.
#[derive(Debug)]
pub enum Output {
    Rows {
        schema: Vec<(String, DataType)>,
        batches: Vec<Batch>,
    },
    Status {
        message: String,
    },
}

impl Output {
    pub fn row_count(&self) -> usize {
        match self {
            Output::Rows { batches, .. } => batches.iter().map(|b| b.len()).sum(),
            Output::Status { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Declared,
    Open,
}

struct Cursor {
    plan: Box<dyn PhysicalOperator>,
    state: CursorState,
}

pub struct Session {
    engine: Arc<Engine>,
    current_db: String,
    txn: Option<Arc<Transaction>>,
    must_rollback: bool,
    cursors: HashMap<String, Cursor>,
    cancel: Arc<AtomicBool>,
}

impl Session {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            current_db: DEFAULT_DATABASE.to_string(),
            txn: None,
            must_rollback: false,
            cursors: HashMap::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn current_database(&self) -> &str {
        &self.current_db
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// Handle usable from another thread to cancel the running statement.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Submit SQL text. Multi-statement input executes in order and
    /// returns the last statement's output.
    pub fn submit(&mut self, sql: &str) -> EngineResult<Output> {
        self.cancel.store(false, Ordering::Relaxed);
        let statements = parse(sql)?;
        let mut last = None;
        for stmt in statements {
            last = Some(self.run(stmt)?);
        }
        last.ok_or_else(|| EngineError::parse("statement", "end of input", 1, 1))
    }

    pub fn begin(&mut self) -> EngineResult<Output> {
        if self.txn.is_some() {
            return Err(EngineError::txn("a transaction is already active"));
        }
        let txn = self.engine.txns().begin(IsolationLevel::ReadCommitted)?;
        debug!(target: "opaldb::session", "explicit txn {} started", txn.id());
        self.txn = Some(txn);
        Ok(Output::Status { message: "Transaction started.".to_string() })
    }

    pub fn commit(&mut self) -> EngineResult<Output> {
        if self.must_rollback {
            return Err(EngineError::txn(
                "transaction is aborted; only ROLLBACK is allowed",
            ));
        }
        let txn = self
            .txn
            .take()
            .ok_or_else(|| EngineError::txn("COMMIT with no active transaction"))?;
        self.engine.txns().commit(&txn)?;
        Ok(Output::Status { message: "Transaction committed.".to_string() })
    }

    pub fn rollback(&mut self) -> EngineResult<Output> {
        let txn = self
            .txn
            .take()
            .ok_or_else(|| EngineError::txn("ROLLBACK with no active transaction"))?;
        self.engine
            .txns()
            .abort(&txn, self.engine.storage().as_ref(), self.engine.catalog())?;
        self.must_rollback = false;
        Ok(Output::Status { message: "Transaction rolled back.".to_string() })
    }

    fn run(&mut self, stmt: Statement) -> EngineResult<Output> {
        if self.must_rollback && !matches!(stmt, Statement::Rollback { .. }) {
            return Err(EngineError::txn(
                "transaction is aborted; only ROLLBACK is allowed",
            ));
        }
        debug!(target: "opaldb::session", "running {}", stmt.describe());
        match stmt {
            Statement::Begin { .. } => self.begin(),
            Statement::Commit { .. } => self.commit(),
            Statement::Rollback { .. } => self.rollback(),
            Statement::UseDatabase { name, .. } => {
                if !self.engine.catalog().has_database(&name) {
                    return Err(EngineError::semantic(vec![format!(
                        "database '{}' does not exist",
                        name
                    )]));
                }
                self.current_db = name.clone();
                Ok(Output::Status { message: format!("Database changed to '{}'.", name) })
            }
            Statement::DeclareCursor { name, query, .. } => self.declare_cursor(name, *query),
            Statement::OpenCursor { name, .. } => self.open_cursor(&name),
            Statement::FetchCursor { name, .. } => self.fetch_cursor(&name),
            Statement::CloseCursor { name, .. } => self.close_cursor(&name),
            other => self.run_pipeline(other),
        }
    }

    /// Full pipeline for everything that reaches the executor.
    fn run_pipeline(&mut self, stmt: Statement) -> EngineResult<Output> {
        // Semantic analysis against the current catalog.
        let mut analyzer = SemanticAnalyzer::new(
            self.engine.catalog(),
            &self.current_db,
            self.engine.options(),
        );
        analyzer.analyze(&stmt)?;

        // Logical planning.
        let planner = Planner::new(self.engine.catalog(), &self.current_db);
        let logical = planner.plan(&stmt)?;

        // Optimization over an immutable statistics snapshot. EXPLAIN
        // optimizes its input inside the builder instead.
        let optimized = if matches!(logical, LogicalPlan::Explain { .. }) {
            logical
        } else {
            let snapshot = self.engine.catalog().snapshot(&self.current_db)?;
            let optimizer = Optimizer::new(
                &snapshot,
                self.engine.cost_constants(),
                self.engine.options(),
            );
            let (optimized, report) = optimizer.optimize(logical);
            if let Some(reason) = &report.fallback_reason {
                debug!(target: "opaldb::session", "optimizer fell back: {}", reason);
            }
            optimized
        };

        // Execution under the explicit transaction or a fresh auto-commit
        // transaction.
        let explicit = self.txn.is_some();
        let txn = match &self.txn {
            Some(t) => Arc::clone(t),
            None => self.engine.txns().begin(IsolationLevel::ReadCommitted)?,
        };
        let mut ctx = self.exec_context(Arc::clone(&txn));

        let result = (|| -> EngineResult<Output> {
            let builder =
                PhysicalBuilder::new(self.engine.options(), self.engine.cost_constants());
            let mut op = builder.build(&optimized, &mut ctx)?;
            if optimized.is_relational() {
                let batches = drain(op.as_mut(), &mut ctx)?;
                let schema = op
                    .schema()
                    .columns()
                    .iter()
                    .map(|c| (c.name.clone(), c.data_type))
                    .collect();
                Ok(Output::Rows { schema, batches })
            } else {
                let message = op.execute(&mut ctx)?;
                Ok(Output::Status { message })
            }
        })();

        match result {
            Ok(output) => {
                if !explicit {
                    self.engine.txns().commit(&txn)?;
                }
                self.engine.record_telemetry(PerfSample {
                    io: ctx.pages_touched as f64,
                    cpu: ctx.rows_processed as f64,
                    memory: ctx.peak_buffered as f64,
                });
                Ok(output)
            }
            Err(e) => {
                if e.aborts_transaction() {
                    // Roll back effects; explicit transactions then accept
                    // only ROLLBACK.
                    let _ = self.engine.txns().abort(
                        &txn,
                        self.engine.storage().as_ref(),
                        self.engine.catalog(),
                    );
                    if explicit {
                        self.must_rollback = true;
                    }
                } else if !explicit {
                    let _ = self.engine.txns().abort(
                        &txn,
                        self.engine.storage().as_ref(),
                        self.engine.catalog(),
                    );
                }
                Err(e)
            }
        }
    }

    fn exec_context(&self, txn: Arc<Transaction>) -> ExecContext {
        ExecContext {
            storage: self.engine.storage_shared(),
            catalog: self.engine.catalog_shared(),
            locks: Arc::clone(self.engine.txns().locks()),
            txn,
            db: self.current_db.clone(),
            batch_size: self.engine.options().batch_size,
            cancel: Arc::clone(&self.cancel),
            rows_processed: 0,
            pages_touched: 0,
            peak_buffered: 0,
        }
    }

    // ---- cursors (session-owned state) ----

    fn declare_cursor(
        &mut self,
        name: String,
        query: crate::sql::ast::SelectStatement,
    ) -> EngineResult<Output> {
        if self.cursors.contains_key(&name.to_lowercase()) {
            return Err(EngineError::exec(format!("cursor '{}' already declared", name)));
        }
        let stmt = Statement::Select(Box::new(query.clone()));
        let mut analyzer = SemanticAnalyzer::new(
            self.engine.catalog(),
            &self.current_db,
            self.engine.options(),
        );
        analyzer.analyze(&stmt)?;

        let explicit = self.txn.is_some();
        let txn = match &self.txn {
            Some(t) => Arc::clone(t),
            None => self.engine.txns().begin(IsolationLevel::ReadCommitted)?,
        };
        let mut ctx = self.exec_context(Arc::clone(&txn));
        let builder = PhysicalBuilder::new(self.engine.options(), self.engine.cost_constants());
        let plan = builder.compile_select(&query, &mut ctx)?;
        if !explicit {
            self.engine.txns().commit(&txn)?;
        }
        self.cursors
            .insert(name.to_lowercase(), Cursor { plan, state: CursorState::Declared });
        Ok(Output::Status { message: format!("Cursor '{}' declared.", name) })
    }

    fn open_cursor(&mut self, name: &str) -> EngineResult<Output> {
        let cursor = self
            .cursors
            .get_mut(&name.to_lowercase())
            .ok_or_else(|| EngineError::exec(format!("cursor '{}' is not declared", name)))?;
        if cursor.state == CursorState::Open {
            return Err(EngineError::exec(format!("cursor '{}' is already open", name)));
        }
        cursor.state = CursorState::Open;
        Ok(Output::Status { message: format!("Cursor '{}' opened.", name) })
    }

    fn fetch_cursor(&mut self, name: &str) -> EngineResult<Output> {
        let explicit = self.txn.is_some();
        let txn = match &self.txn {
            Some(t) => Arc::clone(t),
            None => self.engine.txns().begin(IsolationLevel::ReadCommitted)?,
        };
        let mut ctx = self.exec_context(Arc::clone(&txn));

        let cursor = self
            .cursors
            .get_mut(&name.to_lowercase())
            .ok_or_else(|| EngineError::exec(format!("cursor '{}' is not declared", name)))?;
        if cursor.state != CursorState::Open {
            return Err(EngineError::exec(format!("cursor '{}' is not open", name)));
        }
        let batch = cursor.plan.next(&mut ctx)?;
        let schema: Vec<(String, DataType)> = cursor
            .plan
            .schema()
            .columns()
            .iter()
            .map(|c| (c.name.clone(), c.data_type))
            .collect();
        if !explicit {
            self.engine.txns().commit(&txn)?;
        }
        Ok(Output::Rows { schema, batches: batch.into_iter().collect() })
    }

    fn close_cursor(&mut self, name: &str) -> EngineResult<Output> {
        self.cursors
            .remove(&name.to_lowercase())
            .ok_or_else(|| EngineError::exec(format!("cursor '{}' is not declared", name)))?;
        Ok(Output::Status { message: format!("Cursor '{}' closed.", name) })
    }
}
