//! Engine configuration. Defaults are tuned for tests and the REPL; the
//! binary overrides them from `OPALDB_*` environment variables.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Rows per execution batch handed between volcano operators.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Root directory for the catalog file, table snapshots and the WAL.
    pub data_dir: PathBuf,
    /// Maximum rows per batch emitted by any operator.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// When false the optimizer is bypassed and the raw logical plan runs.
    #[serde(default = "default_true")]
    pub enable_optimizer: bool,
    /// Cost candidate plans on worker threads when more than one exists.
    #[serde(default)]
    pub parallel_cost_eval: bool,
    /// Non-aggregate select items missing from GROUP BY are an error when
    /// set; otherwise a warning is logged and the group key is derived.
    #[serde(default = "default_true")]
    pub strict_group_by: bool,
    /// Row threshold under which the smaller join side is hash-built.
    #[serde(default = "default_join_budget")]
    pub join_memory_budget_rows: u64,
    /// Join-order enumeration cap (tables per permutation search).
    #[serde(default = "default_join_enum_cap")]
    pub join_enumeration_cap: usize,
    /// Fixpoint iteration cap for the rule-rewrite pass.
    #[serde(default = "default_rule_pass_cap")]
    pub rule_pass_cap: usize,
    /// Lock wait timeout in milliseconds.
    #[serde(default = "default_lock_timeout")]
    pub lock_wait_timeout_ms: u64,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_true() -> bool {
    true
}
fn default_join_budget() -> u64 {
    100_000
}
fn default_join_enum_cap() -> usize {
    6
}
fn default_rule_pass_cap() -> usize {
    5
}
fn default_lock_timeout() -> u64 {
    5_000
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("opaldb_data"),
            batch_size: DEFAULT_BATCH_SIZE,
            enable_optimizer: true,
            parallel_cost_eval: false,
            strict_group_by: true,
            join_memory_budget_rows: default_join_budget(),
            join_enumeration_cap: default_join_enum_cap(),
            rule_pass_cap: default_rule_pass_cap(),
            lock_wait_timeout_ms: default_lock_timeout(),
        }
    }
}

impl EngineOptions {
    pub fn with_data_dir<P: Into<PathBuf>>(dir: P) -> Self {
        Self { data_dir: dir.into(), ..Self::default() }
    }

    /// Overlay `OPALDB_*` environment variables onto the defaults.
    pub fn from_env() -> Self {
        let mut opts = Self::default();
        if let Ok(dir) = std::env::var("OPALDB_DATA_DIR") {
            opts.data_dir = PathBuf::from(dir);
        }
        if let Ok(v) = std::env::var("OPALDB_BATCH_SIZE") {
            if let Ok(n) = v.parse::<usize>() {
                if n > 0 {
                    opts.batch_size = n;
                }
            }
        }
        if let Ok(v) = std::env::var("OPALDB_OPTIMIZER") {
            opts.enable_optimizer = !v.eq_ignore_ascii_case("off");
        }
        if let Ok(v) = std::env::var("OPALDB_LOCK_TIMEOUT_MS") {
            if let Ok(n) = v.parse::<u64>() {
                opts.lock_wait_timeout_ms = n;
            }
        }
        opts
    }
}
