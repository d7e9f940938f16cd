//! `analyze_query` (§11): reports the plan a query *would* run under
//! without executing it, mirroring the teacher's `explain` precedent —
//! a read-only report over the same [`crate::planner::plan`] decision
//! the executor itself uses, so it can never drift from what actually
//! runs.

use blueconfig_core::index::IndexDef;

use crate::ast::Query;
use crate::planner::{self, Strategy};

/// The report [`analyze_query`] returns: which strategy the planner
/// picked, which index (if any) it would probe, and how many of the
/// query's top-level conditions the probe itself would consume versus
/// leave as residue.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeResult {
    pub strategy: Strategy,
    pub index_name: Option<String>,
    pub consumed_conditions: usize,
    pub residual_conditions: usize,
}

/// Analyze `query` against `indexes` without touching a store — no rows
/// are scanned or probed.
pub fn analyze_query(query: &Query, indexes: &[IndexDef]) -> AnalyzeResult {
    let plan = planner::plan(query, indexes);
    let consumed_conditions = match plan.strategy {
        Strategy::IndexScan => plan.equality_conditions.len(),
        Strategy::RangeIndexScan => 1,
        Strategy::FullScan => 0,
    };
    AnalyzeResult {
        strategy: plan.strategy,
        index_name: plan.index_name,
        consumed_conditions,
        residual_conditions: plan.predicate_residue.conditions.len(),
    }
}
