//! Query planner (§4.H): picks a scan strategy for a normalized `Query`
//! given the indexes currently defined on a table. Index use only ever
//! *accelerates* a query — the residue is always re-checked by the
//! evaluator, so `find_rows`'s result set never depends on which
//! indexes happen to exist (§8 invariant 11).

use blueconfig_core::index::{IndexDef, IndexKind};

use crate::ast::{CompareOp, Condition, Query, Term};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    FullScan,
    IndexScan,
    RangeIndexScan,
}

/// The planner's decision, plus everything the executor needs to carry
/// it out: which index (if any), which conditions the probe consumes,
/// and the residual predicate still to evaluate per candidate row.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub strategy: Strategy,
    pub index_name: Option<String>,
    pub index: Option<IndexDef>,
    /// Equality conditions consumed by an `IndexScan` probe, ordered to
    /// match `index.fields`.
    pub equality_conditions: Vec<Condition>,
    /// The single range condition consumed by a `RangeIndexScan` probe.
    pub range_condition: Option<Condition>,
    /// Everything not consumed by the probe — always applied as a filter
    /// over whatever row IDs the chosen strategy produces.
    pub predicate_residue: Query,
}

impl QueryPlan {
    fn full_scan(query: Query) -> Self {
        QueryPlan {
            strategy: Strategy::FullScan,
            index_name: None,
            index: None,
            equality_conditions: Vec::new(),
            range_condition: None,
            predicate_residue: query,
        }
    }
}

/// Choose a plan for `query` given `indexes`. Composite indexes are
/// preferred over single-field ones (they consume more conditions, and
/// so narrow the probe further); among same-shaped candidates the first
/// one listed wins.
pub fn plan(query: &Query, indexes: &[IndexDef]) -> QueryPlan {
    if query.is_or || query.conditions.is_empty() {
        return QueryPlan::full_scan(query.clone());
    }

    let mut composite: Vec<&IndexDef> = indexes.iter().filter(|i| i.kind == IndexKind::Composite).collect();
    composite.sort_by_key(|i| std::cmp::Reverse(i.fields.len()));
    for idx in composite {
        if let Some(matched) = match_equalities(query, &idx.fields) {
            return index_scan(idx, matched, query);
        }
    }

    for idx in indexes.iter().filter(|i| i.kind == IndexKind::Single) {
        if let Some(matched) = match_equalities(query, &idx.fields) {
            return index_scan(idx, matched, query);
        }
    }

    for idx in indexes.iter().filter(|i| i.kind == IndexKind::Single) {
        if let Some(cond) = match_range(query, &idx.fields[0]) {
            return range_scan(idx, cond, query);
        }
    }

    QueryPlan::full_scan(query.clone())
}

/// Find, for every field in `fields`, a top-level `==` condition on it
/// (negated equalities don't narrow a probe, so they're excluded); `None`
/// unless every field has exactly one match.
fn match_equalities(query: &Query, fields: &[String]) -> Option<Vec<Condition>> {
    let mut matched = Vec::with_capacity(fields.len());
    for field in fields {
        let found = query.conditions.iter().find(|c| {
            c.op == CompareOp::Eq && !c.negate && matches!(&c.left, Term::Property(p) if p == field)
        })?;
        matched.push(found.clone());
    }
    Some(matched)
}

/// Find a top-level range condition (`>`, `>=`, `<`, `<=`, `BETWEEN`) on
/// `field`.
fn match_range(query: &Query, field: &str) -> Option<Condition> {
    query
        .conditions
        .iter()
        .find(|c| {
            !c.negate
                && matches!(&c.left, Term::Property(p) if p == field)
                && matches!(c.op, CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte | CompareOp::Between)
        })
        .cloned()
}

fn index_scan(idx: &IndexDef, matched: Vec<Condition>, query: &Query) -> QueryPlan {
    QueryPlan {
        strategy: Strategy::IndexScan,
        index_name: Some(idx.name.clone()),
        index: Some(idx.clone()),
        predicate_residue: strip_conditions(query, &matched),
        equality_conditions: matched,
        range_condition: None,
    }
}

fn range_scan(idx: &IndexDef, matched: Condition, query: &Query) -> QueryPlan {
    QueryPlan {
        strategy: Strategy::RangeIndexScan,
        index_name: Some(idx.name.clone()),
        index: Some(idx.clone()),
        predicate_residue: strip_conditions(query, std::slice::from_ref(&matched)),
        equality_conditions: Vec::new(),
        range_condition: Some(matched),
    }
}

/// A copy of `query` with each condition in `remove` dropped (first
/// matching occurrence only, so duplicate conditions aren't over-removed).
fn strip_conditions(query: &Query, remove: &[Condition]) -> Query {
    let mut remaining = query.conditions.clone();
    for cond in remove {
        if let Some(pos) = remaining.iter().position(|c| c == cond) {
            remaining.remove(pos);
        }
    }
    Query {
        is_or: query.is_or,
        conditions: remaining,
        sub_queries: query.sub_queries.clone(),
        collection: query.collection.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn single_index(name: &str, field: &str, unique: bool) -> IndexDef {
        IndexDef {
            name: name.to_string(),
            fields: vec![field.to_string()],
            unique,
            kind: IndexKind::Single,
        }
    }

    fn composite_index(name: &str, fields: &[&str]) -> IndexDef {
        IndexDef {
            name: name.to_string(),
            fields: fields.iter().map(|s| s.to_string()).collect(),
            unique: false,
            kind: IndexKind::Composite,
        }
    }

    #[test]
    fn chooses_full_scan_with_no_matching_index() {
        let q = parse("age > 18").unwrap();
        let p = plan(&q, &[]);
        assert_eq!(p.strategy, Strategy::FullScan);
    }

    #[test]
    fn chooses_index_scan_on_equality_match() {
        let q = parse("city == 'NYC'").unwrap();
        let idx = single_index("idx_city", "city", false);
        let p = plan(&q, std::slice::from_ref(&idx));
        assert_eq!(p.strategy, Strategy::IndexScan);
        assert_eq!(p.index_name.as_deref(), Some("idx_city"));
        assert!(p.predicate_residue.conditions.is_empty());
    }

    #[test]
    fn leaves_non_matched_conditions_as_residue() {
        let q = parse("city == 'NYC' && age > 18").unwrap();
        let idx = single_index("idx_city", "city", false);
        let p = plan(&q, std::slice::from_ref(&idx));
        assert_eq!(p.strategy, Strategy::IndexScan);
        assert_eq!(p.predicate_residue.conditions.len(), 1);
    }

    #[test]
    fn chooses_range_scan_on_comparison_match() {
        let q = parse("price >= 15 && price <= 35").unwrap();
        let idx = single_index("idx_price", "price", false);
        let p = plan(&q, std::slice::from_ref(&idx));
        assert_eq!(p.strategy, Strategy::RangeIndexScan);
        assert_eq!(p.predicate_residue.conditions.len(), 1);
    }

    #[test]
    fn prefers_composite_index_when_all_fields_match() {
        let q = parse("city == 'NYC' && status == 'active'").unwrap();
        let single = single_index("idx_city", "city", false);
        let composite = composite_index("idx_city_status", &["city", "status"]);
        let p = plan(&q, &[single, composite]);
        assert_eq!(p.strategy, Strategy::IndexScan);
        assert_eq!(p.index_name.as_deref(), Some("idx_city_status"));
        assert_eq!(p.equality_conditions.len(), 2);
    }

    #[test]
    fn disjunction_always_full_scans() {
        let q = parse("city == 'NYC' || city == 'LA'").unwrap();
        let idx = single_index("idx_city", "city", false);
        let p = plan(&q, std::slice::from_ref(&idx));
        assert_eq!(p.strategy, Strategy::FullScan);
    }
}
