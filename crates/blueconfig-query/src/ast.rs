//! Normalized query AST (§4.G). A parsed expression is always reduced to
//! this shape before the planner or executor ever sees it: `!=` is
//! lowered to `==` with `negate=true`, and negation is distributed via
//! De Morgan's laws at normalization time so no normalized node carries
//! an outer negation over a composite condition.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// A term: anything that evaluates to a value within a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Term {
    Property(String),
    Literal(Literal),
    Variable(String),
    FunctionCall { name: String, args: Vec<Term> },
    Arithmetic {
        op: ArithOp,
        left: Box<Term>,
        right: Box<Term>,
    },
    Cast { expr: Box<Term>, target_type: String },
    Now,
    Today,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    IsNull,
    Like,
    Between,
    Contains,
    AnyOf,
}

/// One normalized condition. `negate` is the only place a negation is
/// ever recorded post-normalization — `!=` becomes `{op: Eq, negate:
/// true}`, `IS NOT NULL` becomes `{op: IsNull, negate: true}`, `NOT IN`
/// becomes `{op: In, negate: true}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub op: CompareOp,
    pub left: Term,
    pub right: Option<Term>,
    pub in_values: Option<Vec<Term>>,
    pub pattern: Option<String>,
    pub start: Option<Term>,
    pub end: Option<Term>,
    pub negate: bool,
}

impl Condition {
    pub fn simple(op: CompareOp, left: Term, right: Term, negate: bool) -> Self {
        Condition {
            op,
            left,
            right: Some(right),
            in_values: None,
            pattern: None,
            start: None,
            end: None,
            negate,
        }
    }
}

/// A normalized query: a pure conjunction of `conditions`, or — when
/// `is_or` is set — a disjunction whose disjuncts are each held as a
/// nested `sub_queries` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub is_or: bool,
    pub conditions: Vec<Condition>,
    pub sub_queries: Vec<Query>,
    pub collection: String,
}

impl Query {
    pub fn conjunction(collection: impl Into<String>, conditions: Vec<Condition>) -> Self {
        Query {
            is_or: false,
            conditions,
            sub_queries: Vec::new(),
            collection: collection.into(),
        }
    }

    /// Reject empty queries, conditions missing a comparison target they
    /// need, and recurse into sub-queries (§4.G validation).
    pub fn validate(&self) -> Result<(), String> {
        if self.conditions.is_empty() && self.sub_queries.is_empty() {
            return Err("query has no conditions and no sub-queries".to_string());
        }
        for cond in &self.conditions {
            cond.validate()?;
        }
        for sub in &self.sub_queries {
            sub.validate()?;
        }
        Ok(())
    }
}

impl Condition {
    pub fn validate(&self) -> Result<(), String> {
        match self.op {
            CompareOp::In | CompareOp::AnyOf => {
                if self.in_values.as_ref().map(Vec::is_empty).unwrap_or(true) {
                    return Err(format!("{:?} requires a non-empty value list", self.op));
                }
            }
            CompareOp::Like => {
                if self.pattern.is_none() {
                    return Err("LIKE requires a pattern".to_string());
                }
            }
            CompareOp::Between => {
                if self.start.is_none() || self.end.is_none() {
                    return Err("BETWEEN requires both bounds".to_string());
                }
            }
            CompareOp::IsNull => {}
            _ => {
                if self.right.is_none() {
                    return Err(format!("{:?} requires a right-hand operand", self.op));
                }
            }
        }
        Ok(())
    }
}

/// Every property, variable, and function name a query (recursively)
/// references — used to prefetch fields and verify variable bindings
/// before execution (§4.G).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    pub properties: BTreeSet<String>,
    pub variables: BTreeSet<String>,
    pub functions: BTreeSet<String>,
}

pub fn dependencies(query: &Query) -> Dependencies {
    let mut deps = Dependencies::default();
    collect_query(query, &mut deps);
    deps
}

fn collect_query(query: &Query, deps: &mut Dependencies) {
    for cond in &query.conditions {
        collect_condition(cond, deps);
    }
    for sub in &query.sub_queries {
        collect_query(sub, deps);
    }
}

fn collect_condition(cond: &Condition, deps: &mut Dependencies) {
    collect_term(&cond.left, deps);
    if let Some(r) = &cond.right {
        collect_term(r, deps);
    }
    if let Some(values) = &cond.in_values {
        for v in values {
            collect_term(v, deps);
        }
    }
    if let Some(s) = &cond.start {
        collect_term(s, deps);
    }
    if let Some(e) = &cond.end {
        collect_term(e, deps);
    }
}

fn collect_term(term: &Term, deps: &mut Dependencies) {
    match term {
        Term::Property(p) => {
            deps.properties.insert(p.clone());
        }
        Term::Variable(v) => {
            deps.variables.insert(v.clone());
        }
        Term::FunctionCall { name, args } => {
            deps.functions.insert(name.clone());
            for a in args {
                collect_term(a, deps);
            }
        }
        Term::Arithmetic { left, right, .. } => {
            collect_term(left, deps);
            collect_term(right, deps);
        }
        Term::Cast { expr, .. } => collect_term(expr, deps),
        Term::Literal(_) | Term::Now | Term::Today => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_query() {
        let q = Query::conjunction("users", vec![]);
        assert!(q.validate().is_err());
    }

    #[test]
    fn dependencies_collects_properties_and_functions_recursively() {
        let cond = Condition::simple(
            CompareOp::Eq,
            Term::Property("age".to_string()),
            Term::FunctionCall {
                name: "upper".to_string(),
                args: vec![Term::Property("name".to_string())],
            },
            false,
        );
        let sub = Query::conjunction("users", vec![cond]);
        let top = Query {
            is_or: true,
            conditions: vec![],
            sub_queries: vec![sub],
            collection: "users".to_string(),
        };
        let deps = dependencies(&top);
        assert!(deps.properties.contains("age"));
        assert!(deps.properties.contains("name"));
        assert!(deps.functions.contains("upper"));
    }
}
