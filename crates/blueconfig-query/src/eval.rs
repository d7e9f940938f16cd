//! Predicate evaluation (§4.H): evaluates a normalized [`Query`] against
//! a single row, given externally bound `$variable` values. Both the
//! full-scan path and the index-scan "predicate residue" filter in
//! [`crate::planner`] drive through this module, so index use never
//! changes query semantics (§8 invariant 11).

use std::collections::BTreeMap;

use blueconfig_core::{Row, Value};
use chrono::Utc;
use regex::Regex;

use crate::ast::{ArithOp, CompareOp, Condition, Literal, Query, Term};
use crate::compare::{compare_values, values_equal};
use crate::error::{QueryError, QueryResult};

/// `$variable` bindings supplied by the caller for one evaluation pass.
pub type Bindings = BTreeMap<String, Value>;

/// Whether `row` satisfies `query`, under `bindings`.
pub fn matches(query: &Query, row: &Row, bindings: &Bindings) -> QueryResult<bool> {
    if query.is_or {
        for sub in &query.sub_queries {
            if matches(sub, row, bindings)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }

    for cond in &query.conditions {
        if !eval_condition(cond, row, bindings)? {
            return Ok(false);
        }
    }
    for sub in &query.sub_queries {
        if !matches(sub, row, bindings)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eval_condition(cond: &Condition, row: &Row, bindings: &Bindings) -> QueryResult<bool> {
    let left = eval_term(&cond.left, row, bindings)?;
    let raw = match cond.op {
        CompareOp::Eq => values_equal(&left, &eval_term(cond.right.as_ref().expect("validated"), row, bindings)?),
        CompareOp::Gt => compare_values(&left, &eval_term(cond.right.as_ref().expect("validated"), row, bindings)?, None, None).is_gt(),
        CompareOp::Lt => compare_values(&left, &eval_term(cond.right.as_ref().expect("validated"), row, bindings)?, None, None).is_lt(),
        CompareOp::Gte => compare_values(&left, &eval_term(cond.right.as_ref().expect("validated"), row, bindings)?, None, None).is_ge(),
        CompareOp::Lte => compare_values(&left, &eval_term(cond.right.as_ref().expect("validated"), row, bindings)?, None, None).is_le(),
        CompareOp::In | CompareOp::AnyOf => {
            let values = cond.in_values.as_ref().expect("validated");
            let mut found = false;
            for term in values {
                let v = eval_term(term, row, bindings)?;
                if let Value::Array(items) = &v {
                    if items.iter().any(|item| values_equal(&left, item)) {
                        found = true;
                        break;
                    }
                } else if values_equal(&left, &v) {
                    found = true;
                    break;
                }
            }
            found
        }
        CompareOp::IsNull => left.is_null(),
        CompareOp::Like => {
            let pattern = cond.pattern.as_ref().expect("validated");
            like_matches(&left.to_storage_string(), pattern)
        }
        CompareOp::Between => {
            let start = eval_term(cond.start.as_ref().expect("validated"), row, bindings)?;
            let end = eval_term(cond.end.as_ref().expect("validated"), row, bindings)?;
            compare_values(&left, &start, None, None).is_ge() && compare_values(&left, &end, None, None).is_le()
        }
        CompareOp::Contains => {
            let needle = eval_term(cond.right.as_ref().expect("validated"), row, bindings)?;
            match &left {
                Value::Array(items) => items.iter().any(|item| values_equal(item, &needle)),
                Value::String(s) => s.contains(&needle.to_storage_string()),
                _ => false,
            }
        }
    };
    Ok(raw ^ cond.negate)
}

/// Evaluate a single term to a concrete value. Exposed beyond predicate
/// evaluation for callers that need one-off term evaluation against an
/// empty or synthetic row — e.g. the executor building an index probe
/// key from a query's literal/variable-valued equality conditions.
pub fn eval_value(term: &Term, row: &Row, bindings: &Bindings) -> QueryResult<Value> {
    eval_term(term, row, bindings)
}

fn eval_term(term: &Term, row: &Row, bindings: &Bindings) -> QueryResult<Value> {
    match term {
        Term::Literal(lit) => Ok(literal_to_value(lit)),
        Term::Property(p) => Ok(row.get(p).cloned().unwrap_or(Value::Null)),
        Term::Variable(v) => bindings
            .get(v)
            .cloned()
            .ok_or_else(|| QueryError::validation(format!("unbound variable '${v}'"))),
        Term::FunctionCall { name, args } => eval_function(name, args, row, bindings),
        Term::Arithmetic { op, left, right } => {
            let l = eval_term(left, row, bindings)?;
            let r = eval_term(right, row, bindings)?;
            eval_arith(*op, &l, &r)
        }
        Term::Cast { expr, target_type } => {
            let v = eval_term(expr, row, bindings)?;
            cast_value(&v, target_type)
        }
        Term::Now => Ok(Value::String(Utc::now().to_rfc3339())),
        Term::Today => Ok(Value::String(Utc::now().format("%Y-%m-%d").to_string())),
    }
}

fn literal_to_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.clone()),
    }
}

fn eval_arith(op: ArithOp, left: &Value, right: &Value) -> QueryResult<Value> {
    let l = left
        .as_f64()
        .ok_or_else(|| QueryError::validation(format!("'{left:?}' is not numeric")))?;
    let r = right
        .as_f64()
        .ok_or_else(|| QueryError::validation(format!("'{right:?}' is not numeric")))?;
    let result = match op {
        ArithOp::Add => l + r,
        ArithOp::Sub => l - r,
        ArithOp::Mul => l * r,
        ArithOp::Div => {
            if r == 0.0 {
                return Err(QueryError::validation("division by zero"));
            }
            l / r
        }
        ArithOp::Mod => {
            if r == 0.0 {
                return Err(QueryError::validation("modulo by zero"));
            }
            l % r
        }
    };
    let both_int = matches!(left, Value::Int(_)) && matches!(right, Value::Int(_));
    if both_int && result.fract() == 0.0 && !matches!(op, ArithOp::Div) {
        Ok(Value::Int(result as i64))
    } else {
        Ok(Value::Float(result))
    }
}

fn cast_value(value: &Value, target_type: &str) -> QueryResult<Value> {
    match target_type.to_ascii_lowercase().as_str() {
        "string" => Ok(Value::String(value.to_storage_string())),
        "int" => value
            .as_f64()
            .map(|f| Value::Int(f as i64))
            .ok_or_else(|| QueryError::validation(format!("cannot cast '{value:?}' to int"))),
        "float" => value
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| QueryError::validation(format!("cannot cast '{value:?}' to float"))),
        "bool" => match value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::String(s) => Ok(Value::Bool(s == "true")),
            Value::Int(i) => Ok(Value::Bool(*i != 0)),
            _ => Err(QueryError::validation(format!("cannot cast '{value:?}' to bool"))),
        },
        other => Err(QueryError::validation(format!("unknown cast target type '{other}'"))),
    }
}

/// Built-in scalar functions a query string may reference. `args` are
/// evaluated before dispatch; unknown names fail rather than silently
/// returning null, so a typo in a query surfaces immediately.
fn eval_function(name: &str, args: &[Term], row: &Row, bindings: &Bindings) -> QueryResult<Value> {
    let values: Vec<Value> = args
        .iter()
        .map(|a| eval_term(a, row, bindings))
        .collect::<QueryResult<_>>()?;

    match name.to_ascii_lowercase().as_str() {
        "upper" => Ok(Value::String(string_arg(&values, name)?.to_uppercase())),
        "lower" => Ok(Value::String(string_arg(&values, name)?.to_lowercase())),
        "trim" => Ok(Value::String(string_arg(&values, name)?.trim().to_string())),
        "len" | "length" => Ok(Value::Int(string_arg(&values, name)?.chars().count() as i64)),
        "abs" => Ok(Value::Float(values.first().and_then(Value::as_f64).unwrap_or(0.0).abs())),
        "round" => Ok(Value::Int(values.first().and_then(Value::as_f64).unwrap_or(0.0).round() as i64)),
        "concat" => Ok(Value::String(values.iter().map(Value::to_storage_string).collect::<Vec<_>>().concat())),
        other => Err(QueryError::validation(format!("unknown function '{other}'"))),
    }
}

fn string_arg<'a>(values: &'a [Value], fn_name: &str) -> QueryResult<String> {
    values
        .first()
        .map(Value::to_storage_string)
        .ok_or_else(|| QueryError::validation(format!("{fn_name}() requires one argument")))
}

/// SQL-style `LIKE` match: `%` matches any run of characters, `_` matches
/// exactly one. Everything else in the pattern is matched literally.
pub fn like_matches(value: &str, pattern: &str) -> bool {
    let mut regex_pattern = String::with_capacity(pattern.len() + 2);
    regex_pattern.push('^');
    for c in pattern.chars() {
        match c {
            '%' => regex_pattern.push_str(".*"),
            '_' => regex_pattern.push('.'),
            other => regex_pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex_pattern.push('$');
    Regex::new(&regex_pattern).map(|re| re.is_match(value)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn evaluates_simple_equality() {
        let q = parse("age == 30").unwrap();
        let r = row(&[("age", Value::Int(30))]);
        assert!(matches(&q, &r, &Bindings::new()).unwrap());
    }

    #[test]
    fn evaluates_not_equal_via_negate() {
        let q = parse("age != 30").unwrap();
        let r = row(&[("age", Value::Int(31))]);
        assert!(matches(&q, &r, &Bindings::new()).unwrap());
    }

    #[test]
    fn evaluates_and_conjunction() {
        let q = parse("age >= 18 && name == 'bob'").unwrap();
        let r = row(&[("age", Value::Int(20)), ("name", Value::String("bob".to_string()))]);
        assert!(matches(&q, &r, &Bindings::new()).unwrap());
        let r2 = row(&[("age", Value::Int(10)), ("name", Value::String("bob".to_string()))]);
        assert!(!matches(&q, &r2, &Bindings::new()).unwrap());
    }

    #[test]
    fn evaluates_or_disjunction() {
        let q = parse("city == 'NYC' || city == 'LA'").unwrap();
        let r = row(&[("city", Value::String("LA".to_string()))]);
        assert!(matches(&q, &r, &Bindings::new()).unwrap());
        let r2 = row(&[("city", Value::String("SF".to_string()))]);
        assert!(!matches(&q, &r2, &Bindings::new()).unwrap());
    }

    #[test]
    fn evaluates_variable_binding() {
        let q = parse("name == $who").unwrap();
        let r = row(&[("name", Value::String("alice".to_string()))]);
        let mut b = Bindings::new();
        b.insert("who".to_string(), Value::String("alice".to_string()));
        assert!(matches(&q, &r, &b).unwrap());
    }

    #[test]
    fn evaluates_like_pattern() {
        let q = parse("name LIKE 'al%'").unwrap();
        let r = row(&[("name", Value::String("alice".to_string()))]);
        assert!(matches(&q, &r, &Bindings::new()).unwrap());
    }

    #[test]
    fn evaluates_between() {
        let q = parse("price BETWEEN 10 AND 30").unwrap();
        assert!(matches(&q, &row(&[("price", Value::Int(20))]), &Bindings::new()).unwrap());
        assert!(!matches(&q, &row(&[("price", Value::Int(40))]), &Bindings::new()).unwrap());
    }

    #[test]
    fn evaluates_function_call_predicate() {
        let q = parse("upper(name) == 'ALICE'").unwrap();
        let r = row(&[("name", Value::String("alice".to_string()))]);
        assert!(matches(&q, &r, &Bindings::new()).unwrap());
    }

    #[test]
    fn missing_property_is_null_not_an_error() {
        let q = parse("missing_field IS NULL").unwrap();
        let r = row(&[("name", Value::String("alice".to_string()))]);
        assert!(matches(&q, &r, &Bindings::new()).unwrap());
    }
}
