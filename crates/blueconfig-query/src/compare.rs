//! Value comparison shared by range scans and multi-key sort (§4.H,
//! §9's "Sorting over heterogeneous values" note). Nulls sort first;
//! when both sides carry a schema-declared numeric type (or both parse
//! cleanly as numbers) the comparison is numeric, otherwise it falls
//! back to lexicographic comparison over the canonical string form —
//! the acknowledged improvement over the source's pure string ordering.

use std::cmp::Ordering;

use blueconfig_core::{Value, ValueType};

/// Whether `declared` should be compared numerically. `None` (an
/// untyped/unknown field) falls back to string comparison.
fn is_numeric(declared: Option<ValueType>) -> bool {
    matches!(declared, Some(ValueType::Int) | Some(ValueType::Float))
}

/// Compare two stored values, honoring each side's declared type when
/// known. Null sorts before any non-null value; two nulls are equal.
pub fn compare_values(
    a: &Value,
    b: &Value,
    a_type: Option<ValueType>,
    b_type: Option<ValueType>,
) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => {}
    }

    if is_numeric(a_type) && is_numeric(b_type) {
        if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
            return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
        }
    }
    // both untyped but coincidentally numeric-looking strings still sort
    // lexicographically, matching the source's literal contract when no
    // schema type is available to justify numeric comparison.
    a.to_storage_string().cmp(&b.to_storage_string())
}

/// Value equality used by `==`/`!=` and `IN`/`ANY_OF` membership: numeric
/// types compare by parsed value (so `1` and `1.0` are equal), everything
/// else compares by canonical string form.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if a.is_null() && b.is_null() {
        return true;
    }
    if a.is_null() != b.is_null() {
        return false;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if is_numeric_value(a) && is_numeric_value(b) => x == y,
        _ => a.to_storage_string() == b.to_storage_string(),
    }
}

fn is_numeric_value(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Float(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_comparison_orders_by_value_not_text() {
        let a = Value::Int(2);
        let b = Value::Int(10);
        assert_eq!(
            compare_values(&a, &b, Some(ValueType::Int), Some(ValueType::Int)),
            Ordering::Less
        );
    }

    #[test]
    fn untyped_falls_back_to_lexicographic() {
        let a = Value::String("2".to_string());
        let b = Value::String("10".to_string());
        assert_eq!(compare_values(&a, &b, None, None), Ordering::Greater);
    }

    #[test]
    fn null_sorts_first() {
        assert_eq!(compare_values(&Value::Null, &Value::Int(1), None, Some(ValueType::Int)), Ordering::Less);
    }

    #[test]
    fn values_equal_treats_int_and_float_as_same_number() {
        assert!(values_equal(&Value::Int(2), &Value::Float(2.0)));
        assert!(!values_equal(&Value::Int(2), &Value::Float(2.5)));
    }
}
