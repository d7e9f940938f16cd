//! Aggregation and join operations (§4.I). Built directly on
//! [`crate::cursor::find_rows`] — every aggregate first materializes the
//! matching rows through the same planner/evaluator path as an ordinary
//! query, so an aggregate over an indexed predicate benefits from the
//! same scan-strategy selection a plain `find_rows` call would.

use std::collections::BTreeMap;

use blueconfig_core::index::IndexDef;
use blueconfig_core::{row, Row, Value};
use tracing::instrument;

use crate::ast::Query;
use crate::cursor::{self, FindOptions};
use crate::eval::Bindings;
use crate::error::QueryResult;

/// Numeric summary over one field across a row set. `sum`/`avg`/`min`/
/// `max` only consider rows whose field parses as a number
/// ([`Value::as_f64`]); `count` counts every matching row regardless.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Aggregates {
    pub count: usize,
    pub sum: f64,
    pub avg: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

fn summarize(values: &[f64], total_rows: usize) -> Aggregates {
    if values.is_empty() {
        return Aggregates { count: total_rows, ..Default::default() };
    }
    let sum: f64 = values.iter().sum();
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    Aggregates {
        count: total_rows,
        sum,
        avg: sum / values.len() as f64,
        min: Some(min),
        max: Some(max),
    }
}

/// Aggregate `field` over every row matching `query` (an empty/`None`
/// query aggregates the whole table).
#[instrument(skip(store, query, indexes, bindings))]
pub fn aggregate(
    store: &blueconfig_core::store::Store,
    table_path: &str,
    query: &Query,
    indexes: &[IndexDef],
    field: &str,
    bindings: &Bindings,
    now: &str,
) -> QueryResult<Aggregates> {
    let opts = FindOptions { bindings: bindings.clone(), ..Default::default() };
    let rows = cursor::find_rows(store, table_path, query, indexes, &opts, now)?;
    let total = rows.len();
    let values: Vec<f64> = rows.iter().filter_map(|(_, r)| r.get(field).and_then(Value::as_f64)).collect();
    Ok(summarize(&values, total))
}

/// Group every row matching `query` by its `group_field` value, then
/// aggregate `agg_field` within each group. Rows with a null/absent
/// `group_field` are collected under the empty-string key.
#[instrument(skip(store, query, indexes, bindings))]
pub fn group_by(
    store: &blueconfig_core::store::Store,
    table_path: &str,
    query: &Query,
    indexes: &[IndexDef],
    group_field: &str,
    agg_field: &str,
    bindings: &Bindings,
    now: &str,
) -> QueryResult<BTreeMap<String, Aggregates>> {
    let opts = FindOptions { bindings: bindings.clone(), ..Default::default() };
    let rows = cursor::find_rows(store, table_path, query, indexes, &opts, now)?;

    let mut groups: BTreeMap<String, Vec<Row>> = BTreeMap::new();
    for (_, r) in rows {
        let key = r.get(group_field).map(Value::to_storage_string).unwrap_or_default();
        groups.entry(key).or_default().push(r);
    }

    let mut out = BTreeMap::new();
    for (key, group_rows) in groups {
        let total = group_rows.len();
        let values: Vec<f64> = group_rows.iter().filter_map(|r| r.get(agg_field).and_then(Value::as_f64)).collect();
        out.insert(key, summarize(&values, total));
    }
    Ok(out)
}

/// Every distinct value `field` takes across rows matching `query`, in
/// canonical-string order. Null/absent is its own distinct entry when at
/// least one matching row has it.
pub fn distinct_values(
    store: &blueconfig_core::store::Store,
    table_path: &str,
    query: &Query,
    indexes: &[IndexDef],
    field: &str,
    bindings: &Bindings,
    now: &str,
) -> QueryResult<Vec<Value>> {
    let opts = FindOptions { bindings: bindings.clone(), ..Default::default() };
    let rows = cursor::find_rows(store, table_path, query, indexes, &opts, now)?;

    let mut seen: BTreeMap<String, Value> = BTreeMap::new();
    for (_, r) in rows {
        let v = r.get(field).cloned().unwrap_or(Value::Null);
        seen.entry(v.to_storage_string()).or_insert(v);
    }
    Ok(seen.into_values().collect())
}

pub fn count_distinct(
    store: &blueconfig_core::store::Store,
    table_path: &str,
    query: &Query,
    indexes: &[IndexDef],
    field: &str,
    bindings: &Bindings,
    now: &str,
) -> QueryResult<usize> {
    Ok(distinct_values(store, table_path, query, indexes, field, bindings, now)?.len())
}

/// Join rows of `left_table` (filtered by `left_query`) against rows of
/// `right_table` on `left_field == right_field`, keeping only pairs with
/// a match (§4.I inner join).
#[instrument(skip(store, left_query, left_indexes, bindings))]
pub fn inner_join(
    store: &blueconfig_core::store::Store,
    left_table: &str,
    left_query: &Query,
    left_indexes: &[IndexDef],
    left_field: &str,
    right_table: &str,
    right_field: &str,
    bindings: &Bindings,
    now: &str,
) -> QueryResult<Vec<(Row, Row)>> {
    let opts = FindOptions { bindings: bindings.clone(), ..Default::default() };
    let left_rows = cursor::find_rows(store, left_table, left_query, left_indexes, &opts, now)?;
    let right_rows = row::get_all(store, right_table, now)?;
    let right_by_key = index_by_field(&right_rows, right_field);

    let mut out = Vec::new();
    for (_, left_row) in left_rows {
        if let Some(key) = left_row.get(left_field).map(Value::to_storage_string) {
            if let Some(matches) = right_by_key.get(&key) {
                for right_row in matches {
                    out.push((left_row.clone(), right_row.clone()));
                }
            }
        }
    }
    Ok(out)
}

/// Same as [`inner_join`] but keeps every left row, pairing it with
/// `None` when the right side has no match (§4.I left join).
#[instrument(skip(store, left_query, left_indexes, bindings))]
pub fn left_join(
    store: &blueconfig_core::store::Store,
    left_table: &str,
    left_query: &Query,
    left_indexes: &[IndexDef],
    left_field: &str,
    right_table: &str,
    right_field: &str,
    bindings: &Bindings,
    now: &str,
) -> QueryResult<Vec<(Row, Option<Row>)>> {
    let opts = FindOptions { bindings: bindings.clone(), ..Default::default() };
    let left_rows = cursor::find_rows(store, left_table, left_query, left_indexes, &opts, now)?;
    let right_rows = row::get_all(store, right_table, now)?;
    let right_by_key = index_by_field(&right_rows, right_field);

    let mut out = Vec::new();
    for (_, left_row) in left_rows {
        let key = left_row.get(left_field).map(Value::to_storage_string);
        match key.and_then(|k| right_by_key.get(&k).cloned()) {
            Some(matches) => {
                for right_row in matches {
                    out.push((left_row.clone(), Some(right_row)));
                }
            }
            None => out.push((left_row, None)),
        }
    }
    Ok(out)
}

fn index_by_field(rows: &[(String, Row)], field: &str) -> BTreeMap<String, Vec<Row>> {
    let mut out: BTreeMap<String, Vec<Row>> = BTreeMap::new();
    for (_, r) in rows {
        if let Some(v) = r.get(field) {
            if !v.is_null() {
                out.entry(v.to_storage_string()).or_default().push(r.clone());
            }
        }
    }
    out
}

/// Whether any row in `inner_table` matching `inner_query` has
/// `inner_field == outer_value` (§4.I `exists_in_subquery`).
pub fn exists_in_subquery(
    store: &blueconfig_core::store::Store,
    inner_table: &str,
    inner_query: &Query,
    inner_indexes: &[IndexDef],
    inner_field: &str,
    outer_value: &Value,
    bindings: &Bindings,
    now: &str,
) -> QueryResult<bool> {
    let opts = FindOptions { bindings: bindings.clone(), ..Default::default() };
    let rows = cursor::find_rows(store, inner_table, inner_query, inner_indexes, &opts, now)?;
    let target = outer_value.to_storage_string();
    Ok(rows
        .iter()
        .any(|(_, r)| r.get(inner_field).map(Value::to_storage_string).as_deref() == Some(target.as_str())))
}

/// Every distinct `inner_field` value produced by rows in `inner_table`
/// matching `inner_query` (§4.I `in_subquery` — the set an outer `IN`
/// condition would be checked against).
pub fn in_subquery(
    store: &blueconfig_core::store::Store,
    inner_table: &str,
    inner_query: &Query,
    inner_indexes: &[IndexDef],
    inner_field: &str,
    bindings: &Bindings,
    now: &str,
) -> QueryResult<Vec<Value>> {
    distinct_values(store, inner_table, inner_query, inner_indexes, inner_field, bindings, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blueconfig_core::{metadata, row, store::Store, value::Value as V};
    use std::collections::BTreeMap as Map;
    use tempfile::tempdir;

    fn store() -> Store {
        let dir = tempdir().unwrap();
        Store::open(dir.path().join("db.bc")).unwrap()
    }

    fn obj(pairs: &[(&str, V)]) -> V {
        let mut m = Map::new();
        for (k, v) in pairs {
            m.insert(k.to_string(), v.clone());
        }
        V::Object(m)
    }

    fn all_query() -> Query {
        crate::parser::parse("price > -1").unwrap()
    }

    fn setup_orders(s: &Store) {
        metadata::create_database(s, "db", &Map::new()).unwrap();
        metadata::create_table(s, "db", "orders").unwrap();
        for (id, customer, price) in [("o1", "alice", 10), ("o2", "alice", 20), ("o3", "bob", 30)] {
            row::insert_with_id(s, "db/orders", id, &obj(&[("customer", V::String(customer.to_string())), ("price", V::Int(price))]), "t0").unwrap();
        }
    }

    #[test]
    fn aggregate_computes_sum_avg_min_max() {
        let s = store();
        setup_orders(&s);
        let agg = aggregate(&s, "db/orders", &all_query(), &[], "price", &Bindings::new(), "t0").unwrap();
        assert_eq!(agg.count, 3);
        assert_eq!(agg.sum, 60.0);
        assert_eq!(agg.avg, 20.0);
        assert_eq!(agg.min, Some(10.0));
        assert_eq!(agg.max, Some(30.0));
    }

    #[test]
    fn group_by_aggregates_per_group() {
        let s = store();
        setup_orders(&s);
        let groups = group_by(&s, "db/orders", &all_query(), &[], "customer", "price", &Bindings::new(), "t0").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["alice"].sum, 30.0);
        assert_eq!(groups["bob"].sum, 30.0);
        assert_eq!(groups["alice"].count, 2);
    }

    #[test]
    fn distinct_values_and_count_distinct_agree() {
        let s = store();
        setup_orders(&s);
        let distinct = distinct_values(&s, "db/orders", &all_query(), &[], "customer", &Bindings::new(), "t0").unwrap();
        let count = count_distinct(&s, "db/orders", &all_query(), &[], "customer", &Bindings::new(), "t0").unwrap();
        assert_eq!(distinct.len(), 2);
        assert_eq!(count, 2);
    }

    #[test]
    fn inner_join_pairs_matching_rows_only() {
        let s = store();
        setup_orders(&s);
        metadata::create_table(&s, "db", "customers").unwrap();
        row::insert_with_id(&s, "db/customers", "c1", &obj(&[("name", V::String("alice".to_string())), ("vip", V::Bool(true))]), "t0").unwrap();

        let joined = inner_join(&s, "db/orders", &all_query(), &[], "customer", "db/customers", "name", &Bindings::new(), "t0").unwrap();
        assert_eq!(joined.len(), 2);
        assert!(joined.iter().all(|(order, _)| order.get("customer") == Some(&V::String("alice".to_string()))));
    }

    #[test]
    fn left_join_keeps_unmatched_left_rows() {
        let s = store();
        setup_orders(&s);
        metadata::create_table(&s, "db", "customers").unwrap();
        row::insert_with_id(&s, "db/customers", "c1", &obj(&[("name", V::String("alice".to_string()))]), "t0").unwrap();

        let joined = left_join(&s, "db/orders", &all_query(), &[], "customer", "db/customers", "name", &Bindings::new(), "t0").unwrap();
        assert_eq!(joined.len(), 3);
        let bob_entry = joined.iter().find(|(o, _)| o.get("customer") == Some(&V::String("bob".to_string()))).unwrap();
        assert!(bob_entry.1.is_none());
    }

    #[test]
    fn exists_in_subquery_finds_matching_value() {
        let s = store();
        setup_orders(&s);
        let found = exists_in_subquery(&s, "db/orders", &all_query(), &[], "customer", &V::String("bob".to_string()), &Bindings::new(), "t0").unwrap();
        let missing = exists_in_subquery(&s, "db/orders", &all_query(), &[], "customer", &V::String("carol".to_string()), &Bindings::new(), "t0").unwrap();
        assert!(found);
        assert!(!missing);
    }
}
