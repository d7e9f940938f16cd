//! Executor (§4.H): turns a [`QueryPlan`] into row IDs, then a
//! [`QueryCursor`] over them with deferred field loading. No cursor
//! method holds a page-store transaction across calls — each
//! `load_fields`/`load_full_row` opens its own short read transaction
//! (§5 "cursors do not hold transactions between `next()` calls").

use std::cmp::Ordering;

use blueconfig_core::store::Store;
use blueconfig_core::{index, row, schema, BlueConfigError, Row, Value};
use tracing::instrument;

use crate::ast::{CompareOp, Query};
use crate::compare::compare_values;
use crate::eval::{self, Bindings};
use crate::error::QueryResult;
use crate::planner::{self, QueryPlan, Strategy};

/// A single `ORDER BY`-style key: field name plus direction.
#[derive(Debug, Clone)]
pub struct SortField {
    pub field: String,
    pub ascending: bool,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        SortField { field: field.into(), ascending: true }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        SortField { field: field.into(), ascending: false }
    }
}

/// Options shared by every convenience query operation in §4.H.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Vec<SortField>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
    /// `(page, page_size)`, both 1-indexed; equivalent to `skip((page-1) *
    /// page_size).limit(page_size)`.
    pub page: Option<(usize, usize)>,
    pub bindings: Bindings,
}

/// A lazy iterable over the row IDs a query selected, already filtered,
/// sorted, and skip/limit-bounded — only field loading is deferred.
pub struct QueryCursor<'a> {
    store: &'a Store,
    table_path: String,
    now: String,
    schema: schema::Schema,
    row_ids: Vec<String>,
    position: usize,
    limit: Option<usize>,
}

impl<'a> QueryCursor<'a> {
    pub fn has_next(&self) -> bool {
        let bound = self.limit.map(|l| l.min(self.row_ids.len())).unwrap_or(self.row_ids.len());
        self.position < bound
    }

    /// Advance and return the next row ID, or `None` once the limit (or
    /// the candidate set) is exhausted.
    pub fn next(&mut self) -> Option<String> {
        if !self.has_next() {
            return None;
        }
        let id = self.row_ids[self.position].clone();
        self.position += 1;
        Some(id)
    }

    pub fn current_id(&self) -> Option<&str> {
        if self.position == 0 {
            return None;
        }
        self.row_ids.get(self.position - 1).map(String::as_str)
    }

    /// Fetch only `fields` for the row `next()` most recently returned.
    pub fn load_fields(&self, fields: &[String]) -> QueryResult<Row> {
        let id = self.current_id().ok_or_else(|| {
            crate::error::QueryError::validation("load_fields called before next()")
        })?;
        let row_path = format!("{}/{id}", self.table_path);
        let mut out = Row::new();
        for field in fields {
            if let Some(raw) = blueconfig_core::tree::get_value(self.store, &row_path, field)? {
                out.insert(field.clone(), Value::from_storage_string(&raw, schema::field_type(&self.schema, field)));
            }
        }
        Ok(out)
    }

    /// Fetch every field of the row `next()` most recently returned.
    pub fn load_full_row(&self) -> QueryResult<Row> {
        let id = self.current_id().ok_or_else(|| {
            crate::error::QueryError::validation("load_full_row called before next()")
        })?;
        Ok(row::get(self.store, &self.table_path, id, &self.now)?)
    }

    pub fn remaining_ids(&self) -> &[String] {
        let bound = self.limit.map(|l| l.min(self.row_ids.len())).unwrap_or(self.row_ids.len());
        &self.row_ids[self.position.min(bound)..bound]
    }

    pub fn total_candidates(&self) -> usize {
        self.row_ids.len()
    }
}

/// Build a cursor over every row `table_path` owns matching `query`,
/// planned against `indexes`.
#[instrument(skip(store, query, opts), fields(table = %table_path))]
pub fn find_rows_cursor<'a>(
    store: &'a Store,
    table_path: &str,
    query: &Query,
    indexes: &[index::IndexDef],
    opts: &FindOptions,
    now: &str,
) -> QueryResult<QueryCursor<'a>> {
    let plan = planner::plan(query, indexes);
    let schema = schema::load_schema(store, table_path, now)?;
    let mut candidates = candidate_ids(store, table_path, &plan, &opts.bindings, now)?;

    if !plan.predicate_residue.conditions.is_empty() || !plan.predicate_residue.sub_queries.is_empty() {
        let mut filtered = Vec::with_capacity(candidates.len());
        for id in candidates {
            let r = row::get(store, table_path, &id, now)?;
            if eval::matches(&plan.predicate_residue, &r, &opts.bindings)? {
                filtered.push(id);
            }
        }
        candidates = filtered;
    }

    if !opts.sort.is_empty() {
        sort_candidates(store, table_path, &schema, &mut candidates, &opts.sort)?;
    }

    let (skip, limit) = resolve_window(opts);
    if skip > 0 {
        candidates = candidates.into_iter().skip(skip).collect();
    }

    Ok(QueryCursor {
        store,
        table_path: table_path.to_string(),
        now: now.to_string(),
        schema,
        row_ids: candidates,
        position: 0,
        limit,
    })
}

fn resolve_window(opts: &FindOptions) -> (usize, Option<usize>) {
    if let Some((page, page_size)) = opts.page {
        let page = page.max(1);
        ((page - 1) * page_size, Some(page_size))
    } else {
        (opts.skip.unwrap_or(0), opts.limit)
    }
}

fn candidate_ids(
    store: &Store,
    table_path: &str,
    plan: &QueryPlan,
    bindings: &Bindings,
    now: &str,
) -> QueryResult<Vec<String>> {
    match plan.strategy {
        Strategy::FullScan => {
            let mut ids = Vec::new();
            let mut eval_err = None;
            row::scan_rows(store, table_path, now, |id, r| {
                match eval::matches(&plan.predicate_residue, r, bindings) {
                    Ok(true) => ids.push(id.to_string()),
                    Ok(false) => {}
                    Err(e) => {
                        eval_err = Some(e);
                        return Err(BlueConfigError::storage("predicate evaluation failed"));
                    }
                }
                Ok(())
            })?;
            if let Some(e) = eval_err {
                return Err(e);
            }
            Ok(ids)
        }
        Strategy::IndexScan => {
            let idx = plan.index.as_ref().expect("IndexScan always carries an index");
            let empty = Row::new();
            let mut synthetic = Row::new();
            for (field, cond) in idx.fields.iter().zip(&plan.equality_conditions) {
                let term = cond.right.as_ref().expect("equality condition always has a right side");
                let value = eval::eval_value(term, &empty, bindings)?;
                synthetic.insert(field.clone(), value);
            }
            match index::build_key(&idx.fields, &synthetic) {
                Some(key) => Ok(index::lookup(store, table_path, &idx.name, &key)?),
                None => Ok(Vec::new()),
            }
        }
        Strategy::RangeIndexScan => range_scan_ids(store, table_path, plan, bindings, now),
    }
}

fn range_scan_ids(
    store: &Store,
    table_path: &str,
    plan: &QueryPlan,
    bindings: &Bindings,
    now: &str,
) -> QueryResult<Vec<String>> {
    let idx = plan.index.as_ref().expect("RangeIndexScan always carries an index");
    let cond = plan.range_condition.as_ref().expect("RangeIndexScan always carries a range condition");
    let field = &idx.fields[0];
    let schema = schema::load_schema(store, table_path, now)?;
    let field_type = schema::field_type(&schema, field);
    let empty = Row::new();

    let bound = |t: &crate::ast::Term| eval::eval_value(t, &empty, bindings);
    let (lo, lo_inclusive, hi, hi_inclusive) = match cond.op {
        CompareOp::Gt => (Some(bound(cond.right.as_ref().expect("validated"))?), false, None, true),
        CompareOp::Gte => (Some(bound(cond.right.as_ref().expect("validated"))?), true, None, true),
        CompareOp::Lt => (None, true, Some(bound(cond.right.as_ref().expect("validated"))?), false),
        CompareOp::Lte => (None, true, Some(bound(cond.right.as_ref().expect("validated"))?), true),
        CompareOp::Between => (
            Some(bound(cond.start.as_ref().expect("validated"))?),
            true,
            Some(bound(cond.end.as_ref().expect("validated"))?),
            true,
        ),
        _ => (None, true, None, true),
    };

    let mut out = Vec::new();
    for (key, ids) in index::scan_entries(store, table_path, &idx.name)? {
        let Some(raw) = index::decode_single_field_key(&key) else { continue };
        let value = Value::from_storage_string(&raw, field_type);
        if let Some(lo) = &lo {
            let ord = compare_values(&value, lo, field_type, field_type);
            if ord.is_lt() || (ord == Ordering::Equal && !lo_inclusive) {
                continue;
            }
        }
        if let Some(hi) = &hi {
            let ord = compare_values(&value, hi, field_type, field_type);
            if ord.is_gt() || (ord == Ordering::Equal && !hi_inclusive) {
                continue;
            }
        }
        out.extend(ids);
    }
    Ok(out)
}

/// Pre-materialize `sort` fields for every candidate, then stable-sort by
/// the multi-key comparator (§4.H). Ties fall through to the next sort
/// key; the sort is total once every key is exhausted.
fn sort_candidates(
    store: &Store,
    table_path: &str,
    schema: &schema::Schema,
    ids: &mut [String],
    sort: &[SortField],
) -> QueryResult<()> {
    let mut keyed: Vec<(String, Vec<Value>)> = Vec::with_capacity(ids.len());
    for id in ids.iter() {
        let row_path = format!("{table_path}/{id}");
        let mut keys = Vec::with_capacity(sort.len());
        for s in sort {
            let raw = blueconfig_core::tree::get_value(store, &row_path, &s.field)?;
            let value = raw
                .map(|r| Value::from_storage_string(&r, schema::field_type(schema, &s.field)))
                .unwrap_or(Value::Null);
            keys.push(value);
        }
        keyed.push((id.clone(), keys));
    }

    keyed.sort_by(|a, b| {
        for (i, s) in sort.iter().enumerate() {
            let field_type = schema::field_type(schema, &s.field);
            let ord = compare_values(&a.1[i], &b.1[i], field_type, field_type);
            let ord = if s.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });

    for (slot, (id, _)) in ids.iter_mut().zip(keyed) {
        *slot = id;
    }
    Ok(())
}

/// Materialize every row matching `query`.
pub fn find_rows(
    store: &Store,
    table_path: &str,
    query: &Query,
    indexes: &[index::IndexDef],
    opts: &FindOptions,
    now: &str,
) -> QueryResult<Vec<(String, Row)>> {
    let mut cursor = find_rows_cursor(store, table_path, query, indexes, opts, now)?;
    let mut out = Vec::new();
    while let Some(id) = cursor.next() {
        let r = cursor.load_full_row()?;
        out.push((id, r));
    }
    Ok(out)
}

pub fn count_where(
    store: &Store,
    table_path: &str,
    query: &Query,
    indexes: &[index::IndexDef],
    bindings: &Bindings,
    now: &str,
) -> QueryResult<usize> {
    let opts = FindOptions { bindings: bindings.clone(), ..Default::default() };
    let cursor = find_rows_cursor(store, table_path, query, indexes, &opts, now)?;
    Ok(cursor.total_candidates())
}

pub fn exists_where(
    store: &Store,
    table_path: &str,
    query: &Query,
    indexes: &[index::IndexDef],
    bindings: &Bindings,
    now: &str,
) -> QueryResult<bool> {
    let opts = FindOptions {
        bindings: bindings.clone(),
        limit: Some(1),
        ..Default::default()
    };
    let cursor = find_rows_cursor(store, table_path, query, indexes, &opts, now)?;
    Ok(cursor.total_candidates() > 0)
}

pub fn first_row(
    store: &Store,
    table_path: &str,
    query: &Query,
    indexes: &[index::IndexDef],
    opts: &FindOptions,
    now: &str,
) -> QueryResult<Option<(String, Row)>> {
    let mut opts = opts.clone();
    opts.limit = Some(1);
    let mut cursor = find_rows_cursor(store, table_path, query, indexes, &opts, now)?;
    match cursor.next() {
        Some(id) => Ok(Some((id.clone(), cursor.load_full_row()?))),
        None => Ok(None),
    }
}

/// Apply `fields` to every row matching `query`; returns the number of
/// rows touched. Each row's write and index maintenance still goes
/// through [`row::update_fields`], so this is not itself atomic across
/// rows — callers needing that should stage the same writes through
/// [`blueconfig_core::txn`] instead (§4.J).
pub fn update_rows_where(
    store: &Store,
    table_path: &str,
    query: &Query,
    indexes: &[index::IndexDef],
    fields: &Row,
    bindings: &Bindings,
    now: &str,
) -> QueryResult<usize> {
    let opts = FindOptions { bindings: bindings.clone(), ..Default::default() };
    let cursor = find_rows_cursor(store, table_path, query, indexes, &opts, now)?;
    let ids: Vec<String> = cursor.row_ids.clone();
    for id in &ids {
        row::update_fields(store, table_path, id, fields, now)?;
    }
    Ok(ids.len())
}

pub fn delete_rows_where(
    store: &Store,
    table_path: &str,
    query: &Query,
    indexes: &[index::IndexDef],
    bindings: &Bindings,
    now: &str,
) -> QueryResult<usize> {
    let opts = FindOptions { bindings: bindings.clone(), ..Default::default() };
    let cursor = find_rows_cursor(store, table_path, query, indexes, &opts, now)?;
    let ids: Vec<String> = cursor.row_ids.clone();
    for id in &ids {
        row::delete(store, table_path, id, now)?;
    }
    Ok(ids.len())
}

/// Thin wrapper over a single-field index's raw range lookup (§4.H
/// "Range helpers"), with inclusive bounds on both ends.
pub fn find_rows_range(
    store: &Store,
    table_path: &str,
    index_name: &str,
    start: &Value,
    end: &Value,
) -> QueryResult<Vec<String>> {
    bounded_range(store, table_path, index_name, Some(start), true, Some(end), true)
}

pub fn find_rows_between(
    store: &Store,
    table_path: &str,
    index_name: &str,
    start: &Value,
    end: &Value,
) -> QueryResult<Vec<String>> {
    find_rows_range(store, table_path, index_name, start, end)
}

pub fn find_rows_greater_than(
    store: &Store,
    table_path: &str,
    index_name: &str,
    bound: &Value,
) -> QueryResult<Vec<String>> {
    bounded_range(store, table_path, index_name, Some(bound), false, None, true)
}

pub fn find_rows_less_than_or_equal(
    store: &Store,
    table_path: &str,
    index_name: &str,
    bound: &Value,
) -> QueryResult<Vec<String>> {
    bounded_range(store, table_path, index_name, None, true, Some(bound), true)
}

fn bounded_range(
    store: &Store,
    table_path: &str,
    index_name: &str,
    lo: Option<&Value>,
    lo_inclusive: bool,
    hi: Option<&Value>,
    hi_inclusive: bool,
) -> QueryResult<Vec<String>> {
    let field_type = lo.map(Value::value_type).or_else(|| hi.map(Value::value_type));
    let mut out = Vec::new();
    for (key, ids) in index::scan_entries(store, table_path, index_name)? {
        let Some(raw) = index::decode_single_field_key(&key) else { continue };
        let value = Value::from_storage_string(&raw, field_type);
        if let Some(lo) = lo {
            let ord = compare_values(&value, lo, field_type, field_type);
            if ord.is_lt() || (ord == Ordering::Equal && !lo_inclusive) {
                continue;
            }
        }
        if let Some(hi) = hi {
            let ord = compare_values(&value, hi, field_type, field_type);
            if ord.is_gt() || (ord == Ordering::Equal && !hi_inclusive) {
                continue;
            }
        }
        out.extend(ids);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blueconfig_core::{index as idx_mod, metadata, value::Value as V};
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

    fn setup_users(s: &Store) {
        metadata::create_database(s, "db", &Map::new()).unwrap();
        metadata::create_table(s, "db", "users").unwrap();
        for (id, city, age) in [("u1", "NYC", 30), ("u2", "LA", 25), ("u3", "NYC", 40), ("u4", "SF", 22), ("u5", "LA", 35)] {
            row::insert_with_id(s, "db/users", id, &obj(&[("city", V::String(city.to_string())), ("age", V::Int(age))]), "t0").unwrap();
        }
    }

    #[test]
    fn full_scan_finds_matching_rows() {
        let s = store();
        setup_users(&s);
        let q = crate::parser::parse("city == 'NYC'").unwrap();
        let rows = find_rows(&s, "db/users", &q, &[], &FindOptions::default(), "t0").unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn index_scan_matches_full_scan_result() {
        let s = store();
        setup_users(&s);
        idx_mod::create_index(&s, "db/users", "idx_city", vec!["city".to_string()], false, "t0").unwrap();
        let indexes = idx_mod::list_indexes(&s, "db/users").unwrap();
        let q = crate::parser::parse("city == 'NYC'").unwrap();

        let via_index = find_rows(&s, "db/users", &q, &indexes, &FindOptions::default(), "t0").unwrap();
        let via_scan = find_rows(&s, "db/users", &q, &[], &FindOptions::default(), "t0").unwrap();
        let mut ids_a: Vec<_> = via_index.iter().map(|(id, _)| id.clone()).collect();
        let mut ids_b: Vec<_> = via_scan.iter().map(|(id, _)| id.clone()).collect();
        ids_a.sort();
        ids_b.sort();
        assert_eq!(ids_a, ids_b);
        assert_eq!(ids_a.len(), 2);
    }

    #[test]
    fn range_scan_selects_numeric_bounds() {
        let s = store();
        setup_users(&s);
        idx_mod::create_index(&s, "db/users", "idx_age", vec!["age".to_string()], false, "t0").unwrap();
        let indexes = idx_mod::list_indexes(&s, "db/users").unwrap();
        let q = crate::parser::parse("age >= 25 && age <= 35").unwrap();
        let rows = find_rows(&s, "db/users", &q, &indexes, &FindOptions::default(), "t0").unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn sort_orders_numerically_by_declared_type() {
        let s = store();
        setup_users(&s);
        let q = crate::parser::parse("age > 0").unwrap();
        let opts = FindOptions { sort: vec![SortField::asc("age")], ..Default::default() };
        let rows = find_rows(&s, "db/users", &q, &[], &opts, "t0").unwrap();
        let ages: Vec<i64> = rows
            .iter()
            .map(|(_, r)| match r.get("age") {
                Some(V::Int(n)) => *n,
                _ => panic!("expected int age"),
            })
            .collect();
        let mut sorted = ages.clone();
        sorted.sort();
        assert_eq!(ages, sorted);
    }

    #[test]
    fn limit_and_skip_bound_the_cursor() {
        let s = store();
        setup_users(&s);
        let q = crate::parser::parse("age > 0").unwrap();
        let opts = FindOptions { sort: vec![SortField::asc("age")], skip: Some(1), limit: Some(2), ..Default::default() };
        let rows = find_rows(&s, "db/users", &q, &[], &opts, "t0").unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn delete_rows_where_removes_matches_and_reports_count() {
        let s = store();
        setup_users(&s);
        let q = crate::parser::parse("city == 'LA'").unwrap();
        let count = delete_rows_where(&s, "db/users", &q, &[], &Bindings::new(), "t0").unwrap();
        assert_eq!(count, 2);
        assert_eq!(metadata::row_count(&s, "db/users").unwrap(), 3);
    }

    #[test]
    fn find_rows_range_matches_inclusive_numeric_bounds() {
        let s = store();
        metadata::create_database(&s, "db", &Map::new()).unwrap();
        metadata::create_table(&s, "db", "products").unwrap();
        for (id, price) in [("p1", 10), ("p2", 20), ("p3", 30), ("p4", 40)] {
            row::insert_with_id(&s, "db/products", id, &obj(&[("price", V::Int(price))]), "t0").unwrap();
        }
        idx_mod::create_index(&s, "db/products", "idx_price", vec!["price".to_string()], false, "t0").unwrap();
        let ids = find_rows_range(&s, "db/products", "idx_price", &V::Int(15), &V::Int(35)).unwrap();
        assert_eq!(ids.len(), 2);
    }
}
