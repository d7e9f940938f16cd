//! Row layer (§4.E): insert/update/delete/upsert and the bulk variants,
//! wired through the schema engine ([`crate::schema`]) and index engine
//! ([`crate::index`]) so every row write keeps both consistent.

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::{BlueConfigError, BlueConfigResult};
use crate::id;
use crate::index::{self, IndexDef};
use crate::metadata;
use crate::path;
use crate::schema::{self, Schema};
use crate::store::Store;
use crate::tree;
use crate::value::{flatten, Row, Value};

const PROP_LAST_UPDATED: &str = "__lastupdated";

fn row_to_props(row: &Row) -> BTreeMap<String, String> {
    row.iter().map(|(k, v)| (k.clone(), v.to_storage_string())).collect()
}

fn props_to_row(props: &BTreeMap<String, String>, schema: &Schema) -> Row {
    props
        .iter()
        .filter(|(k, _)| !path::is_reserved(k))
        .map(|(k, v)| (k.clone(), Value::from_storage_string(v, schema::field_type(schema, k))))
        .collect()
}

/// Insert a new row, generating its ID. See [`insert_with_id`] for the
/// caller-supplied-ID variant.
pub fn insert(store: &Store, table_path: &str, value: &Value, now: &str) -> BlueConfigResult<String> {
    let row_id = id::generate();
    insert_with_id(store, table_path, &row_id, value, now)?;
    Ok(row_id)
}

/// Insert a new row under a caller-chosen ID. Fails if that ID is
/// already in use within the table.
pub fn insert_with_id(
    store: &Store,
    table_path: &str,
    row_id: &str,
    value: &Value,
    now: &str,
) -> BlueConfigResult<()> {
    let row = flatten(value);
    let row_path = format!("{table_path}/{row_id}");
    if row_exists(store, table_path, row_id)? {
        return Err(BlueConfigError::PathExists { path: row_path });
    }

    let mut schema = schema::load_schema(store, table_path, now)?;
    schema::merge(&mut schema, &row, now);
    schema::validate(&row, &schema)?;

    let mut props = row_to_props(&row);
    props.insert(PROP_LAST_UPDATED.to_string(), now.to_string());
    tree::create_node_with_props(store, &row_path, &props)?;
    schema::save_schema(store, table_path, &schema)?;
    metadata::bump_counter(store, table_path, metadata::PROP_ROW_COUNT, 1)?;

    let indexes = index::list_indexes(store, table_path)?;
    if let Err(e) = add_to_all_indexes(store, table_path, &indexes, row_id, &row) {
        warn!("index maintenance failed on insert, rolling back row {row_id}: {e}");
        let _ = tree::delete_node(store, &row_path, true);
        let _ = metadata::bump_counter(store, table_path, metadata::PROP_ROW_COUNT, -1);
        return Err(e);
    }
    Ok(())
}

fn row_exists(store: &Store, table_path: &str, row_id: &str) -> BlueConfigResult<bool> {
    let children = tree::get_children(store, table_path)?;
    Ok(children.iter().any(|c| c == row_id))
}

fn add_to_all_indexes(
    store: &Store,
    table_path: &str,
    indexes: &[IndexDef],
    row_id: &str,
    row: &Row,
) -> BlueConfigResult<()> {
    let mut added = Vec::new();
    for idx in indexes {
        match index::add(store, table_path, idx, row_id, row) {
            Ok(()) => added.push(idx),
            Err(e) => {
                for done in &added {
                    let _ = index::remove(store, table_path, done, row_id, row);
                }
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Fetch a row's flattened fields, typed against the table's current
/// schema.
pub fn get(store: &Store, table_path: &str, row_id: &str, now: &str) -> BlueConfigResult<Row> {
    let row_path = format!("{table_path}/{row_id}");
    let props = tree::get_all_props_with_values(store, &row_path)?;
    let schema = schema::load_schema(store, table_path, now)?;
    Ok(props_to_row(&props, &schema))
}

/// Full-row update: overwrite every field in `value`; fields not present
/// in `value` are left untouched (BlueConfig's property-bag storage has
/// no concept of "clearing unlisted fields" — see DESIGN.md).
pub fn update(store: &Store, table_path: &str, row_id: &str, value: &Value, now: &str) -> BlueConfigResult<()> {
    apply_update(store, table_path, row_id, &flatten(value), now)
}

/// Partial update: identical to [`update`] in this storage model, kept
/// as a distinct entry point for callers that conceptually want a
/// "patch" rather than a "replace".
pub fn update_fields(
    store: &Store,
    table_path: &str,
    row_id: &str,
    fields: &Row,
    now: &str,
) -> BlueConfigResult<()> {
    apply_update(store, table_path, row_id, fields, now)
}

fn apply_update(store: &Store, table_path: &str, row_id: &str, fields: &Row, now: &str) -> BlueConfigResult<()> {
    let old_row = get(store, table_path, row_id, now).map_err(|e| match e {
        BlueConfigError::PathNotFound { .. } => BlueConfigError::PathNotFound {
            path: format!("{table_path}/{row_id}"),
        },
        other => other,
    })?;

    let mut schema = schema::load_schema(store, table_path, now)?;
    schema::merge(&mut schema, fields, now);
    schema::validate(fields, &schema)?;

    let row_path = format!("{table_path}/{row_id}");
    let mut props = row_to_props(fields);
    props.insert(PROP_LAST_UPDATED.to_string(), now.to_string());
    tree::set_values(store, &row_path, &props)?;
    schema::save_schema(store, table_path, &schema)?;

    let new_row = get(store, table_path, row_id, now)?;
    let indexes = index::list_indexes(store, table_path)?;
    for idx in &indexes {
        index::update(store, table_path, idx, row_id, &old_row, &new_row)?;
    }
    Ok(())
}

/// Delete a row: remove it from every index first, then delete its
/// bucket, then decrement the row counter.
pub fn delete(store: &Store, table_path: &str, row_id: &str, now: &str) -> BlueConfigResult<()> {
    let row = get(store, table_path, row_id, now)?;
    let indexes = index::list_indexes(store, table_path)?;
    for idx in &indexes {
        index::remove(store, table_path, idx, row_id, &row)?;
    }
    let row_path = format!("{table_path}/{row_id}");
    tree::delete_node(store, &row_path, true)?;
    metadata::bump_counter(store, table_path, metadata::PROP_ROW_COUNT, -1)
}

/// Insert if `row_id` is new, otherwise update. Returns whether an
/// insert occurred.
pub fn upsert(store: &Store, table_path: &str, row_id: &str, value: &Value, now: &str) -> BlueConfigResult<bool> {
    if row_exists(store, table_path, row_id)? {
        update(store, table_path, row_id, value, now)?;
        Ok(false)
    } else {
        insert_with_id(store, table_path, row_id, value, now)?;
        Ok(true)
    }
}

/// Stream every row through `cb(row_id, row)` in unspecified order,
/// short-circuiting on the first error `cb` returns.
pub fn scan_rows<F>(store: &Store, table_path: &str, now: &str, mut cb: F) -> BlueConfigResult<()>
where
    F: FnMut(&str, &Row) -> BlueConfigResult<()>,
{
    let schema = schema::load_schema(store, table_path, now)?;
    tree::scan_nodes(store, table_path, |row_id, props| {
        let row = props_to_row(props, &schema);
        cb(row_id, &row)
    })
}

/// Materialize every row in the table.
pub fn get_all(store: &Store, table_path: &str, now: &str) -> BlueConfigResult<Vec<(String, Row)>> {
    let mut out = Vec::new();
    scan_rows(store, table_path, now, |row_id, row| {
        out.push((row_id.to_string(), row.clone()));
        Ok(())
    })?;
    Ok(out)
}

/// Bulk insert: applies every value or none. On any failure, rows
/// inserted earlier in the batch are rolled back in reverse order.
pub fn bulk_insert(store: &Store, table_path: &str, values: &[Value], now: &str) -> BlueConfigResult<Vec<String>> {
    let mut inserted = Vec::new();
    for value in values {
        match insert(store, table_path, value, now) {
            Ok(id) => inserted.push(id),
            Err(e) => {
                for id in inserted.iter().rev() {
                    let _ = delete(store, table_path, id, now);
                }
                return Err(e);
            }
        }
    }
    Ok(inserted)
}

/// Bulk update: applies every `(row_id, fields)` pair or none, rolling
/// back prior updates in the batch by restoring their pre-update rows.
pub fn bulk_update(
    store: &Store,
    table_path: &str,
    updates: &[(String, Row)],
    now: &str,
) -> BlueConfigResult<()> {
    let mut applied: Vec<(String, Row)> = Vec::new();
    for (row_id, fields) in updates {
        let before = get(store, table_path, row_id, now);
        match update_fields(store, table_path, row_id, fields, now) {
            Ok(()) => {
                if let Ok(prior) = before {
                    applied.push((row_id.clone(), prior));
                }
            }
            Err(e) => {
                for (id, prior) in applied.iter().rev() {
                    let _ = apply_update(store, table_path, id, prior, now);
                }
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Bulk delete: all-or-nothing via a reinsert-on-failure compensation.
pub fn bulk_delete(store: &Store, table_path: &str, row_ids: &[String], now: &str) -> BlueConfigResult<()> {
    let mut removed: Vec<(String, Row)> = Vec::new();
    for row_id in row_ids {
        let row = get(store, table_path, row_id, now)?;
        match delete(store, table_path, row_id, now) {
            Ok(()) => removed.push((row_id.clone(), row)),
            Err(e) => {
                for (id, row) in removed.iter().rev() {
                    let _ = insert_with_id(store, table_path, id, &crate::value::unflatten(row), now);
                }
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Bulk upsert: applies every value or none, via the same compensation
/// strategy as [`bulk_insert`]/[`bulk_update`].
pub fn bulk_upsert(
    store: &Store,
    table_path: &str,
    entries: &[(String, Value)],
    now: &str,
) -> BlueConfigResult<Vec<bool>> {
    let mut results = Vec::new();
    let mut applied: Vec<(String, Option<Row>)> = Vec::new();
    for (row_id, value) in entries {
        let prior = get(store, table_path, row_id, now).ok();
        match upsert(store, table_path, row_id, value, now) {
            Ok(inserted) => {
                results.push(inserted);
                applied.push((row_id.clone(), prior));
            }
            Err(e) => {
                for (id, prior) in applied.iter().rev() {
                    match prior {
                        Some(row) => {
                            let _ = apply_update(store, table_path, id, row, now);
                        }
                        None => {
                            let _ = delete(store, table_path, id, now);
                        }
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(results)
}

/// Read-modify-write increment of a numeric field. Last-writer-wins —
/// concurrent callers race on the read, but the write itself is
/// serialized by the substrate's single-writer lock (§4.I).
pub fn increment_field(store: &Store, table_path: &str, row_id: &str, field: &str, by: f64, now: &str) -> BlueConfigResult<f64> {
    let mut row = get(store, table_path, row_id, now)?;
    let current = row.get(field).and_then(Value::as_f64).unwrap_or(0.0);
    let next = current + by;
    let next_value = if next.fract() == 0.0 && current.fract() == 0.0 && by.fract() == 0.0 {
        Value::Int(next as i64)
    } else {
        Value::Float(next)
    };
    row.insert(field.to_string(), next_value.clone());
    update_fields(store, table_path, row_id, &row, now)?;
    Ok(next)
}

pub fn decrement_field(store: &Store, table_path: &str, row_id: &str, field: &str, by: f64, now: &str) -> BlueConfigResult<f64> {
    increment_field(store, table_path, row_id, field, -by, now)
}

/// Set a field only if it is currently absent or null.
pub fn set_field_if_not_exists(
    store: &Store,
    table_path: &str,
    row_id: &str,
    field: &str,
    value: Value,
    now: &str,
) -> BlueConfigResult<bool> {
    let row = get(store, table_path, row_id, now)?;
    if row.get(field).map(|v| !v.is_null()).unwrap_or(false) {
        return Ok(false);
    }
    let mut patch = Row::new();
    patch.insert(field.to_string(), value);
    update_fields(store, table_path, row_id, &patch, now)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;
    use tempfile::tempdir;

    fn store() -> Store {
        let dir = tempdir().unwrap();
        Store::open(dir.path().join("db.bc")).unwrap()
    }

    fn obj(pairs: &[(&str, Value)]) -> Value {
        let mut m = Map::new();
        for (k, v) in pairs {
            m.insert(k.to_string(), v.clone());
        }
        Value::Object(m)
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let s = store();
        metadata::create_database(&s, "db", &Map::new()).unwrap();
        metadata::create_table(&s, "db", "users").unwrap();
        let id = insert(&s, "db/users", &obj(&[("name", Value::String("a".into())), ("age", Value::Int(1))]), "t0").unwrap();
        let row = get(&s, "db/users", &id, "t0").unwrap();
        assert_eq!(row.get("name"), Some(&Value::String("a".into())));
        assert_eq!(metadata::row_count(&s, "db/users").unwrap(), 1);
    }

    #[test]
    fn insert_with_id_rejects_duplicate() {
        let s = store();
        metadata::create_database(&s, "db", &Map::new()).unwrap();
        metadata::create_table(&s, "db", "users").unwrap();
        insert_with_id(&s, "db/users", "r1", &obj(&[("x", Value::Int(1))]), "t0").unwrap();
        let err = insert_with_id(&s, "db/users", "r1", &obj(&[("x", Value::Int(2))]), "t0").unwrap_err();
        assert!(matches!(err, BlueConfigError::PathExists { .. }));
    }

    #[test]
    fn update_leaves_unspecified_fields_intact() {
        let s = store();
        metadata::create_database(&s, "db", &Map::new()).unwrap();
        metadata::create_table(&s, "db", "users").unwrap();
        let id = insert(&s, "db/users", &obj(&[("name", Value::String("a".into())), ("age", Value::Int(1))]), "t0").unwrap();
        let mut patch = Row::new();
        patch.insert("age".to_string(), Value::Int(2));
        update_fields(&s, "db/users", &id, &patch, "t1").unwrap();
        let row = get(&s, "db/users", &id, "t1").unwrap();
        assert_eq!(row.get("name"), Some(&Value::String("a".into())));
        assert_eq!(row.get("age"), Some(&Value::Int(2)));
    }

    #[test]
    fn delete_decrements_row_count() {
        let s = store();
        metadata::create_database(&s, "db", &Map::new()).unwrap();
        metadata::create_table(&s, "db", "users").unwrap();
        let id = insert(&s, "db/users", &obj(&[("x", Value::Int(1))]), "t0").unwrap();
        delete(&s, "db/users", &id, "t0").unwrap();
        assert_eq!(metadata::row_count(&s, "db/users").unwrap(), 0);
        assert!(get(&s, "db/users", &id, "t0").is_err());
    }

    #[test]
    fn upsert_inserts_then_updates() {
        let s = store();
        metadata::create_database(&s, "db", &Map::new()).unwrap();
        metadata::create_table(&s, "db", "users").unwrap();
        let inserted = upsert(&s, "db/users", "r1", &obj(&[("x", Value::Int(1))]), "t0").unwrap();
        assert!(inserted);
        let inserted_again = upsert(&s, "db/users", "r1", &obj(&[("x", Value::Int(2))]), "t1").unwrap();
        assert!(!inserted_again);
        assert_eq!(get(&s, "db/users", "r1", "t1").unwrap().get("x"), Some(&Value::Int(2)));
    }

    #[test]
    fn insert_rolls_back_on_unique_index_violation() {
        let s = store();
        metadata::create_database(&s, "db", &Map::new()).unwrap();
        metadata::create_table(&s, "db", "users").unwrap();
        insert_with_id(&s, "db/users", "r1", &obj(&[("email", Value::String("a@x.com".into()))]), "t0").unwrap();
        index::create_index(&s, "db/users", "by_email", vec!["email".to_string()], true, "t0").unwrap();

        let before = metadata::row_count(&s, "db/users").unwrap();
        let err = insert_with_id(&s, "db/users", "r2", &obj(&[("email", Value::String("a@x.com".into()))]), "t1");
        assert!(err.is_err());
        assert_eq!(metadata::row_count(&s, "db/users").unwrap(), before);
        assert!(get(&s, "db/users", "r2", "t1").is_err());
    }

    #[test]
    fn bulk_insert_is_all_or_nothing() {
        let s = store();
        metadata::create_database(&s, "db", &Map::new()).unwrap();
        metadata::create_table(&s, "db", "users").unwrap();
        insert_with_id(&s, "db/users", "dup", &obj(&[("email", Value::String("a@x.com".into()))]), "t0").unwrap();
        index::create_index(&s, "db/users", "by_email", vec!["email".to_string()], true, "t0").unwrap();

        let values = vec![
            obj(&[("email", Value::String("b@x.com".into()))]),
            obj(&[("email", Value::String("a@x.com".into()))]),
        ];
        let before = metadata::row_count(&s, "db/users").unwrap();
        let result = bulk_insert(&s, "db/users", &values, "t1");
        assert!(result.is_err());
        assert_eq!(metadata::row_count(&s, "db/users").unwrap(), before);
    }
}
