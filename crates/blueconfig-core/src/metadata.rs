//! Database/table metadata layer (§4.C): `__type`-tagged buckets and the
//! counters that track table/row counts. Built on [`crate::tree`] rather
//! than the substrate directly, so every operation here inherits the
//! tree engine's all-or-nothing transaction semantics.

use std::collections::BTreeMap;

use crate::error::{BlueConfigError, BlueConfigResult};
use crate::path;
use crate::store::Store;
use crate::tree;

pub const TYPE_DATABASE: &str = "database";
pub const TYPE_TABLE: &str = "table";

const PROP_TYPE: &str = "__type";
const PROP_NAME: &str = "__name";
const PROP_TABLE_COUNT: &str = "__table_count";
pub const PROP_ROW_COUNT: &str = "__row_count";
const PROP_HAS_SCHEMA: &str = "__has_schema";

/// Create a database bucket at `path`, tagging it `__type=database` and
/// seeding its table counter. Entries of `metadata` whose key is
/// `__`-prefixed are rejected rather than silently dropped (§9 decision).
pub fn create_database(
    store: &Store,
    path: &str,
    metadata: &BTreeMap<String, String>,
) -> BlueConfigResult<()> {
    reject_reserved_keys(metadata)?;
    let mut props = metadata.clone();
    props.insert(PROP_TYPE.to_string(), TYPE_DATABASE.to_string());
    props.insert(PROP_TABLE_COUNT.to_string(), "0".to_string());
    tree::create_node_with_props(store, path, &props)
}

/// Create a table named `name` under database `db`. Requires `db` to
/// already be a database bucket; bumps its table counter.
pub fn create_table(store: &Store, db: &str, name: &str) -> BlueConfigResult<()> {
    require_type(store, db, TYPE_DATABASE)?;
    let table_path = format!("{db}/{name}");
    let mut props = BTreeMap::new();
    props.insert(PROP_TYPE.to_string(), TYPE_TABLE.to_string());
    props.insert(PROP_NAME.to_string(), name.to_string());
    props.insert(PROP_ROW_COUNT.to_string(), "0".to_string());
    props.insert(PROP_HAS_SCHEMA.to_string(), "false".to_string());
    tree::create_node_with_props(store, &table_path, &props)?;
    bump_counter(store, db, PROP_TABLE_COUNT, 1)
}

/// Delete a database. Refuses when it still owns tables unless `force`.
pub fn delete_database(store: &Store, path: &str, force: bool) -> BlueConfigResult<()> {
    require_type(store, path, TYPE_DATABASE)?;
    if !force {
        let children = tree::get_children(store, path)?;
        if children.iter().any(|c| !path::is_reserved(c)) {
            return Err(BlueConfigError::NonEmpty { path: path.to_string() });
        }
    }
    tree::delete_node(store, path, true)
}

/// Delete a table. "Non-empty" means it owns at least one row (a
/// non-reserved child) — metadata buckets like `__schema`/`__indexes`
/// don't themselves count, so a schema-only table is still "empty".
pub fn delete_table(store: &Store, path: &str, force: bool) -> BlueConfigResult<()> {
    require_type(store, path, TYPE_TABLE)?;
    if !force {
        let row_count = row_count(store, path)?;
        if row_count > 0 {
            return Err(BlueConfigError::NonEmpty { path: path.to_string() });
        }
    }
    let (db_path, _) = path
        .rsplit_once('/')
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .unwrap_or_else(|| ("".to_string(), path.to_string()));
    tree::delete_node(store, path, true)?;
    if !db_path.is_empty() {
        let _ = bump_counter(store, &db_path, PROP_TABLE_COUNT, -1);
    }
    Ok(())
}

/// Rename a table. A known partial operation (§9): only the `__name`
/// property and this function's return value reflect the new name — the
/// bucket keeps its original path segment. Callers that need the table
/// reachable under its new path must still address it by the old path.
pub fn rename_table(store: &Store, path: &str, new_name: &str) -> BlueConfigResult<()> {
    require_type(store, path, TYPE_TABLE)?;
    tree::set_value(store, path, PROP_NAME, new_name)
}

/// Current row counter, re-derived from the live count rather than trusted
/// blindly — callers that need an exact count for correctness (as opposed
/// to a monitoring estimate) should prefer [`row_count`] over reading the
/// counter property directly, since the spec allows counters to briefly
/// lag (§4.C).
pub fn row_count(store: &Store, table_path: &str) -> BlueConfigResult<u64> {
    let children = tree::get_children(store, table_path)?;
    Ok(children.iter().filter(|c| !path::is_reserved(c)).count() as u64)
}

pub fn has_schema(store: &Store, table_path: &str) -> BlueConfigResult<bool> {
    Ok(tree::get_value(store, table_path, PROP_HAS_SCHEMA)?.as_deref() == Some("true"))
}

pub fn mark_has_schema(store: &Store, table_path: &str) -> BlueConfigResult<()> {
    tree::set_value(store, table_path, PROP_HAS_SCHEMA, "true")
}

pub fn bump_counter(store: &Store, path: &str, prop: &str, delta: i64) -> BlueConfigResult<()> {
    let current: i64 = tree::get_value(store, path, prop)?
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let next = (current + delta).max(0);
    tree::set_value(store, path, prop, &next.to_string())
}

fn require_type(store: &Store, path: &str, expected: &str) -> BlueConfigResult<()> {
    match tree::get_value(store, path, PROP_TYPE)? {
        Some(ref t) if t == expected => Ok(()),
        Some(other) => Err(BlueConfigError::NotAContainer {
            path: path.to_string(),
            expected: format!("`{expected}` (found `__type={other}`)"),
        }),
        None => Err(BlueConfigError::NotAContainer {
            path: path.to_string(),
            expected: format!("`{expected}` (missing `__type`)"),
        }),
    }
}

fn reject_reserved_keys(metadata: &BTreeMap<String, String>) -> BlueConfigResult<()> {
    for key in metadata.keys() {
        if path::is_reserved(key) {
            return Err(BlueConfigError::ReservedName { name: key.clone() });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> Store {
        let dir = tempdir().unwrap();
        Store::open(dir.path().join("db.bc")).unwrap()
    }

    #[test]
    fn create_database_rejects_reserved_metadata_keys() {
        let s = store();
        let mut meta = BTreeMap::new();
        meta.insert("__sneaky".to_string(), "x".to_string());
        let err = create_database(&s, "mydb", &meta).unwrap_err();
        assert!(matches!(err, BlueConfigError::ReservedName { .. }));
    }

    #[test]
    fn create_table_requires_database_parent() {
        let s = store();
        tree::create_path(&s, "notadb").unwrap();
        let err = create_table(&s, "notadb", "users").unwrap_err();
        assert!(matches!(err, BlueConfigError::NotAContainer { .. }));
    }

    #[test]
    fn create_table_bumps_database_counter() {
        let s = store();
        create_database(&s, "mydb", &BTreeMap::new()).unwrap();
        create_table(&s, "mydb", "users").unwrap();
        create_table(&s, "mydb", "posts").unwrap();
        let count = tree::get_value(&s, "mydb", PROP_TABLE_COUNT).unwrap();
        assert_eq!(count, Some("2".to_string()));
    }

    #[test]
    fn delete_table_refuses_when_rows_present_without_force() {
        let s = store();
        create_database(&s, "mydb", &BTreeMap::new()).unwrap();
        create_table(&s, "mydb", "users").unwrap();
        tree::set_value(&s, "mydb/users/row1", "name", "alice").unwrap();
        assert!(delete_table(&s, "mydb/users", false).is_err());
        delete_table(&s, "mydb/users", true).unwrap();
        assert!(tree::get_children(&s, "mydb/users").is_err());
    }

    #[test]
    fn rename_table_only_updates_name_property() {
        let s = store();
        create_database(&s, "mydb", &BTreeMap::new()).unwrap();
        create_table(&s, "mydb", "users").unwrap();
        rename_table(&s, "mydb/users", "people").unwrap();
        assert_eq!(
            tree::get_value(&s, "mydb/users", PROP_NAME).unwrap(),
            Some("people".to_string())
        );
        // still addressed by its original path segment
        assert!(tree::get_children(&s, "mydb/users").is_ok());
    }
}
