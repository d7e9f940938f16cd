//! Secondary index engine (§4.F): single/composite indexes over a
//! table's rows, stored under the table's `__indices` bucket. Each
//! index's entries live in its own `_entries` child, one sub-bucket per
//! distinct key, row IDs stored as that sub-bucket's property names.

use std::collections::BTreeMap;

use crate::error::{BlueConfigError, BlueConfigResult};
use crate::path;
use crate::store::Store;
use crate::tree;
use crate::value::{Row, Value};

pub const INDICES_BUCKET: &str = "__indices";
const ENTRIES_BUCKET: &str = "_entries";

const PROP_TYPE: &str = "__type";
const PROP_UNIQUE: &str = "__unique";
const PROP_CREATED: &str = "__created";
const PROP_UPDATED: &str = "__updated";
const PROP_ENTRY_COUNT: &str = "__entry_count";

#[derive(Debug, Clone, PartialEq)]
pub enum IndexKind {
    Single,
    Composite,
}

#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
    pub kind: IndexKind,
}

fn index_path(table_path: &str, name: &str) -> String {
    format!("{table_path}/{INDICES_BUCKET}/{name}")
}

fn entries_path(table_path: &str, name: &str) -> String {
    format!("{table_path}/{INDICES_BUCKET}/{name}/{ENTRIES_BUCKET}")
}

/// Build an index's key for `row`, joining the stringified field values
/// with `|`. Each field is length-prefixed (`"{len}:{value}"`) before
/// joining so a value legitimately containing `|` can never be confused
/// with the separator (§9's recommended encoding). Returns `None` if any
/// indexed field is null or absent — such rows are not indexed (§4.F).
pub fn build_key(fields: &[String], row: &Row) -> Option<String> {
    let mut parts = Vec::with_capacity(fields.len());
    for field in fields {
        match row.get(field) {
            Some(v) if !v.is_null() => {
                let s = v.to_storage_string();
                parts.push(format!("{}:{}", s.len(), s));
            }
            _ => return None,
        }
    }
    Some(parts.join("|"))
}

/// Create an index named `name` over `fields`. Rejects an empty or
/// reserved name, a duplicate index, and (when `unique`) any duplicate
/// key found while grouping existing rows. The whole scan/group/validate
/// pass runs before any bucket is written, so a failed build leaves
/// nothing behind to clean up; the final persist step still guards
/// against a mid-write failure by deleting the partial index node.
pub fn create_index(
    store: &Store,
    table_path: &str,
    name: &str,
    fields: Vec<String>,
    unique: bool,
    now: &str,
) -> BlueConfigResult<()> {
    if name.is_empty() || path::is_reserved(name) {
        return Err(BlueConfigError::InvalidPath {
            path: name.to_string(),
            reason: "index name must be non-empty and not reserved".to_string(),
        });
    }
    if fields.is_empty() {
        return Err(BlueConfigError::schema("index requires at least one field"));
    }
    let idx_path = index_path(table_path, name);
    if tree::get_value(store, &idx_path, PROP_TYPE)?.is_some() {
        return Err(BlueConfigError::PathExists { path: idx_path });
    }

    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut build_err = None;
    tree::scan_nodes(store, table_path, |row_id, props| {
        let row = props_to_row(props);
        if let Some(key) = build_key(&fields, &row) {
            let bucket = groups.entry(key).or_default();
            if unique && !bucket.is_empty() {
                build_err = Some(BlueConfigError::UniqueViolation {
                    index: name.to_string(),
                    key: key.clone(),
                });
                return Err(build_err.clone().unwrap());
            }
            bucket.push(row_id.to_string());
        }
        Ok(())
    })?;

    let kind = if fields.len() == 1 { IndexKind::Single } else { IndexKind::Composite };
    let result = persist_index(store, table_path, name, &fields, unique, kind, &groups, now);
    if result.is_err() {
        let _ = tree::delete_node(store, &idx_path, true);
    }
    result
}

fn persist_index(
    store: &Store,
    table_path: &str,
    name: &str,
    fields: &[String],
    unique: bool,
    kind: IndexKind,
    groups: &BTreeMap<String, Vec<String>>,
    now: &str,
) -> BlueConfigResult<()> {
    let idx_path = index_path(table_path, name);
    let mut props = BTreeMap::new();
    props.insert(
        PROP_TYPE.to_string(),
        match kind {
            IndexKind::Single => "single".to_string(),
            IndexKind::Composite => "composite".to_string(),
        },
    );
    props.insert(PROP_UNIQUE.to_string(), unique.to_string());
    props.insert(PROP_CREATED.to_string(), now.to_string());
    props.insert(PROP_UPDATED.to_string(), now.to_string());
    let entry_count: usize = groups.values().map(Vec::len).sum();
    props.insert(PROP_ENTRY_COUNT.to_string(), entry_count.to_string());
    for (i, field) in fields.iter().enumerate() {
        props.insert(format!("__field_{i}"), field.clone());
    }
    tree::set_values(store, &idx_path, &props)?;

    let entries_root = entries_path(table_path, name);
    for (key, row_ids) in groups {
        let mut row_props = BTreeMap::new();
        for id in row_ids {
            row_props.insert(id.clone(), String::new());
        }
        tree::set_values(store, &format!("{entries_root}/{key}"), &row_props)?;
    }
    Ok(())
}

fn props_to_row(props: &BTreeMap<String, String>) -> Row {
    props
        .iter()
        .map(|(k, v)| (k.clone(), Value::from_storage_string(v, None)))
        .collect()
}

/// Every index currently defined on `table_path`.
pub fn list_indexes(store: &Store, table_path: &str) -> BlueConfigResult<Vec<IndexDef>> {
    let indices_path = format!("{table_path}/{INDICES_BUCKET}");
    let names = match tree::get_children(store, &indices_path) {
        Ok(n) => n,
        Err(BlueConfigError::PathNotFound { .. }) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let idx_path = index_path(table_path, &name);
        let props = tree::get_all_props_with_values(store, &idx_path)?;
        let unique = props.get(PROP_UNIQUE).map(|s| s == "true").unwrap_or(false);
        let kind = match props.get(PROP_TYPE).map(String::as_str) {
            Some("composite") => IndexKind::Composite,
            _ => IndexKind::Single,
        };
        let mut fields = Vec::new();
        let mut i = 0;
        while let Some(f) = props.get(&format!("__field_{i}")) {
            fields.push(f.clone());
            i += 1;
        }
        out.push(IndexDef { name, fields, unique, kind });
    }
    Ok(out)
}

/// Add `row_id`/`row` to a single index's entries. Skips rows with a
/// null/absent indexed field. Fails on a unique collision — the caller
/// is expected to roll back the row write it was protecting.
pub fn add(store: &Store, table_path: &str, index: &IndexDef, row_id: &str, row: &Row) -> BlueConfigResult<()> {
    let Some(key) = build_key(&index.fields, row) else {
        return Ok(());
    };
    let entry_path = format!("{}/{key}", entries_path(table_path, &index.name));
    if index.unique {
        let existing = tree::get_all_props(store, &entry_path).unwrap_or_default();
        if !existing.is_empty() {
            return Err(BlueConfigError::UniqueViolation {
                index: index.name.clone(),
                key: key.clone(),
            });
        }
    }
    tree::set_value(store, &entry_path, row_id, "")?;
    bump_entry_count(store, table_path, &index.name, 1)
}

/// Remove `row_id` from a single index's entries. No-ops cleanly if the
/// row was never indexed (e.g. it had a null indexed field).
pub fn remove(store: &Store, table_path: &str, index: &IndexDef, row_id: &str, row: &Row) -> BlueConfigResult<()> {
    let Some(key) = build_key(&index.fields, row) else {
        return Ok(());
    };
    let entry_path = format!("{}/{key}", entries_path(table_path, &index.name));
    tree::delete_value(store, &entry_path, row_id)?;
    let remaining = tree::get_all_props(store, &entry_path).unwrap_or_default();
    if remaining.is_empty() {
        tree::delete_node(store, &entry_path, true).ok();
    }
    bump_entry_count(store, table_path, &index.name, -1)
}

/// `remove(old)` then `add(new)` — the maintenance hook row updates use.
pub fn update(
    store: &Store,
    table_path: &str,
    index: &IndexDef,
    row_id: &str,
    old_row: &Row,
    new_row: &Row,
) -> BlueConfigResult<()> {
    remove(store, table_path, index, row_id, old_row)?;
    add(store, table_path, index, row_id, new_row)
}

fn bump_entry_count(store: &Store, table_path: &str, name: &str, delta: i64) -> BlueConfigResult<()> {
    crate::metadata::bump_counter(store, &index_path(table_path, name), PROP_ENTRY_COUNT, delta)
}

/// Row IDs whose key exactly equals `key`.
pub fn lookup(store: &Store, table_path: &str, index_name: &str, key: &str) -> BlueConfigResult<Vec<String>> {
    let entry_path = format!("{}/{key}", entries_path(table_path, index_name));
    match tree::get_all_props(store, &entry_path) {
        Ok(ids) => Ok(ids),
        Err(BlueConfigError::PathNotFound { .. }) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Row IDs across every key `k` with `(start == "" || k >= start) &&
/// (end == "" || k <= end)`, compared lexicographically over the raw
/// key string (§4.F's literal contract; [`crate::row`] applies
/// schema-aware numeric comparison on top where declared types allow).
pub fn lookup_range(
    store: &Store,
    table_path: &str,
    index_name: &str,
    start: &str,
    end: &str,
) -> BlueConfigResult<Vec<String>> {
    let entries_root = entries_path(table_path, index_name);
    let keys = match tree::get_children(store, &entries_root) {
        Ok(k) => k,
        Err(BlueConfigError::PathNotFound { .. }) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut out = Vec::new();
    for key in keys {
        if (start.is_empty() || key.as_str() >= start) && (end.is_empty() || key.as_str() <= end) {
            let entry_path = format!("{entries_root}/{key}");
            out.extend(tree::get_all_props(store, &entry_path)?);
        }
    }
    Ok(out)
}

/// Strip the length-prefix from a single-field index key, recovering the
/// original field's stringified value. Only meaningful for single-field
/// indexes — a composite key's multiple length-prefixed parts cannot be
/// unambiguously split back into per-field values without knowing the
/// field count, which this function doesn't take.
pub fn decode_single_field_key(key: &str) -> Option<String> {
    let (len_str, rest) = key.split_once(':')?;
    let len: usize = len_str.parse().ok()?;
    if rest.len() == len {
        Some(rest.to_string())
    } else {
        None
    }
}

/// Every `(key, row_ids)` entry currently stored for an index, in key
/// order. Lets callers that need schema-aware numeric range comparisons
/// (§9) decode keys themselves rather than relying on `lookup_range`'s
/// raw lexicographic contract.
pub fn scan_entries(store: &Store, table_path: &str, index_name: &str) -> BlueConfigResult<Vec<(String, Vec<String>)>> {
    let entries_root = entries_path(table_path, index_name);
    let keys = match tree::get_children(store, &entries_root) {
        Ok(k) => k,
        Err(BlueConfigError::PathNotFound { .. }) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let ids = tree::get_all_props(store, &format!("{entries_root}/{key}"))?;
        out.push((key, ids));
    }
    Ok(out)
}

/// Delete the whole index subtree.
pub fn drop_index(store: &Store, table_path: &str, name: &str) -> BlueConfigResult<()> {
    tree::delete_node(store, &index_path(table_path, name), true)
}

/// Rebuild an index's entries from the table's current rows, keeping the
/// old entries readable for the whole scan/group/unique-validate pass —
/// only once that pass succeeds does this drop the old index and persist
/// the new one. A unique violation or any other build-time failure leaves
/// the existing index untouched rather than gone (§11: a failed rebuild
/// must not regress a table to no-index).
pub fn rebuild_index(store: &Store, table_path: &str, name: &str, now: &str) -> BlueConfigResult<()> {
    let defs = list_indexes(store, table_path)?;
    let def = defs
        .into_iter()
        .find(|d| d.name == name)
        .ok_or_else(|| BlueConfigError::IndexMissing { name: name.to_string() })?;

    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut build_err = None;
    tree::scan_nodes(store, table_path, |row_id, props| {
        let row = props_to_row(props);
        if let Some(key) = build_key(&def.fields, &row) {
            let bucket = groups.entry(key).or_default();
            if def.unique && !bucket.is_empty() {
                build_err = Some(BlueConfigError::UniqueViolation {
                    index: name.to_string(),
                    key: key.clone(),
                });
                return Err(build_err.clone().unwrap());
            }
            bucket.push(row_id.to_string());
        }
        Ok(())
    })?;

    // Only touch the live index once the new entries are fully built and
    // validated above.
    drop_index(store, table_path, name)?;
    persist_index(store, table_path, name, &def.fields, def.unique, def.kind, &groups, now)
}
