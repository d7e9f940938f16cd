//! Schema engine (§4.D): type inference, monotonic merge, and
//! compatibility validation over the flat, dotted-path row shape.
//!
//! Schemas only ever grow. A field's declared type is fixed the first
//! time it's observed; later rows may widen what's *accepted* for that
//! field only as far as the compatibility rule allows (`string` accepts
//! anything, `int`/`float` accept each other) — they never change what's
//! *declared*.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{BlueConfigError, BlueConfigResult};
use crate::store::Store;
use crate::tree;
use crate::value::{Row, Value, ValueType};

pub const SCHEMA_BUCKET: &str = "__schema";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub version: u64,
    pub created: String,
    pub last_updated: String,
    pub fields: BTreeMap<String, ValueType>,
}

impl Schema {
    pub fn empty(now: &str) -> Self {
        Schema {
            version: 0,
            created: now.to_string(),
            last_updated: now.to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Infer a field-by-field schema fragment from a single row. A row is
/// already expected to be flat (dotted paths) by the time it reaches
/// here — nested objects are flattened by [`crate::value::flatten`]
/// before insertion, not by this function.
pub fn infer(row: &Row) -> BTreeMap<String, ValueType> {
    row.iter().map(|(k, v)| (k.clone(), v.value_type())).collect()
}

/// Merge a row's inferred shape into `existing`. New fields are added
/// with their inferred type; fields the schema already knows about keep
/// their declared type regardless of what this row's value looks like
/// (no type widening, per §4.D). Returns whether anything changed, so
/// the caller can decide whether to bump `version`/`last_updated`.
pub fn merge(existing: &mut Schema, row: &Row, now: &str) -> bool {
    let mut changed = false;
    for (field, value) in row {
        if !existing.fields.contains_key(field) {
            existing.fields.insert(field.clone(), value.value_type());
            changed = true;
        }
    }
    if changed {
        existing.version += 1;
        existing.last_updated = now.to_string();
    }
    changed
}

/// Validate a row against a schema: every field the row shares with the
/// schema must be type-compatible with its declared type. Fields the row
/// introduces that the schema doesn't yet know about are permitted — the
/// schema is expected to evolve on insert, not gate it.
pub fn validate(row: &Row, schema: &Schema) -> BlueConfigResult<()> {
    for (field, value) in row {
        if let Some(&declared) = schema.fields.get(field) {
            let actual = value.value_type();
            if !type_compatible(actual, declared) {
                return Err(BlueConfigError::schema(format!(
                    "field `{field}`: value of type `{actual}` is not compatible with declared type `{declared}`"
                )));
            }
        }
    }
    Ok(())
}

/// Same type ⇒ compatible. `string` accepts any type (it's the universal
/// fallback). `int`/`float` are mutually compatible. Everything else is
/// rejected.
pub fn type_compatible(actual: ValueType, declared: ValueType) -> bool {
    if actual == declared {
        return true;
    }
    match declared {
        ValueType::String => true,
        ValueType::Int | ValueType::Float => matches!(actual, ValueType::Int | ValueType::Float),
        _ => false,
    }
}

pub fn field_type(schema: &Schema, field: &str) -> Option<ValueType> {
    schema.fields.get(field).copied()
}

/// Render a schema's `fields` map as the JSON blob the `__schema` bucket
/// persists it as (§4.D).
pub fn fields_to_json(fields: &BTreeMap<String, ValueType>) -> String {
    serde_json::to_string(fields).unwrap_or_else(|_| "{}".to_string())
}

pub fn fields_from_json(raw: &str) -> BlueConfigResult<BTreeMap<String, ValueType>> {
    serde_json::from_str(raw).map_err(BlueConfigError::from)
}

/// The `flat_fields` persisted alongside `fields` — the same map, kept
/// as a separate property per §4.D so callers can distinguish "the
/// declared schema" from "every dotted path ever observed" if those
/// diverge in a future version. In v1 they are identical.
pub fn flat_fields_to_json(fields: &BTreeMap<String, ValueType>) -> String {
    fields_to_json(fields)
}

/// Load a table's schema, returning an empty one if `__schema` has never
/// been written (a brand new table with no rows yet).
pub fn load_schema(store: &Store, table_path: &str, now: &str) -> BlueConfigResult<Schema> {
    let schema_path = format!("{table_path}/{SCHEMA_BUCKET}");
    let props = match tree::get_all_props_with_values(store, &schema_path) {
        Ok(p) => p,
        Err(BlueConfigError::PathNotFound { .. }) => return Ok(Schema::empty(now)),
        Err(e) => return Err(e),
    };
    if props.is_empty() {
        return Ok(Schema::empty(now));
    }
    let version = props.get("version").and_then(|s| s.parse().ok()).unwrap_or(0);
    let created = props.get("created").cloned().unwrap_or_else(|| now.to_string());
    let last_updated = props.get("last_updated").cloned().unwrap_or_else(|| now.to_string());
    let fields = props
        .get("fields")
        .map(|raw| fields_from_json(raw))
        .transpose()?
        .unwrap_or_default();
    Ok(Schema {
        version,
        created,
        last_updated,
        fields,
    })
}

/// Persist a schema to its table's `__schema` bucket, flipping
/// `__has_schema` on the table once it has any fields (§4.D).
pub fn save_schema(store: &Store, table_path: &str, schema: &Schema) -> BlueConfigResult<()> {
    let schema_path = format!("{table_path}/{SCHEMA_BUCKET}");
    let mut props = BTreeMap::new();
    props.insert("version".to_string(), schema.version.to_string());
    props.insert("created".to_string(), schema.created.clone());
    props.insert("last_updated".to_string(), schema.last_updated.clone());
    props.insert("fields".to_string(), fields_to_json(&schema.fields));
    props.insert("flat_fields".to_string(), flat_fields_to_json(&schema.fields));
    tree::set_values(store, &schema_path, &props)?;
    if !schema.is_empty() {
        crate::metadata::mark_has_schema(store, table_path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn merge_adds_new_fields_and_bumps_version() {
        let mut schema = Schema::empty("t0");
        let r = row(&[("name", Value::String("a".into())), ("age", Value::Int(1))]);
        assert!(merge(&mut schema, &r, "t1"));
        assert_eq!(schema.version, 1);
        assert_eq!(schema.fields.get("age"), Some(&ValueType::Int));

        let changed = merge(&mut schema, &r, "t2");
        assert!(!changed);
        assert_eq!(schema.version, 1);
    }

    #[test]
    fn merge_never_widens_an_existing_fields_type() {
        let mut schema = Schema::empty("t0");
        let first = row(&[("age", Value::Int(1))]);
        merge(&mut schema, &first, "t1");

        let second = row(&[("age", Value::String("thirty".into()))]);
        merge(&mut schema, &second, "t2");
        assert_eq!(schema.fields.get("age"), Some(&ValueType::Int));

        assert!(validate(&second, &schema).is_err());
    }

    #[test]
    fn validate_permits_unknown_fields() {
        let mut schema = Schema::empty("t0");
        let r = row(&[("age", Value::Int(1))]);
        merge(&mut schema, &r, "t1");

        let extended = row(&[("age", Value::Int(2)), ("new_field", Value::Bool(true))]);
        assert!(validate(&extended, &schema).is_ok());
    }

    #[test]
    fn type_compatibility_rules() {
        assert!(type_compatible(ValueType::Int, ValueType::String));
        assert!(type_compatible(ValueType::Int, ValueType::Float));
        assert!(type_compatible(ValueType::Float, ValueType::Int));
        assert!(!type_compatible(ValueType::String, ValueType::Int));
        assert!(!type_compatible(ValueType::Bool, ValueType::Int));
    }
}
