//! The tagged variant row values are conceptually built from, plus the
//! flatten/unflatten helpers that turn a nested row into the dotted-path
//! flat map the schema and row layers actually store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A runtime-typed row value. On disk every value is a UTF-8 string
/// (§6); this is the in-memory shape callers build rows from and get
/// rows back as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

/// The declared/inferred type tag, independent of the value itself —
/// this is what a schema's `fields` map records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueType {
    String,
    Int,
    Float,
    Bool,
    Null,
    Object,
    Array,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Bool => "bool",
            ValueType::Null => "null",
            ValueType::Object => "object",
            ValueType::Array => "array",
        }
    }

    pub fn parse(s: &str) -> Option<ValueType> {
        Some(match s {
            "string" => ValueType::String,
            "int" => ValueType::Int,
            "float" => ValueType::Float,
            "bool" => ValueType::Bool,
            "null" => ValueType::Null,
            "object" => ValueType::Object,
            "array" => ValueType::Array,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::Array(_) => ValueType::Array,
            Value::Object(_) => ValueType::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Canonical textual form used for on-disk property storage and for
    /// building index keys. Null values are never persisted as a property
    /// (an explicit null and an absent field are equivalent, per §3).
    pub fn to_storage_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }

    /// Reconstruct a typed value from its stored string form, using the
    /// schema's declared type where known. Falls back to `String` for
    /// fields the schema has no record of.
    pub fn from_storage_string(raw: &str, declared: Option<ValueType>) -> Value {
        match declared {
            Some(ValueType::Int) => raw.parse::<i64>().map(Value::Int).unwrap_or(Value::String(raw.to_string())),
            Some(ValueType::Float) => raw.parse::<f64>().map(Value::Float).unwrap_or(Value::String(raw.to_string())),
            Some(ValueType::Bool) => match raw {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::String(raw.to_string()),
            },
            Some(ValueType::Array) | Some(ValueType::Object) => {
                serde_json::from_str(raw).unwrap_or(Value::String(raw.to_string()))
            }
            _ => Value::String(raw.to_string()),
        }
    }

    /// Best-effort numeric parse, used by aggregations (§4.I), which
    /// operate over numeric parses of string-stored values regardless of
    /// the field's declared schema type.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.parse::<f64>().ok(),
            _ => None,
        }
    }
}

/// Shortest reasonable round-trip form for a float: an integral float
/// prints without a trailing `.0` dropped (`format!("{}", f)` already
/// omits it only for `Display`, which we rely on here), matching the
/// "strconv-style" rendering the substrate contract calls for.
fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    format!("{f}")
}

/// A row is a flat, dotted-path map from field name to value. Nested
/// objects are flattened away before a row is inserted; arrays are kept
/// intact as a single `Array`-typed leaf.
pub type Row = BTreeMap<String, Value>;

/// Flatten a (possibly nested) object into a dotted-path row map.
pub fn flatten(value: &Value) -> Row {
    let mut out = Row::new();
    flatten_into("", value, &mut out);
    out
}

fn flatten_into(prefix: &str, value: &Value, out: &mut Row) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten_into(&key, v, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}

/// Rebuild a nested object from a flat, dotted-path row map. The inverse
/// of [`flatten`]; not otherwise used by the core write path, but needed
/// by any caller that wants a row back in its original nested shape.
pub fn unflatten(row: &Row) -> Value {
    let mut root = BTreeMap::new();
    for (key, value) in row {
        let parts: Vec<&str> = key.split('.').collect();
        insert_path(&mut root, &parts, value.clone());
    }
    Value::Object(root)
}

fn insert_path(map: &mut BTreeMap<String, Value>, parts: &[&str], value: Value) {
    if parts.len() == 1 {
        map.insert(parts[0].to_string(), value);
        return;
    }
    let head = parts[0].to_string();
    let entry = map
        .entry(head)
        .or_insert_with(|| Value::Object(BTreeMap::new()));
    if let Value::Object(inner) = entry {
        insert_path(inner, &parts[1..], value);
    } else {
        // A scalar already occupies this path; overwrite with an object so
        // the rest of the dotted path can still be rebuilt.
        let mut inner = BTreeMap::new();
        insert_path(&mut inner, &parts[1..], value);
        *entry = Value::Object(inner);
    }
}
