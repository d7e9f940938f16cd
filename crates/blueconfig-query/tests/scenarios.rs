//! End-to-end scenarios that exercise the parser/planner/executor/join
//! layer over a live `blueconfig-core` engine (S3, S4, S6, S7).

use std::collections::BTreeMap;

use blueconfig_core::{value::Value, Engine, EngineConfig};
use blueconfig_query::{ast, parser, Bindings, FindOptions, QueryEngine, Strategy};
use tempfile::tempdir;

fn engine() -> Engine {
    let dir = tempdir().unwrap();
    Engine::open(dir.path().join("db.bc"), EngineConfig::default()).unwrap()
}

fn obj(pairs: &[(&str, Value)]) -> Value {
    let mut m = BTreeMap::new();
    for (k, v) in pairs {
        m.insert(k.to_string(), v.clone());
    }
    Value::Object(m)
}

/// S3 — Indexed equality query.
#[test]
fn s3_indexed_equality_query() {
    let core = engine();
    core.create_database("db", &BTreeMap::new()).unwrap();
    core.create_table("db", "users").unwrap();
    for (id, city) in [("u1", "NYC"), ("u2", "LA"), ("u3", "NYC"), ("u4", "SF"), ("u5", "LA")] {
        core.insert_with_id("db/users", id, &obj(&[("city", Value::String(city.to_string()))]), "t0").unwrap();
    }
    core.create_index("db/users", "idx_city", vec!["city".to_string()], false, "t0").unwrap();

    let qe = QueryEngine::new(&core);
    let query = qe.parse("city == \"NYC\"").unwrap();

    let rows = qe.find_rows("db/users", &query, &FindOptions::default(), "t0").unwrap();
    assert_eq!(rows.len(), 2);

    let report = qe.analyze_query("db/users", &query).unwrap();
    assert_eq!(report.strategy, Strategy::IndexScan);
    assert_eq!(report.index_name.as_deref(), Some("idx_city"));
}

/// S4 — Range query.
#[test]
fn s4_range_query() {
    let core = engine();
    core.create_database("db", &BTreeMap::new()).unwrap();
    core.create_table("db", "products").unwrap();
    for (id, price) in [("p1", 10), ("p2", 20), ("p3", 30), ("p4", 40)] {
        core.insert_with_id("db/products", id, &obj(&[("price", Value::Int(price))]), "t0").unwrap();
    }
    core.create_index("db/products", "idx_price", vec!["price".to_string()], false, "t0").unwrap();

    let qe = QueryEngine::new(&core);
    let mut ids = qe.find_rows_range("db/products", "idx_price", &Value::Int(15), &Value::Int(35)).unwrap();
    ids.sort();
    assert_eq!(ids, vec!["p2".to_string(), "p3".to_string()]);
}

/// S6 — Inner join.
#[test]
fn s6_inner_join() {
    let core = engine();
    core.create_database("db", &BTreeMap::new()).unwrap();
    core.create_table("db", "users").unwrap();
    core.create_table("db", "orders").unwrap();

    for (id, name) in [(1, "Alice"), (2, "Bob"), (3, "Charlie")] {
        core.insert_with_id("db/users", &id.to_string(), &obj(&[("id", Value::Int(id)), ("name", Value::String(name.to_string()))]), "t0").unwrap();
    }
    for (oid, user_id, amount) in [("o1", 1, 100), ("o2", 1, 200), ("o3", 2, 150)] {
        core.insert_with_id("db/orders", oid, &obj(&[("user_id", Value::Int(user_id)), ("amount", Value::Int(amount))]), "t0").unwrap();
    }

    let qe = QueryEngine::new(&core);
    let all_users = qe.parse("id > 0").unwrap();
    let pairs = qe.inner_join("db/users", &all_users, "id", "db/orders", "user_id", &Bindings::new(), "t0").unwrap();

    assert_eq!(pairs.len(), 3);
    assert!(pairs.iter().all(|(left, _)| left.get("name") != Some(&Value::String("Charlie".to_string()))));
}

/// S7 — Parser dependencies.
#[test]
fn s7_parser_dependencies() {
    let q = parser::parse("upper(name) == $targetName && age >= $minAge && location.city == 'NYC'").unwrap();
    let deps = ast::dependencies(&q);

    assert_eq!(
        deps.properties,
        ["name", "age", "location.city"].iter().map(|s| s.to_string()).collect()
    );
    assert_eq!(deps.variables, ["targetName", "minAge"].iter().map(|s| s.to_string()).collect());
    assert_eq!(deps.functions, ["upper"].iter().map(|s| s.to_string()).collect());
}
