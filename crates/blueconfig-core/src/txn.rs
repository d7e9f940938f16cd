//! Logical transaction buffer (§4.J): stages row operations and replays
//! them on `commit`, compensating already-applied ops from an undo log
//! if a later op in the batch fails. This is a *logical* transaction —
//! atomicity comes from compensation, not from page-store MVCC, so
//! staged operations are invisible to concurrent readers only because
//! they haven't touched the store yet, not because of any isolation
//! mechanism.

use crate::error::{BlueConfigError, BlueConfigResult};
use crate::row;
use crate::store::Store;
use crate::value::{Row, Value};

enum Op {
    Insert {
        table_path: String,
        row_id: Option<String>,
        value: Value,
    },
    Update {
        table_path: String,
        row_id: String,
        value: Value,
    },
    UpdateFields {
        table_path: String,
        row_id: String,
        fields: Row,
    },
    Delete {
        table_path: String,
        row_id: String,
    },
}

/// Compensation recorded as each staged op is replayed, in replay order.
enum Undo {
    DeleteInserted { table_path: String, row_id: String },
    RestoreRow { table_path: String, row_id: String, prior: Row },
    ReinsertDeleted { table_path: String, row_id: String, prior: Row },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Active,
    Committed,
    RolledBack,
}

/// A staged batch of row operations, committed or rolled back as one
/// logical unit.
pub struct Txn<'a> {
    store: &'a Store,
    ops: Vec<Op>,
    state: State,
}

pub fn begin_transaction(store: &Store) -> Txn<'_> {
    Txn {
        store,
        ops: Vec::new(),
        state: State::Active,
    }
}

impl<'a> Txn<'a> {
    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }

    fn require_active(&self) -> BlueConfigResult<()> {
        if self.state != State::Active {
            return Err(BlueConfigError::txn_state(
                "transaction already committed or rolled back",
            ));
        }
        Ok(())
    }

    pub fn insert(&mut self, table_path: &str, value: Value) -> BlueConfigResult<()> {
        self.require_active()?;
        self.ops.push(Op::Insert {
            table_path: table_path.to_string(),
            row_id: None,
            value,
        });
        Ok(())
    }

    pub fn insert_with_id(&mut self, table_path: &str, row_id: &str, value: Value) -> BlueConfigResult<()> {
        self.require_active()?;
        self.ops.push(Op::Insert {
            table_path: table_path.to_string(),
            row_id: Some(row_id.to_string()),
            value,
        });
        Ok(())
    }

    pub fn update(&mut self, table_path: &str, row_id: &str, value: Value) -> BlueConfigResult<()> {
        self.require_active()?;
        self.ops.push(Op::Update {
            table_path: table_path.to_string(),
            row_id: row_id.to_string(),
            value,
        });
        Ok(())
    }

    pub fn update_fields(&mut self, table_path: &str, row_id: &str, fields: Row) -> BlueConfigResult<()> {
        self.require_active()?;
        self.ops.push(Op::UpdateFields {
            table_path: table_path.to_string(),
            row_id: row_id.to_string(),
            fields,
        });
        Ok(())
    }

    pub fn delete(&mut self, table_path: &str, row_id: &str) -> BlueConfigResult<()> {
        self.require_active()?;
        self.ops.push(Op::Delete {
            table_path: table_path.to_string(),
            row_id: row_id.to_string(),
        });
        Ok(())
    }

    /// Discard the buffer without touching the store.
    pub fn rollback(&mut self) -> BlueConfigResult<()> {
        self.require_active()?;
        self.ops.clear();
        self.state = State::RolledBack;
        Ok(())
    }

    /// Replay every staged op against the store, in order. If one fails,
    /// replay stops and every already-applied op is compensated in
    /// reverse order using the undo log built up during this replay.
    pub fn commit(&mut self, now: &str) -> BlueConfigResult<()> {
        self.require_active()?;
        let mut undo_log: Vec<Undo> = Vec::new();

        for op in &self.ops {
            let result = apply(self.store, op, now);
            match result {
                Ok(undo) => undo_log.push(undo),
                Err(e) => {
                    for compensation in undo_log.into_iter().rev() {
                        let _ = revert(self.store, compensation, now);
                    }
                    self.state = State::RolledBack;
                    return Err(e);
                }
            }
        }

        self.state = State::Committed;
        self.ops.clear();
        Ok(())
    }
}

fn apply(store: &Store, op: &Op, now: &str) -> BlueConfigResult<Undo> {
    match op {
        Op::Insert { table_path, row_id, value } => {
            let id = match row_id {
                Some(id) => {
                    row::insert_with_id(store, table_path, id, value, now)?;
                    id.clone()
                }
                None => row::insert(store, table_path, value, now)?,
            };
            Ok(Undo::DeleteInserted {
                table_path: table_path.clone(),
                row_id: id,
            })
        }
        Op::Update { table_path, row_id, value } => {
            let prior = row::get(store, table_path, row_id, now)?;
            row::update(store, table_path, row_id, value, now)?;
            Ok(Undo::RestoreRow {
                table_path: table_path.clone(),
                row_id: row_id.clone(),
                prior,
            })
        }
        Op::UpdateFields { table_path, row_id, fields } => {
            let prior = row::get(store, table_path, row_id, now)?;
            row::update_fields(store, table_path, row_id, fields, now)?;
            Ok(Undo::RestoreRow {
                table_path: table_path.clone(),
                row_id: row_id.clone(),
                prior,
            })
        }
        Op::Delete { table_path, row_id } => {
            let prior = row::get(store, table_path, row_id, now)?;
            row::delete(store, table_path, row_id, now)?;
            Ok(Undo::ReinsertDeleted {
                table_path: table_path.clone(),
                row_id: row_id.clone(),
                prior,
            })
        }
    }
}

fn revert(store: &Store, undo: Undo, now: &str) -> BlueConfigResult<()> {
    match undo {
        Undo::DeleteInserted { table_path, row_id } => row::delete(store, &table_path, &row_id, now),
        Undo::RestoreRow { table_path, row_id, prior } => {
            row::update_fields(store, &table_path, &row_id, &prior, now)
        }
        Undo::ReinsertDeleted { table_path, row_id, prior } => {
            row::insert_with_id(store, &table_path, &row_id, &crate::value::unflatten(&prior), now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn store() -> Store {
        let dir = tempdir().unwrap();
        Store::open(dir.path().join("db.bc")).unwrap()
    }

    fn obj(pairs: &[(&str, Value)]) -> Value {
        let mut m = BTreeMap::new();
        for (k, v) in pairs {
            m.insert(k.to_string(), v.clone());
        }
        Value::Object(m)
    }

    #[test]
    fn commit_applies_every_staged_op() {
        let s = store();
        metadata::create_database(&s, "db", &BTreeMap::new()).unwrap();
        metadata::create_table(&s, "db", "users").unwrap();

        let mut txn = begin_transaction(&s);
        txn.insert_with_id("db/users", "r1", obj(&[("x", Value::Int(1))])).unwrap();
        txn.insert_with_id("db/users", "r2", obj(&[("x", Value::Int(2))])).unwrap();
        txn.commit("t0").unwrap();

        assert_eq!(metadata::row_count(&s, "db/users").unwrap(), 2);
        assert!(!txn.is_active());
    }

    #[test]
    fn rollback_discards_without_touching_store() {
        let s = store();
        metadata::create_database(&s, "db", &BTreeMap::new()).unwrap();
        metadata::create_table(&s, "db", "users").unwrap();

        let mut txn = begin_transaction(&s);
        txn.insert_with_id("db/users", "r1", obj(&[("x", Value::Int(1))])).unwrap();
        txn.rollback().unwrap();

        assert_eq!(metadata::row_count(&s, "db/users").unwrap(), 0);
        assert!(txn.commit("t0").is_err());
    }

    #[test]
    fn partial_commit_failure_undoes_already_applied_ops() {
        let s = store();
        metadata::create_database(&s, "db", &BTreeMap::new()).unwrap();
        metadata::create_table(&s, "db", "users").unwrap();

        let mut txn = begin_transaction(&s);
        txn.insert_with_id("db/users", "r1", obj(&[("x", Value::Int(1))])).unwrap();
        // delete of a row id that was never inserted fails, forcing rollback of r1.
        txn.delete("db/users", "does-not-exist").unwrap();
        let err = txn.commit("t0");
        assert!(err.is_err());
        assert_eq!(metadata::row_count(&s, "db/users").unwrap(), 0);
    }

    #[test]
    fn double_commit_fails() {
        let s = store();
        metadata::create_database(&s, "db", &BTreeMap::new()).unwrap();
        metadata::create_table(&s, "db", "users").unwrap();
        let mut txn = begin_transaction(&s);
        txn.insert_with_id("db/users", "r1", obj(&[("x", Value::Int(1))])).unwrap();
        txn.commit("t0").unwrap();
        assert!(txn.commit("t1").is_err());
    }
}
