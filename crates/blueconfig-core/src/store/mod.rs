//! The page-store substrate (§6): a single-file, transactional bucket
//! store with single-writer/many-reader semantics.
//!
//! The spec explicitly scopes the B+tree/mmap/WAL internals of the real
//! substrate out of the core (§1: "implementation... is not specified").
//! What *is* specified is the contract — `open`/`close`/`view`/`update`
//! plus the per-bucket primitives in [`bucket::BucketData`]. This module
//! implements that contract directly over an in-memory tree guarded by a
//! single `RwLock`, checkpointed to one file. Checkpointing uses a
//! `bincode` snapshot with a trailing CRC32 (mirroring the checksum
//! discipline a real page store applies per-page) and an atomic
//! write-temp/fsync/rename so a crash mid-checkpoint can never leave a
//! half-written file in place of a good one.

pub mod bucket;
pub mod tx;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crc32fast::Hasher as Crc32;
use tracing::{debug, instrument, warn};

use crate::error::{BlueConfigError, BlueConfigResult};
pub use bucket::BucketData;
pub use tx::{ReadTx, WriteTx};

/// A single-file, transactional bucket store.
pub struct Store {
    path: PathBuf,
    tree: RwLock<BucketData>,
}

impl Store {
    /// Open (or create) the store at `path`. An absent file starts from an
    /// empty `root` bucket, matching invariant 1 ("root always exists").
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> BlueConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let tree = if path.exists() {
            Self::load(&path)?
        } else {
            debug!("no existing store file, starting from an empty root bucket");
            BucketData::default()
        };
        Ok(Self {
            path,
            tree: RwLock::new(tree),
        })
    }

    fn load(path: &Path) -> BlueConfigResult<BucketData> {
        let bytes = fs::read(path)?;
        if bytes.len() < 4 {
            return Err(BlueConfigError::storage("store file truncated"));
        }
        let (payload, checksum_bytes) = bytes.split_at(bytes.len() - 4);
        let expected = u32::from_le_bytes(checksum_bytes.try_into().unwrap());
        let mut hasher = Crc32::new();
        hasher.update(payload);
        if hasher.finalize() != expected {
            return Err(BlueConfigError::storage(
                "store file checksum mismatch — refusing to load a corrupt snapshot",
            ));
        }
        bincode::deserialize(payload)
            .map_err(|e| BlueConfigError::storage(format!("corrupt store snapshot: {e}")))
    }

    /// Read transaction. Readers may run concurrently with each other.
    pub fn view<F, T>(&self, f: F) -> BlueConfigResult<T>
    where
        F: FnOnce(&ReadTx) -> BlueConfigResult<T>,
    {
        let guard = self
            .tree
            .read()
            .map_err(|_| BlueConfigError::storage("bucket tree lock poisoned"))?;
        let tx = ReadTx { root: &guard };
        f(&tx)
    }

    /// Write transaction, serialized against all other writers. The
    /// closure runs against a private clone of the tree; only on success
    /// is the live tree swapped for the mutated clone, so a failing
    /// closure leaves the store in exactly its pre-call state (§4.A).
    pub fn update<F, T>(&self, f: F) -> BlueConfigResult<T>
    where
        F: FnOnce(&mut WriteTx) -> BlueConfigResult<T>,
    {
        let mut guard = self
            .tree
            .write()
            .map_err(|_| BlueConfigError::storage("bucket tree lock poisoned"))?;
        let mut working = guard.clone();
        let mut tx = WriteTx {
            root: &mut working,
        };
        match f(&mut tx) {
            Ok(value) => {
                *guard = working;
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }

    /// Snapshot the current tree to disk.
    #[instrument(skip_all)]
    pub fn checkpoint(&self) -> BlueConfigResult<()> {
        let guard = self
            .tree
            .read()
            .map_err(|_| BlueConfigError::storage("bucket tree lock poisoned"))?;
        let payload = bincode::serialize(&*guard)
            .map_err(|e| BlueConfigError::storage(format!("failed to serialize snapshot: {e}")))?;
        drop(guard);

        let mut hasher = Crc32::new();
        hasher.update(&payload);
        let checksum = hasher.finalize();

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            tmp.write_all(&payload)?;
            tmp.write_all(&checksum.to_le_bytes())?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Checkpoint and release the store. `Store` itself has no open file
    /// handle to close between calls (each checkpoint opens/renames its
    /// own temp file), so closing is just a final checkpoint.
    pub fn close(&self) -> BlueConfigResult<()> {
        if let Err(e) = self.checkpoint() {
            warn!("checkpoint on close failed: {e}");
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_on_fresh_path_starts_empty() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db.bc")).unwrap();
        store
            .view(|tx| {
                assert!(tx.bucket(&[]).is_some());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn failed_write_leaves_tree_untouched() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db.bc")).unwrap();
        store
            .update(|tx| {
                tx.create_path(&["a".to_string()]);
                Ok::<_, BlueConfigError>(())
            })
            .unwrap();

        let err = store.update(|tx| {
            tx.create_path(&["b".to_string()]);
            Err(BlueConfigError::storage("boom"))
        });
        assert!(err.is_err());

        store
            .view(|tx| {
                assert!(tx.bucket(&["a".to_string()]).is_some());
                assert!(tx.bucket(&["b".to_string()]).is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn checkpoint_and_reopen_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.bc");
        {
            let store = Store::open(&path).unwrap();
            store
                .update(|tx| {
                    tx.create_path(&["a".to_string(), "b".to_string()]);
                    Ok::<_, BlueConfigError>(())
                })
                .unwrap();
            store.checkpoint().unwrap();
        }
        let reopened = Store::open(&path).unwrap();
        reopened
            .view(|tx| {
                assert!(tx.bucket(&["a".to_string(), "b".to_string()]).is_some());
                Ok(())
            })
            .unwrap();
    }
}
