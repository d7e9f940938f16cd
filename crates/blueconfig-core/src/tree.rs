//! Tree engine (§4.B): path-addressed operations layered directly over
//! the bucket substrate (§4.A / [`crate::store`]). Every call here
//! canonicalizes its path and runs a single substrate transaction, so the
//! "succeeds completely or leaves state unchanged" failure policy falls
//! straight out of [`crate::store::Store::update`]'s clone-and-swap
//! semantics — no extra bookkeeping is needed at this layer.

use std::collections::BTreeMap;

use crate::error::{BlueConfigError, BlueConfigResult};
use crate::path;
use crate::store::{BucketData, Store};

/// Idempotent path creation: creates every missing bucket along `path`.
pub fn create_path(store: &Store, path: &str) -> BlueConfigResult<()> {
    let segs = path::relative_segments(path)?;
    store.update(|tx| {
        tx.create_path(&segs);
        Ok(())
    })
}

/// Delete the bucket at `path`. Refuses to touch `root`. If the bucket has
/// child buckets and `force` is false, fails rather than silently
/// recursing.
pub fn delete_node(store: &Store, path: &str, force: bool) -> BlueConfigResult<()> {
    let segs = path::relative_segments(path)?;
    if segs.is_empty() {
        return Err(BlueConfigError::InvalidPath {
            path: path.to_string(),
            reason: "cannot delete the root bucket".to_string(),
        });
    }
    store.update(|tx| {
        let exists = tx.bucket(&segs).is_some();
        if !exists {
            return Err(BlueConfigError::PathNotFound { path: path.to_string() });
        }
        if !force {
            let has_children = tx
                .bucket(&segs)
                .map(|b| !b.is_empty_of_children())
                .unwrap_or(false);
            if has_children {
                return Err(BlueConfigError::NonEmpty { path: path.to_string() });
            }
        }
        if !tx.delete_path(&segs) {
            return Err(BlueConfigError::PathNotFound { path: path.to_string() });
        }
        Ok(())
    })
}

/// Names of every child bucket of `path` (reserved and non-reserved
/// alike — callers that care about `__`-prefixed metadata buckets filter
/// with [`path::is_reserved`]).
pub fn get_children(store: &Store, path: &str) -> BlueConfigResult<Vec<String>> {
    let segs = path::relative_segments(path)?;
    store.view(|tx| {
        let bucket = tx
            .bucket(&segs)
            .ok_or_else(|| BlueConfigError::PathNotFound { path: path.to_string() })?;
        let mut names = Vec::new();
        bucket.for_each_bucket(|name, _| names.push(name.to_string()));
        Ok(names)
    })
}

/// Write a single property, creating the target bucket if absent.
pub fn set_value(store: &Store, path: &str, prop: &str, value: &str) -> BlueConfigResult<()> {
    let segs = path::relative_segments(path)?;
    store.update(|tx| {
        let bucket = tx.create_path(&segs);
        bucket.put(prop, value);
        Ok(())
    })
}

/// Write every entry of `values` against `path` in a single transaction;
/// any individual write failing (there are none today — property writes
/// cannot themselves fail) aborts the whole batch.
pub fn set_values(store: &Store, path: &str, values: &BTreeMap<String, String>) -> BlueConfigResult<()> {
    let segs = path::relative_segments(path)?;
    store.update(|tx| {
        let bucket = tx.create_path(&segs);
        for (k, v) in values {
            bucket.put(k, v);
        }
        Ok(())
    })
}

/// Create `path` (if absent) and write `props` against it, as one
/// transaction.
pub fn create_node_with_props(
    store: &Store,
    path: &str,
    props: &BTreeMap<String, String>,
) -> BlueConfigResult<()> {
    set_values(store, path, props)
}

/// Create every `(path, props)` pair in `nodes` as a single transaction —
/// either all nodes land or none do.
pub fn batch_create_nodes(
    store: &Store,
    nodes: &BTreeMap<String, BTreeMap<String, String>>,
) -> BlueConfigResult<()> {
    let mut resolved = Vec::with_capacity(nodes.len());
    for path in nodes.keys() {
        resolved.push(path::relative_segments(path)?);
    }
    store.update(|tx| {
        for (segs, props) in resolved.iter().zip(nodes.values()) {
            let bucket = tx.create_path(segs);
            for (k, v) in props {
                bucket.put(k, v);
            }
        }
        Ok(())
    })
}

/// Read a single property. A missing bucket is distinguishable
/// ([`BlueConfigError::PathNotFound`]) from a bucket that exists but
/// lacks the property (`Ok(None)`).
pub fn get_value(store: &Store, path: &str, prop: &str) -> BlueConfigResult<Option<String>> {
    let segs = path::relative_segments(path)?;
    store.view(|tx| {
        let bucket = tx
            .bucket(&segs)
            .ok_or_else(|| BlueConfigError::PathNotFound { path: path.to_string() })?;
        Ok(bucket.get(prop).map(str::to_string))
    })
}

/// Names of every property on `path`.
pub fn get_all_props(store: &Store, path: &str) -> BlueConfigResult<Vec<String>> {
    let segs = path::relative_segments(path)?;
    store.view(|tx| {
        let bucket = tx
            .bucket(&segs)
            .ok_or_else(|| BlueConfigError::PathNotFound { path: path.to_string() })?;
        let mut names = Vec::new();
        bucket.for_each(|k, _| names.push(k.to_string()));
        Ok(names)
    })
}

/// Every property and its value on `path`.
pub fn get_all_props_with_values(store: &Store, path: &str) -> BlueConfigResult<BTreeMap<String, String>> {
    let segs = path::relative_segments(path)?;
    store.view(|tx| {
        let bucket = tx
            .bucket(&segs)
            .ok_or_else(|| BlueConfigError::PathNotFound { path: path.to_string() })?;
        let mut map = BTreeMap::new();
        bucket.for_each(|k, v| {
            map.insert(k.to_string(), v.to_string());
        });
        Ok(map)
    })
}

/// Remove a property. Not an error if the property (or even the bucket)
/// is absent.
pub fn delete_value(store: &Store, path: &str, prop: &str) -> BlueConfigResult<()> {
    let segs = path::relative_segments(path)?;
    store.update(|tx| {
        if let Some(bucket) = tx.bucket_mut(&segs) {
            bucket.delete(prop);
        }
        Ok(())
    })
}

/// Whether `prop` exists on `path`. A non-existent bucket answers `false`
/// rather than erroring — `has_value` is a pure predicate, never a
/// presence check that demands the node exist.
pub fn has_value(store: &Store, path: &str, prop: &str) -> BlueConfigResult<bool> {
    let segs = path::relative_segments(path)?;
    store.view(|tx| {
        Ok(tx
            .bucket(&segs)
            .map(|b| b.get(prop).is_some())
            .unwrap_or(false))
    })
}

/// Invoke `cb` once per non-reserved child bucket of `path`, passing its
/// name and full property map. Iteration order is unspecified (bucket
/// children are stored in a `BTreeMap`, so in practice it is name order).
/// Short-circuits — and propagates — the first error `cb` returns.
pub fn scan_nodes<F>(store: &Store, path: &str, mut cb: F) -> BlueConfigResult<()>
where
    F: FnMut(&str, &BTreeMap<String, String>) -> BlueConfigResult<()>,
{
    let segs = path::relative_segments(path)?;
    store.view(|tx| {
        let bucket = tx
            .bucket(&segs)
            .ok_or_else(|| BlueConfigError::PathNotFound { path: path.to_string() })?;
        let mut err = None;
        bucket.for_each_bucket(|name, child| {
            if err.is_some() || path::is_reserved(name) {
                return;
            }
            let mut props = BTreeMap::new();
            child.for_each(|k, v| {
                props.insert(k.to_string(), v.to_string());
            });
            if let Err(e) = cb(name, &props) {
                err = Some(e);
            }
        });
        match err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    })
}

/// Read the raw bucket at `path`, for layers above that need the full
/// (props + children) shape rather than a flattened view.
pub fn read_bucket(store: &Store, path: &str) -> BlueConfigResult<BucketData> {
    let segs = path::relative_segments(path)?;
    store.view(|tx| {
        tx.bucket(&segs)
            .cloned()
            .ok_or_else(|| BlueConfigError::PathNotFound { path: path.to_string() })
    })
}
