//! In-memory representation of a single bucket: a property map plus a
//! named set of child buckets. This is the unit the substrate contract
//! (§6) operates on — `create_bucket_if_not_exists`, `bucket`,
//! `delete_bucket`, `put`, `get`, `delete`, `for_each`, `for_each_bucket`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketData {
    pub props: BTreeMap<String, String>,
    pub children: BTreeMap<String, BucketData>,
}

impl BucketData {
    pub fn create_bucket_if_not_exists(&mut self, name: &str) -> &mut BucketData {
        self.children.entry(name.to_string()).or_default()
    }

    pub fn bucket(&self, name: &str) -> Option<&BucketData> {
        self.children.get(name)
    }

    pub fn bucket_mut(&mut self, name: &str) -> Option<&mut BucketData> {
        self.children.get_mut(name)
    }

    pub fn delete_bucket(&mut self, name: &str) -> Option<BucketData> {
        self.children.remove(name)
    }

    pub fn put(&mut self, key: &str, value: &str) {
        self.props.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    pub fn delete(&mut self, key: &str) -> Option<String> {
        self.props.remove(key)
    }

    pub fn for_each<F: FnMut(&str, &str)>(&self, mut f: F) {
        for (k, v) in &self.props {
            f(k, v);
        }
    }

    pub fn for_each_bucket<F: FnMut(&str, &BucketData)>(&self, mut f: F) {
        for (k, v) in &self.children {
            f(k, v);
        }
    }

    pub fn is_empty_of_children(&self) -> bool {
        self.children.is_empty()
    }
}

/// Navigate from `root` through `segments`, returning `None` as soon as a
/// segment is missing.
pub fn navigate<'a>(root: &'a BucketData, segments: &[String]) -> Option<&'a BucketData> {
    let mut cur = root;
    for s in segments {
        cur = cur.bucket(s)?;
    }
    Some(cur)
}

pub fn navigate_mut<'a>(root: &'a mut BucketData, segments: &[String]) -> Option<&'a mut BucketData> {
    let mut cur = root;
    for s in segments {
        cur = cur.bucket_mut(s)?;
    }
    Some(cur)
}

/// Like [`navigate_mut`] but creates every missing bucket along the way —
/// the primitive `create_path` (§4.B) is built from.
pub fn navigate_create<'a>(root: &'a mut BucketData, segments: &[String]) -> &'a mut BucketData {
    let mut cur = root;
    for s in segments {
        cur = cur.create_bucket_if_not_exists(s);
    }
    cur
}
