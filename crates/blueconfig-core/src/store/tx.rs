//! Read/write transaction handles over the bucket tree. A handle never
//! outlives the `view`/`update` call that created it (§9's "never hold a
//! handle beyond its owning transaction").

use super::bucket::{navigate, navigate_create, navigate_mut, BucketData};

pub struct ReadTx<'a> {
    pub(crate) root: &'a BucketData,
}

impl<'a> ReadTx<'a> {
    pub fn bucket(&self, segments: &[String]) -> Option<&BucketData> {
        navigate(self.root, segments)
    }
}

pub struct WriteTx<'a> {
    pub(crate) root: &'a mut BucketData,
}

impl<'a> WriteTx<'a> {
    pub fn bucket(&self, segments: &[String]) -> Option<&BucketData> {
        navigate(self.root, segments)
    }

    pub fn bucket_mut(&mut self, segments: &[String]) -> Option<&mut BucketData> {
        navigate_mut(self.root, segments)
    }

    /// Create every missing bucket along `segments`, returning the final one.
    pub fn create_path(&mut self, segments: &[String]) -> &mut BucketData {
        navigate_create(self.root, segments)
    }

    /// Remove the bucket at `segments` (and everything under it); returns
    /// whether it existed. `segments` must be non-empty — callers refuse to
    /// delete `root` itself one layer up.
    pub fn delete_path(&mut self, segments: &[String]) -> bool {
        if segments.is_empty() {
            return false;
        }
        let (last, parent_segs) = segments.split_last().expect("checked non-empty");
        match navigate_mut(self.root, parent_segs) {
            Some(parent) => parent.delete_bucket(last).is_some(),
            None => false,
        }
    }
}
