//! `Bucket`: the collection of blobs belonging to one tracked file
//! (spec §3, §4.2). Grounded on `hermes::api::Bucket`
//! (`original_source/src/api/bucket.h`), reduced to the fields the core
//! itself needs — name, id, size, dirty tracking — since placement policy
//! and cross-node RPC are out of scope (spec §1).

use std::collections::BTreeSet;

use crate::types::BucketId;

#[derive(Debug)]
pub struct Bucket {
    pub id: BucketId,
    pub canonical_path: String,
    /// Page indices with a blob currently stored, kept sorted the same way
    /// the original's `CompareBlobs` numeric-string comparator orders
    /// `st_blobs`.
    pub blobs: BTreeSet<u32>,
    pub total_size: u64,
    pub dirty_pages: BTreeSet<u32>,
}

impl Bucket {
    pub fn new(id: BucketId, canonical_path: String) -> Self {
        Self {
            id,
            canonical_path,
            blobs: BTreeSet::new(),
            total_size: 0,
            dirty_pages: BTreeSet::new(),
        }
    }

    pub fn mark_dirty(&mut self, page_index: u32) {
        self.blobs.insert(page_index);
        self.dirty_pages.insert(page_index);
    }

    pub fn clear_dirty(&mut self, page_index: u32) {
        self.dirty_pages.remove(&page_index);
    }

    pub fn remove_blob(&mut self, page_index: u32) {
        self.blobs.remove(&page_index);
        self.dirty_pages.remove(&page_index);
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty_pages.is_empty()
    }
}
