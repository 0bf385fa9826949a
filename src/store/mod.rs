//! Blob store & metadata (spec §4.2): the bucket directory plus per-blob
//! payload storage. Grounded on the teacher's `SegmentedBackend` +
//! `StorageBackend` split (`src/backend/segmented.rs`, `src/backend/mod.rs`)
//! for "directory behind a coarse lock, payload behind a finer one", and on
//! `adapter/filesystem/metadata_manager.{h,cc}` / `filesystem_mdm.{h,cc}`
//! for the bucket/path bookkeeping this module owns.

pub mod bucket;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::error::{HermesError, Result};
use crate::types::BucketId;

pub use bucket::Bucket;

/// Bucket directory: path <-> id maps, each bucket's own metadata behind a
/// lock held only for the duration of a directory mutation, exactly as
/// spec §4.2's concurrency contract requires.
struct Directory {
    path_to_id: HashMap<String, BucketId>,
    buckets: HashMap<BucketId, Bucket>,
}

/// Blob store: owns the bucket directory and the per-`(bucket, page)`
/// payload map. Payloads live in a `DashMap` (per-pack precedent:
/// `harborgrid-justin-rusty-db` uses `Bytes` + per-key locking the same
/// way) so a payload write never blocks an unrelated bucket's directory
/// read, matching §5's "bucket directory / blob payload / backend handle"
/// lock-ordering rule.
pub struct BlobStore {
    directory: RwLock<Directory>,
    payloads: DashMap<(BucketId, u32), Bytes>,
    /// Per-`(bucket_id, page_index)` mutex, acquired by callers composing a
    /// read-modify-write update (spec §4.2's existing-blob write cases) so
    /// the read and the subsequent `blob_put` are serialized against other
    /// writers of the same key — a bare `blob_get` then `blob_put` pair is
    /// not atomic on its own and would otherwise let two writers interleave
    /// and silently drop one's update, violating the "single writer per
    /// key, never partial data" contract. Entries are created lazily and
    /// never removed; the lock itself is cheap to leak for the lifetime of
    /// the process (one per page ever touched).
    blob_locks: DashMap<(BucketId, u32), Arc<Mutex<()>>>,
    next_id: AtomicU64,
    /// Per-blob capacity ceiling; `None` means unbounded. Exercises the
    /// `blob_put` capacity-failure path spec §4.2/§7 require callers to
    /// recover from via write-through fallback.
    capacity_bytes: Option<u64>,
    used_bytes: AtomicU64,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Construct a store that fails `blob_put` once `capacity_bytes` of
    /// payload would be exceeded, so the fallback path in §4.3 is
    /// exercisable without simulating real storage pressure.
    pub fn with_capacity(capacity_bytes: Option<u64>) -> Self {
        Self {
            directory: RwLock::new(Directory {
                path_to_id: HashMap::new(),
                buckets: HashMap::new(),
            }),
            payloads: DashMap::new(),
            blob_locks: DashMap::new(),
            next_id: AtomicU64::new(1),
            capacity_bytes,
            used_bytes: AtomicU64::new(0),
        }
    }

    /// Serializes a read-modify-write sequence against `(bucket_id,
    /// page_index)` (spec §4.2: "a single writer per (bucket_id,
    /// blob_name) is enforced"). Holds a per-key lock for the duration of
    /// `f`, so a caller that reads the current blob, composes a new
    /// buffer, and writes it back never races another writer doing the
    /// same for the same key. Safe to call `blob_get`/`blob_put` for other
    /// keys, or perform a backend gap read, from inside `f` — this lock is
    /// acquired after the directory lock and before any backend handle in
    /// the fixed lock order (spec §5).
    pub fn with_blob_lock<R>(&self, bucket_id: BucketId, page_index: u32, f: impl FnOnce() -> R) -> R {
        let lock = self
            .blob_locks
            .entry((bucket_id, page_index))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();
        f()
    }

    /// Idempotent: a second call for the same canonical path returns the
    /// same id (spec §4.2).
    pub fn get_or_create_bucket(&self, canonical_path: &str) -> BucketId {
        {
            let dir = self.directory.read();
            if let Some(&id) = dir.path_to_id.get(canonical_path) {
                return id;
            }
        }
        let mut dir = self.directory.write();
        if let Some(&id) = dir.path_to_id.get(canonical_path) {
            return id;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        dir.path_to_id.insert(canonical_path.to_string(), id);
        dir.buckets.insert(id, Bucket::new(id, canonical_path.to_string()));
        tracing::debug!(bucket_id = id, path = canonical_path, "create bucket");
        id
    }

    pub fn bucket_path(&self, bucket_id: BucketId) -> Option<String> {
        self.directory
            .read()
            .buckets
            .get(&bucket_id)
            .map(|b| b.canonical_path.clone())
    }

    pub fn bucket_contains_blob(&self, bucket_id: BucketId, page_index: u32) -> bool {
        self.payloads.contains_key(&(bucket_id, page_index))
    }

    /// Length-only query; must not copy payload (spec §4.2).
    pub fn blob_get_size(&self, bucket_id: BucketId, page_index: u32) -> u32 {
        self.payloads
            .get(&(bucket_id, page_index))
            .map(|b| b.len() as u32)
            .unwrap_or(0)
    }

    pub fn blob_get(&self, bucket_id: BucketId, page_index: u32) -> Option<Bytes> {
        self.payloads.get(&(bucket_id, page_index)).map(|b| b.clone())
    }

    /// Atomically replaces any existing blob of the same name. On success
    /// the blob is marked dirty on the owning bucket's directory entry.
    pub fn blob_put(&self, bucket_id: BucketId, page_index: u32, data: Bytes) -> Result<()> {
        if let Some(cap) = self.capacity_bytes {
            let existing = self.blob_get_size(bucket_id, page_index) as u64;
            let projected = self
                .used_bytes
                .load(Ordering::Relaxed)
                .saturating_sub(existing)
                + data.len() as u64;
            if projected > cap {
                tracing::warn!(
                    bucket_id,
                    page_index,
                    "blob store at capacity, falling back to write-through"
                );
                return Err(HermesError::Capacity {
                    bucket_id,
                    page_index,
                });
            }
        }

        let new_len = data.len() as u64;
        let old_len = self
            .payloads
            .insert((bucket_id, page_index), data)
            .map(|b| b.len() as u64)
            .unwrap_or(0);
        self.used_bytes
            .fetch_add(new_len.saturating_sub(old_len), Ordering::Relaxed);
        if old_len > new_len {
            self.used_bytes
                .fetch_sub(old_len - new_len, Ordering::Relaxed);
        }

        let mut dir = self.directory.write();
        if let Some(bucket) = dir.buckets.get_mut(&bucket_id) {
            bucket.mark_dirty(page_index);
        }
        tracing::debug!(bucket_id, page_index, len = new_len, "blob_put");
        Ok(())
    }

    pub fn blob_delete(&self, bucket_id: BucketId, page_index: u32) {
        if let Some((_, old)) = self.payloads.remove(&(bucket_id, page_index)) {
            self.used_bytes
                .fetch_sub(old.len() as u64, Ordering::Relaxed);
        }
        let mut dir = self.directory.write();
        if let Some(bucket) = dir.buckets.get_mut(&bucket_id) {
            bucket.remove_blob(page_index);
        }
    }

    pub fn bucket_total_blob_size(&self, bucket_id: BucketId) -> u64 {
        let pages: Vec<u32> = {
            let dir = self.directory.read();
            dir.buckets
                .get(&bucket_id)
                .map(|b| b.blobs.iter().copied().collect())
                .unwrap_or_default()
        };
        pages
            .into_iter()
            .map(|p| self.blob_get_size(bucket_id, p) as u64)
            .sum()
    }

    pub fn bucket_destroy(&self, bucket_id: BucketId) {
        let pages: Vec<u32> = {
            let mut dir = self.directory.write();
            let pages = dir
                .buckets
                .get(&bucket_id)
                .map(|b| b.blobs.iter().copied().collect())
                .unwrap_or_default();
            if let Some(bucket) = dir.buckets.remove(&bucket_id) {
                dir.path_to_id.remove(&bucket.canonical_path);
            }
            pages
        };
        for page in pages {
            if let Some((_, old)) = self.payloads.remove(&(bucket_id, page)) {
                self.used_bytes
                    .fetch_sub(old.len() as u64, Ordering::Relaxed);
            }
        }
        tracing::debug!(bucket_id, "destroy bucket");
    }

    /// Fails if `new_canonical_path` already names a bucket (spec §4.2,
    /// §7 rename-conflict taxonomy entry).
    pub fn bucket_rename(&self, bucket_id: BucketId, new_canonical_path: &str) -> Result<()> {
        let mut dir = self.directory.write();
        if dir.path_to_id.contains_key(new_canonical_path) {
            return Err(HermesError::RenameConflict(new_canonical_path.to_string()));
        }
        let old_path = match dir.buckets.get(&bucket_id) {
            Some(b) => b.canonical_path.clone(),
            None => return Err(HermesError::UnknownHandle),
        };
        dir.path_to_id.remove(&old_path);
        dir.path_to_id
            .insert(new_canonical_path.to_string(), bucket_id);
        if let Some(bucket) = dir.buckets.get_mut(&bucket_id) {
            bucket.canonical_path = new_canonical_path.to_string();
        }
        Ok(())
    }

    /// Snapshot of dirty page indices in ascending order (spec's
    /// `DirtyBlobSet`), used by the flush pipeline.
    pub fn dirty_pages(&self, bucket_id: BucketId) -> Vec<u32> {
        self.directory
            .read()
            .buckets
            .get(&bucket_id)
            .map(|b| b.dirty_pages.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn clear_dirty(&self, bucket_id: BucketId, page_index: u32) {
        let mut dir = self.directory.write();
        if let Some(bucket) = dir.buckets.get_mut(&bucket_id) {
            bucket.clear_dirty(page_index);
        }
    }

    pub fn bucket_size(&self, bucket_id: BucketId) -> u64 {
        self.directory
            .read()
            .buckets
            .get(&bucket_id)
            .map(|b| b.total_size)
            .unwrap_or(0)
    }

    pub fn set_bucket_size(&self, bucket_id: BucketId, size: u64) {
        let mut dir = self.directory.write();
        if let Some(bucket) = dir.buckets.get_mut(&bucket_id) {
            bucket.total_size = bucket.total_size.max(size);
        }
    }
}

impl Default for BlobStore {
    fn default() -> Self {
        Self::new()
    }
}
