//! Open-file registry (spec §4.4): per-process table keyed by `(device,
//! inode)` of [`AdapterStat`] entries. Grounded on
//! `adapter/filesystem/filesystem_mdm.{h,cc}`'s `path_to_hermes_file_` /
//! `hermes_file_to_stat_` dual-map shape and
//! `MetadataManager::{Create,Update,Find,Delete}`'s read/erase/re-insert
//! update pattern.

use std::collections::{BTreeSet, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::Receiver;
use parking_lot::RwLock;

use crate::types::{BucketId, OpenFlags, SeekFrom};

/// `(device, inode)` pair identifying one physical file, the stable key
/// dup/reopen of the same file shares state under (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle {
    pub dev: u64,
    pub inode: u64,
}

/// Per-open state (spec §3's `AdapterStat`). `touched_blobs` mirrors the
/// original's `st_blobs` (`adapter/filesystem/filesystem.h`) — an ordered
/// set of blob names accessed through this handle, numerically ordered
/// the same way the original's `CompareBlobs` comparator orders them, so
/// flush only has to walk the blobs this handle actually touched rather
/// than the whole bucket.
#[derive(Debug, Clone)]
pub struct AdapterStat {
    pub bucket_id: BucketId,
    pub ref_count: u32,
    pub flags: OpenFlags,
    pub position: u64,
    pub size: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub mode_bits: u32,
    pub uid: u32,
    pub gid: u32,
    pub touched_blobs: BTreeSet<u32>,
}

impl AdapterStat {
    pub fn new(bucket_id: BucketId, flags: OpenFlags, size: u64) -> Self {
        let now = now_secs();
        let position = if flags.append { size } else { 0 };
        Self {
            bucket_id,
            ref_count: 1,
            flags,
            position,
            size,
            atime: now,
            mtime: now,
            ctime: now,
            mode_bits: 0o644,
            uid: 0,
            gid: 0,
            touched_blobs: BTreeSet::new(),
        }
    }

    pub fn touch_access(&mut self) {
        self.atime = now_secs();
    }

    pub fn touch_modify(&mut self) {
        let now = now_secs();
        self.mtime = now;
        self.ctime = now;
    }

    /// Records that this handle's own I/O touched `page_index` (spec §3.1
    /// supplement: mirrors the original's `st_blobs`). Flush itself still
    /// walks the bucket's full `DirtyBlobSet` (spec §3 defines it as
    /// per-bucket, and a handle closing must not skip blobs a sibling
    /// handle dirtied) — this set is for per-handle introspection, e.g.
    /// diagnosing which blobs a given open actually wrote.
    pub fn mark_touched(&mut self, page_index: u32) {
        self.touched_blobs.insert(page_index);
    }

    /// `lseek`-style position update honoring append discipline (spec
    /// §4.4's Seek rule: append mode is a no-op returning current size).
    pub fn seek(&mut self, from: SeekFrom) -> u64 {
        if self.flags.append {
            return self.size;
        }
        self.position = match from {
            SeekFrom::Start(off) => off,
            SeekFrom::Current(delta) => add_signed(self.position, delta),
            SeekFrom::End(delta) => add_signed(self.size, delta),
        };
        self.position
    }
}

pub(crate) fn add_signed(base: u64, delta: i64) -> u64 {
    if delta >= 0 {
        base.saturating_add(delta as u64)
    } else {
        base.saturating_sub((-delta) as u64)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Per-process table of open-file entries plus a path-indexed secondary
/// index for `find_by_path` (spec §4.4). Protected by a single
/// reader/writer lock — lookups common, inserts rare, per §5's
/// shared-resource policy.
#[derive(Default)]
pub struct OpenFileRegistry {
    entries: RwLock<HashMap<FileHandle, AdapterStat>>,
    by_path: RwLock<HashMap<String, Vec<FileHandle>>>,
}

impl OpenFileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, handle: FileHandle) -> Option<AdapterStat> {
        self.entries.read().get(&handle).cloned()
    }

    pub fn create(&self, handle: FileHandle, canonical_path: String, stat: AdapterStat) {
        self.entries.write().insert(handle, stat);
        self.by_path
            .write()
            .entry(canonical_path)
            .or_default()
            .push(handle);
    }

    pub fn update(&self, handle: FileHandle, stat: AdapterStat) {
        self.entries.write().insert(handle, stat);
    }

    /// Removes the entry regardless of path indexing bookkeeping; the
    /// caller is expected to have already driven `ref_count` to zero.
    pub fn delete(&self, handle: FileHandle, canonical_path: &str) {
        self.entries.write().remove(&handle);
        if let Some(list) = self.by_path.write().get_mut(canonical_path) {
            list.retain(|h| h != &handle);
        }
    }

    pub fn find_by_path(&self, canonical_path: &str) -> Vec<FileHandle> {
        self.by_path
            .read()
            .get(canonical_path)
            .cloned()
            .unwrap_or_default()
    }

    /// Mutates the entry under the registry's write lock and returns the
    /// updated copy, matching the read-mutate-reinsert pattern
    /// `MetadataManager::Update` uses throughout the original.
    pub fn with_mut<R>(&self, handle: FileHandle, f: impl FnOnce(&mut AdapterStat) -> R) -> Option<R> {
        let mut entries = self.entries.write();
        entries.get_mut(&handle).map(f)
    }
}

/// Table of in-flight asynchronous MPI-IO-style requests, keyed by a
/// caller-provided opaque id (spec §9: "MPI async requests <-> future-like
/// handles... a cancellable task keyed by a caller-provided opaque id").
/// Grounded on `filesystem_mdm.h`'s own
/// `request_map: std::unordered_map<uint64_t, HermesRequest*>` field.
#[derive(Default)]
pub struct IoRequestTable {
    requests: RwLock<HashMap<u64, Receiver<crate::error::Result<usize>>>>,
}

impl IoRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: u64, receiver: Receiver<crate::error::Result<usize>>) {
        self.requests.write().insert(id, receiver);
    }

    /// Blocks until the request identified by `id` completes (spec §9's
    /// `wait`). Returns `UnknownHandle` if `id` was never registered or
    /// has already been waited on.
    pub fn wait(&self, id: u64) -> crate::error::Result<usize> {
        let receiver = self
            .requests
            .write()
            .remove(&id)
            .ok_or(crate::error::HermesError::UnknownHandle)?;
        receiver
            .recv()
            .unwrap_or(Err(crate::error::HermesError::UnknownHandle))
    }

    pub fn waitall(&self, ids: &[u64]) -> Vec<crate::error::Result<usize>> {
        ids.iter().map(|id| self.wait(*id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_find_round_trips() {
        let registry = OpenFileRegistry::new();
        let handle = FileHandle { dev: 1, inode: 2 };
        let stat = AdapterStat::new(7, OpenFlags::read_write(), 0);
        registry.create(handle, "/tmp/a.bin".into(), stat);
        let found = registry.find(handle).unwrap();
        assert_eq!(found.bucket_id, 7);
        assert_eq!(found.ref_count, 1);
    }

    #[test]
    fn find_by_path_lists_all_handles() {
        let registry = OpenFileRegistry::new();
        let h1 = FileHandle { dev: 1, inode: 2 };
        let h2 = FileHandle { dev: 1, inode: 3 };
        registry.create(h1, "/tmp/a.bin".into(), AdapterStat::new(1, OpenFlags::read_write(), 0));
        registry.create(h2, "/tmp/a.bin".into(), AdapterStat::new(1, OpenFlags::read_write(), 0));
        let handles = registry.find_by_path("/tmp/a.bin");
        assert_eq!(handles.len(), 2);
    }

    #[test]
    fn delete_removes_from_both_indexes() {
        let registry = OpenFileRegistry::new();
        let handle = FileHandle { dev: 1, inode: 2 };
        registry.create(handle, "/tmp/a.bin".into(), AdapterStat::new(1, OpenFlags::read_write(), 0));
        registry.delete(handle, "/tmp/a.bin");
        assert!(registry.find(handle).is_none());
        assert!(registry.find_by_path("/tmp/a.bin").is_empty());
    }

    #[test]
    fn append_mode_seek_is_noop_returning_size() {
        let mut stat = AdapterStat::new(1, OpenFlags { append: true, ..OpenFlags::write_only() }, 100);
        assert_eq!(stat.position, 100);
        let pos = stat.seek(SeekFrom::Start(0));
        assert_eq!(pos, 100);
    }

    #[test]
    fn non_append_seek_honors_whence() {
        let mut stat = AdapterStat::new(1, OpenFlags::read_write(), 100);
        assert_eq!(stat.seek(SeekFrom::Start(10)), 10);
        assert_eq!(stat.seek(SeekFrom::Current(5)), 15);
        assert_eq!(stat.seek(SeekFrom::End(-10)), 90);
    }
}
