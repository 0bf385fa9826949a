//! Flush/destage pipeline (spec §4.6): writes a bucket's dirty blobs back
//! to its backing file, in two selectable modes. The synchronous path is
//! grounded directly on the flush framing visible in
//! `adapter/src/hermes/adapter/posix/posix.cc` around the `close`/`fsync`
//! handlers (flush-exclusion insert, per-blob write, exclusion erase).
//! The asynchronous mode has no retrievable analog in the filtered
//! original source — the real async drain lives in the daemon's RPC/
//! thread-pool layer, out of scope per spec §1 — so it is built fresh
//! with `crossbeam-channel`, already a teacher dependency
//! (`stable-fragmented-buffer`'s `Cargo.toml`), the same way
//! `demos/producer_consumer.rs` hands work from one thread to another.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};

use crate::backend::BackendClient;
use crate::error::Result;
use crate::scope::ScopeFilter;
use crate::store::BlobStore;
use crate::types::BucketId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    Sync,
    Async,
}

enum DrainMessage {
    Dirty { bucket_id: BucketId, path: String },
    Barrier(Sender<()>),
    Shutdown,
}

/// Drives dirty-blob destage for one process. `async_tx` is `Some` only
/// in [`FlushMode::Async`]; its drain thread processes `Dirty`
/// notifications in arrival order and replies to a `Barrier` message only
/// once every `Dirty` message queued ahead of it has been drained —
/// exactly the "close always awaits the drain" guarantee spec §4.6 and
/// §9.1's open-question resolution #3 require.
pub struct FlushPipeline<B: BackendClient + 'static> {
    store: Arc<BlobStore>,
    backend: Arc<B>,
    scope: Arc<ScopeFilter>,
    page_size: u32,
    mode: FlushMode,
    async_tx: Option<Sender<DrainMessage>>,
    drain_thread: Option<JoinHandle<()>>,
}

impl<B: BackendClient + 'static> FlushPipeline<B> {
    pub fn new(
        store: Arc<BlobStore>,
        backend: Arc<B>,
        scope: Arc<ScopeFilter>,
        page_size: u32,
        mode: FlushMode,
    ) -> Self {
        let (async_tx, drain_thread) = match mode {
            FlushMode::Sync => (None, None),
            FlushMode::Async => {
                let (tx, rx) = crossbeam_channel::unbounded::<DrainMessage>();
                let store = store.clone();
                let backend = backend.clone();
                let scope = scope.clone();
                let handle = std::thread::spawn(move || {
                    for msg in rx {
                        match msg {
                            DrainMessage::Dirty { bucket_id, path } => {
                                if let Err(e) =
                                    drain_bucket(&store, &backend, &scope, page_size, bucket_id, &path)
                                {
                                    tracing::warn!(bucket_id, error = %e, "async flush drain failed");
                                }
                            }
                            DrainMessage::Barrier(ack) => {
                                let _ = ack.send(());
                            }
                            DrainMessage::Shutdown => break,
                        }
                    }
                });
                (Some(tx), Some(handle))
            }
        };

        Self {
            store,
            backend,
            scope,
            page_size,
            mode,
            async_tx,
            drain_thread,
        }
    }

    /// Called after every write (spec §4.6: "On each write, a background
    /// task is notified"). No-op in synchronous mode, where destage only
    /// happens on an explicit `flush`/close.
    pub fn on_write(&self, bucket_id: BucketId, canonical_path: &str) {
        if let Some(tx) = &self.async_tx {
            let _ = tx.send(DrainMessage::Dirty {
                bucket_id,
                path: canonical_path.to_string(),
            });
        }
    }

    /// Explicit flush (spec §4.6). In synchronous mode this performs the
    /// destage inline; in asynchronous mode it blocks until the drain
    /// thread has processed every notification sent before this call.
    pub fn flush(&self, bucket_id: BucketId, canonical_path: &str) -> Result<()> {
        match self.mode {
            FlushMode::Sync => drain_bucket(
                &self.store,
                &self.backend,
                &self.scope,
                self.page_size,
                bucket_id,
                canonical_path,
            ),
            FlushMode::Async => {
                if let Some(tx) = &self.async_tx {
                    let (ack_tx, ack_rx) = bounded(0);
                    let _ = tx.send(DrainMessage::Barrier(ack_tx));
                    let _ = ack_rx.recv();
                }
                Ok(())
            }
        }
    }
}

impl<B: BackendClient + 'static> Drop for FlushPipeline<B> {
    fn drop(&mut self) {
        if let Some(tx) = &self.async_tx {
            let _ = tx.send(DrainMessage::Shutdown);
        }
        if let Some(handle) = self.drain_thread.take() {
            let _ = handle.join();
        }
    }
}

/// For each dirty blob in ascending page_index order, write its payload
/// to the backing file at `(page_index-1)*page_size`. Clears the dirty
/// marker for each blob as it succeeds, so partial progress on failure
/// remains visible (spec §4.6: "written blobs remain written, remaining
/// ones remain dirty"). The target path is added to the flush-exclusion
/// set for the whole call.
fn drain_bucket<B: BackendClient>(
    store: &Arc<BlobStore>,
    backend: &Arc<B>,
    scope: &Arc<ScopeFilter>,
    page_size: u32,
    bucket_id: BucketId,
    canonical_path: &str,
) -> Result<()> {
    let dirty = store.dirty_pages(bucket_id);
    if dirty.is_empty() {
        return Ok(());
    }
    let _guard = scope.exclude_for_io(std::path::Path::new(canonical_path));
    tracing::debug!(bucket_id, count = dirty.len(), "flushing dirty blobs");
    for page_index in dirty {
        let Some(data) = store.blob_get(bucket_id, page_index) else {
            continue;
        };
        let offset = (page_index as u64 - 1) * page_size as u64;
        backend.backend_write(canonical_path, offset, &data)?;
        store.clear_dirty(bucket_id, page_index);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::posix::PosixBackend;
    use crate::config::Config;
    use bytes::Bytes;

    fn setup() -> (Arc<BlobStore>, Arc<PosixBackend>, Arc<ScopeFilter>) {
        (
            Arc::new(BlobStore::new()),
            Arc::new(PosixBackend),
            Arc::new(ScopeFilter::new(Config::default())),
        )
    }

    #[test]
    fn sync_flush_writes_dirty_blobs_and_clears_dirty_set() {
        let (store, backend, scope) = setup();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        let path_str = path.to_str().unwrap().to_string();
        let bucket = store.get_or_create_bucket(&path_str);
        store.blob_put(bucket, 1, Bytes::from_static(b"hello")).unwrap();

        let pipeline = FlushPipeline::new(store.clone(), backend.clone(), scope, 1024, FlushMode::Sync);
        pipeline.flush(bucket, &path_str).unwrap();

        assert!(store.dirty_pages(bucket).is_empty());
        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(&on_disk[..5], b"hello");
    }

    #[test]
    fn async_flush_close_waits_for_drain() {
        let (store, backend, scope) = setup();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        let path_str = path.to_str().unwrap().to_string();
        let bucket = store.get_or_create_bucket(&path_str);
        store.blob_put(bucket, 1, Bytes::from_static(b"world")).unwrap();

        let pipeline = FlushPipeline::new(store.clone(), backend.clone(), scope, 1024, FlushMode::Async);
        pipeline.on_write(bucket, &path_str);
        pipeline.flush(bucket, &path_str).unwrap();

        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(&on_disk[..5], b"world");
    }

    #[test]
    fn empty_dirty_set_is_a_no_op() {
        let (store, backend, scope) = setup();
        let bucket = store.get_or_create_bucket("/tmp/nope.bin");
        let pipeline = FlushPipeline::new(store, backend, scope, 1024, FlushMode::Sync);
        pipeline.flush(bucket, "/tmp/nope.bin").unwrap();
    }
}
