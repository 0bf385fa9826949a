//! Backend I/O client adapter (spec §4.7): the narrow interface the core
//! uses for all real backing I/O, so the I/O engine never couples to a
//! specific interface family. Grounded on `adapter/posix/posix.h`'s `API`
//! struct for the *set* of operations a concrete backend must provide, and
//! on the teacher's `StorageBackend` trait (`src/backend/mod.rs`) for the
//! shape of a small `Send + Sync` trait the rest of the crate is generic
//! over.

pub mod mpi;
pub mod posix;
pub mod stdio;

use crate::error::Result;

/// Metadata returned by `backend_stat`, mirroring an fstat-equivalent call
/// (spec §4.7).
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendStat {
    pub size: u64,
    pub mtime: u64,
    pub atime: u64,
    pub ctime: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub dev: u64,
    pub inode: u64,
    pub blksize: u32,
}

/// The single interface the I/O engine, registry, and flush pipeline see
/// regardless of which real call family (POSIX descriptors, STDIO
/// streams, MPI-IO communicator-scoped handles) backs it. Three concrete
/// implementations exist (`PosixBackend`, `StdioBackend`, `MpiBackend`);
/// collective semantics are each adapter's own responsibility, not the
/// core's (spec §1, §4.7).
pub trait BackendClient: Send + Sync {
    type Handle: Send + Sync + Clone;

    fn backend_open(&self, path: &str, flags: crate::types::OpenFlags) -> Result<Self::Handle>;

    /// Opens, reads, and closes internally with a shared lock held for
    /// the duration of the read (spec §4.7) — used by gap reads, which
    /// never hold a live handle of their own.
    fn backend_read(&self, path: &str, offset: u64, out: &mut [u8]) -> Result<usize>;

    /// Opens, writes, and closes internally (spec §4.7) — used by the
    /// flush pipeline and write-through fallback.
    fn backend_write(&self, path: &str, offset: u64, data: &[u8]) -> Result<usize>;

    fn backend_stat(&self, handle: &Self::Handle) -> Result<BackendStat>;

    fn backend_close(&self, handle: Self::Handle) -> Result<()>;

    fn backend_sync(&self, handle: &Self::Handle) -> Result<()>;

    fn backend_unlink(&self, path: &str) -> Result<()>;

    fn backend_exists(&self, path: &str) -> bool;

    fn backend_size(&self, path: &str) -> u64;
}
