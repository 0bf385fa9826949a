//! Byte-oriented (POSIX-like) backend adapter. Grounded on
//! `adapter/posix/posix.h`'s `API` dlsym table for the operation set, and
//! on `adapter_utils.cc`'s `ReadGap` for the `pread` + `flock(LOCK_SH)`
//! belt-and-suspenders pairing gap reads use. This crate never resolves
//! symbols dynamically (out of scope per spec §1/§9) — it opens real
//! files through `std::fs::File` and issues positioned reads/writes
//! through `libc::pread`/`libc::pwrite` on unix, matching the original's
//! actual syscalls rather than moving a shared file cursor.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;

use crate::backend::{BackendClient, BackendStat};
use crate::error::{HermesError, Result};
use crate::types::OpenFlags;

#[derive(Debug, Clone)]
pub struct PosixHandle {
    path: String,
}

/// Byte-oriented backend wrapping real file descriptors. One instance is
/// shared process-wide; each operation opens (or reuses, for `handle`
/// based calls) a real `File` and issues a positioned syscall so
/// concurrent gap reads and writes on different offsets of the same file
/// never contend on a shared cursor.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixBackend;

fn open_options(flags: OpenFlags) -> OpenOptions {
    let mut opts = OpenOptions::new();
    opts.read(flags.read || !flags.write);
    opts.write(flags.write);
    opts.create(flags.create);
    opts.truncate(flags.truncate);
    opts.append(flags.append);
    if flags.exclusive {
        opts.create_new(true);
    }
    opts
}

fn pread(file: &File, offset: u64, buf: &mut [u8]) -> Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    let n = unsafe {
        libc::pread(
            file.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            offset as libc::off_t,
        )
    };
    if n < 0 {
        return Err(HermesError::Backend(std::io::Error::last_os_error()));
    }
    Ok(n as usize)
}

fn pwrite(file: &File, offset: u64, buf: &[u8]) -> Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    let n = unsafe {
        libc::pwrite(
            file.as_raw_fd(),
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            offset as libc::off_t,
        )
    };
    if n < 0 {
        return Err(HermesError::Backend(std::io::Error::last_os_error()));
    }
    Ok(n as usize)
}

/// Advisory shared lock for the duration of a gap read, matching
/// `ReadGap`'s `flock(fd, LOCK_SH)` / `LOCK_UN` bracket.
fn with_shared_lock<R>(file: &File, f: impl FnOnce() -> Result<R>) -> Result<R> {
    use fs2::FileExt;
    file.lock_shared().map_err(HermesError::Backend)?;
    let result = f();
    let _ = file.unlock();
    result
}

impl BackendClient for PosixBackend {
    type Handle = PosixHandle;

    fn backend_open(&self, path: &str, flags: OpenFlags) -> Result<Self::Handle> {
        let file = open_options(flags).open(path).map_err(HermesError::Backend)?;
        drop(file);
        Ok(PosixHandle {
            path: path.to_string(),
        })
    }

    fn backend_read(&self, path: &str, offset: u64, out: &mut [u8]) -> Result<usize> {
        let file = File::open(path).map_err(HermesError::Backend)?;
        with_shared_lock(&file, || pread(&file, offset, out))
    }

    fn backend_write(&self, path: &str, offset: u64, data: &[u8]) -> Result<usize> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(path)
            .map_err(HermesError::Backend)?;
        pwrite(&file, offset, data)
    }

    fn backend_stat(&self, handle: &Self::Handle) -> Result<BackendStat> {
        let meta = std::fs::metadata(&handle.path).map_err(HermesError::Backend)?;
        Ok(stat_from_metadata(&meta))
    }

    fn backend_close(&self, _handle: Self::Handle) -> Result<()> {
        Ok(())
    }

    fn backend_sync(&self, handle: &Self::Handle) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .open(&handle.path)
            .map_err(HermesError::Backend)?;
        file.sync_all().map_err(HermesError::Backend)
    }

    fn backend_unlink(&self, path: &str) -> Result<()> {
        std::fs::remove_file(path).map_err(HermesError::Backend)
    }

    fn backend_exists(&self, path: &str) -> bool {
        std::path::Path::new(path).exists()
    }

    fn backend_size(&self, path: &str) -> u64 {
        std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }
}

#[cfg(unix)]
fn stat_from_metadata(meta: &std::fs::Metadata) -> BackendStat {
    use std::os::unix::fs::MetadataExt;
    BackendStat {
        size: meta.len(),
        mtime: meta.mtime() as u64,
        atime: meta.atime() as u64,
        ctime: meta.ctime() as u64,
        mode: meta.mode(),
        uid: meta.uid(),
        gid: meta.gid(),
        dev: meta.dev(),
        inode: meta.ino(),
        blksize: meta.blksize() as u32,
    }
}

#[cfg(not(unix))]
fn stat_from_metadata(meta: &std::fs::Metadata) -> BackendStat {
    BackendStat {
        size: meta.len(),
        ..Default::default()
    }
}
