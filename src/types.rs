//! Shared value types used across the page mapper, blob store, and I/O engine.

/// Numeric id of a bucket (one per tracked file).
pub type BucketId = u64;

/// Page index within a bucket. Indices start at 1; 0 is reserved.
pub type PageIndex = u32;

/// A single mapped unit of an I/O request: the bytes `[bucket_off, bucket_off
/// + blob_size)` of a file fall on page `page_index`, at `[blob_off,
/// blob_off + blob_size)` within that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobPlacement {
    pub page_index: PageIndex,
    pub blob_off: u32,
    pub blob_size: u32,
    pub bucket_off: u64,
}

impl BlobPlacement {
    /// Decimal blob name used as the store key's string form, matching the
    /// original's `std::to_string(page_index)` naming.
    pub fn blob_name(&self) -> String {
        self.page_index.to_string()
    }
}

/// Open-mode flags honored by the registry and I/O engine (spec.md §6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub append: bool,
    pub exclusive: bool,
    pub delete_on_close: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Default::default()
        }
    }

    pub fn write_only() -> Self {
        Self {
            write: true,
            ..Default::default()
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Default::default()
        }
    }
}

/// `lseek`-style whence values used by `Core::seek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}
