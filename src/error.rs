//! Error taxonomy shared across the crate.
//!
//! Mirrors the shape of the teacher's `BlobError` (one variant per failure
//! class, struct variants where context helps) scaled up to cover backend
//! I/O, scope-filter, and registry failures.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HermesError {
    #[error("backend I/O failed: {0}")]
    Backend(#[from] std::io::Error),

    #[error("blob store out of capacity for bucket {bucket_id}, page {page_index}")]
    Capacity { bucket_id: u64, page_index: u32 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("rename target already exists: {0}")]
    RenameConflict(String),

    #[error("unknown handle")]
    UnknownHandle,

    #[error("path is not tracked by hermes")]
    NotTracked,

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, HermesError>;
