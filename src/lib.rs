//! # Hermes Buffering Core
//!
//! A tiered I/O buffering layer that interposes on file I/O, caching page
//! aligned fragments of file content in memory (and, through the same
//! [`backend::BackendClient`] seam, across other storage tiers) while
//! preserving POSIX, STDIO, and MPI-IO read/write semantics.
//!
//! ## Layout
//!
//! - [`mapper`] turns an absolute offset + length into page-aligned
//!   [`types::BlobPlacement`]s.
//! - [`store`] holds the bucket directory and per-page blob payloads.
//! - [`io`] composes reads/writes against the store, falling back to the
//!   backend for gap reads.
//! - [`registry`] tracks open-file state per `(device, inode)`.
//! - [`scope`] decides whether a path is under Hermes's management.
//! - [`flush`] destages dirty blobs back to the backend, synchronously or
//!   through a background drain thread.
//! - [`backend`] is the narrow interface the core uses for real I/O, with
//!   POSIX, STDIO, and MPI-IO flavored implementations.
//! - [`adapter`] wires all of the above into [`adapter::Core`] and exposes
//!   it through three thin per-family facades.
//!
//! ## Example
//!
//! ```rust
//! use hermes_buffer::adapter::PosixFacade;
//! use hermes_buffer::config::Config;
//! use hermes_buffer::types::OpenFlags;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = tempfile::tempdir()?;
//! let path = dir.path().join("data.bin");
//!
//! let mut config = Config::default();
//! config.page_size = 4096;
//! let facade = PosixFacade::new(config);
//!
//! let id = facade.open(path.to_str().unwrap(), OpenFlags::read_write())?;
//! facade.write(id, b"hello")?;
//! facade.close(id)?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod backend;
pub mod config;
pub mod error;
pub mod flush;
pub mod io;
pub mod mapper;
pub mod registry;
pub mod scope;
pub mod store;
pub mod types;

pub use adapter::{Core, FileId, MpiFacade, PosixFacade, StdioFacade};
pub use config::Config;
pub use error::{HermesError, Result};
