//! Project persistence for the Phosphor canvas editor.
//!
//! This crate owns everything between an in-memory
//! [`ProjectState`](phosphor_project::ProjectState) and its durable form:
//! the versioned zstd-compressed container format, the tolerant document
//! schema it wraps, the text-channel embedding used by session files, the
//! atomic file I/O underneath, and the per-canvas session cache on top.

pub mod cache;
pub mod compression;
pub mod container;
pub mod document;
pub mod error;
pub mod migration;
pub mod storage;


pub use cache::SessionCanvasCache;
pub use compression::CompressionLevel;
pub use compression::Compressor;
pub use container::ProjectBlob;
pub use error::IoOp;
pub use error::PersistenceError;
pub use error::Result;

/// Magic prefix of a Phosphor project container.
pub const CONTAINER_MAGIC: &[u8] = b"U8PZ";

/// Current container format version.
pub const CONTAINER_VERSION: u32 = 1;
