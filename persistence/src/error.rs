//! Error types for persistence operations

use std::fmt;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// The file operation a [`PersistenceError::Io`] failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Open,
    Read,
    Write,
    Rename,
    CreateDir,
    Remove,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Read => "read",
            Self::Write => "write",
            Self::Rename => "rename",
            Self::CreateDir => "create directory",
            Self::Remove => "remove",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    /// I/O failure, tagged with the operation and path so an open failure
    /// is distinguishable from a read or write failure.
    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        op: IoOp,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Bad or missing magic where one is required, an unsupported
    /// container version, or a truncated header.
    #[error("invalid project container: {0}")]
    Format(String),

    /// The underlying compression codec failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// Decoded data does not match what the container declared.
    #[error("corrupt project data: {0}")]
    Corruption(String),

    /// The document does not satisfy the project schema.
    #[error("project schema error: {0}")]
    Schema(String),
}

impl PersistenceError {
    pub(crate) fn io(op: IoOp, path: &Path, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}
