//! Error types for archive operations

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the archive error type
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Errors raised while packing, compressing or unpacking archives
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Compression format name is not in the registry
    #[error("'{0}' is unsupported compression format")]
    UnknownFormat(String),

    /// The raw pass-through format cannot hold a multi-file archive
    #[error("compression format 'none' does not produce an archive")]
    NotAnArchive,

    /// Archive entry would be written outside the destination directory
    #[error("archive entry escapes destination: {}", .0.display())]
    UnsafeEntry(PathBuf),

    /// Source file for an archive is not below the source directory
    #[error("{} is not inside {}", .path.display(), .root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },

    /// Directory traversal failed
    #[error("failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ArchiveError {
    /// True when the consumer side of a pipe went away before the producer finished.
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, ArchiveError::Io(e) if e.kind() == io::ErrorKind::BrokenPipe)
    }
}
