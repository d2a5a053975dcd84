//! chbackup archive handling
//!
//! Everything between a local directory of table parts and the byte stream
//! stored remotely:
//!
//! - **Format registry**: compression format names, remote file extensions
//!   and the matching codecs
//! - **Packing**: streaming tar creation and safe extraction
//! - **Pipes**: bounded hand-off from blocking codecs to async uploads
//! - **Progress**: byte-level transfer reporting

pub mod error;
pub mod format;
pub mod pack;
pub mod pipe;
pub mod progress;

pub use error::{ArchiveError, Result};
pub use format::{ArchiveFormat, Encoder, ARCHIVE_FORMATS, RAW_FORMAT_NAME};
pub use pack::{
    collect_files, group_by_size, pack_files, unpack_archive, PackStats, SourceFile, UnpackStats,
};
pub use pipe::{PipeReader, PipeWriter};
pub use progress::{ProgressReader, TransferProgress};
