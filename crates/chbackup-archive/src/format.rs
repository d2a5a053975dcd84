//! Archive format registry.
//!
//! Maps a compression format name to the file extension used for remote
//! objects and to the codec that wraps the tar stream.

use crate::error::{ArchiveError, Result};
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

/// Name of the sentinel format that bypasses both tar and compression.
pub const RAW_FORMAT_NAME: &str = "none";

/// Supported archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    /// Plain tar, no compression
    Tar,
    /// Tar inside an lz4 frame stream
    Lz4,
    /// Tar compressed with bzip2
    Bzip2,
    /// Tar compressed with gzip
    Gzip,
    /// Tar inside a snappy frame stream
    Snappy,
    /// Tar compressed with xz
    Xz,
    /// No tar container, bytes are transferred unchanged
    Raw,
}

/// Every archive-producing format, in registry order.
pub const ARCHIVE_FORMATS: &[ArchiveFormat] = &[
    ArchiveFormat::Tar,
    ArchiveFormat::Lz4,
    ArchiveFormat::Bzip2,
    ArchiveFormat::Gzip,
    ArchiveFormat::Snappy,
    ArchiveFormat::Xz,
];

impl ArchiveFormat {
    /// Looks up a format by its configuration name.
    ///
    /// Returns `None` for names that are not in the registry. `"none"`
    /// resolves to [`ArchiveFormat::Raw`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "tar" => Some(Self::Tar),
            "lz4" => Some(Self::Lz4),
            "bzip2" => Some(Self::Bzip2),
            "gzip" => Some(Self::Gzip),
            "sz" => Some(Self::Snappy),
            "xz" => Some(Self::Xz),
            RAW_FORMAT_NAME => Some(Self::Raw),
            _ => None,
        }
    }

    /// Guesses the format of a remote object from its file name.
    ///
    /// Only archive formats are considered; a name without a known archive
    /// extension yields `None`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        // Longest extensions first so "x.tar.gz" never matches plain "tar"
        let mut candidates: Vec<ArchiveFormat> = ARCHIVE_FORMATS.to_vec();
        candidates.sort_by_key(|f| std::cmp::Reverse(f.extension().len()));
        candidates
            .into_iter()
            .find(|f| name.ends_with(&format!(".{}", f.extension())))
    }

    /// Configuration name of the format.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tar => "tar",
            Self::Lz4 => "lz4",
            Self::Bzip2 => "bzip2",
            Self::Gzip => "gzip",
            Self::Snappy => "sz",
            Self::Xz => "xz",
            Self::Raw => RAW_FORMAT_NAME,
        }
    }

    /// File extension for remote objects, without the leading dot.
    ///
    /// Empty for [`ArchiveFormat::Raw`].
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Tar => "tar",
            Self::Lz4 => "tar.lz4",
            Self::Bzip2 => "tar.bz2",
            Self::Gzip => "tar.gz",
            Self::Snappy => "tar.sz",
            Self::Xz => "tar.xz",
            Self::Raw => "",
        }
    }

    /// Whether the format wraps data in a tar container.
    pub fn is_archive(&self) -> bool {
        !matches!(self, Self::Raw)
    }

    /// Appends this format's extension to a base name.
    pub fn file_name(&self, base: &str) -> String {
        if self.is_archive() {
            format!("{}.{}", base, self.extension())
        } else {
            base.to_string()
        }
    }

    /// Wraps a writer with this format's compression codec.
    ///
    /// `level` is clamped to the codec's valid range; lz4 and snappy have no
    /// levels and ignore it. Tar and raw return the writer unchanged.
    pub fn encoder<W: Write>(&self, writer: W, level: u32) -> Encoder<W> {
        match self {
            Self::Tar | Self::Raw => Encoder::Plain(writer),
            Self::Gzip => Encoder::Gzip(flate2::write::GzEncoder::new(
                writer,
                flate2::Compression::new(level.clamp(1, 9)),
            )),
            Self::Bzip2 => Encoder::Bzip2(bzip2::write::BzEncoder::new(
                writer,
                bzip2::Compression::new(level.clamp(1, 9)),
            )),
            Self::Xz => Encoder::Xz(xz2::write::XzEncoder::new(writer, level.clamp(0, 9))),
            Self::Lz4 => Encoder::Lz4(lz4_flex::frame::FrameEncoder::new(writer)),
            Self::Snappy => Encoder::Snappy(snap::write::FrameEncoder::new(writer)),
        }
    }

    /// Wraps a reader with this format's decompression codec.
    pub fn decoder<'a, R: Read + Send + 'a>(&self, reader: R) -> Box<dyn Read + Send + 'a> {
        match self {
            Self::Tar | Self::Raw => Box::new(reader),
            Self::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
            Self::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(reader)),
            Self::Xz => Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)),
            Self::Lz4 => Box::new(lz4_flex::frame::FrameDecoder::new(reader)),
            Self::Snappy => Box::new(snap::read::FrameDecoder::new(reader)),
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ArchiveFormat {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| ArchiveError::UnknownFormat(s.to_string()))
    }
}

/// Compressing writer produced by [`ArchiveFormat::encoder`].
///
/// Must be closed with [`Encoder::finish`]; dropping it may lose the
/// codec's trailing frame.
pub enum Encoder<W: Write> {
    Plain(W),
    Gzip(flate2::write::GzEncoder<W>),
    Bzip2(bzip2::write::BzEncoder<W>),
    Xz(xz2::write::XzEncoder<W>),
    Lz4(lz4_flex::frame::FrameEncoder<W>),
    Snappy(snap::write::FrameEncoder<W>),
}

impl<W: Write> Encoder<W> {
    /// Writes the codec trailer and returns the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Encoder::Plain(mut w) => {
                w.flush()?;
                Ok(w)
            }
            Encoder::Gzip(e) => e.finish(),
            Encoder::Bzip2(e) => e.finish(),
            Encoder::Xz(e) => e.finish(),
            Encoder::Lz4(e) => e.finish().map_err(io::Error::other),
            Encoder::Snappy(e) => e
                .into_inner()
                .map_err(|e| io::Error::new(e.error().kind(), e.error().to_string())),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Plain(w) => w.write(buf),
            Encoder::Gzip(e) => e.write(buf),
            Encoder::Bzip2(e) => e.write(buf),
            Encoder::Xz(e) => e.write(buf),
            Encoder::Lz4(e) => e.write(buf),
            Encoder::Snappy(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Plain(w) => w.flush(),
            Encoder::Gzip(e) => e.flush(),
            Encoder::Bzip2(e) => e.flush(),
            Encoder::Xz(e) => e.flush(),
            Encoder::Lz4(e) => e.flush(),
            Encoder::Snappy(e) => e.flush(),
        }
    }
}
