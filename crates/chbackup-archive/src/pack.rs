//! Tar packing and unpacking.
//!
//! Archives are produced and consumed as streams: `pack_files` writes into
//! any `Write` and `unpack_archive` reads from any `Read`, so neither side
//! ever holds a whole archive in memory or on disk.

use crate::error::{ArchiveError, Result};
use crate::format::ArchiveFormat;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder as TarBuilder};
use walkdir::WalkDir;

/// A file selected for archiving, relative to its source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the source directory
    pub path: PathBuf,

    /// Size in bytes at scan time
    pub size: u64,
}

/// Statistics about a packed archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackStats {
    /// Number of files written
    pub file_count: usize,

    /// Uncompressed bytes of file content
    pub total_size_bytes: u64,
}

/// Statistics about an unpacked archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackStats {
    /// Number of entries extracted
    pub entry_count: usize,

    /// Bytes of entry content extracted
    pub total_size_bytes: u64,
}

/// Lists every regular file below `source_dir`, sorted by relative path.
pub fn collect_files(source_dir: &Path) -> Result<Vec<SourceFile>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(source_dir).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel_path = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|_| ArchiveError::OutsideRoot {
                path: entry.path().to_path_buf(),
                root: source_dir.to_path_buf(),
            })?;

        files.push(SourceFile {
            path: rel_path.to_path_buf(),
            size: entry.metadata()?.len(),
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!("Found {} files under {:?}", files.len(), source_dir);
    Ok(files)
}

/// Splits files into consecutive groups whose total size stays within `max_size`.
///
/// A file larger than `max_size` gets a group of its own. A `max_size` of
/// zero disables splitting.
pub fn group_by_size(files: &[SourceFile], max_size: u64) -> Vec<Vec<SourceFile>> {
    if max_size == 0 {
        return if files.is_empty() {
            Vec::new()
        } else {
            vec![files.to_vec()]
        };
    }

    let mut groups = Vec::new();
    let mut current: Vec<SourceFile> = Vec::new();
    let mut current_size = 0u64;

    for file in files {
        if !current.is_empty() && current_size.saturating_add(file.size) > max_size {
            groups.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size = current_size.saturating_add(file.size);
        current.push(file.clone());
    }

    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Writes the named files as a tar archive compressed with `format`.
///
/// Paths in `files` are relative to `source_dir` and keep that relative
/// name inside the archive. Returns the statistics together with the
/// writer so the caller can close whatever it wraps.
pub fn pack_files<W: Write>(
    source_dir: &Path,
    files: &[PathBuf],
    format: ArchiveFormat,
    level: u32,
    writer: W,
) -> Result<(PackStats, W)> {
    if !format.is_archive() {
        return Err(ArchiveError::NotAnArchive);
    }

    let encoder = format.encoder(writer, level);
    let mut tar = TarBuilder::new(encoder);
    tar.follow_symlinks(false);

    let mut stats = PackStats::default();
    for file_path in files {
        if file_path.is_absolute() {
            return Err(ArchiveError::OutsideRoot {
                path: file_path.clone(),
                root: source_dir.to_path_buf(),
            });
        }
        let full_path = source_dir.join(file_path);
        stats.total_size_bytes += std::fs::metadata(&full_path)?.len();
        tar.append_path_with_name(&full_path, file_path)?;
        stats.file_count += 1;
    }

    let encoder = tar.into_inner()?;
    let writer = encoder.finish()?;

    tracing::debug!(
        "Packed {} files ({} bytes) as {}",
        stats.file_count,
        stats.total_size_bytes,
        format
    );
    Ok((stats, writer))
}

/// Decodes `reader` with `format` and extracts the tar entries into `dest`.
///
/// Entries whose paths would land outside `dest` abort the extraction.
pub fn unpack_archive<R: Read + Send>(
    reader: R,
    format: ArchiveFormat,
    dest: &Path,
) -> Result<UnpackStats> {
    if !format.is_archive() {
        return Err(ArchiveError::NotAnArchive);
    }

    std::fs::create_dir_all(dest)?;

    let decoder = format.decoder(reader);
    let mut archive = Archive::new(decoder);
    archive.set_preserve_mtime(true);

    let mut stats = UnpackStats::default();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        let size = entry.header().size()?;

        if !entry.unpack_in(dest)? {
            return Err(ArchiveError::UnsafeEntry(entry_path));
        }

        stats.entry_count += 1;
        stats.total_size_bytes += size;
    }

    tracing::debug!(
        "Extracted {} entries ({} bytes) into {:?}",
        stats.entry_count,
        stats.total_size_bytes,
        dest
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ARCHIVE_FORMATS;
    use std::fs;
    use tempfile::TempDir;

    fn create_part_directory() -> std::io::Result<TempDir> {
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path();

        fs::create_dir_all(base.join("default/events/all_1_1_0"))?;
        fs::create_dir_all(base.join("default/events/all_2_2_0"))?;
        fs::write(base.join("default/events/all_1_1_0/data.bin"), "first part")?;
        fs::write(base.join("default/events/all_1_1_0/checksums.txt"), "abc")?;
        fs::write(base.join("default/events/all_2_2_0/data.bin"), "second part")?;

        Ok(temp_dir)
    }

    #[test]
    fn test_collect_files_is_sorted_and_relative() {
        let source = create_part_directory().unwrap();
        let files = collect_files(source.path()).unwrap();

        let names: Vec<_> = files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("default/events/all_1_1_0/checksums.txt"),
                PathBuf::from("default/events/all_1_1_0/data.bin"),
                PathBuf::from("default/events/all_2_2_0/data.bin"),
            ]
        );
        assert_eq!(files[1].size, "first part".len() as u64);
    }

    #[test]
    fn test_pack_unpack_every_format() {
        let source = create_part_directory().unwrap();
        let files: Vec<PathBuf> = collect_files(source.path())
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();

        for format in ARCHIVE_FORMATS {
            let (stats, archive) =
                pack_files(source.path(), &files, *format, 1, Vec::new()).unwrap();
            assert_eq!(stats.file_count, 3);

            let dest = TempDir::new().unwrap();
            let unpacked = unpack_archive(archive.as_slice(), *format, dest.path()).unwrap();
            assert_eq!(unpacked.entry_count, 3);
            assert_eq!(
                fs::read_to_string(dest.path().join("default/events/all_2_2_0/data.bin"))
                    .unwrap(),
                "second part"
            );
        }
    }

    #[test]
    fn test_pack_rejects_raw_format() {
        let source = create_part_directory().unwrap();
        let err = pack_files(source.path(), &[], ArchiveFormat::Raw, 1, Vec::new()).unwrap_err();
        assert!(matches!(err, ArchiveError::NotAnArchive));
    }

    #[test]
    fn test_unpack_rejects_escaping_entries() {
        let mut builder = TarBuilder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        let data = b"evil";
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        // set_path refuses "..", so write the raw name bytes
        let name = b"../escape.txt";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_cksum();
        builder.append(&header, &data[..]).unwrap();
        let archive = builder.into_inner().unwrap();

        let dest = TempDir::new().unwrap();
        let err = unpack_archive(archive.as_slice(), ArchiveFormat::Tar, dest.path()).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsafeEntry(_)));
        assert!(!dest.path().parent().unwrap().join("escape.txt").exists());
    }

    #[test]
    fn test_group_by_size() {
        let files: Vec<SourceFile> = [40u64, 50, 30, 200, 10]
            .iter()
            .enumerate()
            .map(|(i, size)| SourceFile {
                path: PathBuf::from(format!("f{}", i)),
                size: *size,
            })
            .collect();

        let groups = group_by_size(&files, 100);
        let sizes: Vec<Vec<u64>> = groups
            .iter()
            .map(|g| g.iter().map(|f| f.size).collect())
            .collect();
        assert_eq!(sizes, vec![vec![40, 50], vec![30], vec![200], vec![10]]);

        assert_eq!(group_by_size(&files, 0).len(), 1);
        assert!(group_by_size(&[], 100).is_empty());
    }
}
