// src/fs_io.rs
//! Reading source files, writing reconstructed files, listing directories.

use crate::error::{ LockerError, Result };
use std::fs;
use std::path::{ Path, PathBuf };
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub path: PathBuf,
    /// Path below the listed directory
    pub relative: PathBuf,
    pub kind: FileKind,
}

pub fn read_source(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| LockerError::io(path, e))
}

/// Write `data` to `path`, creating missing parent directories and
/// overwriting any existing file.
pub fn write_target(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| LockerError::io(parent, e))?;
        }
    }
    fs::write(path, data).map_err(|e| LockerError::io(path, e))
}

/// Entries of `dir` sorted by name. With `recursive`, subdirectories are
/// listed before their contents. Symlinks and special files are skipped.
pub fn list_dir(dir: &Path, recursive: bool) -> Result<Vec<DirEntry>> {
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .sort_by_file_name();

    let mut entries = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
            let source = e.into_io_error().unwrap_or_else(|| std::io::Error::other("filesystem loop"));
            LockerError::io(path, source)
        })?;

        let file_type = entry.file_type();
        let kind = if file_type.is_file() {
            FileKind::File
        } else if file_type.is_dir() {
            FileKind::Directory
        } else {
            log::debug!("Skipping {} (not a regular file or directory)", entry.path().display());
            continue;
        };

        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path()).to_path_buf();
        entries.push(DirEntry { path: entry.path().to_path_buf(), relative, kind });
    }
    Ok(entries)
}
