// src/locker.rs
use crate::cache::{ DirtySet, Lookup, RecordCache, Unit };
use crate::chunker::{ DEFAULT_CHUNK_SIZE, FingerprintParams };
use crate::error::{ LockerError, Result, UnitFailure };
use crate::format::{ self, FormatError, UnitKind };
use crate::fs_io::{ self, FileKind };
use crate::recipe::{ FileRecipe, IngestStats };
use crate::storage::ChunkStore;
use log::{ debug, info, warn };
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{ Path, PathBuf };
use walkdir::WalkDir;

pub const LOCKER_DIR: &str = "Locker";
pub const META_DIR: &str = ".locker";
pub const FILES_DIR: &str = ".files";
pub const CHUNK_MAP_UNIT: &str = "ChunkMap.ser";
pub const FINGERPRINTER_UNIT: &str = "FingerPrinter.ser";
const RECORD_EXT: &str = ".ser";

/// Result of a `save` that wrote every pending unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub units_written: usize,
    pub units_deleted: usize,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockerStats {
    pub files: usize,
    pub chunks: usize,
    /// Bytes held by the chunk store
    pub stored_bytes: u64,
    /// Sum of the sizes of all tracked files
    pub logical_bytes: u64,
}

impl LockerStats {
    pub fn dedup_ratio(&self) -> f64 {
        if self.stored_bytes == 0 {
            return 1.0;
        }
        (self.logical_bytes as f64) / (self.stored_bytes as f64)
    }
}

/// A deduplicating store rooted at `<root>/Locker`.
///
/// The chunk store and fingerprint parameters are read when the locker is
/// opened. File records are read only when an operation needs them.
pub struct Locker {
    root: PathBuf, // <root>/Locker
    params: FingerprintParams,
    store: ChunkStore,
    records: RecordCache,
    dirty: DirtySet,
}

impl Locker {
    // =======================================================================
    // LIFECYCLE
    // =======================================================================

    /// Create a new locker under `root` with the given average chunk size.
    pub fn create(root: impl AsRef<Path>, chunk_size: usize) -> Result<Self> {
        let params = FingerprintParams::new(chunk_size)?;
        let locker_root = root.as_ref().join(LOCKER_DIR);

        if fs::symlink_metadata(&locker_root).is_ok() {
            return Err(LockerError::AlreadyExists(locker_root));
        }
        fs::create_dir(&locker_root).map_err(|e| LockerError::io(&locker_root, e))?;
        for dir in [META_DIR, FILES_DIR] {
            let path = locker_root.join(dir);
            fs::create_dir(&path).map_err(|e| LockerError::io(&path, e))?;
        }

        let mut locker = Locker {
            root: locker_root,
            params,
            store: ChunkStore::new(),
            records: RecordCache::default(),
            dirty: DirtySet::default(),
        };
        locker.dirty.mark(Unit::Checkpoint);
        locker.save()?;

        info!(
            "Created locker at {} (target chunk size {} bytes)",
            locker.root.display(),
            params.target_size
        );
        Ok(locker)
    }

    pub fn create_default(root: impl AsRef<Path>) -> Result<Self> {
        Self::create(root, DEFAULT_CHUNK_SIZE)
    }

    /// Open an existing locker. Loads the checkpoint, no file records.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let locker_root = root.as_ref().join(LOCKER_DIR);
        if !locker_root.join(META_DIR).is_dir() {
            return Err(LockerError::LockerNotFound(locker_root));
        }

        let params_path = locker_root.join(META_DIR).join(FINGERPRINTER_UNIT);
        let params: FingerprintParams = format::read_unit(&params_path, UnitKind::Fingerprinter)
            .map_err(|e| LockerError::from_read(&params_path, e))?;
        params
            .validate()
            .map_err(|reason| LockerError::corrupt(&params_path, FormatError::Inconsistent(reason)))?;

        let store = ChunkStore::load(&locker_root.join(META_DIR).join(CHUNK_MAP_UNIT))?;

        info!("Opened locker at {} ({} chunks)", locker_root.display(), store.len());
        Ok(Locker {
            root: locker_root,
            params,
            store,
            records: RecordCache::default(),
            dirty: DirtySet::default(),
        })
    }

    // =======================================================================
    // PUBLIC API
    // =======================================================================

    /// Chunk `data` and record it under `local_path`, replacing any earlier version.
    pub fn add_file(&mut self, local_path: &str, data: &[u8]) -> Result<IngestStats> {
        let path = normalize_local_path(local_path)?;
        let (recipe, stats) = FileRecipe::from_bytes(path.as_str(), data, &self.params, &mut self.store);

        if stats.new_chunks > 0 {
            self.dirty.mark(Unit::Checkpoint);
        }
        self.dirty.mark(Unit::Record(path.clone()));
        self.records.insert(recipe);

        debug!(
            "Added '{}' ({} bytes, {} chunks, {} new)",
            path,
            stats.bytes,
            stats.chunks,
            stats.new_chunks
        );
        Ok(stats)
    }

    /// Read `source` from disk and add it as `local_path`.
    pub fn add_path(&mut self, source: &Path, local_path: &str) -> Result<IngestStats> {
        let data = fs_io::read_source(source)?;
        self.add_file(local_path, &data)
    }

    /// Add the files in `dir`, keyed `<dir name>/<path inside dir>`.
    /// Returns how many files were added; an empty directory adds nothing.
    pub fn add_directory(&mut self, dir: &Path, recursive: bool) -> Result<usize> {
        if !dir.is_dir() {
            return Err(LockerError::NotADirectory(dir.to_path_buf()));
        }
        let prefix = match dir.file_name() {
            Some(name) => os_str_to_key(name, dir)?,
            None => String::new(), // "." or "/"
        };

        let own_root = fs::canonicalize(&self.root).map_err(|e| LockerError::io(&self.root, e))?;
        let dir_canonical = fs::canonicalize(dir).map_err(|e| LockerError::io(dir, e))?;

        let mut added = 0;
        for entry in fs_io::list_dir(dir, recursive)? {
            if entry.kind != FileKind::File {
                continue;
            }
            if dir_canonical.join(&entry.relative).starts_with(&own_root) {
                debug!("Skipping {} (inside the locker)", entry.path.display());
                continue;
            }
            let relative = path_to_key(&entry.relative, &entry.path)?;
            let local_path = if prefix.is_empty() { relative } else { format!("{}/{}", prefix, relative) };
            self.add_path(&entry.path, &local_path)?;
            added += 1;
        }

        if added == 0 {
            info!("Directory {} is empty. Nothing added to locker.", dir.display());
        }
        Ok(added)
    }

    /// Rebuild the bytes of `local_path`.
    pub fn read_file(&mut self, local_path: &str) -> Result<Vec<u8>> {
        let path = normalize_local_path(local_path)?;
        self.load_record(&path)?;
        self.resident_record(&path)?.to_bytes(&self.store)
    }

    /// Rebuild `local_path` and write it to `target`. Nothing is written
    /// unless the whole file could be reconstructed.
    pub fn retrieve(&mut self, local_path: &str, target: &Path) -> Result<u64> {
        let data = self.read_file(local_path)?;
        fs_io::write_target(target, &data)?;
        debug!("Retrieved '{}' to {} ({} bytes)", local_path, target.display(), data.len());
        Ok(data.len() as u64)
    }

    /// Forget `local_path`. Its chunks stay in the store.
    pub fn remove_file(&mut self, local_path: &str) -> Result<()> {
        let path = normalize_local_path(local_path)?;
        self.load_record(&path)?;
        self.records.tombstone(&path);
        self.dirty.mark(Unit::Record(path));
        Ok(())
    }

    pub fn contains(&mut self, local_path: &str) -> Result<bool> {
        let path = normalize_local_path(local_path)?;
        match self.load_record(&path) {
            Ok(_) => Ok(true),
            Err(LockerError::FileNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// All tracked local paths, sorted.
    pub fn list_files(&self) -> Result<Vec<String>> {
        let mut files = self.persisted_paths()?;
        for path in self.records.removed_paths() {
            files.remove(path);
        }
        files.extend(self.records.resident_paths().map(str::to_string));
        Ok(files.into_iter().collect())
    }

    /// Totals across the locker. Reads every record that is not resident,
    /// without caching it, and checks each against the chunks it names.
    pub fn stats(&self) -> Result<LockerStats> {
        let files = self.list_files()?;
        let mut logical_bytes = 0;
        for path in &files {
            logical_bytes += match self.records.lookup(path) {
                Lookup::Hit(recipe) => recipe.verify(&self.store)?,
                Lookup::Removed | Lookup::Miss => self.read_record(path)?.verify(&self.store)?,
            };
        }
        Ok(LockerStats {
            files: files.len(),
            chunks: self.store.len(),
            stored_bytes: self.store.stored_bytes(),
            logical_bytes,
        })
    }

    /// Persist exactly the pending units. A record that fails does not stop
    /// the others; all failures are reported together and stay pending.
    /// If the checkpoint fails, no record is written.
    pub fn save(&mut self) -> Result<SaveSummary> {
        let mut summary = SaveSummary::default();
        let mut failures = Vec::new();

        let mut checkpoint_failed = false;
        for unit in self.dirty.units() {
            // Records may name chunks that only the unsaved checkpoint holds
            if checkpoint_failed && matches!(unit, Unit::Record(_)) {
                failures.push(UnitFailure { unit, error: LockerError::CheckpointNotSaved });
                continue;
            }
            match self.save_unit(&unit) {
                Ok(Some(bytes)) => {
                    summary.units_written += 1;
                    summary.bytes_written += bytes;
                    self.dirty.clear(&unit);
                }
                Ok(None) => {
                    summary.units_deleted += 1;
                    self.dirty.clear(&unit);
                }
                Err(error) => {
                    warn!("Failed to save {}: {}", unit, error);
                    checkpoint_failed |= unit == Unit::Checkpoint;
                    failures.push(UnitFailure { unit, error });
                }
            }
        }

        let evicted = self.records.evict_clean(&self.dirty);
        if summary.units_written + summary.units_deleted > 0 {
            info!(
                "Saved {} unit(s), deleted {} ({} bytes), evicted {} record(s)",
                summary.units_written,
                summary.units_deleted,
                summary.bytes_written,
                evicted
            );
        }

        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(LockerError::Save(failures))
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn params(&self) -> &FingerprintParams {
        &self.params
    }

    pub fn chunk_count(&self) -> usize {
        self.store.len()
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn resident_records(&self) -> usize {
        self.records.resident()
    }

    pub fn pending_units(&self) -> Vec<Unit> {
        self.dirty.units()
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    // =======================================================================
    // INTERNAL HELPERS
    // =======================================================================

    fn record_path(&self, local_path: &str) -> PathBuf {
        let mut path = self.root.join(FILES_DIR);
        for part in local_path.split('/') {
            path.push(part);
        }
        let mut name = path.into_os_string();
        name.push(RECORD_EXT);
        PathBuf::from(name)
    }

    /// Make the record for `path` resident, loading it from disk if needed.
    fn load_record(&mut self, path: &str) -> Result<()> {
        match self.records.lookup(path) {
            Lookup::Hit(_) => Ok(()),
            Lookup::Removed => Err(LockerError::FileNotFound(path.to_string())),
            Lookup::Miss => {
                let recipe = self.read_record(path)?;
                debug!("Loaded record '{}' ({} chunks)", path, recipe.chunks.len());
                self.records.insert(recipe);
                Ok(())
            }
        }
    }

    fn resident_record(&self, path: &str) -> Result<&FileRecipe> {
        match self.records.lookup(path) {
            Lookup::Hit(recipe) => Ok(recipe),
            Lookup::Removed | Lookup::Miss => Err(LockerError::FileNotFound(path.to_string())),
        }
    }

    fn read_record(&self, path: &str) -> Result<FileRecipe> {
        let unit_path = self.record_path(path);
        let recipe: FileRecipe = match format::read_unit(&unit_path, UnitKind::FileRecord) {
            Ok(recipe) => recipe,
            Err(format::ReadError::Format(FormatError::Missing)) => {
                return Err(LockerError::FileNotFound(path.to_string()));
            }
            Err(e) => return Err(LockerError::from_read(&unit_path, e)),
        };
        if recipe.path != path {
            let reason = format!("unit holds record for '{}'", recipe.path);
            return Err(LockerError::corrupt(&unit_path, FormatError::Inconsistent(reason)));
        }
        Ok(recipe)
    }

    /// Some(bytes written) for a write, None for a deletion.
    fn save_unit(&self, unit: &Unit) -> Result<Option<u64>> {
        match unit {
            Unit::Checkpoint => {
                let meta = self.root.join(META_DIR);
                // Chunk map first, then parameters
                let mut bytes = self.store.persist(&meta.join(CHUNK_MAP_UNIT))?;
                let params_path = meta.join(FINGERPRINTER_UNIT);
                bytes += format::write_unit(&params_path, UnitKind::Fingerprinter, &self.params)
                    .map_err(|e| LockerError::io(&params_path, e))?;
                Ok(Some(bytes))
            }
            Unit::Record(path) => {
                let unit_path = self.record_path(path);
                match self.records.lookup(path) {
                    Lookup::Hit(recipe) => {
                        if let Some(parent) = unit_path.parent() {
                            fs::create_dir_all(parent).map_err(|e| LockerError::io(parent, e))?;
                        }
                        let bytes = format::write_unit(&unit_path, UnitKind::FileRecord, recipe)
                            .map_err(|e| LockerError::io(&unit_path, e))?;
                        debug!("Wrote record '{}'", path);
                        Ok(Some(bytes))
                    }
                    Lookup::Removed | Lookup::Miss => {
                        match fs::remove_file(&unit_path) {
                            Ok(()) => {}
                            // Added and removed within one session
                            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                            Err(e) => return Err(LockerError::io(&unit_path, e)),
                        }
                        debug!("Deleted record '{}'", path);
                        Ok(None)
                    }
                }
            }
        }
    }

    fn persisted_paths(&self) -> Result<BTreeSet<String>> {
        let files_dir = self.root.join(FILES_DIR);
        let mut paths = BTreeSet::new();

        for entry in WalkDir::new(&files_dir).min_depth(1) {
            let entry = entry.map_err(|e| {
                let source = e.into_io_error().unwrap_or_else(|| io::Error::other("filesystem loop"));
                LockerError::io(&files_dir, source)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&files_dir) else {
                continue;
            };
            let key = path_to_key(relative, entry.path())?;
            if let Some(local_path) = key.strip_suffix(RECORD_EXT) {
                paths.insert(local_path.to_string());
            }
        }
        Ok(paths)
    }
}

/// Turn a caller-supplied local path into a record key: `/`-separated,
/// no empty, `.` or `..` components, no directory component ending in `.ser`.
pub fn normalize_local_path(local_path: &str) -> Result<String> {
    let invalid = |reason| LockerError::InvalidPath { path: local_path.to_string(), reason };

    let mut parts = Vec::new();
    for part in local_path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => return Err(invalid("parent components are not allowed")),
            _ => parts.push(part),
        }
    }
    let Some((_, dirs)) = parts.split_last() else {
        return Err(invalid("path is empty"));
    };
    // `d.ser/x` would need a directory where the unit of `d` lives
    if dirs.iter().any(|dir| dir.ends_with(RECORD_EXT)) {
        return Err(invalid("directory components may not end in .ser"));
    }
    Ok(parts.join("/"))
}

fn os_str_to_key(name: &std::ffi::OsStr, origin: &Path) -> Result<String> {
    name.to_str().map(str::to_string).ok_or_else(|| LockerError::InvalidPath {
        path: origin.display().to_string(),
        reason: "path is not valid UTF-8",
    })
}

fn path_to_key(relative: &Path, origin: &Path) -> Result<String> {
    let parts = relative
        .components()
        .map(|c| os_str_to_key(c.as_os_str(), origin))
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_local_path() {
        assert_eq!(normalize_local_path("a.txt").unwrap(), "a.txt");
        assert_eq!(normalize_local_path("./docs//notes/a.txt").unwrap(), "docs/notes/a.txt");
        assert_eq!(normalize_local_path("docs\\a.txt").unwrap(), "docs/a.txt");
        assert_eq!(normalize_local_path("/abs/a.txt").unwrap(), "abs/a.txt");

        assert!(matches!(normalize_local_path("../a.txt"), Err(LockerError::InvalidPath { .. })));
        assert!(matches!(normalize_local_path("./"), Err(LockerError::InvalidPath { .. })));
        assert!(matches!(normalize_local_path("d.ser/x"), Err(LockerError::InvalidPath { .. })));
        assert_eq!(normalize_local_path("d.ser").unwrap(), "d.ser");
        assert!(matches!(normalize_local_path(""), Err(LockerError::InvalidPath { .. })));
    }

    #[test]
    fn test_create_layout() {
        let dir = TempDir::new().unwrap();
        let locker = Locker::create(dir.path(), 1024).unwrap();

        let root = dir.path().join("Locker");
        assert_eq!(locker.root(), root.as_path());
        assert!(root.join(".locker").join("ChunkMap.ser").is_file());
        assert!(root.join(".locker").join("FingerPrinter.ser").is_file());
        assert!(root.join(".files").is_dir());
        assert!(!locker.is_dirty(), "create persists the initial state");
    }

    #[test]
    fn test_record_unit_path_keeps_nesting() {
        let dir = TempDir::new().unwrap();
        let locker = Locker::create_default(dir.path()).unwrap();
        assert_eq!(
            locker.record_path("docs/notes/a.txt"),
            dir.path().join("Locker").join(".files").join("docs").join("notes").join("a.txt.ser")
        );
    }

    #[test]
    fn test_checkpoint_only_dirty_when_store_grows() {
        let dir = TempDir::new().unwrap();
        let mut locker = Locker::create_default(dir.path()).unwrap();

        locker.add_file("a.txt", b"XYZZY").unwrap();
        assert_eq!(locker.pending_units(), vec![Unit::Checkpoint, Unit::Record("a.txt".into())]);
        locker.save().unwrap();

        // Same content again: no new chunks, only the record is pending
        locker.add_file("b.txt", b"XYZZY").unwrap();
        assert_eq!(locker.pending_units(), vec![Unit::Record("b.txt".into())]);
    }

    #[test]
    fn test_add_then_remove_in_one_session() {
        let dir = TempDir::new().unwrap();
        let mut locker = Locker::create_default(dir.path()).unwrap();

        locker.add_file("tmp.txt", b"short lived").unwrap();
        locker.remove_file("tmp.txt").unwrap();
        assert!(!locker.contains("tmp.txt").unwrap());

        let summary = locker.save().unwrap();
        assert_eq!(summary.units_deleted, 1);
        assert!(locker.list_files().unwrap().is_empty());
    }

    #[test]
    fn test_stats() {
        let dir = TempDir::new().unwrap();
        let mut locker = Locker::create(dir.path(), 64).unwrap();
        let data = b"This is shared content between two files.".repeat(20);

        locker.add_file("a.txt", &data).unwrap();
        locker.add_file("b.txt", &data).unwrap();
        locker.save().unwrap();

        let stats = locker.stats().unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.logical_bytes, 2 * data.len() as u64);
        assert_eq!(stats.chunks, locker.chunk_count());
        assert!(stats.stored_bytes <= data.len() as u64);
        assert!(stats.dedup_ratio() >= 2.0);
    }
}
