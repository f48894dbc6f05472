// tests/persistence_tests.rs

use locker::format::{ self, UnitKind };
use locker::{ FileRecipe, FingerprintParams, Locker, LockerError, Unit };
use std::fs;
use std::path::{ Path, PathBuf };
use std::time::SystemTime;
use tempfile::TempDir;
use walkdir::WalkDir;

fn locker_dir(root: &Path) -> PathBuf {
    root.join("Locker")
}

// Every file under the locker with its modification time and content
fn snapshot(root: &Path) -> Vec<(PathBuf, SystemTime, Vec<u8>)> {
    WalkDir::new(locker_dir(root))
        .sort_by_file_name()
        .into_iter()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let modified = entry.metadata().unwrap().modified().unwrap();
            let content = fs::read(entry.path()).unwrap();
            (entry.into_path(), modified, content)
        })
        .collect()
}

fn populated_locker() -> TempDir {
    let dir = TempDir::new().unwrap();
    let mut locker = Locker::create(dir.path(), 64).unwrap();
    locker.add_file("docs/a.txt", b"This is shared content between two files.").unwrap();
    locker.add_file("docs/b.txt", b"This is shared content between two files.").unwrap();
    locker.add_file("c.txt", b"This is unique content that lives alone.").unwrap();
    locker.save().unwrap();
    dir
}

#[test]
fn test_create_twice_fails() {
    let dir = TempDir::new().unwrap();
    Locker::create_default(dir.path()).unwrap();

    match Locker::create_default(dir.path()) {
        Err(LockerError::AlreadyExists(path)) => assert_eq!(path, locker_dir(dir.path())),
        Err(e) => panic!("expected AlreadyExists, got {}", e),
        Ok(_) => panic!("second create must fail"),
    }
}

#[test]
fn test_open_missing_locker() {
    let dir = TempDir::new().unwrap();
    let err = Locker::open(dir.path()).err().expect("open must fail");
    assert!(err.is_not_found());
    assert!(matches!(err, LockerError::LockerNotFound(_)));
}

#[test]
fn test_open_without_checkpoint_is_corrupt() {
    let dir = TempDir::new().unwrap();
    Locker::create_default(dir.path()).unwrap();
    fs::remove_file(locker_dir(dir.path()).join(".locker").join("ChunkMap.ser")).unwrap();

    let err = Locker::open(dir.path()).err().expect("open must fail");
    assert!(err.is_corrupt(), "unexpected error: {}", err);
}

#[test]
fn test_open_with_garbage_fingerprinter_is_corrupt() {
    let dir = TempDir::new().unwrap();
    Locker::create_default(dir.path()).unwrap();
    fs::write(locker_dir(dir.path()).join(".locker").join("FingerPrinter.ser"), b"garbage!!").unwrap();

    let err = Locker::open(dir.path()).err().expect("open must fail");
    assert!(err.is_corrupt(), "unexpected error: {}", err);
}

#[test]
fn test_parameters_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let params = *Locker::create(dir.path(), 8).unwrap().params();

    let locker = Locker::open(dir.path()).unwrap();
    assert_eq!(*locker.params(), params);
    assert_eq!(locker.params().target_size, 8);
}

#[test]
fn test_records_are_one_unit_per_path() {
    let dir = populated_locker();
    let files = locker_dir(dir.path()).join(".files");

    assert!(files.join("docs").join("a.txt.ser").is_file());
    assert!(files.join("docs").join("b.txt.ser").is_file());
    assert!(files.join("c.txt.ser").is_file());
}

#[test]
fn test_open_loads_no_records() {
    let dir = populated_locker();
    let mut locker = Locker::open(dir.path()).unwrap();
    assert_eq!(locker.resident_records(), 0);

    assert_eq!(locker.read_file("c.txt").unwrap(), b"This is unique content that lives alone.");
    assert_eq!(locker.resident_records(), 1, "only the requested record is loaded");

    // Retention: clean records are dropped on save
    locker.save().unwrap();
    assert_eq!(locker.resident_records(), 0);
}

#[test]
fn test_clean_save_writes_nothing() {
    let dir = populated_locker();
    let before = snapshot(dir.path());

    let mut locker = Locker::open(dir.path()).unwrap();
    locker.read_file("docs/a.txt").unwrap();
    let summary = locker.save().unwrap();

    assert_eq!(summary.units_written, 0);
    assert_eq!(summary.bytes_written, 0);
    assert_eq!(snapshot(dir.path()), before, "a read-only session must not touch disk");
}

#[test]
fn test_save_writes_only_dirty_record() {
    let dir = populated_locker();
    let before = snapshot(dir.path());

    // Same content as docs/a.txt: no new chunk, checkpoint stays clean
    let mut locker = Locker::open(dir.path()).unwrap();
    locker.add_file("d.txt", b"This is shared content between two files.").unwrap();
    assert_eq!(locker.pending_units(), vec![Unit::Record("d.txt".into())]);

    let summary = locker.save().unwrap();
    assert_eq!(summary.units_written, 1);

    let after = snapshot(dir.path());
    for entry in &before {
        assert!(after.contains(entry), "{} was rewritten", entry.0.display());
    }
    assert_eq!(after.len(), before.len() + 1);
}

#[test]
fn test_remove_persists() {
    let dir = populated_locker();
    {
        let mut locker = Locker::open(dir.path()).unwrap();
        locker.remove_file("docs/b.txt").unwrap();
        assert!(matches!(locker.read_file("docs/b.txt"), Err(LockerError::FileNotFound(_))));
        locker.save().unwrap();
    }

    let mut locker = Locker::open(dir.path()).unwrap();
    assert_eq!(locker.list_files().unwrap(), vec!["c.txt", "docs/a.txt"]);
    assert!(!locker.contains("docs/b.txt").unwrap());
    // Chunks are never collected
    assert_eq!(locker.read_file("docs/a.txt").unwrap(), b"This is shared content between two files.");
    assert!(matches!(locker.remove_file("docs/b.txt"), Err(LockerError::FileNotFound(_))));
}

#[test]
fn test_failed_unit_does_not_block_others() {
    let dir = TempDir::new().unwrap();
    let mut locker = Locker::create_default(dir.path()).unwrap();

    // A directory squatting on the unit path makes the rename fail
    let blocker = locker_dir(dir.path()).join(".files").join("bad.txt.ser");
    fs::create_dir(&blocker).unwrap();
    fs::write(blocker.join("keep"), b"x").unwrap();

    locker.add_file("bad.txt", b"cannot be saved").unwrap();
    locker.add_file("good.txt", b"saved fine").unwrap();

    match locker.save() {
        Err(LockerError::Save(failures)) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].unit, Unit::Record("bad.txt".into()));
        }
        other => panic!("expected a save failure, got {:?}", other),
    }
    // The failed unit is still pending, the rest is clean
    assert_eq!(locker.pending_units(), vec![Unit::Record("bad.txt".into())]);

    let mut reopened = Locker::open(dir.path()).unwrap();
    assert_eq!(reopened.read_file("good.txt").unwrap(), b"saved fine");

    // Clear the obstacle and retry
    fs::remove_dir_all(&blocker).unwrap();
    locker.save().unwrap();
    let mut reopened = Locker::open(dir.path()).unwrap();
    assert_eq!(reopened.read_file("bad.txt").unwrap(), b"cannot be saved");
}

#[test]
fn test_failed_checkpoint_holds_back_records() {
    let dir = TempDir::new().unwrap();
    let mut locker = Locker::create_default(dir.path()).unwrap();

    // The chunk map can't be staged, so the new chunk never reaches disk
    let blocker = locker_dir(dir.path()).join(".locker").join("ChunkMap.ser.tmp");
    fs::create_dir(&blocker).unwrap();

    locker.add_file("good.txt", b"needs a new chunk").unwrap();
    match locker.save() {
        Err(LockerError::Save(failures)) => {
            assert_eq!(failures.len(), 2);
            assert_eq!(failures[0].unit, Unit::Checkpoint);
            assert_eq!(failures[1].unit, Unit::Record("good.txt".into()));
            assert!(matches!(failures[1].error, LockerError::CheckpointNotSaved));
        }
        other => panic!("expected a save failure, got {:?}", other),
    }
    assert_eq!(locker.pending_units(), vec![Unit::Checkpoint, Unit::Record("good.txt".into())]);

    // No record on disk points at a chunk the checkpoint lacks
    let mut reopened = Locker::open(dir.path()).unwrap();
    assert!(reopened.list_files().unwrap().is_empty());
    assert!(reopened.read_file("good.txt").unwrap_err().is_not_found());

    fs::remove_dir(&blocker).unwrap();
    locker.save().unwrap();
    let mut reopened = Locker::open(dir.path()).unwrap();
    assert_eq!(reopened.read_file("good.txt").unwrap(), b"needs a new chunk");
}

#[test]
fn test_record_size_is_checked_against_chunks() {
    let dir = populated_locker();
    let unit = locker_dir(dir.path()).join(".files").join("c.txt.ser");
    let mut recipe: FileRecipe = format::read_unit(&unit, UnitKind::FileRecord).unwrap();
    recipe.file_size = u64::MAX;
    format::write_unit(&unit, UnitKind::FileRecord, &recipe).unwrap();

    let mut locker = Locker::open(dir.path()).unwrap();
    let err = locker.stats().unwrap_err();
    assert!(err.is_corrupt(), "unexpected error: {}", err);

    let err = locker.read_file("c.txt").unwrap_err();
    assert!(matches!(err, LockerError::SizeMismatch { expected: u64::MAX, .. }), "unexpected error: {}", err);
}

#[test]
fn test_open_with_inconsistent_parameters_is_corrupt() {
    let dir = TempDir::new().unwrap();
    Locker::create_default(dir.path()).unwrap();

    // Well formed, but not what any chunk size derives
    let params = FingerprintParams { window_size: usize::MAX, ..FingerprintParams::default() };
    let unit = locker_dir(dir.path()).join(".locker").join("FingerPrinter.ser");
    format::write_unit(&unit, UnitKind::Fingerprinter, &params).unwrap();

    let err = Locker::open(dir.path()).err().expect("open must fail");
    assert!(err.is_corrupt(), "unexpected error: {}", err);
}

#[test]
fn test_tampered_record_is_corrupt() {
    let dir = populated_locker();
    let unit = locker_dir(dir.path()).join(".files").join("c.txt.ser");
    let mut bytes = fs::read(&unit).unwrap();
    bytes.truncate(bytes.len() - 3);
    fs::write(&unit, bytes).unwrap();

    let mut locker = Locker::open(dir.path()).unwrap();
    let err = locker.read_file("c.txt").unwrap_err();
    assert!(err.is_corrupt(), "unexpected error: {}", err);
}
