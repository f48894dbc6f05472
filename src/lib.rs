//! A deduplicating, content-addressable file locker.
//!
//! Files are split into content-defined chunks by a rolling hash, every
//! distinct chunk is stored once under its SHA-256, and each file is kept as
//! the ordered list of its chunk hashes.
//!
//! ```no_run
//! use locker::Locker;
//!
//! # fn main() -> locker::Result<()> {
//! let mut locker = Locker::create("/tmp/backups", 4096)?;
//! locker.add_file("notes/todo.txt", b"buy milk")?;
//! locker.save()?;
//!
//! let mut locker = Locker::open("/tmp/backups")?;
//! assert_eq!(locker.read_file("notes/todo.txt")?, b"buy milk");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod chunker;
pub mod error;
pub mod format;
pub mod fs_io;
pub mod hash;
pub mod locker;
pub mod recipe;
pub mod storage;

pub use cache::Unit;
pub use chunker::{ Chunker, FingerprintParams, DEFAULT_CHUNK_SIZE };
pub use error::{ LockerError, Result, UnitFailure };
pub use hash::ContentHash;
pub use locker::{ Locker, LockerStats, SaveSummary };
pub use recipe::{ FileRecipe, IngestStats };
pub use storage::ChunkStore;
