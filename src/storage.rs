// src/storage.rs
use crate::error::{ LockerError, Result };
use crate::format::{ self, FormatError, UnitKind };
use crate::hash::ContentHash;
use serde::{ Deserialize, Serialize };
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::Path;

/// Content-addressed chunk payloads, one copy per distinct hash.
#[derive(Debug, Default)]
pub struct ChunkStore {
    chunks: HashMap<ContentHash, Vec<u8>>,
    stored_bytes: u64,
}

// Persisted shape of the store, sorted by hash so the unit is reproducible
#[derive(Serialize)]
struct ChunkMapOut<'a> {
    chunks: Vec<(&'a ContentHash, &'a [u8])>,
}

#[derive(Deserialize)]
struct ChunkMapIn {
    chunks: Vec<(ContentHash, Vec<u8>)>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under `hash` unless it is already present.
    /// Returns true if a new entry was created.
    pub fn put_if_absent(&mut self, hash: ContentHash, data: &[u8]) -> bool {
        match self.chunks.entry(hash) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                self.stored_bytes += data.len() as u64;
                slot.insert(data.to_vec());
                true
            }
        }
    }

    /// Hash `data` and store it. The deduplication check.
    pub fn insert(&mut self, data: &[u8]) -> (ContentHash, bool) {
        let hash = ContentHash::of(data);
        let inserted = self.put_if_absent(hash, data);
        (hash, inserted)
    }

    pub fn get(&self, hash: &ContentHash) -> Result<&[u8]> {
        self.chunks
            .get(hash)
            .map(Vec::as_slice)
            .ok_or(LockerError::ChunkNotFound(*hash))
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.chunks.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Sum of all payload lengths
    pub fn stored_bytes(&self) -> u64 {
        self.stored_bytes
    }

    /// Read the whole store from its unit. Every payload is re-hashed against its key.
    pub fn load(path: &Path) -> Result<Self> {
        let unit: ChunkMapIn = format::read_unit(path, UnitKind::ChunkMap)
            .map_err(|e| LockerError::from_read(path, e))?;

        let mut store = ChunkStore::new();
        for (hash, data) in unit.chunks {
            if ContentHash::of(&data) != hash {
                return Err(
                    LockerError::corrupt(path, FormatError::Inconsistent(format!("chunk {} does not match its content", hash)))
                );
            }
            store.stored_bytes += data.len() as u64;
            if store.chunks.insert(hash, data).is_some() {
                return Err(
                    LockerError::corrupt(path, FormatError::Inconsistent(format!("chunk {} stored twice", hash)))
                );
            }
        }
        log::debug!("Loaded {} chunks ({} bytes) from {}", store.len(), store.stored_bytes, path.display());
        Ok(store)
    }

    /// Write the whole store as one unit. Returns the number of bytes written.
    pub fn persist(&self, path: &Path) -> Result<u64> {
        let mut chunks: Vec<_> = self.chunks
            .iter()
            .map(|(hash, data)| (hash, data.as_slice()))
            .collect();
        chunks.sort_unstable_by_key(|(hash, _)| **hash);

        format::write_unit(path, UnitKind::ChunkMap, &(ChunkMapOut { chunks })).map_err(|e| LockerError::io(path, e))
    }
}
