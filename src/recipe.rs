// src/recipe.rs
use crate::chunker::FingerprintParams;
use crate::error::{ LockerError, Result };
use crate::hash::ContentHash;
use crate::storage::ChunkStore;
use serde::{ Deserialize, Serialize };

/// How to rebuild one file: its chunk hashes in byte order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecipe {
    pub path: String, // Normalized local path inside the locker
    pub file_size: u64,
    pub chunks: Vec<ContentHash>, // List of Hash IDs in order
}

/// What an ingest did to the chunk store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub chunks: usize,
    pub new_chunks: usize,
    pub bytes: u64,
    pub new_bytes: u64,
}

impl IngestStats {
    /// Bytes that did not need new storage
    pub fn deduplicated_bytes(&self) -> u64 {
        self.bytes - self.new_bytes
    }
}

impl FileRecipe {
    /// Chunk `data`, put every chunk into `store` and record the hashes in order.
    pub fn from_bytes(
        path: impl Into<String>,
        data: &[u8],
        params: &FingerprintParams,
        store: &mut ChunkStore
    ) -> (Self, IngestStats) {
        let mut stats = IngestStats::default();
        let mut chunks = Vec::new();

        for chunk in params.chunks(data) {
            let (hash, inserted) = store.insert(chunk.data);
            if inserted {
                stats.new_chunks += 1;
                stats.new_bytes += chunk.len() as u64;
            }
            chunks.push(hash);
        }
        stats.chunks = chunks.len();
        stats.bytes = data.len() as u64;

        let recipe = FileRecipe {
            path: path.into(),
            file_size: data.len() as u64,
            chunks,
        };
        (recipe, stats)
    }

    /// Check that every chunk is in `store` and that their lengths add up
    /// to `file_size`. Returns the size.
    pub fn verify(&self, store: &ChunkStore) -> Result<u64> {
        let mut actual: u64 = 0;
        for hash in &self.chunks {
            match store.get(hash) {
                Ok(chunk_data) => {
                    actual = actual.saturating_add(chunk_data.len() as u64);
                }
                Err(_) => {
                    return Err(LockerError::MissingChunk { path: self.path.clone(), hash: *hash });
                }
            }
        }
        if actual != self.file_size {
            return Err(LockerError::SizeMismatch {
                path: self.path.clone(),
                expected: self.file_size,
                actual,
            });
        }
        Ok(actual)
    }

    /// Concatenate the chunks back into the original bytes.
    pub fn to_bytes(&self, store: &ChunkStore) -> Result<Vec<u8>> {
        // Sized from the chunks actually held, never from the record alone
        let size = self.verify(store)?;
        let mut result = Vec::with_capacity(size as usize);
        for hash in &self.chunks {
            result.extend_from_slice(store.get(hash)?);
        }
        Ok(result)
    }
}
