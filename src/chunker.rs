// src/chunker.rs
use crate::error::{ LockerError, Result };
use serde::{ Deserialize, Serialize };

// Polynomial rolling hash constants
pub const WINDOW_SIZE: usize = 48; // Look at 48 bytes at a time
const MODULUS: u64 = 1_000_000_007; // A large prime number to prevent overflow
const BASE: u64 = 256; // ASCII range

pub const DEFAULT_CHUNK_SIZE: usize = 4096;
pub const MIN_CHUNK_SIZE: usize = 2;
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Boundary-detection parameters. Fixed when a locker is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintParams {
    /// Requested average chunk size
    pub target_size: usize,
    /// Bytes covered by the rolling hash
    pub window_size: usize,
    /// Low-order bits that must all be set for a content-defined cut
    pub mask: u64,
    /// Matches before this many bytes are ignored
    pub min_size: usize,
    /// A cut is forced at this length
    pub max_size: usize,
}

impl Default for FingerprintParams {
    fn default() -> Self {
        // DEFAULT_CHUNK_SIZE is always in range
        Self::derive(DEFAULT_CHUNK_SIZE)
    }
}

impl FingerprintParams {
    /// Derive the full parameter set from a target average chunk size.
    pub fn new(chunk_size: usize) -> Result<Self> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(LockerError::InvalidChunkSize(chunk_size));
        }
        Ok(Self::derive(chunk_size))
    }

    fn derive(chunk_size: usize) -> Self {
        FingerprintParams {
            target_size: chunk_size,
            window_size: WINDOW_SIZE,
            mask: (chunk_size.next_power_of_two() - 1) as u64,
            min_size: (chunk_size / 4).max(1),
            max_size: chunk_size * 2,
        }
    }

    /// Sanity check for parameters read back from disk: they must be
    /// exactly what `new(target_size)` derives.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.target_size) {
            return Err(format!("target size {} is out of range", self.target_size));
        }
        let expected = Self::derive(self.target_size);
        if *self != expected {
            return Err(format!(
                "parameters {:?} do not match those derived from target size {}",
                self,
                self.target_size
            ));
        }
        Ok(())
    }

    pub fn chunks<'a>(&self, data: &'a [u8]) -> Chunks<'a> {
        Chunks {
            chunker: Chunker::new(*self),
            data,
            offset: 0,
        }
    }
}

pub struct Chunker {
    params: FingerprintParams,
    window: Vec<u8>, // ring buffer once full
    head: usize,
    current_hash: u64,
    // BASE^(window_size - 1) % MODULUS, weight of the byte leaving the window
    out_weight: u64,
}

impl Chunker {
    pub fn new(params: FingerprintParams) -> Self {
        let mut out_weight = 1;
        for _ in 1..params.window_size {
            out_weight = (out_weight * BASE) % MODULUS;
        }
        Chunker {
            params,
            window: Vec::with_capacity(params.window_size),
            head: 0,
            current_hash: 0,
            out_weight,
        }
    }

    // The Rolling Hash Calculation
    // hash = ((hash - old_byte * BASE^(N-1)) * BASE + new_byte) % MODULUS
    pub fn feed_byte(&mut self, new_byte: u8) {
        if self.window.len() < self.params.window_size {
            self.window.push(new_byte);
        } else {
            let old_byte = std::mem::replace(&mut self.window[self.head], new_byte);
            self.head = (self.head + 1) % self.params.window_size;

            let outgoing = ((old_byte as u64) * self.out_weight) % MODULUS;
            self.current_hash = (self.current_hash + MODULUS - outgoing) % MODULUS;
        }
        self.current_hash = (self.current_hash * BASE + (new_byte as u64)) % MODULUS;
    }

    pub fn hash(&self) -> u64 {
        self.current_hash
    }

    /// "Should we cut here?" based on content alone
    pub fn is_match(&self) -> bool {
        (self.current_hash & self.params.mask) == self.params.mask
    }

    /// Scan `data` from `start` and return the exclusive end of the chunk that
    /// begins there. Every byte in `start..end` is fed to the hash exactly once,
    /// so calls must walk the stream in order.
    pub fn next_boundary(&mut self, data: &[u8], start: usize) -> usize {
        let mut len = 0;
        for &byte in &data[start..] {
            self.feed_byte(byte);
            len += 1;

            if len >= self.params.max_size || (len >= self.params.min_size && self.is_match()) {
                break;
            }
        }
        start + len
    }
}

/// A piece of the input between two boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub offset: usize,
    pub data: &'a [u8],
}

impl Chunk<'_> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Iterator over the content-defined chunks of a byte slice.
pub struct Chunks<'a> {
    chunker: Chunker,
    data: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Chunk<'a>> {
        if self.offset >= self.data.len() {
            return None;
        }
        let start = self.offset;
        let end = self.chunker.next_boundary(self.data, start);
        self.offset = end;
        Some(Chunk {
            offset: start,
            data: &self.data[start..end],
        })
    }
}
