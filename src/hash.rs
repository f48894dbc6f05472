// src/hash.rs
use serde::{ Deserialize, Serialize };
use sha2::{ Digest, Sha256 };
use std::fmt;
use std::str::FromStr;

pub const HASH_LEN: usize = 32;

/// SHA-256 digest of a chunk payload. The only key into the chunk store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; HASH_LEN]);

impl ContentHash {
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(&hasher.finalize());
        ContentHash(bytes)
    }

    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        ContentHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    // Short form, like git
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..12])
    }
}

impl FromStr for ContentHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; HASH_LEN];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(ContentHash(bytes))
    }
}
