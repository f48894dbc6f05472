//! On-disk envelope for persisted units
//!
//! Every `.ser` file in a locker is
//!
//! ```text
//! magic "LCKR" | version: u16 LE | kind: u8 | reserved: u8 | bincode payload
//! ```
//!
//! The payload types are declared next to the structures they persist
//! (chunk map in `storage`, records in `recipe`); this module only knows
//! about the header and about writing a unit without leaving it half-written.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{ Path, PathBuf };
use thiserror::Error;

const MAGIC: &[u8; 4] = b"LCKR";
pub const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 8;

/// What a unit holds. Stored in the header so a unit can't be read as the wrong thing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnitKind {
    ChunkMap = 1,
    Fingerprinter = 2,
    FileRecord = 3,
}

impl UnitKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(UnitKind::ChunkMap),
            2 => Some(UnitKind::Fingerprinter),
            3 => Some(UnitKind::FileRecord),
            _ => None,
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitKind::ChunkMap => "chunk map",
            UnitKind::Fingerprinter => "fingerprinter",
            UnitKind::FileRecord => "file record",
        };
        f.write_str(name)
    }
}

/// Reasons a persisted unit is unreadable
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("unit is missing")]
    Missing,

    #[error("unit is truncated")]
    Truncated,

    #[error("bad magic bytes")]
    BadMagic,

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),

    #[error("expected a {expected} unit, found kind {found}")]
    WrongKind { expected: UnitKind, found: u8 },

    #[error("payload could not be decoded: {0}")]
    Payload(#[from] bincode::Error),

    #[error("inconsistent contents: {0}")]
    Inconsistent(String),
}

pub fn encode<T: Serialize>(kind: UnitKind, value: &T) -> Result<Vec<u8>, bincode::Error> {
    let payload = bincode::serialize(value)?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(kind as u8);
    out.push(0);
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn decode<T: DeserializeOwned>(kind: UnitKind, bytes: &[u8]) -> Result<T, FormatError> {
    if bytes.len() < HEADER_LEN {
        return Err(FormatError::Truncated);
    }
    if &bytes[0..4] != MAGIC {
        return Err(FormatError::BadMagic);
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }
    if UnitKind::from_byte(bytes[6]) != Some(kind) {
        return Err(FormatError::WrongKind { expected: kind, found: bytes[6] });
    }
    Ok(bincode::deserialize(&bytes[HEADER_LEN..])?)
}

/// Error from reading a unit: either the file couldn't be read at all,
/// or it was read and didn't decode.
#[derive(Debug)]
pub enum ReadError {
    Io(io::Error),
    Format(FormatError),
}

pub fn read_unit<T: DeserializeOwned>(path: &Path, kind: UnitKind) -> Result<T, ReadError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ReadError::Format(FormatError::Missing));
        }
        Err(e) => return Err(ReadError::Io(e)),
    };
    decode(kind, &bytes).map_err(ReadError::Format)
}

/// Encode and write a unit. The bytes go to `<path>.tmp` first and are
/// renamed over `path`, so readers see either the old or the new unit.
pub fn write_unit<T: Serialize>(path: &Path, kind: UnitKind, value: &T) -> io::Result<u64> {
    let bytes = encode(kind, value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let tmp = tmp_path(path);
    fs::write(&tmp, &bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(bytes.len() as u64)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
