use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::object::ObjectKind;
use crate::CoreError;

const MAX_ID_LEN: usize = 32;

/// Length in bytes of a git SHA-1 object name.
pub const SHA1_LEN: usize = 20;

/// Opaque content hash naming an object.
///
/// Holds either a 20-byte git SHA-1 or a 32-byte digest (BLAKE3 for the local
/// store, SHA-256 for git repositories in that object format). Unused trailing
/// bytes are always zero so derived equality and hashing stay correct.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    len: u8,
    bytes: [u8; MAX_ID_LEN],
}

impl ObjectId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            len: MAX_ID_LEN as u8,
            bytes,
        }
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, CoreError> {
        if slice.len() != SHA1_LEN && slice.len() != MAX_ID_LEN {
            return Err(CoreError::InvalidObjectId(format!(
                "expected {SHA1_LEN} or {MAX_ID_LEN} bytes, got {}",
                slice.len()
            )));
        }
        let mut bytes = [0u8; MAX_ID_LEN];
        bytes[..slice.len()].copy_from_slice(slice);
        Ok(Self {
            len: slice.len() as u8,
            bytes,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s).map_err(|e| CoreError::InvalidObjectId(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Abbreviated form for log lines and reports.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }

    /// First 2 hex chars used for loose object directory sharding
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.bytes[..1])
    }

    /// Remaining hex chars for the loose object filename
    pub fn shard_suffix(&self) -> String {
        hex::encode(&self.bytes[1..self.len as usize])
    }
}

/// Name of a local store object: BLAKE3 over a `mirror <kind> <len>\0`
/// header and the payload. The header keeps a blob from ever sharing a name
/// with a tree of identical bytes, and the length pins where the payload ends.
pub fn content_hash(kind: ObjectKind, payload: &[u8]) -> ObjectId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(format!("mirror {} {}\0", kind.name(), payload.len()).as_bytes());
    hasher.update(payload);
    ObjectId::from_bytes(*hasher.finalize().as_bytes())
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short())
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ObjectId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
