use serde::{Deserialize, Serialize};

use crate::id::{content_hash, ObjectId};
use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ObjectKind {
    Blob = 0x01,
    Tree = 0x02,
    Commit = 0x03,
    Tag = 0x04,
}

impl ObjectKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Blob),
            0x02 => Some(Self::Tree),
            0x03 => Some(Self::Commit),
            0x04 => Some(Self::Tag),
            _ => None,
        }
    }

    /// Parse the type names printed by `git cat-file --batch-check`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "blob" => Some(Self::Blob),
            "tree" => Some(Self::Tree),
            "commit" => Some(Self::Commit),
            "tag" => Some(Self::Tag),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub id: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: String,
    pub timestamp_ms: u64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub target: ObjectId,
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
    Tag(Tag),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Blob(_) => ObjectKind::Blob,
            Object::Tree(_) => ObjectKind::Tree,
            Object::Commit(_) => ObjectKind::Commit,
            Object::Tag(_) => ObjectKind::Tag,
        }
    }

    /// Blobs are stored raw; structured objects as canonical JSON.
    pub fn serialize_payload(&self) -> Result<Vec<u8>, CoreError> {
        let encoded = match self {
            Object::Blob(b) => return Ok(b.data.clone()),
            Object::Tree(t) => serde_json::to_vec(t),
            Object::Commit(c) => serde_json::to_vec(c),
            Object::Tag(t) => serde_json::to_vec(t),
        };
        encoded.map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn deserialize_payload(kind: ObjectKind, data: &[u8]) -> Result<Self, CoreError> {
        let de = |e: serde_json::Error| CoreError::Deserialization(e.to_string());
        Ok(match kind {
            ObjectKind::Blob => Object::Blob(Blob {
                data: data.to_vec(),
            }),
            ObjectKind::Tree => Object::Tree(serde_json::from_slice(data).map_err(de)?),
            ObjectKind::Commit => Object::Commit(serde_json::from_slice(data).map_err(de)?),
            ObjectKind::Tag => Object::Tag(serde_json::from_slice(data).map_err(de)?),
        })
    }

    pub fn id(&self) -> Result<ObjectId, CoreError> {
        Ok(content_hash(self.kind(), &self.serialize_payload()?))
    }

    /// Objects this one refers to; all of them must exist wherever it exists.
    pub fn dependencies(&self) -> Vec<ObjectId> {
        match self {
            Object::Blob(_) => Vec::new(),
            Object::Tree(t) => t.entries.iter().map(|e| e.id).collect(),
            Object::Commit(c) => {
                let mut deps = Vec::with_capacity(c.parents.len() + 1);
                deps.push(c.tree);
                deps.extend_from_slice(&c.parents);
                deps
            }
            Object::Tag(t) => vec![t.target],
        }
    }

    /// History edges only: commit parents, or the tagged object.
    pub fn history_parents(&self) -> Vec<ObjectId> {
        match self {
            Object::Commit(c) => c.parents.clone(),
            Object::Tag(t) => vec![t.target],
            _ => Vec::new(),
        }
    }
}

/// Size metadata for an object pending transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub size: u64,
}
