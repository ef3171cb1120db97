use std::path::PathBuf;
use thiserror::Error;

use mirror_core::ObjectId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not a mirror store: {0}")]
    NotARepository(PathBuf),
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),
    #[error("object {expected} failed integrity check (hashes to {actual})")]
    Integrity { expected: ObjectId, actual: ObjectId },
    #[error("lock contention on {0}")]
    LockContention(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("core error: {0}")]
    Core(#[from] mirror_core::CoreError),
    #[error("config error: {0}")]
    Config(String),
    #[error("ref {name} conflicts with existing ref {existing}")]
    RefNameConflict { name: String, existing: String },
    #[error("ref CAS conflict on {name}: expected {expected:?}, actual {actual:?}")]
    RefCasConflict {
        name: String,
        expected: Option<ObjectId>,
        actual: Option<ObjectId>,
    },
}
