use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;

use mirror_core::{ObjectId, ObjectInfo, RefSnapshot, RefUpdate, RepositoryEndpoint};

use crate::SyncError;

/// Which end of a mirror job a client or listing belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Source,
    Destination,
}

impl Side {
    pub fn label(&self) -> &'static str {
        match self {
            Side::Source => "source",
            Side::Destination => "destination",
        }
    }
}

/// Object content moving from a source client to a destination client.
#[derive(Debug, Clone)]
pub struct ObjectBatch {
    /// Objects in dependency-first order.
    pub objects: Vec<ObjectInfo>,
    pub payload: BatchPayload,
}

#[derive(Debug, Clone)]
pub enum BatchPayload {
    /// Framed object bytes, one per entry of `objects`.
    Inline(Vec<Bytes>),
    /// Objects already sit in a local repository shared by both clients.
    Staged(PathBuf),
}

/// Everything the engine needs from one repository endpoint.
///
/// Implementations are opaque network clients. Ref names are always full
/// (`refs/heads/...`, `refs/tags/...`).
#[async_trait]
pub trait RepositoryClient: Send + Sync {
    fn endpoint(&self) -> &RepositoryEndpoint;

    /// All heads and tags in a single listing call.
    async fn list_refs(&self) -> Result<Vec<(String, ObjectId)>, SyncError>;

    /// Make the objects behind `snapshot` locally inspectable. Called before
    /// ancestry queries and object enumeration; must be idempotent.
    async fn prepare(&self, _snapshot: &RefSnapshot) -> Result<(), SyncError> {
        Ok(())
    }

    /// `Some(true)` when `ancestor` is reachable from `descendant`, `None` when
    /// the client cannot answer.
    async fn is_ancestor(
        &self,
        _ancestor: &ObjectId,
        _descendant: &ObjectId,
    ) -> Result<Option<bool>, SyncError> {
        Ok(None)
    }

    /// Objects reachable from `tips` and not from `haves`, dependency-first.
    async fn missing_objects(
        &self,
        tips: &[ObjectId],
        haves: &[ObjectId],
    ) -> Result<Vec<ObjectInfo>, SyncError>;

    /// Subset of `ids` known to be present on this endpoint.
    async fn has_objects(&self, ids: &[ObjectId]) -> Result<HashSet<ObjectId>, SyncError>;

    async fn read_objects(&self, objects: &[ObjectInfo]) -> Result<ObjectBatch, SyncError>;

    /// Store a batch. Returns the ids that are now durable on this endpoint,
    /// which may include objects from earlier batches.
    async fn write_objects(&self, batch: ObjectBatch) -> Result<Vec<ObjectId>, SyncError>;

    /// Apply one ref update as an atomic compare-and-swap against
    /// `update.old_id`.
    async fn compare_and_swap(&self, update: &RefUpdate) -> Result<(), SyncError>;

    /// Release per-job resources. Called once whatever the job outcome.
    async fn finish(&self) -> Result<(), SyncError> {
        Ok(())
    }
}
