//! In-memory repository client with failure injection, for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use mirror_core::{content_hash, ObjectId, ObjectInfo, ObjectKind, RefUpdate, RepositoryEndpoint};

use crate::transport::{BatchPayload, ObjectBatch, RepositoryClient};
use crate::SyncError;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemObject {
    info: ObjectInfo,
    deps: Vec<ObjectId>,
    parents: Vec<ObjectId>,
}

pub(crate) struct MemoryClient {
    endpoint: RepositoryEndpoint,
    refs: Mutex<BTreeMap<String, ObjectId>>,
    objects: Mutex<HashMap<ObjectId, MemObject>>,
    /// Next N writes store half the batch, then fail as unreachable.
    pub fail_writes: AtomicU32,
    /// Next N ref updates fail as unreachable before touching the ref.
    pub fail_cas: AtomicU32,
    /// Next N presence checks fail as unreachable.
    pub fail_has: AtomicU32,
    /// Next N ref updates apply, then report unreachable.
    pub lose_cas_ack: AtomicU32,
    /// Every id ever written, in order, including partial writes.
    pub written: Mutex<Vec<ObjectId>>,
    pub cas_calls: AtomicU32,
}

impl MemoryClient {
    pub fn new(address: &str) -> Self {
        Self {
            endpoint: RepositoryEndpoint::new(address),
            refs: Mutex::new(BTreeMap::new()),
            objects: Mutex::new(HashMap::new()),
            fail_writes: AtomicU32::new(0),
            fail_cas: AtomicU32::new(0),
            fail_has: AtomicU32::new(0),
            lose_cas_ack: AtomicU32::new(0),
            written: Mutex::new(Vec::new()),
            cas_calls: AtomicU32::new(0),
        }
    }

    pub fn set_ref(&self, name: &str, id: ObjectId) {
        self.refs.lock().unwrap().insert(name.to_string(), id);
    }

    pub fn ref_value(&self, name: &str) -> Option<ObjectId> {
        self.refs.lock().unwrap().get(name).copied()
    }

    pub fn holds(&self, id: &ObjectId) -> bool {
        self.objects.lock().unwrap().contains_key(id)
    }

    pub fn add_object(&self, info: ObjectInfo, deps: Vec<ObjectId>, parents: Vec<ObjectId>) {
        self.objects
            .lock()
            .unwrap()
            .insert(info.id, MemObject { info, deps, parents });
    }

    /// A commit with one blob of `size` bytes. Returns the commit id.
    pub fn add_commit(&self, seed: &str, parents: &[ObjectId], size: u64) -> ObjectId {
        let blob = content_hash(ObjectKind::Blob, seed.as_bytes());
        self.add_object(
            ObjectInfo {
                id: blob,
                kind: ObjectKind::Blob,
                size,
            },
            Vec::new(),
            Vec::new(),
        );
        let commit = content_hash(ObjectKind::Commit, seed.as_bytes());
        let mut deps = vec![blob];
        deps.extend_from_slice(parents);
        self.add_object(
            ObjectInfo {
                id: commit,
                kind: ObjectKind::Commit,
                size: 200,
            },
            deps,
            parents.to_vec(),
        );
        commit
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn reachable(&self, heads: &[ObjectId]) -> HashSet<ObjectId> {
        let objects = self.objects.lock().unwrap();
        let mut seen = HashSet::new();
        let mut queue = heads.to_vec();
        while let Some(id) = queue.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(obj) = objects.get(&id) {
                queue.extend(obj.deps.iter().copied());
            }
        }
        seen
    }

    fn store(&self, obj: MemObject) {
        self.written.lock().unwrap().push(obj.info.id);
        self.objects.lock().unwrap().insert(obj.info.id, obj);
    }
}

fn decode(payload: &Bytes) -> Result<MemObject, SyncError> {
    serde_json::from_slice(payload).map_err(|e| SyncError::Protocol(e.to_string()))
}

#[async_trait]
impl RepositoryClient for MemoryClient {
    fn endpoint(&self) -> &RepositoryEndpoint {
        &self.endpoint
    }

    async fn list_refs(&self) -> Result<Vec<(String, ObjectId)>, SyncError> {
        Ok(self
            .refs
            .lock()
            .unwrap()
            .iter()
            .map(|(n, id)| (n.clone(), *id))
            .collect())
    }

    async fn is_ancestor(
        &self,
        ancestor: &ObjectId,
        descendant: &ObjectId,
    ) -> Result<Option<bool>, SyncError> {
        let objects = self.objects.lock().unwrap();
        let mut seen = HashSet::new();
        let mut queue = vec![*descendant];
        while let Some(id) = queue.pop() {
            if id == *ancestor {
                return Ok(Some(true));
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(obj) = objects.get(&id) {
                queue.extend(obj.parents.iter().copied());
            }
        }
        Ok(Some(false))
    }

    async fn missing_objects(
        &self,
        tips: &[ObjectId],
        haves: &[ObjectId],
    ) -> Result<Vec<ObjectInfo>, SyncError> {
        let excluded = self.reachable(haves);
        let objects = self.objects.lock().unwrap();
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        fn visit(
            id: ObjectId,
            objects: &HashMap<ObjectId, MemObject>,
            excluded: &HashSet<ObjectId>,
            visited: &mut HashSet<ObjectId>,
            out: &mut Vec<ObjectInfo>,
        ) -> Result<(), SyncError> {
            if excluded.contains(&id) || !visited.insert(id) {
                return Ok(());
            }
            let obj = objects
                .get(&id)
                .ok_or_else(|| SyncError::Protocol(format!("missing {id}")))?;
            for dep in &obj.deps {
                visit(*dep, objects, excluded, visited, out)?;
            }
            out.push(obj.info);
            Ok(())
        }
        for tip in tips {
            visit(*tip, &objects, &excluded, &mut visited, &mut out)?;
        }
        Ok(out)
    }

    async fn has_objects(&self, ids: &[ObjectId]) -> Result<HashSet<ObjectId>, SyncError> {
        if Self::take_one(&self.fail_has) {
            return Err(SyncError::EndpointUnreachable("connection reset".into()));
        }
        let objects = self.objects.lock().unwrap();
        Ok(ids.iter().filter(|id| objects.contains_key(id)).copied().collect())
    }

    async fn read_objects(&self, infos: &[ObjectInfo]) -> Result<ObjectBatch, SyncError> {
        let objects = self.objects.lock().unwrap();
        let mut payloads = Vec::with_capacity(infos.len());
        for info in infos {
            let obj = objects
                .get(&info.id)
                .ok_or_else(|| SyncError::Protocol(format!("missing {}", info.id)))?;
            let encoded = serde_json::to_vec(obj).map_err(|e| SyncError::Protocol(e.to_string()))?;
            payloads.push(Bytes::from(encoded));
        }
        Ok(ObjectBatch {
            objects: infos.to_vec(),
            payload: BatchPayload::Inline(payloads),
        })
    }

    async fn write_objects(&self, batch: ObjectBatch) -> Result<Vec<ObjectId>, SyncError> {
        let BatchPayload::Inline(payloads) = batch.payload else {
            return Err(SyncError::Unsupported("inline only".into()));
        };
        if Self::take_one(&self.fail_writes) {
            for payload in payloads.iter().take(payloads.len() / 2) {
                self.store(decode(payload)?);
            }
            return Err(SyncError::EndpointUnreachable("connection reset".into()));
        }
        let mut landed = Vec::with_capacity(payloads.len());
        for payload in &payloads {
            let obj = decode(payload)?;
            landed.push(obj.info.id);
            self.store(obj);
        }
        Ok(landed)
    }

    async fn compare_and_swap(&self, update: &RefUpdate) -> Result<(), SyncError> {
        self.cas_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_one(&self.fail_cas) {
            return Err(SyncError::EndpointUnreachable("connection refused".into()));
        }
        let mut refs = self.refs.lock().unwrap();
        let actual = refs.get(&update.name).copied();
        if actual != update.old_id {
            return Err(SyncError::Stale {
                name: update.name.clone(),
                expected: update.old_id,
                actual,
            });
        }
        match update.new_id {
            Some(id) => {
                refs.insert(update.name.clone(), id);
            }
            None => {
                refs.remove(&update.name);
            }
        }
        if Self::take_one(&self.lose_cas_ack) {
            return Err(SyncError::EndpointUnreachable("response lost".into()));
        }
        Ok(())
    }
}
