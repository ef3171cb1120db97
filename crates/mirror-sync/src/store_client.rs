use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use mirror_core::{ObjectId, ObjectInfo, RefUpdate, RepositoryEndpoint};
use mirror_store::LocalStore;

use crate::transport::{BatchPayload, ObjectBatch, RepositoryClient};
use crate::{ancestry, negotiation, SyncError};

const REFLOG_AUTHOR: &str = "mirror-sync";

/// Client for `store:` endpoints backed by a [`LocalStore`].
pub struct StoreClient {
    endpoint: RepositoryEndpoint,
    store: Arc<LocalStore>,
}

impl StoreClient {
    pub async fn open(endpoint: RepositoryEndpoint) -> Result<Self, SyncError> {
        let path = endpoint.store_path().ok_or_else(|| {
            SyncError::Unsupported(format!("{endpoint} is not a store address"))
        })?;
        let store = tokio::task::spawn_blocking(move || LocalStore::open(&path)).await??;
        Ok(Self {
            endpoint,
            store: Arc::new(store),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, SyncError>
    where
        T: Send + 'static,
        F: FnOnce(&LocalStore) -> Result<T, SyncError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store)).await?
    }
}

#[async_trait]
impl RepositoryClient for StoreClient {
    fn endpoint(&self) -> &RepositoryEndpoint {
        &self.endpoint
    }

    async fn list_refs(&self) -> Result<Vec<(String, ObjectId)>, SyncError> {
        self.blocking(|store| Ok(store.list_refs()?)).await
    }

    async fn is_ancestor(
        &self,
        ancestor: &ObjectId,
        descendant: &ObjectId,
    ) -> Result<Option<bool>, SyncError> {
        let (ancestor, descendant) = (*ancestor, *descendant);
        self.blocking(move |store| {
            Ok(Some(ancestry::is_ancestor(store, &ancestor, &descendant)?))
        })
        .await
    }

    async fn missing_objects(
        &self,
        tips: &[ObjectId],
        haves: &[ObjectId],
    ) -> Result<Vec<ObjectInfo>, SyncError> {
        let (tips, haves) = (tips.to_vec(), haves.to_vec());
        self.blocking(move |store| {
            let ids = negotiation::missing_objects(store, &tips, &haves)?;
            ids.iter()
                .map(|id| store.object_info(id).map_err(SyncError::from))
                .collect()
        })
        .await
    }

    async fn has_objects(&self, ids: &[ObjectId]) -> Result<HashSet<ObjectId>, SyncError> {
        let ids = ids.to_vec();
        self.blocking(move |store| Ok(ids.into_iter().filter(|id| store.has_object(id)).collect()))
            .await
    }

    async fn read_objects(&self, objects: &[ObjectInfo]) -> Result<ObjectBatch, SyncError> {
        let objects = objects.to_vec();
        self.blocking(move |store| {
            let mut payloads = Vec::with_capacity(objects.len());
            for info in &objects {
                payloads.push(Bytes::from(store.read_raw(&info.id)?));
            }
            Ok(ObjectBatch {
                objects,
                payload: BatchPayload::Inline(payloads),
            })
        })
        .await
    }

    async fn write_objects(&self, batch: ObjectBatch) -> Result<Vec<ObjectId>, SyncError> {
        let BatchPayload::Inline(payloads) = batch.payload else {
            return Err(SyncError::Unsupported(
                "store endpoints only accept inline object batches".into(),
            ));
        };
        if payloads.len() != batch.objects.len() {
            return Err(SyncError::Protocol(format!(
                "batch carries {} payloads for {} objects",
                payloads.len(),
                batch.objects.len()
            )));
        }
        let objects = batch.objects;
        self.blocking(move |store| {
            let mut landed = Vec::with_capacity(objects.len());
            for (info, framed) in objects.iter().zip(payloads.iter()) {
                store.write_raw(&info.id, framed)?;
                landed.push(info.id);
            }
            Ok(landed)
        })
        .await
    }

    async fn compare_and_swap(&self, update: &RefUpdate) -> Result<(), SyncError> {
        let update = update.clone();
        self.blocking(move |store| {
            let message = match &update.source_name {
                Some(source) => format!("mirror {}: {source}", update.kind.name()),
                None => format!("mirror {}", update.kind.name()),
            };
            store.update_ref_cas(
                &update.name,
                update.old_id.as_ref(),
                update.new_id.as_ref(),
                REFLOG_AUTHOR,
                &message,
            )?;
            Ok(())
        })
        .await
    }
}
