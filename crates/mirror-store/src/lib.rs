pub mod error;
pub mod layout;
pub mod lockfile;
pub mod loose;
pub mod reflog;
pub mod refs;
pub mod repo;

pub use error::StoreError;

use std::path::Path;

use mirror_core::codec::{decode_object, encode_object};
use mirror_core::{content_hash, Object, ObjectId, ObjectInfo};

use crate::layout::StoreLayout;

/// On-disk content-addressed object store with file refs.
pub struct LocalStore {
    layout: StoreLayout,
}

impl LocalStore {
    pub fn init(root: &Path) -> Result<Self, StoreError> {
        let layout = StoreLayout::new(root);
        layout.create_dirs()?;
        if !layout.is_initialized() {
            repo::write_default_config(&layout)?;
        }
        Ok(Self { layout })
    }

    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let layout = StoreLayout::new(root);
        if !layout.is_initialized() {
            return Err(StoreError::NotARepository(root.to_path_buf()));
        }
        repo::read_config(&layout)?;
        Ok(Self { layout })
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn store_object(&self, obj: &Object) -> Result<ObjectId, StoreError> {
        let payload = obj.serialize_payload()?;
        let kind = obj.kind();
        let id = content_hash(kind, &payload);
        let framed = encode_object(kind, &payload)?;
        loose::write_loose_object(&self.layout, &id, &framed)?;
        Ok(id)
    }

    pub fn load_object(&self, id: &ObjectId) -> Result<Object, StoreError> {
        let framed = loose::read_loose_object(&self.layout, id)?;
        let (kind, payload) = decode_object(&framed)?;
        Ok(Object::deserialize_payload(kind, &payload)?)
    }

    pub fn has_object(&self, id: &ObjectId) -> bool {
        loose::loose_object_path(&self.layout, id).exists()
    }

    /// Kind and on-disk (framed) size, the size that a transfer ships.
    pub fn object_info(&self, id: &ObjectId) -> Result<ObjectInfo, StoreError> {
        let framed = loose::read_loose_object(&self.layout, id)?;
        let (kind, _) = decode_object(&framed)?;
        Ok(ObjectInfo {
            id: *id,
            kind,
            size: framed.len() as u64,
        })
    }

    /// Framed bytes exactly as stored.
    pub fn read_raw(&self, id: &ObjectId) -> Result<Vec<u8>, StoreError> {
        loose::read_loose_object(&self.layout, id)
    }

    /// Store framed bytes received from another store after verifying they
    /// hash to `id`. Returns false when the object was already present.
    pub fn write_raw(&self, id: &ObjectId, framed: &[u8]) -> Result<bool, StoreError> {
        let (kind, payload) = decode_object(framed)?;
        let actual = content_hash(kind, &payload);
        if actual != *id {
            return Err(StoreError::Integrity {
                expected: *id,
                actual,
            });
        }
        loose::write_loose_object(&self.layout, id, framed)
    }

    pub fn set_ref(&self, name: &str, target: &ObjectId) -> Result<(), StoreError> {
        refs::write_ref(&self.layout, name, target)
    }

    pub fn get_ref(&self, name: &str) -> Result<Option<ObjectId>, StoreError> {
        refs::read_ref(&self.layout, name)
    }

    pub fn list_refs(&self) -> Result<Vec<(String, ObjectId)>, StoreError> {
        refs::list_refs(&self.layout)
    }

    pub fn delete_ref(&self, name: &str) -> Result<(), StoreError> {
        refs::delete_ref(&self.layout, name)?;
        reflog::remove_reflog(&self.layout, name)
    }

    /// Atomic compare-and-swap of one ref, recorded in the ref log. A
    /// deleted ref takes its log with it.
    pub fn update_ref_cas(
        &self,
        name: &str,
        expected: Option<&ObjectId>,
        new: Option<&ObjectId>,
        author: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        let previous = refs::update_ref_cas(&self.layout, name, expected, new)?;
        match new {
            Some(_) => {
                reflog::append_reflog(&self.layout, name, previous.as_ref(), new, author, message)?
            }
            None => reflog::remove_reflog(&self.layout, name)?,
        }
        tracing::debug!(ref_name = name, new = ?new, "ref updated");
        Ok(())
    }
}
