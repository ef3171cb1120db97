use std::path::PathBuf;

use mirror_core::ObjectId;

use crate::layout::StoreLayout;
use crate::StoreError;

pub fn loose_object_path(layout: &StoreLayout, id: &ObjectId) -> PathBuf {
    let dir = layout.objects_dir().join(id.shard_prefix());
    dir.join(id.shard_suffix())
}

pub fn write_loose_object(
    layout: &StoreLayout,
    id: &ObjectId,
    data: &[u8],
) -> Result<bool, StoreError> {
    let path = loose_object_path(layout, id);

    if path.exists() {
        return Ok(false);
    }

    let dir = layout.objects_dir().join(id.shard_prefix());
    std::fs::create_dir_all(&dir)?;

    // Atomic write: temp file + rename
    let temp = tempfile::NamedTempFile::new_in(&dir)?;
    std::fs::write(temp.path(), data)?;
    temp.persist(&path).map_err(|e| StoreError::Io(e.error))?;

    Ok(true)
}

pub fn read_loose_object(layout: &StoreLayout, id: &ObjectId) -> Result<Vec<u8>, StoreError> {
    let path = loose_object_path(layout, id);
    match std::fs::read(&path) {
        Ok(data) => Ok(data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::ObjectNotFound(*id)),
        Err(e) => Err(StoreError::Io(e)),
    }
}

pub fn loose_object_size(layout: &StoreLayout, id: &ObjectId) -> Result<u64, StoreError> {
    let path = loose_object_path(layout, id);
    match std::fs::metadata(&path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::ObjectNotFound(*id)),
        Err(e) => Err(StoreError::Io(e)),
    }
}
