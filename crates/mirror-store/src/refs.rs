use std::path::{Path, PathBuf};

use mirror_core::refs::validate_ref_name;
use mirror_core::{CoreError, ObjectId};

use crate::layout::StoreLayout;
use crate::lockfile::LockFile;
use crate::StoreError;

fn ref_path(layout: &StoreLayout, name: &str) -> Result<PathBuf, StoreError> {
    if !name.starts_with("refs/") {
        return Err(CoreError::InvalidRefName(name.to_string()).into());
    }
    validate_ref_name(name)?;
    Ok(layout.ref_root().join(name))
}

pub fn read_ref(layout: &StoreLayout, name: &str) -> Result<Option<ObjectId>, StoreError> {
    let path = ref_path(layout, name)?;
    read_ref_file(&path)
}

fn read_ref_file(path: &Path) -> Result<Option<ObjectId>, StoreError> {
    // a directory holds longer names below this one, never this ref
    if path.is_dir() {
        return Ok(None);
    }
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(ObjectId::from_hex(content.trim())?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Io(e)),
    }
}

/// `refs/heads/x` and `refs/heads/x/y` cannot both exist. Fails when a
/// shorter ref already occupies one of `name`'s parent directories.
fn check_parent_refs(layout: &StoreLayout, name: &str, path: &Path) -> Result<(), StoreError> {
    let refs_dir = layout.refs_dir();
    for dir in path.ancestors().skip(1) {
        if dir == refs_dir || !dir.starts_with(&refs_dir) {
            break;
        }
        if dir.is_file() {
            return Err(conflict(layout, name, dir));
        }
    }
    Ok(())
}

/// Clear the way for a ref file at `path`. Empty directories left there by
/// deleted refs are removed; live refs below it are a conflict.
fn claim_ref_path(layout: &StoreLayout, name: &str, path: &Path) -> Result<(), StoreError> {
    if !path.is_dir() {
        return Ok(());
    }
    match first_file_under(path)? {
        Some(existing) => Err(conflict(layout, name, &existing)),
        None => {
            std::fs::remove_dir_all(path)?;
            Ok(())
        }
    }
}

fn first_file_under(dir: &Path) -> Result<Option<PathBuf>, StoreError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if let Some(found) = first_file_under(&path)? {
                return Ok(Some(found));
            }
        } else {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

fn conflict(layout: &StoreLayout, name: &str, existing: &Path) -> StoreError {
    let existing = existing
        .strip_prefix(layout.ref_root())
        .unwrap_or(existing)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    StoreError::RefNameConflict {
        name: name.to_string(),
        existing,
    }
}

/// Remove `start` and then its parents while they are empty, never going
/// above `keep` or removing `keep` and its direct children.
pub(crate) fn prune_empty_dirs(start: &Path, keep: &Path) {
    let mut dir = start;
    while dir.starts_with(keep) && dir.parent().is_some_and(|p| p != keep) && dir != keep {
        // fails on a non-empty directory, which ends the walk
        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => break,
        }
    }
}

fn write_ref_file(
    layout: &StoreLayout,
    name: &str,
    path: &Path,
    target: &ObjectId,
) -> Result<(), StoreError> {
    claim_ref_path(layout, name, path)?;
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Config(format!("ref path has no parent: {}", path.display())))?;
    std::fs::create_dir_all(dir)?;
    let temp = tempfile::NamedTempFile::new_in(dir)?;
    std::fs::write(temp.path(), format!("{}\n", target.to_hex()))?;
    temp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

fn remove_ref_file(path: &Path) -> Result<bool, StoreError> {
    if path.is_dir() {
        return Ok(false);
    }
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::Io(e)),
    }
}

/// Drop the directories a removed ref leaves behind. Runs after the lock is
/// released since the lock file lives next to the ref.
fn prune_ref_dirs(layout: &StoreLayout, path: &Path) {
    if let Some(parent) = path.parent() {
        prune_empty_dirs(parent, &layout.refs_dir());
    }
}

/// Unconditional write. Used when seeding a store; mirroring goes through
/// [`update_ref_cas`].
pub fn write_ref(layout: &StoreLayout, name: &str, target: &ObjectId) -> Result<(), StoreError> {
    let path = ref_path(layout, name)?;
    check_parent_refs(layout, name, &path)?;
    let _lock = LockFile::acquire(&path)?;
    write_ref_file(layout, name, &path, target)
}

pub fn delete_ref(layout: &StoreLayout, name: &str) -> Result<(), StoreError> {
    let path = ref_path(layout, name)?;
    let lock = LockFile::acquire(&path)?;
    let removed = remove_ref_file(&path)?;
    drop(lock);
    if removed {
        prune_ref_dirs(layout, &path);
    }
    Ok(())
}

/// Compare-and-swap a ref under its lock file.
///
/// `expected = None` asserts the ref does not exist; `new = None` deletes it.
pub fn update_ref_cas(
    layout: &StoreLayout,
    name: &str,
    expected: Option<&ObjectId>,
    new: Option<&ObjectId>,
) -> Result<Option<ObjectId>, StoreError> {
    let path = ref_path(layout, name)?;
    if new.is_some() {
        check_parent_refs(layout, name, &path)?;
    }
    let lock = LockFile::acquire(&path)?;

    let current = read_ref_file(&path)?;
    if current.as_ref() != expected {
        return Err(StoreError::RefCasConflict {
            name: name.to_string(),
            expected: expected.copied(),
            actual: current,
        });
    }

    match new {
        Some(target) => write_ref_file(layout, name, &path, target)?,
        None => {
            remove_ref_file(&path)?;
            drop(lock);
            prune_ref_dirs(layout, &path);
        }
    }
    Ok(current)
}

/// All refs under `refs/`, read in one directory walk.
pub fn list_refs(layout: &StoreLayout) -> Result<Vec<(String, ObjectId)>, StoreError> {
    let base = layout.refs_dir();
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut results = Vec::new();
    collect_refs(&base, layout.ref_root(), &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn collect_refs(
    dir: &Path,
    ref_root: &Path,
    results: &mut Vec<(String, ObjectId)>,
) -> Result<(), StoreError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_refs(&path, ref_root, results)?;
            continue;
        }
        // lock files and in-flight temp files from concurrent writers
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || path.extension().is_some_and(|ext| ext == "lock") {
            continue;
        }
        let Ok(rel) = path.strip_prefix(ref_root) else {
            continue;
        };
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        // a ref removed between read_dir and read is simply not listed
        if let Some(id) = read_ref_file(&path)? {
            results.push((name, id));
        }
    }
    Ok(())
}
