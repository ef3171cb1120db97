use std::path::{Path, PathBuf};

use crate::StoreError;

/// Directory layout of a store. The store directory itself is the
/// repository; there is no working tree.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    /// Full ref names (`refs/heads/main`) resolve relative to this directory.
    pub fn ref_root(&self) -> &Path {
        &self.root
    }

    pub fn refs_dir(&self) -> PathBuf {
        self.root.join("refs")
    }

    pub fn reflogs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("store.toml")
    }

    pub fn is_initialized(&self) -> bool {
        self.config_file().is_file()
    }

    pub fn create_dirs(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(self.objects_dir())?;
        std::fs::create_dir_all(self.refs_dir().join("heads"))?;
        std::fs::create_dir_all(self.refs_dir().join("tags"))?;
        std::fs::create_dir_all(self.reflogs_dir())?;
        Ok(())
    }
}
