use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::command::GitCommand;
use crate::SyncError;

/// Larger than git's default so big chunk pushes over HTTP are not split
/// into chunked transfer encoding.
const HTTP_POST_BUFFER: &str = "157286400";

/// Bare repository shared by the source and destination clients of one job.
/// Source objects are fetched into it and chunk pushes are made from it.
pub struct StagingRepo {
    path: PathBuf,
    _dir: Option<TempDir>,
}

impl StagingRepo {
    pub async fn create(workdir: Option<&Path>, job: &str, keep: bool) -> Result<Self, SyncError> {
        let parent = workdir.map_or_else(std::env::temp_dir, Path::to_path_buf);
        tokio::fs::create_dir_all(&parent).await?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("mirror-{job}-"))
            .tempdir_in(&parent)?;

        GitCommand::new("init")
            .args(["--bare", "--quiet"])
            .arg(dir.path())
            .run()
            .await?;
        for (key, value) in [
            ("http.postBuffer", HTTP_POST_BUFFER),
            ("gc.auto", "0"),
            ("core.logAllRefUpdates", "false"),
            // chunk commits are made here
            ("user.name", "mirror-sync"),
            ("user.email", "mirror-sync@localhost"),
        ] {
            GitCommand::new("config")
                .in_repo(dir.path())
                .args([key, value])
                .run()
                .await?;
        }

        tracing::debug!(path = %dir.path().display(), "staging repository ready");
        if keep {
            let path = dir.keep();
            tracing::info!(path = %path.display(), "keeping staging repository");
            return Ok(Self { path, _dir: None });
        }
        Ok(Self {
            path: dir.path().to_path_buf(),
            _dir: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
