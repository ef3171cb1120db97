use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use mirror_core::{ObjectId, ObjectInfo, ObjectKind, RefSnapshot, RefUpdate, RepositoryEndpoint};

use super::command::{classify_failure, GitCommand, GitOutput};
use super::parse::{
    chunk_tree_input, order_for_transfer, parse_batch_check, parse_id_list, parse_ls_remote,
    parse_push_porcelain, parse_single_id, BatchCheckEntry, BATCH_CHECK_FORMAT,
};
use super::staging::StagingRepo;
use crate::config::ConfigError;
use crate::transport::{BatchPayload, ObjectBatch, RepositoryClient, Side};
use crate::SyncError;

/// Ref namespace used for everything this tool writes outside heads/tags.
pub const MIRROR_NAMESPACE: &str = "refs/mirror-sync/";

const CHUNK_MESSAGE: &str = "mirror-sync transfer chunk";

#[derive(Default)]
struct PushState {
    /// Last chunk commit pushed; every earlier chunk is reachable from it.
    chain: Option<ObjectId>,
    landed: HashSet<ObjectId>,
    /// Refs created on the remote under the job's namespace.
    temp_refs: Vec<String>,
}

enum PushResult {
    Accepted,
    Stale,
    Rejected(String),
    Failed,
}

/// Client for git remotes, driving the `git` binary against a staging
/// repository shared with the other side of the job.
pub struct GitClient {
    endpoint: RepositoryEndpoint,
    /// Remote URL including credentials; never logged.
    remote: String,
    staging: Arc<StagingRepo>,
    side: Side,
    /// `refs/mirror-sync/<job>`; temporary refs on the remote live below it.
    temp_root: String,
    prepared: Mutex<bool>,
    push: Mutex<PushState>,
}

impl GitClient {
    pub fn new(
        endpoint: RepositoryEndpoint,
        staging: Arc<StagingRepo>,
        side: Side,
        job: &str,
    ) -> Result<Self, SyncError> {
        let remote = authenticated_remote(&endpoint)?;
        Ok(Self {
            endpoint,
            remote,
            staging,
            side,
            temp_root: format!("{MIRROR_NAMESPACE}{job}"),
            prepared: Mutex::new(false),
            push: Mutex::new(PushState::default()),
        })
    }

    fn git(&self, op: &'static str) -> GitCommand {
        GitCommand::new(op).in_repo(self.staging.path())
    }

    /// Where a remote ref is kept inside the staging repository.
    fn local_ref(&self, name: &str) -> String {
        format!(
            "{MIRROR_NAMESPACE}{}/{}",
            self.side.label(),
            name.trim_start_matches("refs/")
        )
    }

    /// Kind and size of each id in the staging repository, `None` when absent.
    async fn inspect(&self, ids: &[ObjectId]) -> Result<Vec<BatchCheckEntry>, SyncError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let input: String = ids.iter().map(|id| format!("{id}\n")).collect();
        let out = self
            .git("cat-file")
            .arg(BATCH_CHECK_FORMAT)
            .stdin(input)
            .run()
            .await?;
        parse_batch_check(&out.stdout)
    }

    async fn absent_locally(&self, ids: &[ObjectId]) -> Result<Vec<ObjectId>, SyncError> {
        Ok(self
            .inspect(ids)
            .await?
            .into_iter()
            .filter_map(|(id, found)| found.is_none().then_some(id))
            .collect())
    }

    /// Build the commit one chunk is pushed as. Its tree names the chunk's
    /// trees and blobs; its parents are the chunk's commits and the previous
    /// chunk commit. Pushing it sends the whole chunk and nothing already
    /// reachable from earlier chunks.
    async fn chunk_commit(
        &self,
        objects: &[ObjectInfo],
        previous: Option<ObjectId>,
    ) -> Result<ObjectId, SyncError> {
        let out = self.git("mktree").stdin(chunk_tree_input(objects)).run().await?;
        let tree = parse_single_id(&out.stdout)?;

        let commits = objects
            .iter()
            .filter(|o| o.kind == ObjectKind::Commit)
            .map(|o| o.id);
        let mut cmd = self
            .git("commit-tree")
            .arg("--no-gpg-sign")
            .arg(tree.to_hex());
        for parent in previous.into_iter().chain(commits) {
            cmd = cmd.arg("-p").arg(parent.to_hex());
        }
        let out = cmd.args(["-m", CHUNK_MESSAGE]).run().await?;
        parse_single_id(&out.stdout)
    }

    async fn remote_ref(&self, name: &str) -> Result<Option<ObjectId>, SyncError> {
        let out = self.git("ls-remote").arg(&self.remote).arg(name).run().await?;
        Ok(parse_ls_remote(&out.stdout)?
            .into_iter()
            .find(|(listed, _)| listed == name)
            .map(|(_, id)| id))
    }

    fn push_result(out: &GitOutput, destination: &str) -> PushResult {
        let status = parse_push_porcelain(&out.stdout)
            .into_iter()
            .find(|s| s.destination == destination);
        match status {
            Some(s) if s.is_stale() => PushResult::Stale,
            Some(s) if s.is_rejected() => PushResult::Rejected(s.summary),
            Some(_) => PushResult::Accepted,
            None if out.success() => PushResult::Accepted,
            None => PushResult::Failed,
        }
    }
}

/// `rev-list --stdin` input: tips to walk, then `^id` for each id whose
/// history the destination already has.
fn rev_list_input(tips: &[ObjectId], excluded: &[ObjectId]) -> String {
    let included = tips.iter().map(|id| format!("{id}\n"));
    let excluded = excluded.iter().map(|id| format!("^{id}\n"));
    included.chain(excluded).collect()
}

/// Remote URL carrying the token from `token_env` as basic-auth userinfo.
fn authenticated_remote(endpoint: &RepositoryEndpoint) -> Result<String, SyncError> {
    let Some(var) = &endpoint.auth.token_env else {
        return Ok(endpoint.address.clone());
    };
    let token = std::env::var(var).map_err(|_| {
        SyncError::Config(ConfigError::Invalid(format!(
            "environment variable {var} is not set"
        )))
    })?;
    for scheme in ["https://", "http://"] {
        if let Some(rest) = endpoint.address.strip_prefix(scheme) {
            return Ok(format!(
                "{scheme}{}:{}@{rest}",
                urlencoding::encode(&endpoint.auth.user),
                urlencoding::encode(&token)
            ));
        }
    }
    Err(SyncError::Unsupported(format!(
        "token authentication needs an http(s) address, got {endpoint}"
    )))
}

#[async_trait]
impl RepositoryClient for GitClient {
    fn endpoint(&self) -> &RepositoryEndpoint {
        &self.endpoint
    }

    async fn list_refs(&self) -> Result<Vec<(String, ObjectId)>, SyncError> {
        let out = self
            .git("ls-remote")
            .args(["--heads", "--tags"])
            .arg(&self.remote)
            .run()
            .await?;
        parse_ls_remote(&out.stdout)
    }

    async fn prepare(&self, snapshot: &RefSnapshot) -> Result<(), SyncError> {
        let mut prepared = self.prepared.lock().await;
        if *prepared {
            return Ok(());
        }
        if !snapshot.is_empty() {
            let refspecs: String = snapshot
                .iter()
                .map(|(name, _)| format!("+{name}:{}\n", self.local_ref(name)))
                .collect();
            self.git("fetch")
                .args(["--quiet", "--no-tags", "--no-write-fetch-head", "--stdin"])
                .arg(&self.remote)
                .stdin(refspecs)
                .run()
                .await?;

            // refs may have moved after listing; the listed ids are what we plan against
            let absent = self.absent_locally(&snapshot.tips()).await?;
            if !absent.is_empty() {
                debug!(
                    side = self.side.label(),
                    count = absent.len(),
                    "fetching listed ids directly"
                );
                self.git("fetch")
                    .args(["--quiet", "--no-tags", "--no-write-fetch-head"])
                    .arg(&self.remote)
                    .args(absent.iter().map(ObjectId::to_hex))
                    .run()
                    .await?;
            }
        }
        *prepared = true;
        Ok(())
    }

    async fn is_ancestor(
        &self,
        ancestor: &ObjectId,
        descendant: &ObjectId,
    ) -> Result<Option<bool>, SyncError> {
        let out = self
            .git("merge-base")
            .arg("--is-ancestor")
            .arg(ancestor.to_hex())
            .arg(descendant.to_hex())
            .output()
            .await?;
        match out.status.code() {
            Some(0) => Ok(Some(true)),
            Some(1) => Ok(Some(false)),
            _ => Err(classify_failure("merge-base", &out.stderr)),
        }
    }

    async fn missing_objects(
        &self,
        tips: &[ObjectId],
        haves: &[ObjectId],
    ) -> Result<Vec<ObjectInfo>, SyncError> {
        if tips.is_empty() {
            return Ok(Vec::new());
        }
        let absent: HashSet<ObjectId> = self.absent_locally(haves).await?.into_iter().collect();
        let excluded: Vec<ObjectId> = haves
            .iter()
            .filter(|id| !absent.contains(id))
            .copied()
            .collect();
        let input = rev_list_input(tips, &excluded);

        let out = self
            .git("rev-list")
            .args([
                "--objects",
                "--in-commit-order",
                "--topo-order",
                "--reverse",
                "--no-object-names",
                "--stdin",
            ])
            .stdin(input)
            .run()
            .await?;
        let ids = parse_id_list(&out.stdout)?;

        let mut listed = Vec::with_capacity(ids.len());
        for (id, found) in self.inspect(&ids).await? {
            let Some((kind, size)) = found else {
                return Err(SyncError::Protocol(format!(
                    "object {id} listed by rev-list is missing from staging"
                )));
            };
            listed.push(ObjectInfo { id, kind, size });
        }
        Ok(order_for_transfer(listed))
    }

    async fn has_objects(&self, ids: &[ObjectId]) -> Result<HashSet<ObjectId>, SyncError> {
        let state = self.push.lock().await;
        Ok(ids.iter().filter(|id| state.landed.contains(id)).copied().collect())
    }

    async fn read_objects(&self, objects: &[ObjectInfo]) -> Result<ObjectBatch, SyncError> {
        Ok(ObjectBatch {
            objects: objects.to_vec(),
            payload: BatchPayload::Staged(self.staging.path().to_path_buf()),
        })
    }

    async fn write_objects(&self, batch: ObjectBatch) -> Result<Vec<ObjectId>, SyncError> {
        match &batch.payload {
            BatchPayload::Staged(path) if path == self.staging.path() => {}
            _ => {
                return Err(SyncError::Unsupported(
                    "git destinations need objects staged in the shared repository".into(),
                ))
            }
        }

        let mut state = self.push.lock().await;
        let chunk = self.chunk_commit(&batch.objects, state.chain).await?;

        // tag objects cannot hang off a commit, each gets a ref of its own
        let mut refspecs = vec![(chunk, format!("{}/chain", self.temp_root))];
        refspecs.extend(
            batch
                .objects
                .iter()
                .filter(|o| o.kind == ObjectKind::Tag)
                .map(|o| (o.id, format!("{}/tags/{}", self.temp_root, o.id))),
        );

        let out = self
            .git("push")
            .args(["--porcelain", "--force", "--no-verify"])
            .arg(&self.remote)
            .args(refspecs.iter().map(|(id, name)| format!("{id}:{name}")))
            .output()
            .await?;
        for (_, name) in &refspecs {
            let result = Self::push_result(&out, name);
            // whatever was created must be cleaned up, even if a sibling failed
            if matches!(result, PushResult::Accepted) && !state.temp_refs.contains(name) {
                state.temp_refs.push(name.clone());
            }
            match result {
                PushResult::Accepted => {}
                PushResult::Stale => {
                    return Err(SyncError::Rejected(format!("temporary ref {name} is locked")))
                }
                PushResult::Rejected(summary) => return Err(SyncError::Rejected(summary)),
                PushResult::Failed => return Err(classify_failure("push", &out.stderr)),
            }
        }

        debug!(objects = batch.objects.len(), chunk = %chunk, "chunk pushed");
        state.chain = Some(chunk);
        let landed: Vec<ObjectId> = batch.objects.iter().map(|o| o.id).collect();
        state.landed.extend(landed.iter().copied());
        Ok(landed)
    }

    async fn compare_and_swap(&self, update: &RefUpdate) -> Result<(), SyncError> {
        let expected = update.old_id.map(|id| id.to_hex()).unwrap_or_default();
        let refspec = match update.new_id {
            Some(id) => format!("{}:{}", id.to_hex(), update.name),
            None => format!(":{}", update.name),
        };
        let out = self
            .git("push")
            .args(["--porcelain", "--no-verify"])
            .arg(format!("--force-with-lease={}:{expected}", update.name))
            .arg(&self.remote)
            .arg(refspec)
            .output()
            .await?;

        match Self::push_result(&out, &update.name) {
            PushResult::Accepted => Ok(()),
            PushResult::Stale => {
                let actual = match self.remote_ref(&update.name).await {
                    Ok(actual) => actual,
                    Err(e) => {
                        debug!(ref_name = %update.name, error = %e, "could not read stale ref");
                        None
                    }
                };
                Err(SyncError::Stale {
                    name: update.name.clone(),
                    expected: update.old_id,
                    actual,
                })
            }
            PushResult::Rejected(summary) => Err(SyncError::Rejected(summary)),
            PushResult::Failed => Err(classify_failure("push", &out.stderr)),
        }
    }

    async fn finish(&self) -> Result<(), SyncError> {
        let mut state = self.push.lock().await;
        if state.temp_refs.is_empty() {
            return Ok(());
        }
        let result = self
            .git("push")
            .args(["--quiet", "--no-verify"])
            .arg(&self.remote)
            .args(state.temp_refs.iter().map(|name| format!(":{name}")))
            .run()
            .await;
        match &result {
            Ok(_) => state.temp_refs.clear(),
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "failed to remove temporary refs")
            }
        }
        result.map(|_| ())
    }
}
