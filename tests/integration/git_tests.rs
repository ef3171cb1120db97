//! End-to-end runs against bare repositories on disk, driven through the
//! `git` binary on both sides.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use mirror_core::{
    FailureReason, ObjectId, ObjectInfo, Outcome, RefSnapshot, RefUpdate, RepositoryEndpoint,
};
use mirror_sync::git::{GitClient, StagingRepo, MIRROR_NAMESPACE};
use mirror_sync::transport::ObjectBatch;
use mirror_sync::{
    parse_config, ClientFactory, DefaultClientFactory, JobClients, MirrorJob, Orchestrator,
    RepositoryClient, RunReport, Side, SyncError,
};

fn git_with_input(repo: &Path, args: &[&str], input: Option<&[u8]>) -> String {
    let mut child = Command::new("git")
        .current_dir(repo)
        .args(args)
        .env("GIT_AUTHOR_NAME", "test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    if let Some(input) = input {
        child.stdin.take().unwrap().write_all(input).unwrap();
    }
    let out = child.wait_with_output().unwrap();
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8(out.stdout).unwrap().trim().to_string()
}

fn git(repo: &Path, args: &[&str]) -> String {
    git_with_input(repo, args, None)
}

fn init_bare(path: &Path) {
    std::fs::create_dir_all(path).unwrap();
    git(path, &["init", "--bare", "--quiet"]);
}

/// A commit whose tree holds one file per entry of `files`.
fn commit_files(
    repo: &Path,
    parents: &[&str],
    files: &[(&str, &[u8])],
    message: &str,
) -> String {
    let mut listing = String::new();
    for (name, data) in files {
        let blob = git_with_input(repo, &["hash-object", "-w", "--stdin"], Some(*data));
        listing.push_str(&format!("100644 blob {blob}\t{name}\n"));
    }
    let tree = git_with_input(repo, &["mktree"], Some(listing.as_bytes()));
    let mut args = vec!["commit-tree", tree.as_str(), "-m", message];
    for parent in parents {
        args.push("-p");
        args.push(*parent);
    }
    git(repo, &args)
}

fn commit(repo: &Path, parents: &[&str], message: &str) -> String {
    commit_files(repo, parents, &[("file", message.as_bytes())], message)
}

fn annotated_tag(repo: &Path, target: &str, name: &str) -> String {
    let body = format!(
        "object {target}\ntype commit\ntag {name}\ntagger test <test@example.com> 0 +0000\n\nrelease {name}\n"
    );
    git_with_input(repo, &["mktag"], Some(body.as_bytes()))
}

fn set_ref(repo: &Path, name: &str, id: &str) {
    git(repo, &["update-ref", name, id]);
}

fn delete_ref(repo: &Path, name: &str) {
    git(repo, &["update-ref", "-d", name]);
}

fn all_refs(repo: &Path) -> BTreeMap<String, String> {
    git(repo, &["for-each-ref", "--format=%(refname) %(objectname)"])
        .lines()
        .filter_map(|line| line.split_once(' '))
        .map(|(name, id)| (name.to_string(), id.to_string()))
        .collect()
}

fn has_object(repo: &Path, id: &str) -> bool {
    Command::new("git")
        .current_dir(repo)
        .args(["cat-file", "-e", id])
        .status()
        .unwrap()
        .success()
}

fn oid(hex: &str) -> ObjectId {
    ObjectId::from_hex(hex).unwrap()
}

struct Remotes {
    tmp: tempfile::TempDir,
    src: PathBuf,
    dst: PathBuf,
}

impl Remotes {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src.git");
        let dst = tmp.path().join("dst.git");
        init_bare(&src);
        init_bare(&dst);
        Self { tmp, src, dst }
    }

    /// One job `m` from src to dst; `extra` lines go in the job table.
    fn config(&self, extra: &str) -> String {
        format!(
            r#"
[settings]
retry-limit = 1
retry-base-delay-ms = 1
retry-max-delay-ms = 5
workdir = "{}"

[mirror.m]
source = "{}"
destination = "{}"
{extra}
"#,
            self.tmp.path().join("work").display(),
            self.src.display(),
            self.dst.display()
        )
    }

    fn heads_and_tags(&self, repo: &Path) -> BTreeMap<String, String> {
        all_refs(repo)
            .into_iter()
            .filter(|(name, _)| name.starts_with("refs/heads/") || name.starts_with("refs/tags/"))
            .collect()
    }

    fn leftover_temp_refs(&self) -> Vec<String> {
        all_refs(&self.dst)
            .into_keys()
            .filter(|name| name.starts_with(MIRROR_NAMESPACE))
            .collect()
    }
}

async fn run(config: &str) -> RunReport {
    let config = parse_config(config).unwrap();
    let factory = Arc::new(DefaultClientFactory::new(&config.settings));
    Orchestrator::new(factory, config.settings.max_concurrent_jobs)
        .run(config.jobs, CancellationToken::new())
        .await
}

fn outcome<'a>(report: &'a RunReport, name: &str) -> &'a Outcome {
    &report.jobs[0].result.as_ref().unwrap().outcomes[name]
}

#[tokio::test]
async fn mirrors_branches_and_tags_between_bare_repositories() {
    let remotes = Remotes::new();
    let a = commit(&remotes.src, &[], "a");
    let b = commit(&remotes.src, &[a.as_str()], "b");
    let tag = annotated_tag(&remotes.src, &a, "v1");
    set_ref(&remotes.src, "refs/heads/main", &b);
    set_ref(&remotes.src, "refs/heads/feature/x", &a);
    set_ref(&remotes.src, "refs/tags/v1", &tag);

    let report = run(&remotes.config(r#"refs = ["*", "refs/tags/*"]"#)).await;

    assert!(report.jobs[0].is_done(), "{:?}", report.jobs[0].failure);
    for name in ["refs/heads/main", "refs/heads/feature/x", "refs/tags/v1"] {
        assert_eq!(outcome(&report, name), &Outcome::Applied, "{name}");
    }
    assert_eq!(
        remotes.heads_and_tags(&remotes.dst),
        remotes.heads_and_tags(&remotes.src)
    );
    assert!(has_object(&remotes.dst, &tag));
    assert!(remotes.leftover_temp_refs().is_empty());

    // a second run finds nothing to do
    let report = run(&remotes.config(r#"refs = ["*", "refs/tags/*"]"#)).await;
    assert!(report.jobs[0].is_done());
    assert!(report.jobs[0].result.as_ref().unwrap().outcomes.is_empty());
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn fast_forward_forced_update_and_prune() {
    let remotes = Remotes::new();
    let a = commit(&remotes.src, &[], "a");
    let f1 = commit(&remotes.src, &[a.as_str()], "feature 1");
    set_ref(&remotes.src, "refs/heads/main", &a);
    set_ref(&remotes.src, "refs/heads/feature", &f1);
    set_ref(&remotes.src, "refs/heads/release/1", &a);
    let extra = "prune = [\"release/*\"]\nallow-force = true";

    let first = run(&remotes.config(extra)).await;
    assert!(first.jobs[0].is_done(), "{:?}", first.jobs[0].failure);
    assert_eq!(all_refs(&remotes.dst)["refs/heads/release/1"], a);

    let c = commit(&remotes.src, &[a.as_str()], "c");
    let rewritten = commit(&remotes.src, &[a.as_str()], "feature 1, rewritten");
    set_ref(&remotes.src, "refs/heads/main", &c);
    set_ref(&remotes.src, "refs/heads/feature", &rewritten);
    delete_ref(&remotes.src, "refs/heads/release/1");

    let report = run(&remotes.config(extra)).await;

    assert!(report.jobs[0].is_done(), "{:?}", report.jobs[0].failure);
    for name in ["refs/heads/main", "refs/heads/feature", "refs/heads/release/1"] {
        assert_eq!(outcome(&report, name), &Outcome::Applied, "{name}");
    }
    let dst = all_refs(&remotes.dst);
    assert_eq!(dst["refs/heads/main"], c);
    assert_eq!(dst["refs/heads/feature"], rewritten);
    assert!(!dst.contains_key("refs/heads/release/1"));
    // only the two new commits and their content travel
    assert_eq!(report.jobs[0].result.as_ref().unwrap().transfer.objects_sent, 6);
    assert!(remotes.leftover_temp_refs().is_empty());
}

#[tokio::test]
async fn chunks_without_commits_are_pushed_on_their_own() {
    let remotes = Remotes::new();
    let noise = |seed: u8| -> Vec<u8> {
        (0..4_000u32)
            .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8 ^ seed)
            .collect()
    };
    let (x, y, z) = (noise(1), noise(2), noise(3));
    let tip = commit_files(
        &remotes.src,
        &[],
        &[("x", x.as_slice()), ("y", y.as_slice()), ("z", z.as_slice())],
        "big",
    );
    set_ref(&remotes.src, "refs/heads/main", &tip);

    let report = run(&remotes.config("max-chunk-bytes = 5000")).await;

    assert!(report.jobs[0].is_done(), "{:?}", report.jobs[0].failure);
    let stats = &report.jobs[0].result.as_ref().unwrap().transfer;
    // one blob per chunk, the last one also carrying the tree and commit
    assert_eq!(stats.chunks_sent, 3);
    assert_eq!(stats.objects_sent, 5);
    assert_eq!(all_refs(&remotes.dst)["refs/heads/main"], tip);
    assert!(remotes.leftover_temp_refs().is_empty());
}

/// Destination whose ref moves under it right before the first update.
struct Racing {
    inner: GitClient,
    repo: PathBuf,
    moved_to: String,
    raced: AtomicBool,
}

#[async_trait]
impl RepositoryClient for Racing {
    fn endpoint(&self) -> &RepositoryEndpoint {
        self.inner.endpoint()
    }
    async fn list_refs(&self) -> Result<Vec<(String, ObjectId)>, SyncError> {
        self.inner.list_refs().await
    }
    async fn prepare(&self, snapshot: &RefSnapshot) -> Result<(), SyncError> {
        self.inner.prepare(snapshot).await
    }
    async fn is_ancestor(&self, a: &ObjectId, d: &ObjectId) -> Result<Option<bool>, SyncError> {
        self.inner.is_ancestor(a, d).await
    }
    async fn missing_objects(
        &self,
        tips: &[ObjectId],
        haves: &[ObjectId],
    ) -> Result<Vec<ObjectInfo>, SyncError> {
        self.inner.missing_objects(tips, haves).await
    }
    async fn has_objects(&self, ids: &[ObjectId]) -> Result<HashSet<ObjectId>, SyncError> {
        self.inner.has_objects(ids).await
    }
    async fn read_objects(&self, objects: &[ObjectInfo]) -> Result<ObjectBatch, SyncError> {
        self.inner.read_objects(objects).await
    }
    async fn write_objects(&self, batch: ObjectBatch) -> Result<Vec<ObjectId>, SyncError> {
        self.inner.write_objects(batch).await
    }
    async fn compare_and_swap(&self, update: &RefUpdate) -> Result<(), SyncError> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            set_ref(&self.repo, &update.name, &self.moved_to);
        }
        self.inner.compare_and_swap(update).await
    }
    async fn finish(&self) -> Result<(), SyncError> {
        self.inner.finish().await
    }
}

struct RacingFactory {
    repo: PathBuf,
    workdir: PathBuf,
    moved_to: String,
}

#[async_trait]
impl ClientFactory for RacingFactory {
    async fn connect(&self, job: &MirrorJob) -> Result<JobClients, SyncError> {
        let staging =
            Arc::new(StagingRepo::create(Some(self.workdir.as_path()), &job.name, false).await?);
        Ok(JobClients {
            source: Box::new(GitClient::new(
                job.source.clone(),
                Arc::clone(&staging),
                Side::Source,
                &job.name,
            )?),
            destination: Box::new(Racing {
                inner: GitClient::new(
                    job.destination.clone(),
                    staging,
                    Side::Destination,
                    &job.name,
                )?,
                repo: self.repo.clone(),
                moved_to: self.moved_to.clone(),
                raced: AtomicBool::new(false),
            }),
        })
    }
}

#[tokio::test]
async fn lease_rejects_destination_that_moved_since_listing() {
    let remotes = Remotes::new();
    let a = commit(&remotes.src, &[], "a");
    let b = commit(&remotes.src, &[a.as_str()], "b");
    set_ref(&remotes.src, "refs/heads/main", &a);
    let first = run(&remotes.config("")).await;
    assert!(first.jobs[0].is_done(), "{:?}", first.jobs[0].failure);
    set_ref(&remotes.src, "refs/heads/main", &b);

    let theirs = commit(&remotes.dst, &[a.as_str()], "pushed elsewhere");
    let config = parse_config(&remotes.config("")).unwrap();
    let factory = Arc::new(RacingFactory {
        repo: remotes.dst.clone(),
        workdir: remotes.tmp.path().join("work"),
        moved_to: theirs.clone(),
    });
    let report = Orchestrator::new(factory, 1)
        .run(config.jobs, CancellationToken::new())
        .await;

    assert!(report.jobs[0].is_done(), "{:?}", report.jobs[0].failure);
    assert_eq!(
        outcome(&report, "refs/heads/main"),
        &Outcome::Failed {
            reason: FailureReason::Stale {
                expected: Some(oid(&a)),
                actual: Some(oid(&theirs)),
            }
        }
    );
    assert_eq!(all_refs(&remotes.dst)["refs/heads/main"], theirs);
    assert!(remotes.leftover_temp_refs().is_empty());
    assert_eq!(report.exit_code(), 1);
}
