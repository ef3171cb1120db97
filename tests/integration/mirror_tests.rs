use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use mirror_core::object::{Blob, Commit, Tag, Tree, TreeEntry};
use mirror_core::{
    FailureReason, Object, ObjectId, ObjectInfo, Outcome, RefUpdate, RefUpdateKind,
    RepositoryEndpoint, SkipReason,
};
use mirror_store::LocalStore;
use mirror_sync::store_client::StoreClient;
use mirror_sync::transport::ObjectBatch;
use mirror_sync::{
    parse_config, ClientFactory, DefaultClientFactory, JobClients, JobPhase, MirrorJob,
    Orchestrator, RepositoryClient, RunReport, SyncError,
};

struct Repos {
    _tmp: tempfile::TempDir,
    src: LocalStore,
    dst: LocalStore,
}

impl Repos {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let src = LocalStore::init(&tmp.path().join("src")).unwrap();
        let dst = LocalStore::init(&tmp.path().join("dst")).unwrap();
        Self { _tmp: tmp, src, dst }
    }

    /// A config with one job `m` from src to dst; `extra` lines go in the job table.
    fn config(&self, extra: &str) -> String {
        job_config(self.src.root(), self.dst.root(), "m", extra)
    }
}

fn job_config(src: &Path, dst: &Path, name: &str, extra: &str) -> String {
    format!(
        r#"
[settings]
retry-limit = 1
retry-base-delay-ms = 1
retry-max-delay-ms = 5

[mirror.{name}]
source = "store:{}"
destination = "store:{}"
{extra}
"#,
        src.display(),
        dst.display()
    )
}

/// Deterministic bytes that do not compress.
fn noise(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

fn commit_with(store: &LocalStore, parents: &[ObjectId], data: Vec<u8>, message: &str) -> ObjectId {
    let blob = store.store_object(&Object::Blob(Blob { data })).unwrap();
    let tree = store
        .store_object(&Object::Tree(Tree {
            entries: vec![TreeEntry {
                name: "file".into(),
                id: blob,
            }],
        }))
        .unwrap();
    store
        .store_object(&Object::Commit(Commit {
            tree,
            parents: parents.to_vec(),
            author: "test".into(),
            timestamp_ms: 0,
            message: message.into(),
        }))
        .unwrap()
}

fn commit(store: &LocalStore, parents: &[ObjectId], message: &str) -> ObjectId {
    commit_with(store, parents, message.as_bytes().to_vec(), message)
}

/// Copy everything reachable from `tip` between stores, as a prior sync would have.
fn seed(from: &LocalStore, to: &LocalStore, tip: ObjectId) {
    for id in mirror_sync::negotiation::find_reachable_objects(from, &[tip]) {
        to.write_raw(&id, &from.read_raw(&id).unwrap()).unwrap();
    }
}

fn refs(store: &LocalStore) -> Vec<(String, ObjectId)> {
    let mut refs = store.list_refs().unwrap();
    refs.sort();
    refs
}

async fn run(config: &str, dry_run: bool) -> RunReport {
    let config = parse_config(config).unwrap();
    let factory = Arc::new(DefaultClientFactory::new(&config.settings));
    Orchestrator::new(factory, config.settings.max_concurrent_jobs)
        .dry_run(dry_run)
        .run(config.jobs, CancellationToken::new())
        .await
}

fn outcome<'a>(report: &'a RunReport, name: &str) -> &'a Outcome {
    &report.jobs[0].result.as_ref().unwrap().outcomes[name]
}

#[tokio::test]
async fn mirrors_branches_and_tags_into_empty_destination() {
    let repos = Repos::new();
    let a = commit(&repos.src, &[], "a");
    let b = commit(&repos.src, &[a], "b");
    let tag = repos
        .src
        .store_object(&Object::Tag(Tag {
            target: a,
            name: "v1".into(),
            message: "release".into(),
        }))
        .unwrap();
    repos.src.set_ref("refs/heads/main", &b).unwrap();
    repos.src.set_ref("refs/heads/feature/x", &a).unwrap();
    repos.src.set_ref("refs/tags/v1", &tag).unwrap();

    let report = run(&repos.config(r#"refs = ["*", "refs/tags/*"]"#), false).await;

    assert!(report.success(), "{report:?}");
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.refs_applied(), 3);
    assert_eq!(refs(&repos.dst), refs(&repos.src));
    for (_, tip) in refs(&repos.dst) {
        for id in mirror_sync::negotiation::find_reachable_objects(&repos.src, &[tip]) {
            assert!(repos.dst.load_object(&id).is_ok());
        }
    }
    // 2 commits, 2 trees, 2 blobs, 1 tag
    assert_eq!(report.jobs[0].result.as_ref().unwrap().transfer.objects_sent, 7);
}

#[tokio::test]
async fn second_run_changes_nothing() {
    let repos = Repos::new();
    let a = commit(&repos.src, &[], "a");
    repos.src.set_ref("refs/heads/main", &a).unwrap();
    let config = repos.config("");

    assert!(run(&config, false).await.success());
    let again = run(&config, false).await;

    assert!(again.success());
    let job = &again.jobs[0];
    assert!(job.plan.as_ref().unwrap().is_empty());
    let result = job.result.as_ref().unwrap();
    assert!(result.outcomes.is_empty());
    assert_eq!(result.transfer.objects_sent, 0);
}

#[tokio::test]
async fn fast_forward_sends_only_new_objects() {
    let repos = Repos::new();
    let a = commit(&repos.src, &[], "a");
    seed(&repos.src, &repos.dst, a);
    repos.dst.set_ref("refs/heads/main", &a).unwrap();
    let b = commit(&repos.src, &[a], "b");
    repos.src.set_ref("refs/heads/main", &b).unwrap();

    let report = run(&repos.config(""), false).await;

    assert!(report.success());
    let plan = report.jobs[0].plan.as_ref().unwrap();
    assert_eq!(plan.updates[0].kind, RefUpdateKind::FastForward);
    assert_eq!(plan.updates[0].old_id, Some(a));
    assert_eq!(outcome(&report, "refs/heads/main"), &Outcome::Applied);
    assert_eq!(report.jobs[0].result.as_ref().unwrap().transfer.objects_sent, 3);
    assert_eq!(repos.dst.get_ref("refs/heads/main").unwrap(), Some(b));
}

#[tokio::test]
async fn diverged_ref_needs_allow_force() {
    let repos = Repos::new();
    let a = commit(&repos.src, &[], "a");
    let c = commit(&repos.dst, &[], "c");
    repos.src.set_ref("refs/heads/main", &a).unwrap();
    repos.dst.set_ref("refs/heads/main", &c).unwrap();

    let report = run(&repos.config(""), false).await;
    assert!(report.success());
    assert_eq!(
        outcome(&report, "refs/heads/main"),
        &Outcome::Skipped {
            reason: SkipReason::NonFastForward
        }
    );
    assert_eq!(repos.dst.get_ref("refs/heads/main").unwrap(), Some(c));

    let forced = run(&repos.config("allow-force = true"), false).await;
    assert!(forced.success());
    assert_eq!(
        forced.jobs[0].plan.as_ref().unwrap().updates[0].kind,
        RefUpdateKind::Force
    );
    assert_eq!(repos.dst.get_ref("refs/heads/main").unwrap(), Some(a));
}

#[tokio::test]
async fn prune_deletes_only_matching_destination_refs() {
    let repos = Repos::new();
    let a = commit(&repos.src, &[], "a");
    let old = commit(&repos.dst, &[], "old");
    repos.src.set_ref("refs/heads/main", &a).unwrap();
    repos.dst.set_ref("refs/heads/release/1.0", &old).unwrap();
    repos.dst.set_ref("refs/heads/keep", &old).unwrap();

    let report = run(
        &repos.config(
            r#"refs = ["main"]
prune = ["release/*"]"#,
        ),
        false,
    )
    .await;

    assert!(report.success(), "{report:?}");
    let plan = report.jobs[0].plan.as_ref().unwrap();
    assert_eq!(plan.updates.last().unwrap().kind, RefUpdateKind::Delete);
    assert_eq!(repos.dst.get_ref("refs/heads/release/1.0").unwrap(), None);
    assert_eq!(repos.dst.get_ref("refs/heads/keep").unwrap(), Some(old));
    assert_eq!(repos.dst.get_ref("refs/heads/main").unwrap(), Some(a));
}

#[tokio::test]
async fn single_branch_rename() {
    let repos = Repos::new();
    let a = commit(&repos.src, &[], "a");
    let b = commit(&repos.src, &[], "b");
    repos.src.set_ref("refs/heads/main", &a).unwrap();
    repos.src.set_ref("refs/heads/other", &b).unwrap();

    let report = run(
        &repos.config(
            r#"from-branch = "main"
to-branch = "upstream/main""#,
        ),
        false,
    )
    .await;

    assert!(report.success());
    assert_eq!(
        refs(&repos.dst),
        vec![("refs/heads/upstream/main".to_string(), a)]
    );
    let update = &report.jobs[0].plan.as_ref().unwrap().updates[0];
    assert_eq!(update.source_name.as_deref(), Some("refs/heads/main"));
}

#[tokio::test]
async fn dry_run_plans_without_touching_destination() {
    let repos = Repos::new();
    let a = commit(&repos.src, &[], "a");
    repos.src.set_ref("refs/heads/main", &a).unwrap();

    let report = run(&repos.config(""), true).await;

    assert!(report.dry_run);
    assert!(report.success());
    let job = &report.jobs[0];
    assert_eq!(job.state, JobPhase::Done);
    assert_eq!(job.plan.as_ref().unwrap().count(RefUpdateKind::Create), 1);
    assert!(job.result.is_none());
    assert!(refs(&repos.dst).is_empty());
    assert!(!repos.dst.has_object(&a));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["jobs"][0]["state"], "done");
    assert_eq!(json["jobs"][0]["plan"]["updates"][0]["kind"], "create");
}

#[tokio::test]
async fn oversized_object_fails_before_anything_is_sent() {
    let repos = Repos::new();
    let small = commit(&repos.src, &[], "small");
    let big = commit_with(&repos.src, &[small], noise(1, 4000), "big");
    repos.src.set_ref("refs/heads/main", &big).unwrap();

    let report = run(&repos.config("max-chunk-bytes = 1024"), false).await;

    let job = &report.jobs[0];
    assert_eq!(job.state, JobPhase::Failed);
    let failure = job.failure.as_ref().unwrap();
    assert_eq!(failure.phase, JobPhase::Transferring);
    assert!(failure.error.contains("larger than"), "{}", failure.error);
    assert_eq!(report.exit_code(), 1);
    assert!(refs(&repos.dst).is_empty());
    assert!(!repos.dst.has_object(&small));
}

#[tokio::test]
async fn large_transfer_is_split_into_chunks() {
    let repos = Repos::new();
    let mut tip = commit_with(&repos.src, &[], noise(10, 1000), "c0");
    for i in 1..4u64 {
        tip = commit_with(&repos.src, &[tip], noise(10 + i, 1000), &format!("c{i}"));
    }
    repos.src.set_ref("refs/heads/main", &tip).unwrap();

    let report = run(&repos.config("max-chunk-bytes = 2048"), false).await;

    assert!(report.success(), "{report:?}");
    let stats = report.jobs[0].result.as_ref().unwrap().transfer;
    assert_eq!(stats.objects_sent, 12);
    assert!(stats.chunks_sent >= 2);
    assert_eq!(repos.dst.get_ref("refs/heads/main").unwrap(), Some(tip));
}

#[tokio::test]
async fn failed_job_does_not_block_the_others() {
    let tmp = tempfile::tempdir().unwrap();
    let good = LocalStore::init(&tmp.path().join("good")).unwrap();
    let out = LocalStore::init(&tmp.path().join("out")).unwrap();
    let a = commit(&good, &[], "a");
    good.set_ref("refs/heads/main", &a).unwrap();

    let mut config = job_config(good.root(), out.root(), "good", "");
    config.push_str(&format!(
        r#"
[mirror.broken]
source = "store:{}"
destination = "store:{}"
"#,
        tmp.path().join("missing").display(),
        out.root().display()
    ));
    config = config.replace("retry-limit = 1", "retry-limit = 0\nmax-concurrent-jobs = 2");

    let report = run(&config, false).await;

    // jobs are reported in name order
    assert_eq!(report.jobs[0].job, "broken");
    assert_eq!(report.jobs[0].state, JobPhase::Failed);
    assert_eq!(report.jobs[0].failure.as_ref().unwrap().phase, JobPhase::Listing);
    assert!(report.jobs[1].is_done());
    assert_eq!(out.get_ref("refs/heads/main").unwrap(), Some(a));
    assert_eq!(report.exit_code(), 1);
}

/// Destination client that moves the ref under the engine just before its
/// first compare-and-swap.
struct Racing {
    inner: StoreClient,
    store: LocalStore,
    moved_to: ObjectId,
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
            self.store.set_ref(&update.name, &self.moved_to).unwrap();
        }
        self.inner.compare_and_swap(update).await
    }
}

struct RacingFactory {
    moved_to: ObjectId,
}

#[async_trait]
impl ClientFactory for RacingFactory {
    async fn connect(&self, job: &MirrorJob) -> Result<JobClients, SyncError> {
        let path = job.destination.store_path().unwrap();
        Ok(JobClients {
            source: Box::new(StoreClient::open(job.source.clone()).await?),
            destination: Box::new(Racing {
                inner: StoreClient::open(job.destination.clone()).await?,
                store: LocalStore::open(&path).unwrap(),
                moved_to: self.moved_to,
                raced: AtomicBool::new(false),
            }),
        })
    }
}

#[tokio::test]
async fn concurrent_destination_change_is_reported_stale() {
    let repos = Repos::new();
    let a = commit(&repos.src, &[], "a");
    seed(&repos.src, &repos.dst, a);
    repos.dst.set_ref("refs/heads/main", &a).unwrap();
    let b = commit(&repos.src, &[a], "b");
    repos.src.set_ref("refs/heads/main", &b).unwrap();
    let theirs = commit(&repos.dst, &[a], "pushed elsewhere");

    let config = parse_config(&repos.config("")).unwrap();
    let factory = Arc::new(RacingFactory { moved_to: theirs });
    let report = Orchestrator::new(factory, 1)
        .run(config.jobs, CancellationToken::new())
        .await;

    assert!(report.jobs[0].is_done());
    assert_eq!(
        outcome(&report, "refs/heads/main"),
        &Outcome::Failed {
            reason: FailureReason::Stale {
                expected: Some(a),
                actual: Some(theirs),
            }
        }
    );
    assert_eq!(repos.dst.get_ref("refs/heads/main").unwrap(), Some(theirs));
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn cancelled_run_leaves_destination_alone() {
    let repos = Repos::new();
    let a = commit(&repos.src, &[], "a");
    repos.src.set_ref("refs/heads/main", &a).unwrap();
    let config = parse_config(&repos.config("")).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = Orchestrator::new(Arc::new(DefaultClientFactory::new(&config.settings)), 1)
        .run(config.jobs, cancel)
        .await;

    let failure = report.jobs[0].failure.as_ref().unwrap();
    assert!(failure.cancelled);
    assert!(refs(&repos.dst).is_empty());
}
