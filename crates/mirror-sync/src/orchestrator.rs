use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use mirror_core::{
    FailureReason, JobResult, Outcome, RefSnapshot, RefUpdateKind, RefUpdatePlan, SkipReason,
};

use crate::client::{ClientFactory, JobClients};
use crate::job::MirrorJob;
use crate::planner::{AssumeDiverged, KnownAncestry, PlanOptions};
use crate::report::{JobReport, RunReport};
use crate::retry::{retrying, with_timeout};
use crate::transfer::TransferOptions;
use crate::transport::Side;
use crate::{executor, lister, planner, transfer, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Pending,
    Listing,
    Planning,
    Transferring,
    Applying,
    Done,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Done | JobPhase::Failed)
    }

    pub fn name(self) -> &'static str {
        match self {
            JobPhase::Pending => "pending",
            JobPhase::Listing => "listing",
            JobPhase::Planning => "planning",
            JobPhase::Transferring => "transferring",
            JobPhase::Applying => "applying",
            JobPhase::Done => "done",
            JobPhase::Failed => "failed",
        }
    }
}

/// Forward-only lifecycle of one job.
#[derive(Debug)]
pub struct JobStateMachine {
    phase: JobPhase,
}

impl Default for JobStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStateMachine {
    pub fn new() -> Self {
        Self {
            phase: JobPhase::Pending,
        }
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    /// Move to a later phase. Phases may be skipped, never revisited.
    pub fn advance(&mut self, to: JobPhase) -> Result<(), SyncError> {
        if self.phase.is_terminal() || to <= self.phase || to == JobPhase::Failed {
            return Err(SyncError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        debug!(from = self.phase.name(), to = to.name(), "job phase");
        self.phase = to;
        Ok(())
    }

    /// Enter `Failed`, returning the phase the failure happened in.
    pub fn fail(&mut self) -> JobPhase {
        let at = self.phase;
        if !at.is_terminal() {
            self.phase = JobPhase::Failed;
        }
        at
    }
}

/// Runs mirror jobs on a bounded worker pool.
pub struct Orchestrator {
    factory: Arc<dyn ClientFactory>,
    max_concurrent_jobs: usize,
    dry_run: bool,
}

impl Orchestrator {
    pub fn new(factory: Arc<dyn ClientFactory>, max_concurrent_jobs: usize) -> Self {
        Self {
            factory,
            max_concurrent_jobs: max_concurrent_jobs.max(1),
            dry_run: false,
        }
    }

    /// Stop every job after planning.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run all jobs to a terminal state. Reports come back in input order.
    pub async fn run(&self, jobs: Vec<MirrorJob>, cancel: CancellationToken) -> RunReport {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_jobs));
        let fallback: Vec<JobReport> = jobs.iter().map(JobReport::new).collect();
        let mut slots: Vec<Option<JobReport>> = (0..jobs.len()).map(|_| None).collect();
        let mut set = JoinSet::new();

        for (index, job) in jobs.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let factory = Arc::clone(&self.factory);
            let cancel = cancel.clone();
            let dry_run = self.dry_run;
            set.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let report = match permit {
                    Some(_permit) if !cancel.is_cancelled() => {
                        run_job(&job, factory.as_ref(), dry_run, &cancel).await
                    }
                    _ => {
                        info!(job = %job.name, "job abandoned before start");
                        let mut report = JobReport::new(&job);
                        report.fail(JobPhase::Pending, SyncError::Cancelled.to_string(), true);
                        report
                    }
                };
                (index, report)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, report)) => slots[index] = Some(report),
                Err(e) => error!(error = %e, "job task failed"),
            }
        }

        let jobs = slots
            .into_iter()
            .zip(fallback)
            .map(|(slot, mut fallback)| {
                slot.unwrap_or_else(|| {
                    fallback.fail(JobPhase::Pending, "job task did not complete".into(), false);
                    fallback
                })
            })
            .collect();

        RunReport {
            dry_run: self.dry_run,
            jobs,
        }
    }
}

#[instrument(skip_all, fields(job = %job.name))]
async fn run_job(
    job: &MirrorJob,
    factory: &dyn ClientFactory,
    dry_run: bool,
    cancel: &CancellationToken,
) -> JobReport {
    let mut machine = JobStateMachine::new();
    let mut report = JobReport::new(job);

    let result = match drive(job, factory, dry_run, cancel, &mut machine, &mut report).await {
        Ok(()) => machine.advance(JobPhase::Done),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            report.state = JobPhase::Done;
            match &report.result {
                Some(result) => info!(
                    applied = result.applied(),
                    skipped = result.skipped(),
                    failed = result.failed(),
                    objects = result.transfer.objects_sent,
                    "job done"
                ),
                None => info!("job done"),
            }
        }
        Err(e) => {
            let phase = machine.fail();
            let cancelled = matches!(e, SyncError::Cancelled);
            if cancelled {
                warn!(phase = phase.name(), "job cancelled");
            } else {
                error!(phase = phase.name(), error = %e, "job failed");
            }
            report.fail(phase, e.to_string(), cancelled);
        }
    }
    report
}

async fn drive(
    job: &MirrorJob,
    factory: &dyn ClientFactory,
    dry_run: bool,
    cancel: &CancellationToken,
    machine: &mut JobStateMachine,
    report: &mut JobReport,
) -> Result<(), SyncError> {
    machine.advance(JobPhase::Listing)?;
    let clients = factory.connect(job).await?;
    let result = drive_with(job, &clients, dry_run, cancel, machine, report).await;
    clients.finish().await;
    result
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), SyncError> {
    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }
    Ok(())
}

/// Fetch both sides' listed objects where the client needs them locally.
async fn prepare(
    job: &MirrorJob,
    clients: &JobClients,
    source: &RefSnapshot,
    destination: &RefSnapshot,
) -> Result<(), SyncError> {
    let options = &job.options;
    for (client, snapshot, op) in [
        (&clients.destination, destination, "prepare destination"),
        (&clients.source, source, "prepare source"),
    ] {
        retrying(&options.retry, op, || {
            with_timeout(options.timeouts.transfer, op, client.prepare(snapshot))
        })
        .await?;
    }
    Ok(())
}

async fn plan_job(
    job: &MirrorJob,
    clients: &JobClients,
    source: &RefSnapshot,
    destination: &RefSnapshot,
) -> Result<RefUpdatePlan, SyncError> {
    let options = PlanOptions {
        allow_force: job.options.allow_force,
    };
    if !job.options.ancestry_check {
        return Ok(planner::plan(
            source,
            destination,
            &job.policy,
            &AssumeDiverged,
            options,
        ));
    }

    let queries = planner::ancestry_queries(source, destination, &job.policy);
    let mut known = KnownAncestry::default();
    if !queries.is_empty() {
        prepare(job, clients, source, destination).await?;
        for (old, new) in queries {
            let answer = with_timeout(
                job.options.timeouts.list,
                "ancestry check",
                clients.source.is_ancestor(&old, &new),
            )
            .await?;
            known.record(old, new, answer);
        }
    }
    Ok(planner::plan(
        source,
        destination,
        &job.policy,
        &known,
        options,
    ))
}

async fn drive_with(
    job: &MirrorJob,
    clients: &JobClients,
    dry_run: bool,
    cancel: &CancellationToken,
    machine: &mut JobStateMachine,
    report: &mut JobReport,
) -> Result<(), SyncError> {
    let options = &job.options;
    let (source_refs, destination_refs) = tokio::try_join!(
        lister::list(
            clients.source.as_ref(),
            &job.policy,
            Side::Source,
            options.timeouts.list,
            &options.retry,
        ),
        lister::list(
            clients.destination.as_ref(),
            &job.policy,
            Side::Destination,
            options.timeouts.list,
            &options.retry,
        ),
    )?;

    check_cancelled(cancel)?;
    machine.advance(JobPhase::Planning)?;
    let plan = plan_job(job, clients, &source_refs, &destination_refs).await?;
    info!(
        create = plan.count(RefUpdateKind::Create),
        fast_forward = plan.count(RefUpdateKind::FastForward),
        force = plan.count(RefUpdateKind::Force),
        delete = plan.count(RefUpdateKind::Delete),
        skipped = plan.skipped.len(),
        "planned"
    );
    report.plan = Some(plan.clone());
    if dry_run {
        return Ok(());
    }

    let mut result = JobResult::new(&job.name);
    for skipped in &plan.skipped {
        let outcome = if options.strict {
            Outcome::Failed {
                reason: FailureReason::NonFastForward,
            }
        } else {
            Outcome::Skipped {
                reason: skipped.reason,
            }
        };
        result.record(&skipped.name, outcome);
    }
    if plan.is_empty() {
        info!("in sync");
        report.result = Some(result);
        return Ok(());
    }

    check_cancelled(cancel)?;
    machine.advance(JobPhase::Transferring)?;
    prepare(job, clients, &source_refs, &destination_refs).await?;
    let transfer_options = TransferOptions {
        max_chunk_bytes: options.max_chunk_bytes,
        retry: options.retry,
        chunk_timeout: options.timeouts.transfer,
    };
    result.transfer = transfer::transfer(
        &plan,
        clients.source.as_ref(),
        clients.destination.as_ref(),
        &transfer_options,
        cancel,
    )
    .await?;

    check_cancelled(cancel)?;
    machine.advance(JobPhase::Applying)?;
    let mut interrupted = false;
    for update in &plan.updates {
        if cancel.is_cancelled() {
            interrupted = true;
            result.record(
                &update.name,
                Outcome::Skipped {
                    reason: SkipReason::Cancelled,
                },
            );
            continue;
        }
        let outcome = executor::apply(
            update,
            clients.destination.as_ref(),
            &options.retry,
            options.timeouts.apply,
        )
        .await;
        result.record(&update.name, outcome);
    }
    report.result = Some(result);

    if interrupted {
        return Err(SyncError::Cancelled);
    }
    Ok(())
}
