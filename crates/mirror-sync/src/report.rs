use serde::Serialize;

use mirror_core::{JobResult, RefUpdatePlan};

use crate::job::MirrorJob;
use crate::orchestrator::JobPhase;

#[derive(Debug, Clone, Serialize)]
pub struct JobFailure {
    /// Phase the job was in when it failed.
    pub phase: JobPhase,
    pub error: String,
    pub cancelled: bool,
}

/// Terminal state of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: String,
    pub source: String,
    pub destination: String,
    pub state: JobPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<RefUpdatePlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
}

impl JobReport {
    pub(crate) fn new(job: &MirrorJob) -> Self {
        Self {
            job: job.name.clone(),
            source: job.source.redacted(),
            destination: job.destination.redacted(),
            state: JobPhase::Pending,
            plan: None,
            result: None,
            failure: None,
        }
    }

    pub(crate) fn fail(&mut self, phase: JobPhase, error: String, cancelled: bool) {
        self.state = JobPhase::Failed;
        self.failure = Some(JobFailure {
            phase,
            error,
            cancelled,
        });
    }

    pub fn is_done(&self) -> bool {
        self.state == JobPhase::Done
    }

    pub fn failed_refs(&self) -> usize {
        self.result.as_ref().map_or(0, JobResult::failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub jobs: Vec<JobReport>,
}

impl RunReport {
    pub fn jobs_done(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_done()).count()
    }

    pub fn jobs_failed(&self) -> usize {
        self.jobs.len() - self.jobs_done()
    }

    fn sum(&self, count: impl Fn(&JobResult) -> usize) -> usize {
        self.jobs
            .iter()
            .filter_map(|j| j.result.as_ref())
            .map(count)
            .sum()
    }

    pub fn refs_applied(&self) -> usize {
        self.sum(JobResult::applied)
    }

    pub fn refs_skipped(&self) -> usize {
        self.sum(JobResult::skipped)
    }

    pub fn refs_failed(&self) -> usize {
        self.sum(JobResult::failed)
    }

    /// Every job finished and no ref failed.
    pub fn success(&self) -> bool {
        self.jobs_failed() == 0 && self.refs_failed() == 0
    }

    pub fn exit_code(&self) -> u8 {
        if self.success() {
            0
        } else {
            1
        }
    }
}
