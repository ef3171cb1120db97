use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Destination history is not contained in source history and rewrites
    /// are not allowed.
    NonFastForward,
    /// The run was interrupted before this ref was attempted.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonFastForward => f.write_str("non-fast-forward"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The destination ref no longer held the value observed when listing.
    Stale {
        expected: Option<ObjectId>,
        actual: Option<ObjectId>,
    },
    EndpointUnreachable { message: String },
    Protocol { message: String },
    Rejected { message: String },
    /// A non-fast-forward skip promoted to a failure by strict mode.
    NonFastForward,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |id: &Option<ObjectId>| id.map_or_else(|| "absent".to_string(), |id| id.short());
        match self {
            Self::Stale { expected, actual } => write!(
                f,
                "stale: expected {}, found {}",
                show(expected),
                show(actual)
            ),
            Self::EndpointUnreachable { message } => write!(f, "endpoint unreachable: {message}"),
            Self::Protocol { message } => write!(f, "protocol error: {message}"),
            Self::Rejected { message } => write!(f, "rejected: {message}"),
            Self::NonFastForward => f.write_str("non-fast-forward (strict)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    Skipped { reason: SkipReason },
    Failed { reason: FailureReason },
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Applied => f.write_str("applied"),
            Outcome::Skipped { reason } => write!(f, "skipped ({reason})"),
            Outcome::Failed { reason } => write!(f, "failed ({reason})"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStats {
    pub objects_sent: u64,
    pub bytes_sent: u64,
    pub chunks_sent: u64,
    /// Objects found already present at the destination and not sent.
    pub objects_skipped: u64,
    pub retries: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job: String,
    pub outcomes: BTreeMap<String, Outcome>,
    pub transfer: TransferStats,
}

impl JobResult {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            outcomes: BTreeMap::new(),
            transfer: TransferStats::default(),
        }
    }

    pub fn record(&mut self, name: impl Into<String>, outcome: Outcome) {
        self.outcomes.insert(name.into(), outcome);
    }

    pub fn applied(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, Outcome::Applied))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, Outcome::Skipped { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_failed()).count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}
