use thiserror::Error;

use mirror_core::{CoreError, FailureReason, ObjectId};
use mirror_store::StoreError;

use crate::config::ConfigError;
use crate::orchestrator::JobPhase;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("endpoint unreachable: {0}")]
    EndpointUnreachable(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("ref {name} is stale: expected {expected:?}, found {actual:?}")]
    Stale {
        name: String,
        expected: Option<ObjectId>,
        actual: Option<ObjectId>,
    },
    #[error("update rejected: {0}")]
    Rejected(String),
    #[error("object {id} is {size} bytes, larger than the {max} byte chunk limit")]
    TransferLimitExceeded { id: ObjectId, size: u64, max: u64 },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("cancelled")]
    Cancelled,
    #[error("invalid job transition {from:?} -> {to:?}")]
    InvalidTransition { from: JobPhase, to: JobPhase },
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task failed: {0}")]
    Task(String),
}

impl SyncError {
    /// Only unreachable endpoints are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::EndpointUnreachable(_))
    }

    pub fn failure_reason(&self) -> FailureReason {
        match self {
            SyncError::Stale {
                expected, actual, ..
            } => FailureReason::Stale {
                expected: *expected,
                actual: *actual,
            },
            SyncError::EndpointUnreachable(message) => FailureReason::EndpointUnreachable {
                message: message.clone(),
            },
            SyncError::Rejected(message) => FailureReason::Rejected {
                message: message.clone(),
            },
            other => FailureReason::Protocol {
                message: other.to_string(),
            },
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RefCasConflict {
                name,
                expected,
                actual,
            } => SyncError::Stale {
                name,
                expected,
                actual,
            },
            StoreError::RefNameConflict { .. } => SyncError::Rejected(err.to_string()),
            StoreError::NotARepository(_) | StoreError::LockContention(_) | StoreError::Io(_) => {
                SyncError::EndpointUnreachable(err.to_string())
            }
            other => SyncError::Protocol(other.to_string()),
        }
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Task(err.to_string())
    }
}
