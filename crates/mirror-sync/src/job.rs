use std::path::PathBuf;
use std::time::Duration;

use mirror_core::RepositoryEndpoint;

use crate::policy::RefPolicy;
use crate::retry::RetryPolicy;

pub const DEFAULT_MAX_CHUNK_BYTES: u64 = 100 * 1024 * 1024;

/// Per-call limits; an elapsed call counts as an unreachable endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub list: Duration,
    /// Object enumeration and each chunk.
    pub transfer: Duration,
    /// Each ref compare-and-swap.
    pub apply: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            list: Duration::from_secs(60),
            transfer: Duration::from_secs(1800),
            apply: Duration::from_secs(1800),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    pub allow_force: bool,
    /// When off, every changed ref is treated as a rewrite.
    pub ancestry_check: bool,
    /// Count non-fast-forward skips as failures.
    pub strict: bool,
    pub max_chunk_bytes: u64,
    pub retry: RetryPolicy,
    pub timeouts: Timeouts,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            allow_force: false,
            ancestry_check: true,
            strict: false,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            retry: RetryPolicy::default(),
            timeouts: Timeouts::default(),
        }
    }
}

/// One configured replication unit.
#[derive(Debug, Clone)]
pub struct MirrorJob {
    pub name: String,
    pub source: RepositoryEndpoint,
    pub destination: RepositoryEndpoint,
    pub policy: RefPolicy,
    /// Patterns as written in configuration, for display.
    pub patterns: Vec<String>,
    pub options: JobOptions,
}

impl MirrorJob {
    pub fn new(
        name: impl Into<String>,
        source: RepositoryEndpoint,
        destination: RepositoryEndpoint,
        policy: RefPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            destination,
            policy,
            patterns: Vec::new(),
            options: JobOptions::default(),
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub max_concurrent_jobs: usize,
    /// Parent directory for staging repositories.
    pub workdir: Option<PathBuf>,
    pub keep_workdir: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
            workdir: None,
            keep_workdir: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub settings: RunSettings,
    pub jobs: Vec<MirrorJob>,
}
