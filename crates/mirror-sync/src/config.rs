use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use mirror_core::{AuthContext, RepositoryEndpoint};

use crate::job::{JobOptions, MirrorConfig, MirrorJob, RunSettings, Timeouts, DEFAULT_MAX_CHUNK_BYTES};
use crate::policy::RefPolicy;
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid ref pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        source: globset::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    settings: RawSettings,
    #[serde(default)]
    mirror: BTreeMap<String, RawJob>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
struct RawSettings {
    max_concurrent_jobs: usize,
    max_chunk_bytes: u64,
    retry_limit: u32,
    retry_base_delay_ms: u64,
    retry_max_delay_ms: u64,
    list_timeout_secs: u64,
    transfer_timeout_secs: u64,
    apply_timeout_secs: u64,
    workdir: Option<PathBuf>,
    keep_workdir: bool,
    allow_force: bool,
    ancestry_check: bool,
    strict: bool,
}

impl Default for RawSettings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let timeouts = Timeouts::default();
        Self {
            max_concurrent_jobs: 1,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            retry_limit: retry.limit,
            retry_base_delay_ms: retry.base_delay.as_millis() as u64,
            retry_max_delay_ms: retry.max_delay.as_millis() as u64,
            list_timeout_secs: timeouts.list.as_secs(),
            transfer_timeout_secs: timeouts.transfer.as_secs(),
            apply_timeout_secs: timeouts.apply.as_secs(),
            workdir: None,
            keep_workdir: false,
            allow_force: false,
            ancestry_check: true,
            strict: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawJob {
    #[serde(alias = "from-repo")]
    source: Option<String>,
    #[serde(alias = "to-repo")]
    destination: Option<String>,
    refs: Option<Vec<String>>,
    #[serde(default)]
    prune: Vec<String>,
    #[serde(default)]
    rename: BTreeMap<String, String>,
    from_branch: Option<String>,
    to_branch: Option<String>,
    allow_force: Option<bool>,
    ancestry_check: Option<bool>,
    strict: Option<bool>,
    max_chunk_bytes: Option<u64>,
    retry_limit: Option<u32>,
    token_env: Option<String>,
    source_token_env: Option<String>,
    destination_token_env: Option<String>,
    token_user: Option<String>,
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

fn positive(value: u64, key: &str) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(invalid(format!("{key} must be positive")));
    }
    Ok(value)
}

pub fn load_config(path: &Path) -> Result<MirrorConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text)
}

pub fn parse_config(text: &str) -> Result<MirrorConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(text)?;
    let settings = &raw.settings;

    if settings.max_concurrent_jobs == 0 {
        return Err(invalid("max-concurrent-jobs must be positive"));
    }
    positive(settings.max_chunk_bytes, "max-chunk-bytes")?;
    positive(settings.retry_base_delay_ms, "retry-base-delay-ms")?;
    positive(settings.retry_max_delay_ms, "retry-max-delay-ms")?;
    let timeouts = Timeouts {
        list: Duration::from_secs(positive(settings.list_timeout_secs, "list-timeout-secs")?),
        transfer: Duration::from_secs(positive(
            settings.transfer_timeout_secs,
            "transfer-timeout-secs",
        )?),
        apply: Duration::from_secs(positive(settings.apply_timeout_secs, "apply-timeout-secs")?),
    };

    if raw.mirror.is_empty() {
        return Err(invalid("no [mirror.<name>] jobs configured"));
    }

    let mut jobs = Vec::with_capacity(raw.mirror.len());
    for (name, job) in &raw.mirror {
        jobs.push(build_job(name, job, settings, timeouts)?);
    }

    Ok(MirrorConfig {
        settings: RunSettings {
            max_concurrent_jobs: settings.max_concurrent_jobs,
            workdir: settings.workdir.clone(),
            keep_workdir: settings.keep_workdir,
        },
        jobs,
    })
}

fn endpoint(
    job: &str,
    role: &str,
    address: Option<&String>,
    token_env: Option<&String>,
    user: &str,
) -> Result<RepositoryEndpoint, ConfigError> {
    let address = address
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| invalid(format!("mirror.{job}: {role} address is required")))?;
    let endpoint = RepositoryEndpoint::new(address);
    Ok(match token_env {
        Some(var) => endpoint.with_auth(AuthContext {
            token_env: Some(var.clone()),
            user: user.to_string(),
        }),
        None => endpoint,
    })
}

fn is_http(address: &str) -> bool {
    address.starts_with("https://") || address.starts_with("http://")
}

fn build_job(
    name: &str,
    job: &RawJob,
    settings: &RawSettings,
    timeouts: Timeouts,
) -> Result<MirrorJob, ConfigError> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid(format!(
            "job name {name:?} may only contain letters, digits, '-', '_' and '.'"
        )));
    }

    let user = job.token_user.as_deref().unwrap_or("git");
    // a shared token only applies to http(s) endpoints
    let shared_token = |address: Option<&String>| {
        job.token_env
            .as_ref()
            .filter(|_| address.is_some_and(|a| is_http(a)))
    };
    let source_token = job
        .source_token_env
        .as_ref()
        .or_else(|| shared_token(job.source.as_ref()));
    let destination_token = job
        .destination_token_env
        .as_ref()
        .or_else(|| shared_token(job.destination.as_ref()));
    let source = endpoint(name, "source", job.source.as_ref(), source_token, user)?;
    let destination = endpoint(
        name,
        "destination",
        job.destination.as_ref(),
        destination_token,
        user,
    )?;

    if source.address == destination.address {
        return Err(invalid(format!(
            "mirror.{name}: source and destination are the same repository"
        )));
    }
    if source.backend() != destination.backend() {
        return Err(invalid(format!(
            "mirror.{name}: source and destination must both be store: paths or both git remotes"
        )));
    }

    let mut renames = job.rename.clone();
    let refs = match (&job.from_branch, &job.to_branch, &job.refs) {
        (Some(_), _, Some(_)) => {
            return Err(invalid(format!(
                "mirror.{name}: from-branch and refs are mutually exclusive"
            )))
        }
        (None, Some(_), _) => {
            return Err(invalid(format!("mirror.{name}: to-branch needs from-branch")))
        }
        (Some(from), to, None) => {
            if let Some(to) = to.as_ref().filter(|to| *to != from) {
                renames.insert(from.clone(), to.clone());
            }
            vec![from.clone()]
        }
        (None, None, Some(refs)) => refs.clone(),
        (None, None, None) => vec!["*".to_string()],
    };
    if refs.is_empty() && job.prune.is_empty() {
        return Err(invalid(format!("mirror.{name}: no ref patterns")));
    }
    let policy = RefPolicy::new(&refs, &job.prune, &renames)?;

    let retry = RetryPolicy {
        limit: job.retry_limit.unwrap_or(settings.retry_limit),
        base_delay: Duration::from_millis(settings.retry_base_delay_ms),
        max_delay: Duration::from_millis(settings.retry_max_delay_ms),
    };
    let options = JobOptions {
        allow_force: job.allow_force.unwrap_or(settings.allow_force),
        ancestry_check: job.ancestry_check.unwrap_or(settings.ancestry_check),
        strict: job.strict.unwrap_or(settings.strict),
        max_chunk_bytes: positive(
            job.max_chunk_bytes.unwrap_or(settings.max_chunk_bytes),
            "max-chunk-bytes",
        )?,
        retry,
        timeouts,
    };

    let mut patterns = refs;
    patterns.extend(job.prune.iter().map(|p| format!("prune:{p}")));

    let mut mirror = MirrorJob::new(name, source, destination, policy).with_options(options);
    mirror.patterns = patterns;
    Ok(mirror)
}
