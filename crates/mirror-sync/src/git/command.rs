use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::SyncError;

/// stderr fragments that mean the remote could not be reached or would not
/// let us in, as opposed to refusing a well-formed request.
const UNREACHABLE_MARKERS: &[&str] = &[
    "could not resolve host",
    "connection refused",
    "connection reset",
    "connection timed out",
    "operation timed out",
    "failed to connect",
    "unable to access",
    "could not read from remote repository",
    "early eof",
    "the remote end hung up",
    "authentication failed",
    "permission denied",
    "does not appear to be a git repository",
    "repository not found",
];

pub(crate) struct GitOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// One `git` invocation. The child never prompts for credentials and is
/// killed if the caller drops the future (for example on timeout).
pub(crate) struct GitCommand {
    op: &'static str,
    cwd: Option<PathBuf>,
    args: Vec<OsString>,
    stdin: Option<Vec<u8>>,
}

impl GitCommand {
    pub fn new(op: &'static str) -> Self {
        Self {
            op,
            cwd: None,
            args: vec![OsString::from(op)],
            stdin: None,
        }
    }

    pub fn in_repo(mut self, repo: &Path) -> Self {
        self.cwd = Some(repo.to_path_buf());
        self
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Run to completion regardless of exit status.
    pub async fn output(self) -> Result<GitOutput, SyncError> {
        let mut cmd = Command::new("git");
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd.args(&self.args);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.env("LC_ALL", "C");
        cmd.stdin(if self.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!(op = self.op, "spawning git");
        let mut child = cmd.spawn()?;

        // feed stdin from its own task so a large output can't deadlock us
        if let (Some(input), Some(mut pipe)) = (self.stdin, child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&input).await {
                    debug!(error = %e, "git closed stdin early");
                }
            });
        }

        let output = child.wait_with_output().await?;
        Ok(GitOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Run and turn a non-zero exit into a classified error.
    pub async fn run(self) -> Result<GitOutput, SyncError> {
        let op = self.op;
        let output = self.output().await?;
        if !output.success() {
            return Err(classify_failure(op, &output.stderr));
        }
        Ok(output)
    }
}

/// Map a failed git invocation to the error taxonomy.
pub(crate) fn classify_failure(op: &str, stderr: &str) -> SyncError {
    let lower = stderr.to_ascii_lowercase();
    let message = format!("git {op}: {}", redact_urls(stderr));
    if UNREACHABLE_MARKERS.iter().any(|marker| lower.contains(marker)) {
        SyncError::EndpointUnreachable(message)
    } else {
        SyncError::Protocol(message)
    }
}

/// Strip `user:secret@` from any URL git echoed back in its diagnostics.
pub(crate) fn redact_urls(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find("://") {
        let (head, tail) = rest.split_at(pos + 3);
        out.push_str(head);
        let authority_end = tail
            .find(|c: char| c == '/' || c.is_whitespace() || c == '\'')
            .unwrap_or(tail.len());
        match tail[..authority_end].rfind('@') {
            Some(at) => {
                out.push_str("***@");
                rest = &tail[at + 1..];
            }
            None => rest = tail,
        }
    }
    out.push_str(rest);
    out
}
