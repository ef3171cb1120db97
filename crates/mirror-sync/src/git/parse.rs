//! Parsers for git plumbing output.

use mirror_core::{ObjectId, ObjectInfo, ObjectKind};

use crate::SyncError;

fn protocol(what: &str, line: &str) -> SyncError {
    SyncError::Protocol(format!("unexpected {what} line: {line:?}"))
}

/// `git ls-remote --heads --tags` output: `<id>\t<refname>` per line.
/// Peeled `^{}` entries are dropped.
pub(crate) fn parse_ls_remote(stdout: &str) -> Result<Vec<(String, ObjectId)>, SyncError> {
    let mut refs = Vec::new();
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let (hex, name) = line
            .split_once('\t')
            .ok_or_else(|| protocol("ls-remote", line))?;
        let name = name.trim();
        if name.ends_with("^{}") {
            continue;
        }
        let id = ObjectId::from_hex(hex.trim()).map_err(|_| protocol("ls-remote", line))?;
        refs.push((name.to_string(), id));
    }
    Ok(refs)
}

/// `git rev-list --no-object-names` output: one id per line.
pub(crate) fn parse_id_list(stdout: &str) -> Result<Vec<ObjectId>, SyncError> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| ObjectId::from_hex(l).map_err(|_| protocol("rev-list", l)))
        .collect()
}

/// Output of plumbing that prints exactly one id (`mktree`, `commit-tree`).
pub(crate) fn parse_single_id(stdout: &str) -> Result<ObjectId, SyncError> {
    let line = stdout.trim();
    ObjectId::from_hex(line).map_err(|_| protocol("object id", line))
}

/// `git mktree` input naming every tree and blob of a chunk. Commits and
/// tags cannot be tree entries and are left out.
pub(crate) fn chunk_tree_input(objects: &[ObjectInfo]) -> String {
    objects
        .iter()
        .enumerate()
        .filter_map(|(i, o)| {
            let mode = match o.kind {
                ObjectKind::Blob => "100644",
                ObjectKind::Tree => "040000",
                ObjectKind::Commit | ObjectKind::Tag => return None,
            };
            Some(format!("{mode} {} {}\t{i}\n", o.kind.name(), o.id))
        })
        .collect()
}

/// Format string passed to `git cat-file --batch-check`.
pub(crate) const BATCH_CHECK_FORMAT: &str =
    "--batch-check=%(objectname) %(objecttype) %(objectsize)";

pub(crate) type BatchCheckEntry = (ObjectId, Option<(ObjectKind, u64)>);

/// One entry of `git cat-file --batch-check` output; `None` when missing.
pub(crate) fn parse_batch_check_line(line: &str) -> Result<BatchCheckEntry, SyncError> {
    let mut fields = line.split_whitespace();
    let (Some(hex), Some(kind)) = (fields.next(), fields.next()) else {
        return Err(protocol("cat-file", line));
    };
    let id = ObjectId::from_hex(hex).map_err(|_| protocol("cat-file", line))?;
    if kind == "missing" {
        return Ok((id, None));
    }
    let kind = ObjectKind::from_name(kind).ok_or_else(|| protocol("cat-file", line))?;
    let size = fields
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| protocol("cat-file", line))?;
    Ok((id, Some((kind, size))))
}

pub(crate) fn parse_batch_check(stdout: &str) -> Result<Vec<BatchCheckEntry>, SyncError> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(parse_batch_check_line)
        .collect()
}

/// Reorder `rev-list --objects --in-commit-order --reverse` output so every
/// commit closes its group: the trees and blobs it introduced come first,
/// then the commit. Tag objects go last since they point into history.
pub(crate) fn order_for_transfer(listed: Vec<ObjectInfo>) -> Vec<ObjectInfo> {
    let mut leading: Vec<ObjectInfo> = Vec::new();
    let mut groups: Vec<(ObjectInfo, Vec<ObjectInfo>)> = Vec::new();
    let mut tags = Vec::new();

    for info in listed {
        match info.kind {
            ObjectKind::Commit => groups.push((info, Vec::new())),
            ObjectKind::Tag => tags.push(info),
            ObjectKind::Tree | ObjectKind::Blob => match groups.last_mut() {
                Some((_, members)) => members.push(info),
                None => leading.push(info),
            },
        }
    }

    let mut out = Vec::with_capacity(leading.len() + groups.len() + tags.len());
    // tree walks print a tree before its entries
    out.extend(leading.into_iter().rev());
    for (commit, members) in groups {
        out.extend(members.into_iter().rev());
        out.push(commit);
    }
    out.extend(tags);
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PushStatus {
    pub flag: char,
    pub destination: String,
    pub summary: String,
}

impl PushStatus {
    pub fn is_rejected(&self) -> bool {
        self.flag == '!'
    }

    pub fn is_stale(&self) -> bool {
        self.is_rejected() && self.summary.contains("stale info")
    }
}

/// `git push --porcelain` status lines: `<flag>\t<from>:<to>\t<summary>`.
pub(crate) fn parse_push_porcelain(stdout: &str) -> Vec<PushStatus> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let flag = parts.next()?;
            let refspec = parts.next()?;
            let summary = parts.next().unwrap_or("").trim();
            let mut chars = flag.chars();
            let (Some(flag), None) = (chars.next(), chars.next()) else {
                return None;
            };
            let destination = refspec.rsplit_once(':').map_or(refspec, |(_, to)| to);
            Some(PushStatus {
                flag,
                destination: destination.to_string(),
                summary: summary.to_string(),
            })
        })
        .collect()
}
