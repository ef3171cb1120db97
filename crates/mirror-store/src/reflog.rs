use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use mirror_core::ObjectId;

use crate::layout::StoreLayout;
use crate::StoreError;

/// Written in place of an absent old or new value.
const ABSENT: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefLogLine {
    pub old: Option<ObjectId>,
    pub new: Option<ObjectId>,
    pub timestamp_ms: u64,
    pub author: String,
    pub message: String,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn encode_id(id: Option<&ObjectId>) -> String {
    id.map_or_else(|| ABSENT.to_string(), |id| id.to_hex())
}

fn decode_id(field: &str) -> Option<Option<ObjectId>> {
    if field == ABSENT {
        return Some(None);
    }
    ObjectId::from_hex(field).ok().map(Some)
}

pub fn append_reflog(
    layout: &StoreLayout,
    ref_name: &str,
    old: Option<&ObjectId>,
    new: Option<&ObjectId>,
    author: &str,
    message: &str,
) -> Result<(), StoreError> {
    let path = layout.reflogs_dir().join(ref_name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let line = format!(
        "{} {} {} {} {}\n",
        encode_id(old),
        encode_id(new),
        now_ms(),
        author.replace(' ', "_"),
        message.replace('\n', " ")
    );
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Drop a deleted ref's log along with any directories it leaves empty.
pub fn remove_reflog(layout: &StoreLayout, ref_name: &str) -> Result<(), StoreError> {
    let path = layout.reflogs_dir().join(ref_name);
    match std::fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StoreError::Io(e)),
    }
    if let Some(parent) = path.parent() {
        crate::refs::prune_empty_dirs(parent, &layout.reflogs_dir().join("refs"));
    }
    Ok(())
}

pub fn read_reflog(layout: &StoreLayout, ref_name: &str) -> Result<Vec<RefLogLine>, StoreError> {
    let path = layout.reflogs_dir().join(ref_name);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)?;
    let mut entries = Vec::new();
    for line in content.lines() {
        let parts: Vec<&str> = line.splitn(5, ' ').collect();
        if parts.len() < 5 {
            continue;
        }
        let (Some(old), Some(new), Ok(timestamp_ms)) = (
            decode_id(parts[0]),
            decode_id(parts[1]),
            parts[2].parse::<u64>(),
        ) else {
            continue; // skip corrupt line
        };
        entries.push(RefLogLine {
            old,
            new,
            timestamp_ms,
            author: parts[3].to_string(),
            message: parts[4].to_string(),
        });
    }
    Ok(entries)
}
