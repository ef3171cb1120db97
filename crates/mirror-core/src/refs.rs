use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::ObjectId;
use crate::CoreError;

pub const HEADS_PREFIX: &str = "refs/heads/";
pub const TAGS_PREFIX: &str = "refs/tags/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Branch,
    Tag,
}

impl RefKind {
    /// Classify a full ref name; anything outside heads/tags is not mirrored.
    pub fn of(full_name: &str) -> Option<Self> {
        if full_name.starts_with(HEADS_PREFIX) {
            Some(Self::Branch)
        } else if full_name.starts_with(TAGS_PREFIX) {
            Some(Self::Tag)
        } else {
            None
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Branch => HEADS_PREFIX,
            Self::Tag => TAGS_PREFIX,
        }
    }
}

/// `refs/heads/feature/x` -> `feature/x`, `refs/tags/v1` -> `v1`.
pub fn short_name(full_name: &str) -> &str {
    full_name
        .strip_prefix(HEADS_PREFIX)
        .or_else(|| full_name.strip_prefix(TAGS_PREFIX))
        .unwrap_or(full_name)
}

/// Expand a branch shorthand to a full ref name; full names pass through.
pub fn qualify_branch(name: &str) -> String {
    if name.starts_with("refs/") {
        name.to_string()
    } else {
        format!("{HEADS_PREFIX}{name}")
    }
}

pub fn validate_ref_name(name: &str) -> Result<(), CoreError> {
    let bad = name.is_empty()
        || name.ends_with('/')
        || name.ends_with(".lock")
        || name.contains("..")
        || name.contains("//")
        || name
            .chars()
            .any(|c| c.is_ascii_control() || matches!(c, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\'));
    if bad {
        return Err(CoreError::InvalidRefName(name.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefTarget {
    pub id: ObjectId,
    pub kind: RefKind,
}

/// Refs of one repository as observed by a single listing call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefSnapshot {
    refs: BTreeMap<String, RefTarget>,
}

impl RefSnapshot {
    /// Build from raw `(full name, id)` pairs. Non-branch/tag refs are
    /// dropped; a name listed twice is an error.
    pub fn from_listing<I>(entries: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = (String, ObjectId)>,
    {
        let mut refs = BTreeMap::new();
        for (name, id) in entries {
            let Some(kind) = RefKind::of(&name) else {
                continue;
            };
            if refs.insert(name.clone(), RefTarget { id, kind }).is_some() {
                return Err(CoreError::DuplicateRef(name));
            }
        }
        Ok(Self { refs })
    }

    pub fn get(&self, name: &str) -> Option<&RefTarget> {
        self.refs.get(name)
    }

    pub fn id_of(&self, name: &str) -> Option<ObjectId> {
        self.refs.get(name).map(|t| t.id)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.refs.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RefTarget)> {
        self.refs.iter().map(|(name, target)| (name.as_str(), target))
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Distinct object ids pointed at by this snapshot, in name order.
    pub fn tips(&self) -> Vec<ObjectId> {
        let mut out: Vec<ObjectId> = Vec::with_capacity(self.refs.len());
        for target in self.refs.values() {
            if !out.contains(&target.id) {
                out.push(target.id);
            }
        }
        out
    }

    pub fn retain<F>(self, mut keep: F) -> Self
    where
        F: FnMut(&str, &RefTarget) -> bool,
    {
        Self {
            refs: self
                .refs
                .into_iter()
                .filter(|(name, target)| keep(name, target))
                .collect(),
        }
    }
}
