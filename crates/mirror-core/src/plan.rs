use serde::{Deserialize, Serialize};

use crate::id::ObjectId;
use crate::outcome::SkipReason;
use crate::refs::RefKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefUpdateKind {
    Create,
    FastForward,
    Force,
    Delete,
}

impl RefUpdateKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::FastForward => "fast-forward",
            Self::Force => "force",
            Self::Delete => "delete",
        }
    }
}

/// One destination ref change.
///
/// `old_id` is the destination value observed at listing time and is used as
/// the compare-and-swap expectation when applying. `new_id` is `None` only
/// for deletes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefUpdate {
    pub name: String,
    pub kind: RefUpdateKind,
    pub ref_kind: RefKind,
    pub old_id: Option<ObjectId>,
    pub new_id: Option<ObjectId>,
    /// Source ref this update mirrors, when it differs from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRef {
    pub name: String,
    pub reason: SkipReason,
    pub old_id: Option<ObjectId>,
    pub new_id: Option<ObjectId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefUpdatePlan {
    pub updates: Vec<RefUpdate>,
    pub skipped: Vec<SkippedRef>,
    /// Destination tips at listing time; objects reachable from them are
    /// assumed present and never transferred.
    pub haves: Vec<ObjectId>,
}

impl RefUpdatePlan {
    /// True when applying the plan would not change the destination.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// Distinct new targets the destination must be able to reach.
    pub fn new_tips(&self) -> Vec<ObjectId> {
        let mut tips = Vec::new();
        for id in self.updates.iter().filter_map(|u| u.new_id) {
            if !tips.contains(&id) {
                tips.push(id);
            }
        }
        tips
    }

    pub fn count(&self, kind: RefUpdateKind) -> usize {
        self.updates.iter().filter(|u| u.kind == kind).count()
    }
}
