use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use mirror_core::{
    ObjectId, RefSnapshot, RefUpdate, RefUpdateKind, RefUpdatePlan, SkipReason, SkippedRef,
};

use crate::policy::RefPolicy;

/// Answers "is `ancestor` contained in the history of `descendant`".
/// `None` means the question could not be answered.
pub trait AncestryOracle {
    fn is_ancestor(&self, ancestor: &ObjectId, descendant: &ObjectId) -> Option<bool>;
}

/// Answers collected ahead of planning.
#[derive(Debug, Clone, Default)]
pub struct KnownAncestry {
    answers: HashMap<(ObjectId, ObjectId), Option<bool>>,
}

impl KnownAncestry {
    pub fn record(&mut self, ancestor: ObjectId, descendant: ObjectId, answer: Option<bool>) {
        self.answers.insert((ancestor, descendant), answer);
    }
}

impl AncestryOracle for KnownAncestry {
    fn is_ancestor(&self, ancestor: &ObjectId, descendant: &ObjectId) -> Option<bool> {
        self.answers.get(&(*ancestor, *descendant)).copied().flatten()
    }
}

/// Used when ancestry checks are switched off: every change is a rewrite.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeDiverged;

impl AncestryOracle for AssumeDiverged {
    fn is_ancestor(&self, _: &ObjectId, _: &ObjectId) -> Option<bool> {
        Some(false)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    pub allow_force: bool,
}

/// `(destination id, source id)` pairs whose ancestry decides between a
/// fast-forward and a rewrite.
pub fn ancestry_queries(
    source: &RefSnapshot,
    destination: &RefSnapshot,
    policy: &RefPolicy,
) -> Vec<(ObjectId, ObjectId)> {
    let mut seen = HashSet::new();
    let mut queries = Vec::new();
    for (name, target) in source.iter() {
        if !policy.selects(name) {
            continue;
        }
        let Some(old) = destination.id_of(&policy.destination_name(name)) else {
            continue;
        };
        if old != target.id && seen.insert((old, target.id)) {
            queries.push((old, target.id));
        }
    }
    queries
}

/// Compute the ref changes that make `destination` mirror `source`.
///
/// Pure: all remote knowledge comes in through the snapshots and `oracle`.
/// Creates and updates come first, deletes last, each group in name order.
pub fn plan(
    source: &RefSnapshot,
    destination: &RefSnapshot,
    policy: &RefPolicy,
    oracle: &dyn AncestryOracle,
    options: PlanOptions,
) -> RefUpdatePlan {
    let mut updates = Vec::new();
    let mut skipped = Vec::new();
    let mut claimed: HashSet<String> = HashSet::new();

    for (source_name, target) in source.iter() {
        if !policy.selects(source_name) {
            continue;
        }
        let name = policy.destination_name(source_name);
        if !claimed.insert(name.clone()) {
            warn!(ref_name = %name, source = source_name, "destination ref already claimed, skipping");
            continue;
        }
        let source_name = (name != source_name).then(|| source_name.to_string());

        let Some(old) = destination.id_of(&name) else {
            updates.push(RefUpdate {
                name,
                kind: RefUpdateKind::Create,
                ref_kind: target.kind,
                old_id: None,
                new_id: Some(target.id),
                source_name,
            });
            continue;
        };
        if old == target.id {
            continue;
        }

        let kind = match oracle.is_ancestor(&old, &target.id) {
            Some(true) => RefUpdateKind::FastForward,
            answer => {
                if answer.is_none() {
                    debug!(ref_name = %name, "ancestry unknown, treating as diverged");
                }
                if !options.allow_force {
                    skipped.push(SkippedRef {
                        name,
                        reason: SkipReason::NonFastForward,
                        old_id: Some(old),
                        new_id: Some(target.id),
                    });
                    continue;
                }
                RefUpdateKind::Force
            }
        };
        updates.push(RefUpdate {
            name,
            kind,
            ref_kind: target.kind,
            old_id: Some(old),
            new_id: Some(target.id),
            source_name,
        });
    }

    for (name, target) in destination.iter() {
        if claimed.contains(name) || !policy.prunes_destination(name) {
            continue;
        }
        if source.contains(&policy.source_name(name)) {
            // still present at the source, kept by a conflicting claim
            continue;
        }
        updates.push(RefUpdate {
            name: name.to_string(),
            kind: RefUpdateKind::Delete,
            ref_kind: target.kind,
            old_id: Some(target.id),
            new_id: None,
            source_name: None,
        });
    }

    updates.sort_by(|a, b| {
        let a_delete = a.kind == RefUpdateKind::Delete;
        let b_delete = b.kind == RefUpdateKind::Delete;
        a_delete.cmp(&b_delete).then_with(|| a.name.cmp(&b.name))
    });
    skipped.sort_by(|a, b| a.name.cmp(&b.name));

    RefUpdatePlan {
        updates,
        skipped,
        haves: destination.tips(),
    }
}
