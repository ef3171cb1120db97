use std::collections::HashSet;

use mirror_core::ObjectId;
use mirror_store::{LocalStore, StoreError};

/// Walk the object graph from `heads` and collect everything reachable.
/// Objects the store does not hold end the walk along that edge.
pub fn find_reachable_objects(store: &LocalStore, heads: &[ObjectId]) -> HashSet<ObjectId> {
    let mut visited = HashSet::new();
    let mut queue: Vec<ObjectId> = heads.to_vec();

    while let Some(id) = queue.pop() {
        if !visited.insert(id) {
            continue;
        }
        match store.load_object(&id) {
            Ok(obj) => queue.extend(obj.dependencies()),
            Err(e) => tracing::debug!(object = %id, error = %e, "reachability walk skipped object"),
        }
    }

    visited
}

enum Visit {
    Enter(ObjectId),
    Exit(ObjectId),
}

/// Objects reachable from `tips` but not from `haves`, dependency-first:
/// every object appears after all objects it refers to.
///
/// Every wanted object must exist in `store`; a hole in the source graph is
/// an error because the destination would end up with a dangling ref.
pub fn missing_objects(
    store: &LocalStore,
    tips: &[ObjectId],
    haves: &[ObjectId],
) -> Result<Vec<ObjectId>, StoreError> {
    let present_haves: Vec<ObjectId> = haves
        .iter()
        .filter(|id| store.has_object(id))
        .copied()
        .collect();
    let excluded = find_reachable_objects(store, &present_haves);

    let mut visited: HashSet<ObjectId> = HashSet::new();
    let mut out = Vec::new();
    let mut stack: Vec<Visit> = tips.iter().rev().map(|id| Visit::Enter(*id)).collect();

    // iterative post-order so long histories don't exhaust the stack
    while let Some(step) = stack.pop() {
        match step {
            Visit::Enter(id) => {
                if excluded.contains(&id) || !visited.insert(id) {
                    continue;
                }
                let obj = store.load_object(&id)?;
                stack.push(Visit::Exit(id));
                for dep in obj.dependencies().into_iter().rev() {
                    if !visited.contains(&dep) && !excluded.contains(&dep) {
                        stack.push(Visit::Enter(dep));
                    }
                }
            }
            Visit::Exit(id) => out.push(id),
        }
    }

    Ok(out)
}
