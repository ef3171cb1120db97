use std::collections::HashSet;

use mirror_core::ObjectId;
use mirror_store::{LocalStore, StoreError};

/// Check if `potential_ancestor` is reachable from `descendant` along history
/// edges (commit parents, tag targets) by walking back from `descendant`.
///
/// Every object on the walk must load; an unreadable one is an error, not a
/// "no".
pub fn is_ancestor(
    store: &LocalStore,
    potential_ancestor: &ObjectId,
    descendant: &ObjectId,
) -> Result<bool, StoreError> {
    if potential_ancestor == descendant {
        return Ok(true);
    }

    let mut visited = HashSet::new();
    let mut queue = vec![*descendant];

    while let Some(id) = queue.pop() {
        if id == *potential_ancestor {
            return Ok(true);
        }
        if !visited.insert(id) {
            continue;
        }
        queue.extend(store.load_object(&id)?.history_parents());
    }

    Ok(false)
}
