use std::time::Duration;

use tracing::{info, instrument, warn};

use mirror_core::{Outcome, RefUpdate};

use crate::retry::{with_timeout, RetryPolicy};
use crate::transport::RepositoryClient;
use crate::SyncError;

/// Apply one planned ref update at the destination.
///
/// Unreachable endpoints are retried with backoff; anything else is final
/// for this ref and comes back as a failed outcome, never as an error.
#[instrument(skip_all, fields(ref_name = %update.name, kind = update.kind.name()))]
pub async fn apply(
    update: &RefUpdate,
    destination: &dyn RepositoryClient,
    retry: &RetryPolicy,
    timeout: Duration,
) -> Outcome {
    let mut attempt: u32 = 0;
    loop {
        let result = with_timeout(timeout, "apply ref", destination.compare_and_swap(update)).await;
        match result {
            Ok(()) => {
                info!(new = ?update.new_id, "ref applied");
                return Outcome::Applied;
            }
            // an earlier attempt landed but its response was lost
            Err(SyncError::Stale { actual, .. }) if attempt > 0 && actual == update.new_id => {
                info!("ref already at target after retry");
                return Outcome::Applied;
            }
            Err(e) if e.is_transient() && attempt < retry.limit => {
                attempt += 1;
                warn!(attempt, error = %e, "ref update failed, retrying");
                retry.wait(attempt).await;
            }
            Err(e) => {
                warn!(error = %e, "ref update failed");
                return Outcome::Failed {
                    reason: e.failure_reason(),
                };
            }
        }
    }
}
