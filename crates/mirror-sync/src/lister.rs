use std::time::Duration;

use tracing::{debug, instrument};

use mirror_core::RefSnapshot;

use crate::policy::RefPolicy;
use crate::retry::{retrying, with_timeout, RetryPolicy};
use crate::transport::{RepositoryClient, Side};
use crate::SyncError;

/// Take one consistent snapshot of an endpoint's refs and keep the ones the
/// policy cares about on that side.
#[instrument(skip_all, fields(side = side.label(), endpoint = %client.endpoint()))]
pub async fn list(
    client: &dyn RepositoryClient,
    policy: &RefPolicy,
    side: Side,
    timeout: Duration,
    retry: &RetryPolicy,
) -> Result<RefSnapshot, SyncError> {
    let listed = retrying(retry, "list refs", || {
        with_timeout(timeout, "list refs", client.list_refs())
    })
    .await?;
    let total = listed.len();
    let snapshot = RefSnapshot::from_listing(listed)?;
    let selected = snapshot.retain(|name, _| match side {
        Side::Source => policy.selects(name),
        Side::Destination => policy.governs_destination(name),
    });
    debug!(total, selected = selected.len(), "listed refs");
    Ok(selected)
}
