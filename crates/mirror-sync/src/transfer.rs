use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use mirror_core::{ObjectId, ObjectInfo, RefUpdatePlan, TransferStats};

use crate::retry::{retrying, with_timeout, RetryPolicy};
use crate::transport::RepositoryClient;
use crate::SyncError;

/// A batch of objects sent to the destination in one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    pub objects: Vec<ObjectInfo>,
    pub bytes: u64,
}

impl Chunk {
    fn push(&mut self, info: ObjectInfo) {
        self.bytes += info.size;
        self.objects.push(info);
    }
}

/// Split dependency-ordered objects into chunks of at most `max_bytes`,
/// keeping order. An object larger than the bound gets a chunk of its own.
pub fn chunk_objects(objects: &[ObjectInfo], max_bytes: u64) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current = Chunk::default();
    for info in objects {
        if info.size > max_bytes {
            if !current.objects.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let mut alone = Chunk::default();
            alone.push(*info);
            chunks.push(alone);
            continue;
        }
        if !current.objects.is_empty() && current.bytes + info.size > max_bytes {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(*info);
    }
    if !current.objects.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Knobs for one job's transfer.
#[derive(Debug, Clone, Copy)]
pub struct TransferOptions {
    pub max_chunk_bytes: u64,
    pub retry: RetryPolicy,
    /// Bound on each read+write of a single chunk.
    pub chunk_timeout: Duration,
}

/// Ship every object the plan's new tips need and the destination lacks,
/// chunk by chunk.
///
/// Objects confirmed at the destination are kept in a ledger so a retried or
/// later chunk never sends them again.
#[instrument(skip_all, fields(destination = %destination.endpoint()))]
pub async fn transfer(
    plan: &RefUpdatePlan,
    source: &dyn RepositoryClient,
    destination: &dyn RepositoryClient,
    options: &TransferOptions,
    cancel: &CancellationToken,
) -> Result<TransferStats, SyncError> {
    let mut stats = TransferStats::default();
    let tips = plan.new_tips();
    if tips.is_empty() {
        return Ok(stats);
    }

    let wanted = with_timeout(
        options.chunk_timeout,
        "enumerate objects",
        source.missing_objects(&tips, &plan.haves),
    )
    .await?;
    let wanted_ids: Vec<ObjectId> = wanted.iter().map(|o| o.id).collect();
    let present = present_at_destination(destination, &wanted_ids, options).await?;
    let pending: Vec<ObjectInfo> = wanted
        .into_iter()
        .filter(|o| !present.contains(&o.id))
        .collect();
    stats.objects_skipped = present.len() as u64;

    if let Some(big) = pending.iter().find(|o| o.size > options.max_chunk_bytes) {
        return Err(SyncError::TransferLimitExceeded {
            id: big.id,
            size: big.size,
            max: options.max_chunk_bytes,
        });
    }

    let sizes: HashMap<ObjectId, u64> = pending.iter().map(|o| (o.id, o.size)).collect();
    let chunks = chunk_objects(&pending, options.max_chunk_bytes);
    info!(
        objects = pending.len(),
        chunks = chunks.len(),
        skipped = stats.objects_skipped,
        "transferring objects"
    );

    let mut ledger: HashSet<ObjectId> = HashSet::new();
    for (index, chunk) in chunks.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        send_chunk(index, chunk, source, destination, options, &sizes, &mut ledger, &mut stats).await?;
    }

    debug!(
        sent = stats.objects_sent,
        bytes = stats.bytes_sent,
        retries = stats.retries,
        "transfer complete"
    );
    Ok(stats)
}

async fn present_at_destination(
    destination: &dyn RepositoryClient,
    ids: &[ObjectId],
    options: &TransferOptions,
) -> Result<HashSet<ObjectId>, SyncError> {
    retrying(&options.retry, "check destination objects", || {
        with_timeout(
            options.chunk_timeout,
            "check destination objects",
            destination.has_objects(ids),
        )
    })
    .await
}

#[allow(clippy::too_many_arguments)]
async fn send_chunk(
    index: usize,
    chunk: &Chunk,
    source: &dyn RepositoryClient,
    destination: &dyn RepositoryClient,
    options: &TransferOptions,
    sizes: &HashMap<ObjectId, u64>,
    ledger: &mut HashSet<ObjectId>,
    stats: &mut TransferStats,
) -> Result<(), SyncError> {
    let mut attempt: u32 = 0;
    loop {
        let mut remaining: Vec<ObjectInfo> = chunk
            .objects
            .iter()
            .filter(|o| !ledger.contains(&o.id))
            .copied()
            .collect();

        if attempt > 0 && !remaining.is_empty() {
            // a failed attempt may have landed part of the chunk
            let ids: Vec<ObjectId> = remaining.iter().map(|o| o.id).collect();
            let landed = present_at_destination(destination, &ids, options).await?;
            stats.objects_skipped += landed.len() as u64;
            ledger.extend(landed.iter().copied());
            remaining.retain(|o| !landed.contains(&o.id));
        }
        if remaining.is_empty() {
            return Ok(());
        }

        let result = with_timeout(options.chunk_timeout, "transfer chunk", async {
            let batch = source.read_objects(&remaining).await?;
            destination.write_objects(batch).await
        })
        .await;

        match result {
            Ok(landed) => {
                for id in landed {
                    if ledger.insert(id) {
                        stats.objects_sent += 1;
                        stats.bytes_sent += sizes.get(&id).copied().unwrap_or(0);
                    }
                }
                stats.chunks_sent += 1;
                debug!(chunk = index, objects = remaining.len(), "chunk sent");
                return Ok(());
            }
            Err(e) if e.is_transient() && attempt < options.retry.limit => {
                attempt += 1;
                stats.retries += 1;
                warn!(chunk = index, attempt, error = %e, "chunk transfer failed, retrying");
                options.retry.wait(attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}
