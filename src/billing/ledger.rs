use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context::AppContext;
use crate::error::{BillingError, BillingResult};

use super::models::BillingBatch;

/// Result of one ledger push attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerPush {
    Synced(BillingBatch),
    AlreadySynced(BillingBatch),
    /// No ledger is configured; the batch stays eligible for a later resync.
    NotConfigured,
}

/// key: billing-ledger-sync -> push one batch to bookkeeping
///
/// `force` re-sends a batch that was already synced.
pub async fn push_batch(
    ctx: &AppContext,
    batch_id: Uuid,
    force: bool,
) -> BillingResult<LedgerPush> {
    let Some(ledger) = ctx.ledger.clone() else {
        return Ok(LedgerPush::NotConfigured);
    };
    let mut batch = ctx
        .store
        .get_batch(batch_id)
        .await?
        .ok_or(BillingError::BatchNotFound(batch_id))?;
    if batch.ledger_synced_at.is_some() && !force {
        return Ok(LedgerPush::AlreadySynced(batch));
    }

    ctx.call_collaborator("ledger", ledger.push(&batch)).await?;
    let synced_at = ctx.clock.now();
    ctx.store.mark_ledger_synced(batch.id, synced_at).await?;
    batch.ledger_synced_at = Some(synced_at);
    info!(%batch_id, "billing batch synced to ledger");
    Ok(LedgerPush::Synced(batch))
}

/// Best-effort background push after a batch is created. Failures only log.
pub fn spawn_push(ctx: AppContext, batch_id: Uuid) {
    if ctx.ledger.is_none() {
        return;
    }
    tokio::spawn(async move {
        if let Err(err) = push_batch(&ctx, batch_id, false).await {
            warn!(?err, %batch_id, "ledger sync failed; batch left for resync");
        }
    });
}

/// Retries every batch that has not reached the ledger yet. Returns how many synced.
pub async fn sweep_unsynced(ctx: &AppContext) -> BillingResult<usize> {
    if ctx.ledger.is_none() {
        return Ok(0);
    }
    let pending = ctx.store.list_unsynced_batches().await?;
    let mut synced = 0;
    for batch in pending {
        match push_batch(ctx, batch.id, false).await {
            Ok(LedgerPush::Synced(_)) => synced += 1,
            Ok(_) => {}
            Err(err) => error!(?err, batch_id = %batch.id, "ledger sweep failed for batch"),
        }
    }
    Ok(synced)
}
