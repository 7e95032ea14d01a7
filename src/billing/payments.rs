use tracing::{info, warn};
use uuid::Uuid;

use super::adapters::PaymentState;
use super::models::{BillingBatch, PaidStatus};
use crate::context::AppContext;
use crate::error::{BillingError, BillingResult};

/// key: payment-collector -> NOT_STARTED/FAILED -> PENDING -> PAID | FAILED
///
/// Creates a payment intent when the batch has none in flight, then confirms it. A processor
/// that is still working leaves the batch pending; calling again confirms the same intent.
pub async fn collect_payment(ctx: &AppContext, batch_id: Uuid) -> BillingResult<BillingBatch> {
    let processor = ctx
        .payments
        .clone()
        .ok_or_else(|| BillingError::Unsupported("no payment processor configured".to_string()))?;
    let mut batch = ctx
        .store
        .get_batch(batch_id)
        .await?
        .ok_or(BillingError::BatchNotFound(batch_id))?;

    let intent_id = match (batch.paid_status, batch.payment_intent_id.clone()) {
        (PaidStatus::Pending, Some(intent_id)) => intent_id,
        (PaidStatus::NotStarted | PaidStatus::Failed, _) => {
            let intent_id = ctx
                .call_collaborator("payment intent", processor.create_intent(&batch))
                .await?;
            ctx.store.set_payment_intent(batch.id, &intent_id).await?;
            batch = ctx
                .store
                .transition_batch(batch.id, batch.paid_status, PaidStatus::Pending)
                .await?;
            info!(%batch_id, %intent_id, "payment intent created");
            intent_id
        }
        (status, _) => {
            return Err(BillingError::Unsupported(format!(
                "batch is {} and cannot be collected",
                status.as_str()
            )))
        }
    };

    let state = ctx
        .call_collaborator("payment confirmation", processor.confirm(&intent_id))
        .await?;
    let next = match state {
        PaymentState::Succeeded => PaidStatus::Paid,
        PaymentState::Failed => PaidStatus::Failed,
        PaymentState::Processing => return Ok(batch),
    };
    let batch = ctx
        .store
        .transition_batch(batch.id, PaidStatus::Pending, next)
        .await?;
    if next == PaidStatus::Failed {
        warn!(%batch_id, %intent_id, "payment failed");
    } else {
        info!(%batch_id, %intent_id, "payment collected");
    }
    Ok(batch)
}
