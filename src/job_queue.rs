use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{channel, Receiver, Sender};
use uuid::Uuid;

use crate::billing::dispatcher::{send_preview, send_reminder};
use crate::billing::generator::{generate_batch, GenerationOutcome, GenerationTrigger};
use crate::billing::ledger::{push_batch, LedgerPush};
use crate::config;
use crate::context::AppContext;
use crate::error::BillingResult;

/// One independent unit of billing work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Job {
    GenerateBatch {
        invoice_id: Uuid,
        trigger: GenerationTrigger,
    },
    PreviewInvoice {
        invoice_id: Uuid,
    },
    SendReminder {
        invoice_id: Uuid,
        days_until_due: i64,
    },
    PushLedger {
        batch_id: Uuid,
    },
}

/// key: billing-job-worker -> one spawned task per job
///
/// Jobs share nothing but the context, so a slow or failing invoice never holds up another.
pub fn start_worker(ctx: AppContext) -> Sender<Job> {
    let (tx, mut rx): (Sender<Job>, Receiver<Job>) = channel(*config::JOB_QUEUE_CAPACITY);

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                if let Err(err) = run_job(&ctx, &job).await {
                    tracing::warn!(?err, ?job, "billing job failed");
                }
            });
        }
    });
    tx
}

pub async fn run_job(ctx: &AppContext, job: &Job) -> BillingResult<()> {
    match job {
        Job::GenerateBatch {
            invoice_id,
            trigger,
        } => match generate_batch(ctx, *invoice_id, *trigger).await? {
            GenerationOutcome::Created(batch) => {
                tracing::info!(
                    %invoice_id,
                    batch_id = %batch.id,
                    "generation job completed",
                );
            }
            outcome => {
                tracing::debug!(%invoice_id, ?outcome, "generation job produced no batch");
            }
        },
        Job::PreviewInvoice { invoice_id } => {
            send_preview(ctx, *invoice_id).await?;
        }
        Job::SendReminder {
            invoice_id,
            days_until_due,
        } => {
            send_reminder(ctx, *invoice_id, *days_until_due).await?;
        }
        Job::PushLedger { batch_id } => {
            if let LedgerPush::NotConfigured = push_batch(ctx, *batch_id, false).await? {
                tracing::warn!(%batch_id, "ledger push requested but no ledger is configured");
            }
        }
    }
    Ok(())
}
