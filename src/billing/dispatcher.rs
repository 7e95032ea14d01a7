use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc::Sender;
use tracing::{debug, info};
use uuid::Uuid;

use super::cycle::Trigger;
use super::generator::GenerationTrigger;
use super::models::{BillingCycle, Invoice, SingleStatus};
use crate::context::AppContext;
use crate::error::{BillingError, BillingResult};
use crate::job_queue::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    Invoices,
    Installments,
    Reminders,
}

impl DispatchKind {
    fn label(self) -> &'static str {
        match self {
            DispatchKind::Invoices => "Invoices sent",
            DispatchKind::Installments => "Installments sent",
            DispatchKind::Reminders => "Reminders sent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub kind: DispatchKind,
    /// Billing or reminder jobs enqueued.
    pub sent: usize,
    /// Interval previews enqueued alongside invoices.
    pub previews: usize,
}

impl DispatchSummary {
    fn new(kind: DispatchKind) -> Self {
        Self {
            kind,
            sent: 0,
            previews: 0,
        }
    }
}

impl fmt::Display for DispatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.sent)
    }
}

async fn enqueue(jobs: &Sender<Job>, job: Job) -> BillingResult<()> {
    jobs.send(job).await.map_err(|_| BillingError::QueueClosed)
}

/// key: invoice-dispatcher -> interval bills, interval previews and monday weekly bills
pub async fn dispatch_due_invoices(
    ctx: &AppContext,
    jobs: &Sender<Job>,
) -> BillingResult<DispatchSummary> {
    let today = ctx.clock.today();
    let mut summary = DispatchSummary::new(DispatchKind::Invoices);

    for invoice in ctx.store.list_dispatchable_invoices().await? {
        if !matches!(
            invoice.cycle,
            BillingCycle::Interval(_) | BillingCycle::Weekly(_)
        ) {
            continue;
        }
        match invoice.cycle.trigger(today) {
            Some(Trigger::Bill) => {
                enqueue(
                    jobs,
                    Job::GenerateBatch {
                        invoice_id: invoice.id,
                        trigger: GenerationTrigger::Scheduled,
                    },
                )
                .await?;
                summary.sent += 1;
            }
            Some(Trigger::Preview) => {
                enqueue(
                    jobs,
                    Job::PreviewInvoice {
                        invoice_id: invoice.id,
                    },
                )
                .await?;
                summary.previews += 1;
            }
            None => {}
        }
    }

    info!(%today, sent = summary.sent, previews = summary.previews, "due invoices dispatched");
    Ok(summary)
}

/// key: installment-dispatcher -> final single invoices with an installment due today
pub async fn dispatch_due_installments(
    ctx: &AppContext,
    jobs: &Sender<Job>,
) -> BillingResult<DispatchSummary> {
    let today = ctx.clock.today();
    let mut summary = DispatchSummary::new(DispatchKind::Installments);

    for invoice in ctx.store.list_dispatchable_invoices().await? {
        if !matches!(invoice.cycle, BillingCycle::Single(_)) {
            continue;
        }
        if invoice.cycle.trigger(today) == Some(Trigger::Bill) {
            enqueue(
                jobs,
                Job::GenerateBatch {
                    invoice_id: invoice.id,
                    trigger: GenerationTrigger::Scheduled,
                },
            )
            .await?;
            summary.sent += 1;
        }
    }

    info!(%today, sent = summary.sent, "due installments dispatched");
    Ok(summary)
}

/// key: reminder-dispatcher -> one job per matching lead time
pub async fn dispatch_due_reminders(
    ctx: &AppContext,
    jobs: &Sender<Job>,
) -> BillingResult<DispatchSummary> {
    let today = ctx.clock.today();
    let mut summary = DispatchSummary::new(DispatchKind::Reminders);

    for invoice in ctx.store.list_dispatchable_invoices().await? {
        for days_until_due in invoice.cycle.reminder_leads(today) {
            enqueue(
                jobs,
                Job::SendReminder {
                    invoice_id: invoice.id,
                    days_until_due,
                },
            )
            .await?;
            summary.sent += 1;
        }
    }

    info!(%today, sent = summary.sent, "due reminders dispatched");
    Ok(summary)
}

async fn notifiable_invoice(ctx: &AppContext, invoice_id: Uuid) -> BillingResult<Option<Invoice>> {
    let invoice = ctx
        .store
        .get_invoice(invoice_id)
        .await?
        .ok_or(BillingError::InvoiceNotFound(invoice_id))?;
    if invoice.archived || !ctx.store.owner_billing_active(invoice.owner_id).await? {
        debug!(%invoice_id, "skipping notice for archived invoice or inactive owner");
        return Ok(None);
    }
    Ok(Some(invoice))
}

/// Sends the heads-up for an interval invoice billing tomorrow.
pub async fn send_preview(ctx: &AppContext, invoice_id: Uuid) -> BillingResult<bool> {
    let Some(invoice) = notifiable_invoice(ctx, invoice_id).await? else {
        return Ok(false);
    };
    let unbilled_hours: Decimal = ctx
        .store
        .unbilled_entries(invoice.id)
        .await?
        .iter()
        .map(|entry| entry.quantity)
        .sum();
    ctx.call_collaborator("notifier", ctx.notifier.preview(&invoice, unbilled_hours))
        .await?;
    info!(%invoice_id, %unbilled_hours, "invoice preview sent");
    Ok(true)
}

/// Sends a payment reminder. Scheduled reminders pass the matching lead time; explicit ones
/// pass the current distance to the due date.
pub async fn send_reminder(
    ctx: &AppContext,
    invoice_id: Uuid,
    days_until_due: i64,
) -> BillingResult<bool> {
    let Some(invoice) = notifiable_invoice(ctx, invoice_id).await? else {
        return Ok(false);
    };
    ctx.call_collaborator("notifier", ctx.notifier.remind(&invoice, days_until_due))
        .await?;
    info!(%invoice_id, days_until_due, "invoice reminder sent");
    Ok(true)
}

/// Explicit reminder from the API. Only final single invoices have a due date to remind about.
pub async fn remind_now(ctx: &AppContext, invoice_id: Uuid) -> BillingResult<i64> {
    let invoice = ctx
        .store
        .get_invoice(invoice_id)
        .await?
        .ok_or(BillingError::InvoiceNotFound(invoice_id))?;
    let BillingCycle::Single(cycle) = &invoice.cycle else {
        return Err(BillingError::Unsupported(format!(
            "{} invoices have no due date",
            invoice.cycle.kind()
        )));
    };
    if cycle.status != SingleStatus::Final {
        return Err(BillingError::Unsupported(
            "draft invoices cannot be reminded".to_string(),
        ));
    }
    let days_until_due = (cycle.due_date - ctx.clock.today()).num_days();
    if !send_reminder(ctx, invoice_id, days_until_due).await? {
        return Err(BillingError::Unsupported(
            "invoice is archived or its owner is not billing-eligible".to_string(),
        ));
    }
    Ok(days_until_due)
}
