use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cycle::{CycleOutcome, Trigger};
use super::installments::{
    amounts_already_sent, apportion, balance_due, installment_due_date, late_penalty_for,
    release_installment, validate_installments_total,
};
use super::ledger;
use super::models::{BillingBatch, BillingCycle, Invoice, PaidStatus, SingleCycle};
use crate::context::AppContext;
use crate::entries::TimeEntry;
use crate::error::{BillingError, BillingResult, StoreError};
use crate::store::{BatchCommit, CommitOutcome};

/// Who asked for a generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationTrigger {
    /// Enqueued by a dispatcher; the cycle must still be due when the job runs.
    Scheduled,
    /// Generate-now from the API. Also the only trigger for milestone invoices.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Created(BillingBatch),
    /// Accrual cycle with nothing logged; the calendar moved on without a batch.
    EmptyCycleAdvanced,
    NothingToBill,
    NotDue,
    OwnerInactive,
    Blocked(&'static str),
    /// A concurrent run claimed the entries or moved the invoice first.
    LostRace,
}

struct BatchDraft {
    total: Decimal,
    hours: Decimal,
    late_penalty: Decimal,
    installment_number: Option<u8>,
    due_date: Option<NaiveDate>,
}

fn billable_hours(entries: &[TimeEntry]) -> Decimal {
    entries
        .iter()
        .filter(|entry| !entry.is_skipped())
        .map(|entry| entry.quantity)
        .sum()
}

/// Weekly invoices bill their flat rate each Monday. The week's hours ride along for the record.
fn weekly_draft(rate: Decimal, entries: &[TimeEntry]) -> BatchDraft {
    BatchDraft {
        total: rate.round_dp(2),
        hours: billable_hours(entries),
        late_penalty: Decimal::ZERO,
        installment_number: None,
        due_date: None,
    }
}

fn hourly_draft(rate: Decimal, entries: &[TimeEntry]) -> BatchDraft {
    let hours = billable_hours(entries);
    BatchDraft {
        total: (hours * rate).round_dp(2),
        hours,
        late_penalty: Decimal::ZERO,
        installment_number: None,
        due_date: None,
    }
}

async fn installment_draft(
    ctx: &AppContext,
    invoice: &Invoice,
    cycle: &SingleCycle,
    unbilled: &[TimeEntry],
    today: NaiveDate,
) -> BillingResult<BatchDraft> {
    let all_entries = ctx.store.entries_for_invoice(invoice.id).await?;
    let batches = ctx.store.list_batches(invoice.id).await?;
    let already_sent = amounts_already_sent(&batches);

    let balance = balance_due(cycle, invoice.rate, &all_entries);
    let price = apportion(balance, cycle.installments_total, &already_sent);
    let number = cycle.installments_sent.saturating_add(1);
    let late_penalty = late_penalty_for(cycle, number, today);

    Ok(BatchDraft {
        total: price + late_penalty,
        hours: billable_hours(unbilled),
        late_penalty,
        installment_number: Some(number),
        due_date: Some(installment_due_date(cycle, number)),
    })
}

fn period_bounds(entries: &[TimeEntry], today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = entries
        .iter()
        .map(|entry| entry.tracked_on)
        .min()
        .unwrap_or(today);
    let end = entries
        .iter()
        .map(|entry| entry.tracked_on)
        .max()
        .unwrap_or(today)
        .max(today);
    (start.min(today), end)
}

fn new_batch(
    invoice: &Invoice,
    draft: &BatchDraft,
    entries: &[TimeEntry],
    today: NaiveDate,
    now: DateTime<Utc>,
) -> BillingBatch {
    let (period_start, period_end) = period_bounds(entries, today);
    BillingBatch {
        id: Uuid::new_v4(),
        invoice_id: Some(invoice.id),
        total: draft.total,
        rate_snapshot: invoice.rate,
        hours: draft.hours,
        late_penalty: draft.late_penalty,
        installment_number: draft.installment_number.map(i16::from),
        period_start,
        period_end,
        paid_status: PaidStatus::NotStarted,
        due_date: draft.due_date,
        ledger_synced_at: None,
        payment_intent_id: None,
        created_at: now,
    }
}

/// key: billing-batch-generator -> exactly-once batch creation for one invoice
///
/// Reads the invoice and its unbilled entries, prices them, then commits the batch, the
/// entry claims and the advanced cycle as one unit. Notifier and ledger failures after the
/// commit are logged and never undo it.
pub async fn generate_batch(
    ctx: &AppContext,
    invoice_id: Uuid,
    trigger: GenerationTrigger,
) -> BillingResult<GenerationOutcome> {
    let invoice = ctx
        .store
        .get_invoice(invoice_id)
        .await?
        .ok_or(BillingError::InvoiceNotFound(invoice_id))?;
    let today = ctx.clock.today();
    let now = ctx.clock.now();

    if invoice.archived {
        return Ok(GenerationOutcome::Blocked("invoice is archived"));
    }
    if trigger == GenerationTrigger::Scheduled
        && (invoice.paused || invoice.cycle.trigger(today) != Some(Trigger::Bill))
    {
        debug!(%invoice_id, "scheduled generation no longer due");
        return Ok(GenerationOutcome::NotDue);
    }
    if !ctx.store.owner_billing_active(invoice.owner_id).await? {
        return Ok(GenerationOutcome::OwnerInactive);
    }
    if let Some(reason) = invoice.cycle.blocked_reason() {
        return Ok(GenerationOutcome::Blocked(reason));
    }

    let entries = ctx.store.unbilled_entries(invoice.id).await?;
    let draft = if let BillingCycle::Single(cycle) = &invoice.cycle {
        let draft = installment_draft(ctx, &invoice, cycle, &entries, today).await?;
        if draft.total <= Decimal::ZERO {
            return Ok(GenerationOutcome::NothingToBill);
        }
        draft
    } else if matches!(invoice.cycle, BillingCycle::Weekly(_)) {
        let draft = weekly_draft(invoice.rate, &entries);
        if draft.total <= Decimal::ZERO {
            return Ok(GenerationOutcome::NothingToBill);
        }
        draft
    } else if entries.is_empty() {
        if !invoice.cycle.is_accrual() {
            return Ok(GenerationOutcome::NothingToBill);
        }
        return advance_empty_cycle(ctx, invoice, today, now).await;
    } else {
        hourly_draft(invoice.rate, &entries)
    };

    let batch = new_batch(&invoice, &draft, &entries, today, now);
    let mut advanced = invoice.clone();
    advanced.cycle.advance(today, now, CycleOutcome::Billed);
    let commit = BatchCommit {
        batch: batch.clone(),
        entry_ids: entries.iter().map(|entry| entry.id).collect(),
        invoice: advanced.clone(),
    };

    match ctx.store.commit_batch(commit).await? {
        CommitOutcome::Committed => {}
        outcome => {
            debug!(%invoice_id, ?outcome, "billing batch claim lost to a concurrent run");
            return Ok(GenerationOutcome::LostRace);
        }
    }

    info!(
        %invoice_id,
        batch_id = %batch.id,
        cycle = invoice.cycle.kind(),
        total = %batch.total,
        hours = %batch.hours,
        entries = entries.len(),
        "billing batch created"
    );

    if let Err(err) = ctx
        .call_collaborator("notifier", ctx.notifier.send(&advanced, &batch))
        .await
    {
        warn!(?err, %invoice_id, batch_id = %batch.id, "failed to notify client of billing batch");
    }
    ledger::spawn_push(ctx.clone(), batch.id);

    Ok(GenerationOutcome::Created(batch))
}

async fn advance_empty_cycle(
    ctx: &AppContext,
    mut invoice: Invoice,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> BillingResult<GenerationOutcome> {
    invoice.cycle.advance(today, now, CycleOutcome::Empty);
    match ctx.store.update_invoice(&invoice).await {
        Ok(_) => {
            info!(invoice_id = %invoice.id, "empty billing cycle advanced");
            Ok(GenerationOutcome::EmptyCycleAdvanced)
        }
        Err(StoreError::VersionConflict { invoice_id }) => {
            debug!(%invoice_id, "empty cycle advance lost to a concurrent run");
            Ok(GenerationOutcome::LostRace)
        }
        Err(err) => Err(err.into()),
    }
}

/// Recomputes a batch's total from its stamped entries and frozen rate.
pub async fn resync_batch_total(ctx: &AppContext, batch_id: Uuid) -> BillingResult<BillingBatch> {
    let mut batch = ctx
        .store
        .get_batch(batch_id)
        .await?
        .ok_or(BillingError::BatchNotFound(batch_id))?;
    if batch.installment_number.is_some() {
        return Err(BillingError::Unsupported(
            "installment batches are priced from the invoice balance".to_string(),
        ));
    }
    if batch.paid_status.is_terminal() {
        return Err(BillingError::Unsupported(format!(
            "batch is {} and can no longer change",
            batch.paid_status.as_str()
        )));
    }

    let flat_rate = match batch.invoice_id {
        Some(invoice_id) => ctx
            .store
            .get_invoice(invoice_id)
            .await?
            .map_or(false, |invoice| matches!(invoice.cycle, BillingCycle::Weekly(_))),
        None => false,
    };
    let entries = ctx.store.entries_in_batch(batch.id).await?;
    let draft = if flat_rate {
        weekly_draft(batch.rate_snapshot, &entries)
    } else {
        hourly_draft(batch.rate_snapshot, &entries)
    };
    let hours = draft.hours;
    let total = draft.total + batch.late_penalty;
    ctx.store.set_batch_total(batch.id, total, hours).await?;
    info!(%batch_id, previous = %batch.total, %total, "billing batch total resynced");
    batch.total = total;
    batch.hours = hours;
    Ok(batch)
}

/// Cancels a batch. Its entries stay claimed. A cancelled installment goes back into its
/// invoice's plan so the balance it carried is billed again.
pub async fn cancel_batch(ctx: &AppContext, batch_id: Uuid) -> BillingResult<BillingBatch> {
    let batch = ctx
        .store
        .get_batch(batch_id)
        .await?
        .ok_or(BillingError::BatchNotFound(batch_id))?;

    let plan = match (batch.installment_number, batch.invoice_id) {
        (Some(number), Some(invoice_id)) => ctx
            .store
            .get_invoice(invoice_id)
            .await?
            .map(|invoice| (number, invoice)),
        _ => None,
    };
    let cancelled = match plan {
        Some((number, mut invoice)) => {
            if let BillingCycle::Single(cycle) = &mut invoice.cycle {
                let number = u8::try_from(number).unwrap_or(u8::MAX);
                release_installment(cycle, number, ctx.clock.today());
            }
            ctx.store
                .cancel_installment(batch.id, batch.paid_status, &invoice)
                .await?
        }
        None => {
            ctx.store
                .transition_batch(batch.id, batch.paid_status, PaidStatus::Cancelled)
                .await?
        }
    };
    info!(%batch_id, from = batch.paid_status.as_str(), "billing batch cancelled");
    Ok(cancelled)
}

/// Changes how many installments a single invoice is split into.
pub async fn set_installments_total(
    ctx: &AppContext,
    invoice_id: Uuid,
    requested: u8,
) -> BillingResult<Invoice> {
    let mut invoice = ctx
        .store
        .get_invoice(invoice_id)
        .await?
        .ok_or(BillingError::InvoiceNotFound(invoice_id))?;
    let today = ctx.clock.today();
    let kind = invoice.cycle.kind();
    let BillingCycle::Single(cycle) = &mut invoice.cycle else {
        return Err(BillingError::Unsupported(format!(
            "{kind} invoices are not billed in installments"
        )));
    };
    validate_installments_total(requested, cycle.installments_sent)?;

    cycle.installments_total = requested;
    if cycle.installments_sent >= requested {
        cycle.next_installment_date = None;
    } else if cycle.installments_sent > 0 && cycle.next_installment_date.is_none() {
        let next_due = installment_due_date(cycle, cycle.installments_sent + 1);
        cycle.next_installment_date = Some(next_due.max(today));
    }
    let updated = ctx.store.update_invoice(&invoice).await?;
    info!(%invoice_id, installments_total = requested, "installment plan updated");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(quantity: Decimal, day: u32) -> TimeEntry {
        TimeEntry::new(
            Uuid::new_v4(),
            quantity,
            NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
        )
    }

    #[test]
    fn hourly_total_ignores_skipped_entries() {
        let entries = vec![entry(dec!(2), 3), entry(dec!(0), 4), entry(dec!(3.5), 5)];
        let draft = hourly_draft(dec!(40), &entries);
        assert_eq!(draft.hours, dec!(5.5));
        assert_eq!(draft.total, dec!(220));
    }

    #[test]
    fn weekly_total_is_the_flat_rate_whatever_was_logged() {
        let entries = vec![entry(dec!(2), 3), entry(dec!(6), 4)];
        let draft = weekly_draft(dec!(500), &entries);
        assert_eq!(draft.total, dec!(500));
        assert_eq!(draft.hours, dec!(8));
        assert_eq!(weekly_draft(dec!(500), &[]).total, dec!(500));
    }

    #[test]
    fn period_spans_entries_and_ends_no_earlier_than_today() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let entries = vec![entry(dec!(1), 5), entry(dec!(1), 3)];
        let (start, end) = period_bounds(&entries, today);
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());
        assert_eq!(end, today);
        assert_eq!(period_bounds(&[], today), (today, today));
    }
}
