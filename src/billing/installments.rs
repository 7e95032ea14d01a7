use chrono::{Duration, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};

use super::cycle::INSTALLMENT_SPACING_DAYS;
use super::models::{BillingBatch, PaidStatus, SingleCycle};
use crate::entries::TimeEntry;
use crate::error::ValidationError;

pub const MAX_INSTALLMENTS: u8 = 8;

/// key: installment-planner -> price of the next installment
///
/// Splits whatever is still owed evenly over the installments not yet sent, rounded to cents.
/// The final installment takes the exact remainder so the parts always add up.
pub fn apportion(
    balance_due: Decimal,
    installments_total: u8,
    amounts_already_sent: &[Decimal],
) -> Decimal {
    let sent: Decimal = amounts_already_sent.iter().copied().sum();
    let remaining_count = usize::from(installments_total).saturating_sub(amounts_already_sent.len());
    if remaining_count == 0 {
        return Decimal::ZERO;
    }
    let remaining = balance_due - sent;
    if remaining_count == 1 {
        return remaining;
    }
    (remaining / Decimal::from(remaining_count as u64))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Subtotal of the invoice's non-skipped work, less discount, plus tax.
pub fn balance_due(cycle: &SingleCycle, rate: Decimal, entries: &[TimeEntry]) -> Decimal {
    let hours: Decimal = entries
        .iter()
        .filter(|entry| !entry.is_skipped())
        .map(|entry| entry.quantity)
        .sum();
    (hours * rate - cycle.discount + cycle.tax).round_dp(2)
}

/// Principal already billed through live installment batches.
pub fn amounts_already_sent(batches: &[BillingBatch]) -> Vec<Decimal> {
    batches
        .iter()
        .filter(|batch| batch.installment_number.is_some())
        .filter(|batch| batch.paid_status != PaidStatus::Cancelled)
        .map(BillingBatch::principal)
        .collect()
}

/// Due date of the given one-based installment.
pub fn installment_due_date(cycle: &SingleCycle, installment_number: u8) -> NaiveDate {
    let offset = i64::from(installment_number.saturating_sub(1)) * INSTALLMENT_SPACING_DAYS;
    cycle.due_date + Duration::days(offset)
}

/// Penalty owed on an installment billed after its due date.
pub fn late_penalty_for(cycle: &SingleCycle, installment_number: u8, today: NaiveDate) -> Decimal {
    if cycle.late_penalty_enabled && today > installment_due_date(cycle, installment_number) {
        cycle.late_penalty
    } else {
        Decimal::ZERO
    }
}

/// Gives a cancelled installment's slot back to the plan. The next installment is due on the
/// cancelled one's date, or today if that has passed, and re-bills its share of the balance.
pub fn release_installment(cycle: &mut SingleCycle, installment_number: u8, today: NaiveDate) {
    cycle.installments_sent = cycle.installments_sent.saturating_sub(1);
    let due = installment_due_date(cycle, installment_number).max(today);
    cycle.next_installment_date = Some(match cycle.next_installment_date {
        Some(next) => next.min(due),
        None => due,
    });
}

/// Edit-time guard for changing how many installments an invoice is split into.
pub fn validate_installments_total(requested: u8, already_sent: u8) -> Result<(), ValidationError> {
    if requested == 0 || requested > MAX_INSTALLMENTS {
        return Err(ValidationError::InstallmentsOutOfRange { requested });
    }
    if requested < already_sent {
        return Err(ValidationError::InstallmentsBelowSent {
            requested,
            sent: already_sent,
        });
    }
    Ok(())
}
