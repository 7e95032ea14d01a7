use chrono::{DateTime, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::info;
use uuid::Uuid;

use crate::billing::models::Invoice;
use crate::context::AppContext;
use crate::error::{BillingError, BillingResult, ValidationError};
use crate::recurrence::{RecurrenceDescriptor, RecurrenceKind, RecurrenceUnit, RecurringSeries};

/// Hours a single owner may log on one calendar day, summed over every invoice.
pub const DAILY_HOURS_CAP: Decimal = Decimal::from_parts(24, 0, 0, false, 0);

/// key: time-entry-model -> dated billable hours
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub quantity: Decimal,
    pub tracked_on: NaiveDate,
    pub series_id: Option<Uuid>,
    /// Write-once; set when the entry is claimed by a billing batch.
    pub batch_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl TimeEntry {
    pub fn new(invoice_id: Uuid, quantity: Decimal, tracked_on: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            invoice_id,
            quantity,
            tracked_on,
            series_id: None,
            batch_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn materialized(series: &RecurringSeries, tracked_on: NaiveDate) -> Self {
        Self {
            series_id: Some(series.id),
            ..Self::new(series.invoice_id, series.quantity, tracked_on)
        }
    }

    /// A zero-hour entry marks a recurring occurrence the user skipped.
    pub fn is_skipped(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn is_billable(&self) -> bool {
        self.batch_id.is_none() && self.quantity > Decimal::ZERO
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecurrenceRequest {
    pub unit: RecurrenceUnit,
    #[serde(default)]
    pub weekdays: Vec<Weekday>,
    /// Present for repeating series; absent for open-ended ones.
    #[serde(default)]
    pub ends_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTimeEntry {
    pub invoice_id: Uuid,
    pub quantity: Decimal,
    pub tracked_on: NaiveDate,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRequest>,
}

pub fn validate_quantity(quantity: Decimal) -> Result<(), ValidationError> {
    if quantity <= Decimal::ZERO || quantity > DAILY_HOURS_CAP {
        return Err(ValidationError::QuantityOutOfRange { quantity });
    }
    Ok(())
}

pub fn validate_cutoff(invoice: &Invoice, tracked_on: NaiveDate) -> Result<(), ValidationError> {
    match invoice.entry_cutoff {
        Some(cutoff) if tracked_on < cutoff => Err(ValidationError::BeforeCutoff {
            date: tracked_on,
            cutoff,
        }),
        _ => Ok(()),
    }
}

pub fn validate_daily_cap(
    tracked_on: NaiveDate,
    already_logged: Decimal,
    requested: Decimal,
) -> Result<(), ValidationError> {
    if already_logged + requested > DAILY_HOURS_CAP {
        return Err(ValidationError::DailyCapExceeded {
            date: tracked_on,
            logged: already_logged,
            requested,
        });
    }
    Ok(())
}

fn descriptor_from_request(
    request: &RecurrenceRequest,
    starts_on: NaiveDate,
) -> Result<RecurrenceDescriptor, ValidationError> {
    if request.unit.uses_weekdays() && request.weekdays.is_empty() {
        return Err(ValidationError::MissingWeekdays);
    }
    let kind = match request.ends_on {
        Some(ends_on) if ends_on <= starts_on => {
            return Err(ValidationError::EndsBeforeStart { starts_on })
        }
        Some(ends_on) => RecurrenceKind::Repeating { ends_on },
        None => RecurrenceKind::Recurring,
    };
    Ok(RecurrenceDescriptor::new(
        kind,
        request.unit,
        request.weekdays.clone(),
        starts_on,
    ))
}

/// key: entry-validator -> record one entry, optionally starting a recurring series
pub async fn record_time_entry(ctx: &AppContext, input: NewTimeEntry) -> BillingResult<TimeEntry> {
    let invoice = ctx
        .store
        .get_invoice(input.invoice_id)
        .await?
        .ok_or(BillingError::InvoiceNotFound(input.invoice_id))?;
    if invoice.archived {
        return Err(ValidationError::InvoiceArchived.into());
    }

    validate_quantity(input.quantity)?;
    validate_cutoff(&invoice, input.tracked_on)?;
    let logged = ctx
        .store
        .owner_hours_on(invoice.owner_id, input.tracked_on, None)
        .await?;
    validate_daily_cap(input.tracked_on, logged, input.quantity)?;

    let mut entry = TimeEntry::new(invoice.id, input.quantity, input.tracked_on);
    if let Some(request) = &input.recurrence {
        let descriptor = descriptor_from_request(request, input.tracked_on)?;
        let series = RecurringSeries::new(invoice.id, input.quantity, descriptor);
        ctx.store.insert_series(&series).await?;
        entry.series_id = Some(series.id);
        info!(
            invoice_id = %invoice.id,
            series_id = %series.id,
            anchor = %series.descriptor.anchor,
            "recurring series started"
        );
    }
    ctx.store.insert_entry(&entry).await?;
    Ok(entry)
}

/// Changes the hours on an entry. Billed entries stay editable; their batch keeps its total
/// until an explicit resync.
pub async fn update_entry_quantity(
    ctx: &AppContext,
    entry_id: Uuid,
    quantity: Decimal,
) -> BillingResult<TimeEntry> {
    let mut entry = ctx
        .store
        .get_entry(entry_id)
        .await?
        .ok_or(BillingError::EntryNotFound(entry_id))?;
    let invoice = ctx
        .store
        .get_invoice(entry.invoice_id)
        .await?
        .ok_or(BillingError::InvoiceNotFound(entry.invoice_id))?;

    validate_quantity(quantity)?;
    let logged = ctx
        .store
        .owner_hours_on(invoice.owner_id, entry.tracked_on, Some(entry.id))
        .await?;
    validate_daily_cap(entry.tracked_on, logged, quantity)?;

    ctx.store.set_entry_quantity(entry.id, quantity).await?;
    entry.quantity = quantity;
    Ok(entry)
}

/// Marks an occurrence as skipped: it stays on record but is never billed.
pub async fn skip_entry(ctx: &AppContext, entry_id: Uuid) -> BillingResult<TimeEntry> {
    let mut entry = ctx
        .store
        .get_entry(entry_id)
        .await?
        .ok_or(BillingError::EntryNotFound(entry_id))?;
    ctx.store.set_entry_quantity(entry.id, Decimal::ZERO).await?;
    entry.quantity = Decimal::ZERO;
    Ok(entry)
}

/// Stops a recurring series. Entries it already produced are untouched. Returns whether the
/// series was still running.
pub async fn stop_series(ctx: &AppContext, series_id: Uuid) -> BillingResult<bool> {
    let was_active = ctx.store.cancel_series(series_id).await?;
    if was_active {
        info!(%series_id, "recurring series stopped");
    }
    Ok(was_active)
}
