//! Persistence seam for owners, invoices, recurring series, time entries and billing batches.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::billing::models::{BillingBatch, Invoice, Owner, PaidStatus};
use crate::entries::TimeEntry;
use crate::error::StoreError;
use crate::recurrence::RecurringSeries;

/// Everything one billing event writes, applied atomically.
#[derive(Debug, Clone)]
pub struct BatchCommit {
    pub batch: BillingBatch,
    /// Entries to stamp with `batch.id`. Every one must still be unbilled.
    pub entry_ids: Vec<Uuid>,
    /// Invoice with its cycle already advanced. `version` is the version it was read at.
    pub invoice: Invoice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// At least one entry was stamped by a concurrent batch. Nothing was written.
    EntriesClaimed,
    /// The invoice moved on since it was read. Nothing was written.
    InvoiceChanged,
}

/// Storage backend used by every job and API handler.
///
/// ## Claim semantics
///
/// `commit_batch` is the only way entries acquire a batch id. An implementation must apply
/// the batch insert, the entry stamps and the invoice update in one transaction, and must
/// stamp an entry only if its batch id is still null (first writer wins). If any entry or
/// the invoice version fails its check the whole commit is discarded.
///
/// ## Thread safety
///
/// Implementations are shared across spawned tasks behind an `Arc<dyn Store>`.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // ── Owners ───────────────────────────────────────────────────────────────

    async fn upsert_owner(&self, owner: &Owner) -> Result<(), StoreError>;

    /// `false` for unknown owners.
    async fn owner_billing_active(&self, owner_id: Uuid) -> Result<bool, StoreError>;

    // ── Invoices ─────────────────────────────────────────────────────────────

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError>;

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, StoreError>;

    /// Invoices that are neither paused nor archived and whose owner is billing-eligible.
    async fn list_dispatchable_invoices(&self) -> Result<Vec<Invoice>, StoreError>;

    /// Compare-and-set on `invoice.version`. Returns the stored invoice with its bumped version,
    /// or `StoreError::VersionConflict`.
    async fn update_invoice(&self, invoice: &Invoice) -> Result<Invoice, StoreError>;

    // ── Recurring series ─────────────────────────────────────────────────────

    async fn insert_series(&self, series: &RecurringSeries) -> Result<(), StoreError>;

    async fn get_series(&self, series_id: Uuid) -> Result<Option<RecurringSeries>, StoreError>;

    /// Active series whose invoice is not archived.
    async fn list_live_series(&self) -> Result<Vec<RecurringSeries>, StoreError>;

    /// Returns whether the series was active.
    async fn cancel_series(&self, series_id: Uuid) -> Result<bool, StoreError>;

    async fn set_series_anchor(&self, series_id: Uuid, anchor: NaiveDate)
        -> Result<(), StoreError>;

    // ── Time entries ─────────────────────────────────────────────────────────

    async fn insert_entry(&self, entry: &TimeEntry) -> Result<(), StoreError>;

    async fn get_entry(&self, entry_id: Uuid) -> Result<Option<TimeEntry>, StoreError>;

    async fn set_entry_quantity(&self, entry_id: Uuid, quantity: Decimal)
        -> Result<(), StoreError>;

    async fn entries_for_invoice(&self, invoice_id: Uuid) -> Result<Vec<TimeEntry>, StoreError>;

    /// Entries with no batch id and a positive quantity.
    async fn unbilled_entries(&self, invoice_id: Uuid) -> Result<Vec<TimeEntry>, StoreError>;

    async fn entries_in_batch(&self, batch_id: Uuid) -> Result<Vec<TimeEntry>, StoreError>;

    /// Hours the owner logged on `date` across all invoices, optionally leaving one entry out.
    async fn owner_hours_on(
        &self,
        owner_id: Uuid,
        date: NaiveDate,
        excluding: Option<Uuid>,
    ) -> Result<Decimal, StoreError>;

    async fn series_has_entry_on(&self, series_id: Uuid, date: NaiveDate)
        -> Result<bool, StoreError>;

    /// Inserts a series occurrence unless one already exists for that series and day.
    /// Returns whether a row was written.
    async fn materialize_entry(&self, entry: &TimeEntry) -> Result<bool, StoreError>;

    // ── Billing batches ──────────────────────────────────────────────────────

    async fn commit_batch(&self, commit: BatchCommit) -> Result<CommitOutcome, StoreError>;

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<BillingBatch>, StoreError>;

    async fn list_batches(&self, invoice_id: Uuid) -> Result<Vec<BillingBatch>, StoreError>;

    async fn list_unsynced_batches(&self) -> Result<Vec<BillingBatch>, StoreError>;

    /// Moves `paid_status` from `from` to `to`, failing with `InvalidTransition` if the stored
    /// status differs or the transition is not allowed.
    async fn transition_batch(
        &self,
        batch_id: Uuid,
        from: PaidStatus,
        to: PaidStatus,
    ) -> Result<BillingBatch, StoreError>;

    /// Cancels an installment batch and writes `invoice`, whose plan has taken the slot back,
    /// in one transaction. Fails with `VersionConflict` if the invoice moved since it was read
    /// or `InvalidTransition` if the batch left `from`; either way nothing is written.
    async fn cancel_installment(
        &self,
        batch_id: Uuid,
        from: PaidStatus,
        invoice: &Invoice,
    ) -> Result<BillingBatch, StoreError>;

    async fn set_batch_total(
        &self,
        batch_id: Uuid,
        total: Decimal,
        hours: Decimal,
    ) -> Result<(), StoreError>;

    async fn mark_ledger_synced(
        &self,
        batch_id: Uuid,
        synced_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn set_payment_intent(&self, batch_id: Uuid, intent_id: &str) -> Result<(), StoreError>;
}
