use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{BatchCommit, CommitOutcome, Store};
use crate::billing::models::{BillingBatch, Invoice, Owner, PaidStatus};
use crate::entries::TimeEntry;
use crate::error::StoreError;
use crate::recurrence::RecurringSeries;

#[derive(Default)]
struct MemoryState {
    owners: HashMap<Uuid, Owner>,
    invoices: HashMap<Uuid, Invoice>,
    series: HashMap<Uuid, RecurringSeries>,
    entries: HashMap<Uuid, TimeEntry>,
    batches: HashMap<Uuid, BillingBatch>,
}

impl MemoryState {
    fn sorted_entries(&self, filter: impl Fn(&TimeEntry) -> bool) -> Vec<TimeEntry> {
        let mut entries: Vec<TimeEntry> = self
            .entries
            .values()
            .filter(|entry| filter(*entry))
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            (a.tracked_on, a.created_at, a.id).cmp(&(b.tracked_on, b.created_at, b.id))
        });
        entries
    }

    fn batch_mut(&mut self, batch_id: Uuid) -> Result<&mut BillingBatch, StoreError> {
        self.batches.get_mut(&batch_id).ok_or(StoreError::NotFound {
            entity: "billing batch",
            id: batch_id,
        })
    }
}

/// key: memory-store -> single-process backend
///
/// All state sits behind one async mutex, so every trait method is atomic with respect to
/// every other. Used by the test suite and for running without Postgres.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_owner(&self, owner: &Owner) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.owners.insert(owner.id, owner.clone());
        Ok(())
    }

    async fn owner_billing_active(&self, owner_id: Uuid) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .owners
            .get(&owner_id)
            .map(|owner| owner.billing_active)
            .unwrap_or(false))
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.invoices.get(&invoice_id).cloned())
    }

    async fn list_dispatchable_invoices(&self) -> Result<Vec<Invoice>, StoreError> {
        let state = self.state.lock().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|invoice| !invoice.paused && !invoice.archived)
            .filter(|invoice| {
                state
                    .owners
                    .get(&invoice.owner_id)
                    .map(|owner| owner.billing_active)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        invoices.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(invoices)
    }

    async fn update_invoice(&self, invoice: &Invoice) -> Result<Invoice, StoreError> {
        let mut state = self.state.lock().await;
        let stored = state
            .invoices
            .get_mut(&invoice.id)
            .ok_or(StoreError::NotFound {
                entity: "invoice",
                id: invoice.id,
            })?;
        if stored.version != invoice.version {
            return Err(StoreError::VersionConflict {
                invoice_id: invoice.id,
            });
        }
        let mut next = invoice.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn insert_series(&self, series: &RecurringSeries) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.series.insert(series.id, series.clone());
        Ok(())
    }

    async fn get_series(&self, series_id: Uuid) -> Result<Option<RecurringSeries>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.series.get(&series_id).cloned())
    }

    async fn list_live_series(&self) -> Result<Vec<RecurringSeries>, StoreError> {
        let state = self.state.lock().await;
        let mut live: Vec<RecurringSeries> = state
            .series
            .values()
            .filter(|series| series.active)
            .filter(|series| {
                state
                    .invoices
                    .get(&series.invoice_id)
                    .map(|invoice| !invoice.archived)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        live.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(live)
    }

    async fn cancel_series(&self, series_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let series = state
            .series
            .get_mut(&series_id)
            .ok_or(StoreError::NotFound {
                entity: "recurring series",
                id: series_id,
            })?;
        let was_active = series.active;
        series.active = false;
        Ok(was_active)
    }

    async fn set_series_anchor(
        &self,
        series_id: Uuid,
        anchor: NaiveDate,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let series = state
            .series
            .get_mut(&series_id)
            .ok_or(StoreError::NotFound {
                entity: "recurring series",
                id: series_id,
            })?;
        series.descriptor.anchor = anchor;
        Ok(())
    }

    async fn insert_entry(&self, entry: &TimeEntry) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn get_entry(&self, entry_id: Uuid) -> Result<Option<TimeEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.entries.get(&entry_id).cloned())
    }

    async fn set_entry_quantity(
        &self,
        entry_id: Uuid,
        quantity: Decimal,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let entry = state
            .entries
            .get_mut(&entry_id)
            .ok_or(StoreError::NotFound {
                entity: "time entry",
                id: entry_id,
            })?;
        entry.quantity = quantity;
        Ok(())
    }

    async fn entries_for_invoice(&self, invoice_id: Uuid) -> Result<Vec<TimeEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.sorted_entries(|entry| entry.invoice_id == invoice_id))
    }

    async fn unbilled_entries(&self, invoice_id: Uuid) -> Result<Vec<TimeEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.sorted_entries(|entry| entry.invoice_id == invoice_id && entry.is_billable()))
    }

    async fn entries_in_batch(&self, batch_id: Uuid) -> Result<Vec<TimeEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.sorted_entries(|entry| entry.batch_id == Some(batch_id)))
    }

    async fn owner_hours_on(
        &self,
        owner_id: Uuid,
        date: NaiveDate,
        excluding: Option<Uuid>,
    ) -> Result<Decimal, StoreError> {
        let state = self.state.lock().await;
        let total: Decimal = state
            .entries
            .values()
            .filter(|entry| entry.tracked_on == date)
            .filter(|entry| Some(entry.id) != excluding)
            .filter(|entry| {
                state
                    .invoices
                    .get(&entry.invoice_id)
                    .map(|invoice| invoice.owner_id == owner_id)
                    .unwrap_or(false)
            })
            .map(|entry| entry.quantity)
            .sum();
        Ok(total)
    }

    async fn series_has_entry_on(
        &self,
        series_id: Uuid,
        date: NaiveDate,
    ) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .values()
            .any(|entry| entry.series_id == Some(series_id) && entry.tracked_on == date))
    }

    async fn materialize_entry(&self, entry: &TimeEntry) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let exists = state.entries.values().any(|existing| {
            existing.series_id.is_some()
                && existing.series_id == entry.series_id
                && existing.tracked_on == entry.tracked_on
        });
        if exists {
            return Ok(false);
        }
        state.entries.insert(entry.id, entry.clone());
        Ok(true)
    }

    async fn commit_batch(&self, commit: BatchCommit) -> Result<CommitOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let invoice_id = commit.invoice.id;
        let stored_version = state
            .invoices
            .get(&invoice_id)
            .map(|invoice| invoice.version)
            .ok_or(StoreError::NotFound {
                entity: "invoice",
                id: invoice_id,
            })?;
        if stored_version != commit.invoice.version {
            return Ok(CommitOutcome::InvoiceChanged);
        }

        let all_unclaimed = commit.entry_ids.iter().all(|entry_id| {
            state
                .entries
                .get(entry_id)
                .map(|entry| entry.batch_id.is_none())
                .unwrap_or(false)
        });
        if !all_unclaimed {
            return Ok(CommitOutcome::EntriesClaimed);
        }

        for entry_id in &commit.entry_ids {
            if let Some(entry) = state.entries.get_mut(entry_id) {
                entry.batch_id = Some(commit.batch.id);
            }
        }
        let mut invoice = commit.invoice;
        invoice.version += 1;
        state.invoices.insert(invoice_id, invoice);
        state.batches.insert(commit.batch.id, commit.batch);
        Ok(CommitOutcome::Committed)
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<BillingBatch>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.batches.get(&batch_id).cloned())
    }

    async fn list_batches(&self, invoice_id: Uuid) -> Result<Vec<BillingBatch>, StoreError> {
        let state = self.state.lock().await;
        let mut batches: Vec<BillingBatch> = state
            .batches
            .values()
            .filter(|batch| batch.invoice_id == Some(invoice_id))
            .cloned()
            .collect();
        batches.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(batches)
    }

    async fn list_unsynced_batches(&self) -> Result<Vec<BillingBatch>, StoreError> {
        let state = self.state.lock().await;
        let mut batches: Vec<BillingBatch> = state
            .batches
            .values()
            .filter(|batch| batch.ledger_synced_at.is_none())
            .filter(|batch| batch.paid_status != PaidStatus::Cancelled)
            .cloned()
            .collect();
        batches.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(batches)
    }

    async fn transition_batch(
        &self,
        batch_id: Uuid,
        from: PaidStatus,
        to: PaidStatus,
    ) -> Result<BillingBatch, StoreError> {
        let mut state = self.state.lock().await;
        let batch = state.batch_mut(batch_id)?;
        if batch.paid_status != from || !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                batch_id,
                from: batch.paid_status,
                to,
            });
        }
        batch.paid_status = to;
        Ok(batch.clone())
    }

    async fn cancel_installment(
        &self,
        batch_id: Uuid,
        from: PaidStatus,
        invoice: &Invoice,
    ) -> Result<BillingBatch, StoreError> {
        let mut state = self.state.lock().await;
        let stored_version = state
            .invoices
            .get(&invoice.id)
            .map(|stored| stored.version)
            .ok_or(StoreError::NotFound {
                entity: "invoice",
                id: invoice.id,
            })?;
        if stored_version != invoice.version {
            return Err(StoreError::VersionConflict {
                invoice_id: invoice.id,
            });
        }
        let batch = state.batch_mut(batch_id)?;
        if batch.paid_status != from || !from.can_transition_to(PaidStatus::Cancelled) {
            return Err(StoreError::InvalidTransition {
                batch_id,
                from: batch.paid_status,
                to: PaidStatus::Cancelled,
            });
        }
        batch.paid_status = PaidStatus::Cancelled;
        let cancelled = batch.clone();

        let mut next = invoice.clone();
        next.version += 1;
        state.invoices.insert(next.id, next);
        Ok(cancelled)
    }

    async fn set_batch_total(
        &self,
        batch_id: Uuid,
        total: Decimal,
        hours: Decimal,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let batch = state.batch_mut(batch_id)?;
        batch.total = total;
        batch.hours = hours;
        Ok(())
    }

    async fn mark_ledger_synced(
        &self,
        batch_id: Uuid,
        synced_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.batch_mut(batch_id)?.ledger_synced_at = Some(synced_at);
        Ok(())
    }

    async fn set_payment_intent(&self, batch_id: Uuid, intent_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.batch_mut(batch_id)?.payment_intent_id = Some(intent_id.to_string());
        Ok(())
    }
}
