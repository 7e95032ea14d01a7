#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use timebill::billing::{BillingBatch, BillingCycle, Invoice, LedgerSync, Notifier, Owner};
use timebill::clock::FixedClock;
use timebill::entries::TimeEntry;
use timebill::store::{MemoryStore, Store};
use timebill::AppContext;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Sent { invoice_id: Uuid, batch_id: Uuid },
    Preview { invoice_id: Uuid, hours: Decimal },
    Reminder { invoice_id: Uuid, days_until_due: i64 },
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    fn record(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, invoice: &Invoice, batch: &BillingBatch) -> Result<()> {
        self.record(Notice::Sent {
            invoice_id: invoice.id,
            batch_id: batch.id,
        });
        Ok(())
    }

    async fn preview(&self, invoice: &Invoice, unbilled_hours: Decimal) -> Result<()> {
        self.record(Notice::Preview {
            invoice_id: invoice.id,
            hours: unbilled_hours,
        });
        Ok(())
    }

    async fn remind(&self, invoice: &Invoice, days_until_due: i64) -> Result<()> {
        self.record(Notice::Reminder {
            invoice_id: invoice.id,
            days_until_due,
        });
        Ok(())
    }
}

/// Fails every call, optionally after stalling.
pub struct BrokenNotifier {
    pub stall: Option<Duration>,
}

impl BrokenNotifier {
    async fn fail(&self) -> Result<()> {
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        Err(anyhow!("smtp relay unavailable"))
    }
}

#[async_trait]
impl Notifier for BrokenNotifier {
    async fn send(&self, _invoice: &Invoice, _batch: &BillingBatch) -> Result<()> {
        self.fail().await
    }

    async fn preview(&self, _invoice: &Invoice, _unbilled_hours: Decimal) -> Result<()> {
        self.fail().await
    }

    async fn remind(&self, _invoice: &Invoice, _days_until_due: i64) -> Result<()> {
        self.fail().await
    }
}

#[derive(Default)]
pub struct RecordingLedger {
    pushed: Mutex<Vec<Uuid>>,
}

impl RecordingLedger {
    pub fn pushed(&self) -> Vec<Uuid> {
        self.pushed.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerSync for RecordingLedger {
    async fn push(&self, batch: &BillingBatch) -> Result<()> {
        self.pushed.lock().unwrap().push(batch.id);
        Ok(())
    }
}

pub struct Harness {
    pub ctx: AppContext,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub owner: Owner,
}

impl Harness {
    pub async fn on(today: NaiveDate) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::on(today));
        let notifier = Arc::new(RecordingNotifier::default());
        let ctx = AppContext::new(store.clone(), clock.clone()).with_notifier(notifier.clone());
        let owner = Owner {
            id: Uuid::new_v4(),
            email: "freelancer@example.com".to_string(),
            billing_active: true,
        };
        store.upsert_owner(&owner).await.unwrap();
        Self {
            ctx,
            store,
            clock,
            notifier,
            owner,
        }
    }

    pub async fn invoice(&self, rate: Decimal, cycle: BillingCycle) -> Invoice {
        let invoice = Invoice::new(self.owner.id, "ACME-001", rate, cycle);
        self.store.insert_invoice(&invoice).await.unwrap();
        invoice
    }

    pub async fn invoice_for(&self, owner: &Owner, rate: Decimal, cycle: BillingCycle) -> Invoice {
        let invoice = Invoice::new(owner.id, "ACME-002", rate, cycle);
        self.store.insert_invoice(&invoice).await.unwrap();
        invoice
    }

    pub async fn log(&self, invoice_id: Uuid, quantity: Decimal, tracked_on: NaiveDate) -> TimeEntry {
        let entry = TimeEntry::new(invoice_id, quantity, tracked_on);
        self.store.insert_entry(&entry).await.unwrap();
        entry
    }

    pub async fn reload(&self, invoice_id: Uuid) -> Invoice {
        self.store.get_invoice(invoice_id).await.unwrap().unwrap()
    }
}
