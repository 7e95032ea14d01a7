pub mod adapters;
pub mod api;
pub mod cycle;
pub mod dispatcher;
pub mod generator;
pub mod installments;
pub mod ledger;
pub mod models;
pub mod payments;
pub mod scheduler;

pub use adapters::{
    LedgerSync, LogNotifier, Notifier, PaymentProcessor, PaymentState, SignedWebhookClient,
    WebhookLedgerSync, WebhookNotifier,
};
pub use dispatcher::{
    dispatch_due_installments, dispatch_due_invoices, dispatch_due_reminders, DispatchSummary,
};
pub use generator::{
    cancel_batch, generate_batch, resync_batch_total, set_installments_total, GenerationOutcome,
    GenerationTrigger,
};
pub use models::{
    BillingBatch, BillingCycle, Invoice, IntervalCycle, IntervalUnit, MilestoneCycle, Owner,
    PaidStatus, SingleCycle, SingleStatus, WeeklyCycle,
};
pub use scheduler::{process_tick as run_daily_tick, spawn as spawn_billing_scheduler, DailyJob};
