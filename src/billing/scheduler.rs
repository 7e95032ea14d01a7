use std::str::FromStr;

use serde::Serialize;
use tokio::sync::mpsc::Sender;
use tokio::time::{self, Duration};
use tracing::{info, warn};

use super::dispatcher::{dispatch_due_installments, dispatch_due_invoices, dispatch_due_reminders};
use super::ledger::sweep_unsynced;
use crate::config;
use crate::context::AppContext;
use crate::error::{BillingError, BillingResult};
use crate::job_queue::Job;
use crate::recurrence::materialize_recurring_entries;

/// The four jobs run once per day, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DailyJob {
    MaterializeRecurringEntries,
    DispatchDueInvoices,
    DispatchDueInstallments,
    DispatchDueReminders,
}

impl DailyJob {
    pub const ALL: [DailyJob; 4] = [
        DailyJob::MaterializeRecurringEntries,
        DailyJob::DispatchDueInvoices,
        DailyJob::DispatchDueInstallments,
        DailyJob::DispatchDueReminders,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DailyJob::MaterializeRecurringEntries => "materialize-recurring-entries",
            DailyJob::DispatchDueInvoices => "dispatch-due-invoices",
            DailyJob::DispatchDueInstallments => "dispatch-due-installments",
            DailyJob::DispatchDueReminders => "dispatch-due-reminders",
        }
    }
}

impl FromStr for DailyJob {
    type Err = BillingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        DailyJob::ALL
            .into_iter()
            .find(|job| job.name() == value)
            .ok_or_else(|| BillingError::Unsupported(format!("unknown daily job `{value}`")))
    }
}

/// Runs one daily job and returns its summary line, e.g. `Invoices sent: 3`.
pub async fn run_daily_job(
    ctx: &AppContext,
    jobs: &Sender<Job>,
    job: DailyJob,
) -> BillingResult<String> {
    let summary = match job {
        DailyJob::MaterializeRecurringEntries => {
            materialize_recurring_entries(ctx).await?.to_string()
        }
        DailyJob::DispatchDueInvoices => dispatch_due_invoices(ctx, jobs).await?.to_string(),
        DailyJob::DispatchDueInstallments => {
            dispatch_due_installments(ctx, jobs).await?.to_string()
        }
        DailyJob::DispatchDueReminders => dispatch_due_reminders(ctx, jobs).await?.to_string(),
    };
    Ok(summary)
}

/// key: billing-daily-scheduler -> in-process ticker for the daily jobs
pub fn spawn(ctx: AppContext, jobs: Sender<Job>) {
    let interval = Duration::from_secs(*config::BILLING_DAILY_SCAN_INTERVAL_SECS);

    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            process_tick(&ctx, &jobs).await;
        }
    });
}

/// key: billing-daily-scheduler -> tick handler
///
/// Each job runs even if an earlier one failed. Unsynced batches are retried last.
pub async fn process_tick(ctx: &AppContext, jobs: &Sender<Job>) -> Vec<(DailyJob, String)> {
    let mut summaries = Vec::with_capacity(DailyJob::ALL.len());
    for job in DailyJob::ALL {
        match run_daily_job(ctx, jobs, job).await {
            Ok(summary) => {
                info!(job = job.name(), %summary, "daily billing job finished");
                summaries.push((job, summary));
            }
            Err(err) => warn!(?err, job = job.name(), "daily billing job failed"),
        }
    }

    match sweep_unsynced(ctx).await {
        Ok(0) => {}
        Ok(synced) => info!(synced, "unsynced billing batches pushed to ledger"),
        Err(err) => warn!(?err, "ledger sweep failed"),
    }
    summaries
}
