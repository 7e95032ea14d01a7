use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use super::dispatcher::remind_now;
use super::generator::{
    cancel_batch, generate_batch, resync_batch_total, set_installments_total, GenerationOutcome,
    GenerationTrigger,
};
use super::ledger::{push_batch, LedgerPush};
use super::models::{BillingBatch, Invoice};
use super::payments::collect_payment;
use super::scheduler::{run_daily_job, DailyJob};
use crate::context::AppContext;
use crate::entries::{record_time_entry, stop_series, NewTimeEntry, TimeEntry};
use crate::error::{AppError, AppResult, BillingError};
use crate::job_queue::Job;

#[derive(Debug, Serialize)]
pub struct JobRunResponse {
    pub job: DailyJob,
    pub summary: String,
}

#[derive(Debug, Serialize)]
pub struct ReminderResponse {
    pub invoice_id: Uuid,
    pub days_until_due: i64,
}

#[derive(Debug, Serialize)]
pub struct SeriesStopResponse {
    pub series_id: Uuid,
    /// `false` when the series had already stopped or expired.
    pub stopped: bool,
}

#[derive(Debug, Deserialize)]
pub struct InstallmentPlanRequest {
    pub installments_total: u8,
}

#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    pub synced: bool,
    pub batch: Option<BillingBatch>,
}

/// key: billing-api -> `POST /api/jobs/:name`
pub async fn run_job(
    Extension(ctx): Extension<AppContext>,
    Extension(jobs): Extension<Sender<Job>>,
    Path(name): Path<String>,
) -> AppResult<Json<JobRunResponse>> {
    let job: DailyJob = name
        .parse()
        .map_err(|err: BillingError| AppError::NotFound(err.to_string()))?;
    let summary = run_daily_job(&ctx, &jobs, job).await?;
    Ok(Json(JobRunResponse { job, summary }))
}

pub async fn generate_invoice(
    Extension(ctx): Extension<AppContext>,
    Path(invoice_id): Path<Uuid>,
) -> AppResult<Json<GenerationOutcome>> {
    let outcome = generate_batch(&ctx, invoice_id, GenerationTrigger::Manual).await?;
    Ok(Json(outcome))
}

pub async fn remind_invoice(
    Extension(ctx): Extension<AppContext>,
    Path(invoice_id): Path<Uuid>,
) -> AppResult<Json<ReminderResponse>> {
    let days_until_due = remind_now(&ctx, invoice_id).await?;
    Ok(Json(ReminderResponse {
        invoice_id,
        days_until_due,
    }))
}

pub async fn update_installment_plan(
    Extension(ctx): Extension<AppContext>,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<InstallmentPlanRequest>,
) -> AppResult<Json<Invoice>> {
    let invoice = set_installments_total(&ctx, invoice_id, payload.installments_total).await?;
    Ok(Json(invoice))
}

pub async fn list_invoice_batches(
    Extension(ctx): Extension<AppContext>,
    Path(invoice_id): Path<Uuid>,
) -> AppResult<Json<Vec<BillingBatch>>> {
    ctx.store
        .get_invoice(invoice_id)
        .await
        .map_err(BillingError::from)?
        .ok_or(BillingError::InvoiceNotFound(invoice_id))?;
    let batches = ctx
        .store
        .list_batches(invoice_id)
        .await
        .map_err(BillingError::from)?;
    Ok(Json(batches))
}

pub async fn create_time_entry(
    Extension(ctx): Extension<AppContext>,
    Json(payload): Json<NewTimeEntry>,
) -> AppResult<(StatusCode, Json<TimeEntry>)> {
    let entry = record_time_entry(&ctx, payload).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn stop_recurring_series(
    Extension(ctx): Extension<AppContext>,
    Path(series_id): Path<Uuid>,
) -> AppResult<Json<SeriesStopResponse>> {
    let stopped = stop_series(&ctx, series_id).await?;
    Ok(Json(SeriesStopResponse { series_id, stopped }))
}

pub async fn resync_batch(
    Extension(ctx): Extension<AppContext>,
    Path(batch_id): Path<Uuid>,
) -> AppResult<Json<BillingBatch>> {
    Ok(Json(resync_batch_total(&ctx, batch_id).await?))
}

pub async fn resync_batch_ledger(
    Extension(ctx): Extension<AppContext>,
    Path(batch_id): Path<Uuid>,
) -> AppResult<Json<LedgerResponse>> {
    let response = match push_batch(&ctx, batch_id, true).await? {
        LedgerPush::Synced(batch) | LedgerPush::AlreadySynced(batch) => LedgerResponse {
            synced: true,
            batch: Some(batch),
        },
        LedgerPush::NotConfigured => LedgerResponse {
            synced: false,
            batch: None,
        },
    };
    Ok(Json(response))
}

pub async fn collect_batch(
    Extension(ctx): Extension<AppContext>,
    Path(batch_id): Path<Uuid>,
) -> AppResult<Json<BillingBatch>> {
    Ok(Json(collect_payment(&ctx, batch_id).await?))
}

pub async fn cancel_billing_batch(
    Extension(ctx): Extension<AppContext>,
    Path(batch_id): Path<Uuid>,
) -> AppResult<Json<BillingBatch>> {
    Ok(Json(cancel_batch(&ctx, batch_id).await?))
}
