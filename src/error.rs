use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::billing::models::PaidStatus;

/// Input rejected before any scheduling logic runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("quantity {quantity} must be greater than 0 and at most 24 hours")]
    QuantityOutOfRange { quantity: Decimal },
    #[error("entries for this invoice must be dated on or after {cutoff}, got {date}")]
    BeforeCutoff { date: NaiveDate, cutoff: NaiveDate },
    #[error("{date} already has {logged} hours logged; adding {requested} would exceed 24")]
    DailyCapExceeded {
        date: NaiveDate,
        logged: Decimal,
        requested: Decimal,
    },
    #[error("installments must be between 1 and 8, got {requested}")]
    InstallmentsOutOfRange { requested: u8 },
    #[error("cannot reduce installments to {requested}: {sent} already sent")]
    InstallmentsBelowSent { requested: u8, sent: u8 },
    #[error("weekly and biweekly recurrences need at least one weekday")]
    MissingWeekdays,
    #[error("repeating recurrence must end after {starts_on}")]
    EndsBeforeStart { starts_on: NaiveDate },
    #[error("invoice is archived")]
    InvoiceArchived,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("invoice {invoice_id} was modified concurrently")]
    VersionConflict { invoice_id: Uuid },
    #[error("batch {batch_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        batch_id: Uuid,
        from: PaidStatus,
        to: PaidStatus,
    },
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invoice not found: {0}")]
    InvoiceNotFound(Uuid),
    #[error("billing batch not found: {0}")]
    BatchNotFound(Uuid),
    #[error("time entry not found: {0}")]
    EntryNotFound(Uuid),
    #[error("{0}")]
    Unsupported(String),
    #[error("billing job queue is closed")]
    QueueClosed,
    #[error("collaborator failure: {0}")]
    Collaborator(String),
}

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("storage error: {0}")]
    Store(StoreError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad gateway: {0}")]
    BadGateway(String),
    #[error("{0}")]
    Message(String),
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Validation(inner) => AppError::BadRequest(inner.to_string()),
            BillingError::InvoiceNotFound(_)
            | BillingError::BatchNotFound(_)
            | BillingError::EntryNotFound(_) => AppError::NotFound(err.to_string()),
            BillingError::Store(StoreError::NotFound { .. }) => AppError::NotFound(err.to_string()),
            BillingError::Store(
                inner @ (StoreError::VersionConflict { .. } | StoreError::InvalidTransition { .. }),
            ) => AppError::Conflict(inner.to_string()),
            BillingError::Store(inner) => AppError::Store(inner),
            BillingError::Unsupported(message) => AppError::BadRequest(message),
            BillingError::Collaborator(message) => AppError::BadGateway(message),
            BillingError::QueueClosed => AppError::Message(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Store(_) | AppError::Message(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!(?self);
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
