use axum::{
    routing::{get, post, put},
    Router,
};

use crate::billing::api;

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/jobs/:name", post(api::run_job))
        .route("/api/time-entries", post(api::create_time_entry))
        .route("/api/series/:id/stop", post(api::stop_recurring_series))
        .route("/api/invoices/:id/generate", post(api::generate_invoice))
        .route("/api/invoices/:id/remind", post(api::remind_invoice))
        .route(
            "/api/invoices/:id/installments",
            put(api::update_installment_plan),
        )
        .route("/api/invoices/:id/batches", get(api::list_invoice_batches))
        .route("/api/batches/:id/resync", post(api::resync_batch))
        .route(
            "/api/batches/:id/resync-ledger",
            post(api::resync_batch_ledger),
        )
        .route("/api/batches/:id/collect", post(api::collect_batch))
        .route("/api/batches/:id/cancel", post(api::cancel_billing_batch))
}
