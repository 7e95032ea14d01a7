mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::{Extension, Router};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tokio::sync::mpsc::{channel, Receiver};
use tower::ServiceExt;
use uuid::Uuid;

use common::{date, Harness};
use timebill::billing::{BillingCycle, WeeklyCycle};
use timebill::job_queue::Job;
use timebill::recurrence::materialize_recurring_entries;
use timebill::routes::api_routes;

fn app(harness: &Harness) -> (Router, Receiver<Job>) {
    let (tx, rx) = channel(32);
    let router = api_routes()
        .layer(Extension(harness.ctx.clone()))
        .layer(Extension(tx));
    (router, rx)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn time_entries_are_validated_over_http() {
    let harness = Harness::on(date(2024, 6, 3)).await;
    let invoice = harness
        .invoice(dec!(25), BillingCycle::Weekly(WeeklyCycle::default()))
        .await;
    let (app, _rx) = app(&harness);

    let created = app
        .clone()
        .oneshot(post(
            "/api/time-entries",
            json!({"invoice_id": invoice.id, "quantity": "3.5", "tracked_on": "2024-06-01"}),
        ))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let entry = json_body(created).await;
    assert_eq!(entry["invoice_id"], json!(invoice.id));

    let rejected = app
        .oneshot(post(
            "/api/time-entries",
            json!({"invoice_id": invoice.id, "quantity": "25", "tracked_on": "2024-06-01"}),
        ))
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn daily_jobs_are_triggered_by_name() {
    let harness = Harness::on(date(2024, 6, 3)).await;
    let invoice = harness
        .invoice(dec!(25), BillingCycle::Weekly(WeeklyCycle::default()))
        .await;
    let (app, mut rx) = app(&harness);

    let response = app
        .clone()
        .oneshot(post("/api/jobs/dispatch-due-invoices", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["job"], "dispatch-due-invoices");
    assert_eq!(body["summary"], "Invoices sent: 1");
    assert!(matches!(
        rx.try_recv(),
        Ok(Job::GenerateBatch { invoice_id, .. }) if invoice_id == invoice.id
    ));

    let unknown = app
        .oneshot(post("/api/jobs/bill-everyone", json!({})))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn generate_now_returns_the_new_batch() {
    let harness = Harness::on(date(2024, 6, 3)).await;
    let invoice = harness
        .invoice(dec!(25), BillingCycle::Weekly(WeeklyCycle::default()))
        .await;
    harness.log(invoice.id, dec!(2), date(2024, 5, 31)).await;
    harness.log(invoice.id, dec!(3), date(2024, 6, 1)).await;
    let (app, _rx) = app(&harness);

    let response = app
        .clone()
        .oneshot(post(
            &format!("/api/invoices/{}/generate", invoice.id),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["outcome"], "created");
    let total: Decimal = serde_json::from_value(body["detail"]["total"].clone()).unwrap();
    let hours: Decimal = serde_json::from_value(body["detail"]["hours"].clone()).unwrap();
    assert_eq!(total, dec!(25));
    assert_eq!(hours, dec!(5));

    let listed = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/invoices/{}/batches", invoice.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(listed.status(), StatusCode::OK);
    assert_eq!(json_body(listed).await.as_array().unwrap().len(), 1);

    let missing = app
        .oneshot(post(
            &format!("/api/invoices/{}/generate", Uuid::new_v4()),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancelling_twice_is_a_conflict() {
    let harness = Harness::on(date(2024, 6, 3)).await;
    let invoice = harness
        .invoice(dec!(25), BillingCycle::Weekly(WeeklyCycle::default()))
        .await;
    harness.log(invoice.id, dec!(2), date(2024, 5, 31)).await;
    let (app, _rx) = app(&harness);

    let generated = json_body(
        app.clone()
            .oneshot(post(
                &format!("/api/invoices/{}/generate", invoice.id),
                json!({}),
            ))
            .await
            .unwrap(),
    )
    .await;
    let batch_id = generated["detail"]["id"].as_str().unwrap().to_string();

    let first = app
        .clone()
        .oneshot(post(&format!("/api/batches/{batch_id}/cancel"), json!({})))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(json_body(first).await["paid_status"], "cancelled");

    let second = app
        .oneshot(post(&format!("/api/batches/{batch_id}/cancel"), json!({})))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn collecting_without_a_processor_is_rejected() {
    let harness = Harness::on(date(2024, 6, 3)).await;
    let (app, _rx) = app(&harness);

    let response = app
        .oneshot(post(
            &format!("/api/batches/{}/collect", Uuid::new_v4()),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn installment_plans_only_apply_to_single_invoices() {
    let harness = Harness::on(date(2024, 6, 3)).await;
    let invoice = harness
        .invoice(dec!(25), BillingCycle::Weekly(WeeklyCycle::default()))
        .await;
    let (app, _rx) = app(&harness);

    let request = Request::builder()
        .method("PUT")
        .uri(format!("/api/invoices/{}/installments", invoice.id))
        .header("content-type", "application/json")
        .body(Body::from(json!({"installments_total": 2}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stopped_series_materializes_nothing_more() {
    let harness = Harness::on(date(2024, 6, 3)).await;
    let invoice = harness
        .invoice(dec!(25), BillingCycle::Weekly(WeeklyCycle::default()))
        .await;
    let (app, _rx) = app(&harness);

    let created = app
        .clone()
        .oneshot(post(
            "/api/time-entries",
            json!({
                "invoice_id": invoice.id,
                "quantity": "2",
                "tracked_on": "2024-06-03",
                "recurrence": {"unit": "daily"}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let series_id = json_body(created).await["series_id"]
        .as_str()
        .unwrap()
        .to_string();

    let stopped = app
        .clone()
        .oneshot(post(&format!("/api/series/{series_id}/stop"), json!({})))
        .await
        .unwrap();
    assert_eq!(stopped.status(), StatusCode::OK);
    assert_eq!(json_body(stopped).await["stopped"], json!(true));

    let again = app
        .clone()
        .oneshot(post(&format!("/api/series/{series_id}/stop"), json!({})))
        .await
        .unwrap();
    assert_eq!(json_body(again).await["stopped"], json!(false));

    harness.clock.set_date(date(2024, 6, 4));
    let summary = materialize_recurring_entries(&harness.ctx).await.unwrap();
    assert_eq!(summary.created, 0);

    let unknown = app
        .oneshot(post(
            &format!("/api/series/{}/stop", Uuid::new_v4()),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}
