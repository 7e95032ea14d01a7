use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use tracing::info;

use super::models::{BillingBatch, Invoice};

/// Header carrying the `sha256=<hex>` HMAC of the request body.
pub const SIGNATURE_HEADER: &str = "x-timebill-signature";

/// key: billing-notifier -> outbound client notices
///
/// Delivery is at-least-once; receivers must tolerate duplicates.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, invoice: &Invoice, batch: &BillingBatch) -> Result<()>;
    async fn preview(&self, invoice: &Invoice, unbilled_hours: Decimal) -> Result<()>;
    async fn remind(&self, invoice: &Invoice, days_until_due: i64) -> Result<()>;
}

/// key: billing-ledger -> bookkeeping push
#[async_trait]
pub trait LedgerSync: Send + Sync {
    async fn push(&self, batch: &BillingBatch) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Succeeded,
    Failed,
    Processing,
}

/// key: billing-payments -> payment gateway bridge
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Returns the processor's intent id.
    async fn create_intent(&self, batch: &BillingBatch) -> Result<String>;
    async fn confirm(&self, intent_id: &str) -> Result<PaymentState>;
}

pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|err| anyhow!("invalid webhook signing key: {err}"))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// JSON poster shared by the webhook adapters. Bodies are signed when a secret is configured.
#[derive(Clone)]
pub struct SignedWebhookClient {
    client: reqwest::Client,
    secret: Option<String>,
}

impl SignedWebhookClient {
    pub fn new(timeout: Duration, secret: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build webhook client")?;
        Ok(Self { client, secret })
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
    ) -> Result<reqwest::Response> {
        let body = serde_json::to_vec(payload)?;
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign_payload(secret, &body)?);
        }
        let response = request
            .body(body)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        response
            .error_for_status()
            .with_context(|| format!("{url} rejected the payload"))
    }
}

/// Posts notices to a single webhook, distinguished by `event`.
pub struct WebhookNotifier {
    client: SignedWebhookClient,
    url: String,
}

impl WebhookNotifier {
    pub fn new(client: SignedWebhookClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, invoice: &Invoice, batch: &BillingBatch) -> Result<()> {
        let payload = json!({
            "event": "batch.created",
            "invoice_id": invoice.id,
            "client_ref": invoice.client_ref,
            "batch": batch,
        });
        self.client.post_json(&self.url, &payload).await?;
        Ok(())
    }

    async fn preview(&self, invoice: &Invoice, unbilled_hours: Decimal) -> Result<()> {
        let payload = json!({
            "event": "invoice.preview",
            "invoice_id": invoice.id,
            "client_ref": invoice.client_ref,
            "unbilled_hours": unbilled_hours,
            "rate": invoice.rate,
        });
        self.client.post_json(&self.url, &payload).await?;
        Ok(())
    }

    async fn remind(&self, invoice: &Invoice, days_until_due: i64) -> Result<()> {
        let payload = json!({
            "event": "invoice.reminder",
            "invoice_id": invoice.id,
            "client_ref": invoice.client_ref,
            "days_until_due": days_until_due,
        });
        self.client.post_json(&self.url, &payload).await?;
        Ok(())
    }
}

/// Notifier used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, invoice: &Invoice, batch: &BillingBatch) -> Result<()> {
        info!(
            invoice_id = %invoice.id,
            batch_id = %batch.id,
            total = %batch.total,
            "billing batch ready for client"
        );
        Ok(())
    }

    async fn preview(&self, invoice: &Invoice, unbilled_hours: Decimal) -> Result<()> {
        info!(invoice_id = %invoice.id, %unbilled_hours, "invoice preview ready");
        Ok(())
    }

    async fn remind(&self, invoice: &Invoice, days_until_due: i64) -> Result<()> {
        info!(invoice_id = %invoice.id, days_until_due, "invoice reminder ready");
        Ok(())
    }
}

pub struct WebhookLedgerSync {
    client: SignedWebhookClient,
    url: String,
}

impl WebhookLedgerSync {
    pub fn new(client: SignedWebhookClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl LedgerSync for WebhookLedgerSync {
    async fn push(&self, batch: &BillingBatch) -> Result<()> {
        let payload = json!({ "event": "batch.ledger", "batch": batch });
        self.client.post_json(&self.url, &payload).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ConfirmResponse {
    status: PaymentState,
}

/// key: billing-payments-http -> `POST {base}/intents`, `POST {base}/intents/{id}/confirm`
pub struct HttpPaymentProcessor {
    client: SignedWebhookClient,
    base_url: String,
}

impl HttpPaymentProcessor {
    pub fn new(client: SignedWebhookClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PaymentProcessor for HttpPaymentProcessor {
    async fn create_intent(&self, batch: &BillingBatch) -> Result<String> {
        let payload = json!({
            "batch_id": batch.id,
            "amount": batch.total,
            "due_date": batch.due_date,
        });
        let response = self
            .client
            .post_json(&format!("{}/intents", self.base_url), &payload)
            .await?;
        let intent: IntentResponse = response
            .json()
            .await
            .context("payment processor returned an unreadable intent")?;
        Ok(intent.id)
    }

    async fn confirm(&self, intent_id: &str) -> Result<PaymentState> {
        let response = self
            .client
            .post_json(
                &format!("{}/intents/{intent_id}/confirm", self.base_url),
                &json!({}),
            )
            .await?;
        let confirmation: ConfirmResponse = response
            .json()
            .await
            .context("payment processor returned an unreadable confirmation")?;
        Ok(confirmation.status)
    }
}
