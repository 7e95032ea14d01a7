use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::billing::adapters::{
    HttpPaymentProcessor, LedgerSync, LogNotifier, Notifier, PaymentProcessor,
    SignedWebhookClient, WebhookLedgerSync, WebhookNotifier,
};
use crate::clock::{Clock, SystemClock};
use crate::config;
use crate::error::{BillingError, BillingResult};
use crate::store::Store;

/// key: app-context -> shared handles for jobs and handlers
///
/// Cheap to clone; every spawned billing task carries its own copy.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
    /// `None` leaves batches unsynced until a ledger is configured.
    pub ledger: Option<Arc<dyn LedgerSync>>,
    pub payments: Option<Arc<dyn PaymentProcessor>>,
    pub collaborator_timeout: Duration,
}

impl AppContext {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            notifier: Arc::new(LogNotifier),
            ledger: None,
            payments: None,
            collaborator_timeout: Duration::from_secs(*config::COLLABORATOR_TIMEOUT_SECS),
        }
    }

    /// Wires the webhook collaborators configured in the environment.
    pub fn from_env(store: Arc<dyn Store>) -> Result<Self> {
        let mut ctx = Self::new(store, Arc::new(SystemClock));
        let client = SignedWebhookClient::new(
            ctx.collaborator_timeout,
            (*config::WEBHOOK_SIGNING_SECRET).clone(),
        )?;
        if let Some(url) = config::NOTIFIER_WEBHOOK_URL.as_deref() {
            ctx.notifier = Arc::new(WebhookNotifier::new(client.clone(), url));
        }
        if let Some(url) = config::LEDGER_SYNC_URL.as_deref() {
            ctx.ledger = Some(Arc::new(WebhookLedgerSync::new(client.clone(), url)));
        }
        if let Some(url) = config::PAYMENT_PROCESSOR_URL.as_deref() {
            ctx.payments = Some(Arc::new(HttpPaymentProcessor::new(client, url)));
        }
        Ok(ctx)
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn LedgerSync>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_payments(mut self, payments: Arc<dyn PaymentProcessor>) -> Self {
        self.payments = Some(payments);
        self
    }

    pub fn with_collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.collaborator_timeout = timeout;
        self
    }

    /// Runs one collaborator call under the configured timeout.
    pub async fn call_collaborator<T, F>(&self, what: &'static str, call: F) -> BillingResult<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.collaborator_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(BillingError::Collaborator(format!("{what}: {err:#}"))),
            Err(_) => Err(BillingError::Collaborator(format!(
                "{what}: timed out after {:?}",
                self.collaborator_timeout
            ))),
        }
    }
}
