use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use quoteflow_core::config::NotifierConfig;
use quoteflow_core::lifecycle::{Notifier, QuoteStatusChanged};
use quoteflow_core::{QuoteStatus, SideEffectError};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::info;

/// Body posted to the client-delivery webhook.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WebhookPayload {
    pub event: String,
    pub quote_id: String,
    pub quote_number: String,
    pub company_id: String,
    pub client_id: String,
    pub from: QuoteStatus,
    pub to: QuoteStatus,
    pub actor: String,
    pub reason: Option<String>,
    pub valid_until: String,
    pub gross: Decimal,
    pub occurred_at: DateTime<Utc>,
}

impl WebhookPayload {
    pub fn from_event(event: &QuoteStatusChanged) -> Self {
        let quote = &event.quote;
        Self {
            event: format!("quote.{}", event.to.as_str()),
            quote_id: quote.id.0.clone(),
            quote_number: quote.display_number().to_string(),
            company_id: quote.company_id.0.clone(),
            client_id: quote.client_id.0.clone(),
            from: event.from,
            to: event.to,
            actor: event.actor_label().to_string(),
            reason: event.reason.clone(),
            valid_until: quote.valid_until.format("%Y-%m-%d").to_string(),
            gross: quote.totals.for_display().gross,
            occurred_at: event.occurred_at,
        }
    }

    /// Receivers can drop redeliveries of the same status change.
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.quote_id,
            self.to.as_str(),
            self.occurred_at.to_rfc3339_opts(SecondsFormat::Micros, true)
        )
    }
}

/// Posts sent quotes to an HTTP endpoint. One attempt per event.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    token: Option<SecretString>,
}

impl WebhookNotifier {
    /// `None` when no webhook URL is configured.
    pub fn from_config(config: &NotifierConfig) -> Result<Option<Self>, reqwest::Error> {
        let Some(url) = config.webhook_url.clone() else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Some(Self { client, url, token: config.webhook_token.clone() }))
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &QuoteStatusChanged) -> Result<(), SideEffectError> {
        let payload = WebhookPayload::from_event(event);
        let mut request = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", payload.idempotency_key())
            .json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|error| SideEffectError::Notification(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SideEffectError::Notification(format!("webhook responded with {status}")));
        }

        info!(
            event_name = "dispatch.notify.delivered",
            quote_id = %event.quote.id,
            status = status.as_u16(),
            "client notification delivered"
        );
        Ok(())
    }
}
