//! Best-effort delivery of message and status events to the downstream consumer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use gsm_telemetry::{TelemetryLabels, record_counter, record_histogram};
use serde::Serialize;
use tracing::debug;

use crate::types::TenantId;

pub type SharedRelay = Arc<dyn WebhookRelay>;

/// Canonical inbound message as relayed downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub tenant_id: TenantId,
    pub sender_address: String,
    pub text: String,
    pub message_kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_profile_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_profile_picture: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Connected,
    PairingRequired,
    Reconnecting,
    LoggedOut,
    Failed,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub tenant_id: TenantId,
    pub state: StatusKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub reconnect_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookEvent {
    Message(MessageRecord),
    Status(StatusRecord),
}

impl WebhookEvent {
    pub fn tenant_id(&self) -> &TenantId {
        match self {
            WebhookEvent::Message(record) => &record.tenant_id,
            WebhookEvent::Status(record) => &record.tenant_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WebhookEvent::Message(_) => "message",
            WebhookEvent::Status(_) => "status",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook client setup failed: {0}")]
    Client(#[source] reqwest::Error),
    #[error("webhook delivery timed out")]
    Timeout,
    #[error("webhook request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("webhook rejected with status {0}")]
    Status(u16),
}

#[async_trait]
pub trait WebhookRelay: Send + Sync {
    async fn deliver(&self, event: &WebhookEvent) -> Result<(), WebhookError>;
}

#[derive(Clone, Default)]
pub struct NoopRelay;

#[async_trait]
impl WebhookRelay for NoopRelay {
    async fn deliver(&self, event: &WebhookEvent) -> Result<(), WebhookError> {
        debug!(
            tenant = %event.tenant_id(),
            kind = event.kind(),
            "dropping webhook event (no webhook configured)"
        );
        Ok(())
    }
}

/// POSTs each event as JSON; a single attempt bounded by the client timeout.
#[derive(Clone)]
pub struct HttpWebhookRelay {
    client: reqwest::Client,
    url: String,
}

impl HttpWebhookRelay {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(WebhookError::Client)?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn record_outcome(event: &WebhookEvent, outcome: &'static str) {
    let labels = TelemetryLabels::new(event.tenant_id().as_str())
        .with("kind", event.kind())
        .with("outcome", outcome);
    record_counter("webhook_deliveries_total", 1, &labels);
}

#[async_trait]
impl WebhookRelay for HttpWebhookRelay {
    async fn deliver(&self, event: &WebhookEvent) -> Result<(), WebhookError> {
        let started = Instant::now();
        let response = match self.client.post(&self.url).json(event).send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                record_outcome(event, "timeout");
                return Err(WebhookError::Timeout);
            }
            Err(err) => {
                record_outcome(event, "error");
                return Err(WebhookError::Request(err));
            }
        };

        let status = response.status();
        if !status.is_success() {
            record_outcome(event, "rejected");
            return Err(WebhookError::Status(status.as_u16()));
        }

        record_outcome(event, "delivered");
        record_histogram(
            "webhook_delivery_seconds",
            started.elapsed().as_secs_f64(),
            &TelemetryLabels::new(event.tenant_id().as_str()),
        );
        debug!(tenant = %event.tenant_id(), kind = event.kind(), "webhook delivered");
        Ok(())
    }
}
