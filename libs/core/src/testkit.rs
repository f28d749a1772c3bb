//! In-process protocol binding and relay for tests and local development.
//!
//! [`ScriptedConnector`] hands out [`ScriptedClient`]s that record what the session
//! asks of them and let the caller push transport events by hand. In auto-pair mode
//! it behaves like a device that scans every pairing challenge after a short delay.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use gsm_credentials::CredentialSet;

use crate::protocol::{
    DisconnectReason, EventSink, InboundEvent, ProtocolClient, ProtocolConnector, ProtocolEvent,
    SharedProtocolClient, TransportError,
};
use crate::types::TenantId;
use crate::webhook::{
    MessageRecord, StatusKind, StatusRecord, WebhookError, WebhookEvent, WebhookRelay,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AutoPlay {
    Manual,
    Challenge,
    Pair { after: Duration },
}

#[derive(Default)]
struct Script {
    clients: Vec<Arc<ScriptedClient>>,
    failures: VecDeque<TransportError>,
    hangs: usize,
    connects: usize,
}

pub struct ScriptedConnector {
    script: Mutex<Script>,
    auto: AutoPlay,
}

impl ScriptedConnector {
    /// Connects succeed silently; the test drives every event.
    pub fn new() -> Arc<Self> {
        Self::with_auto(AutoPlay::Manual)
    }

    /// Every connection immediately issues `challenge-<n>`.
    pub fn issuing_challenges() -> Arc<Self> {
        Self::with_auto(AutoPlay::Challenge)
    }

    /// Fresh tenants get a challenge that is "scanned" after `after`; tenants with
    /// credentials open straight away.
    pub fn auto_pairing(after: Duration) -> Arc<Self> {
        Self::with_auto(AutoPlay::Pair { after })
    }

    fn with_auto(auto: AutoPlay) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Script::default()),
            auto,
        })
    }

    /// Makes the next connect call fail with `error`.
    pub fn fail_next_connect(&self, error: TransportError) {
        lock(&self.script).failures.push_back(error);
    }

    /// Makes the next connect call never complete.
    pub fn hang_next_connect(&self) {
        lock(&self.script).hangs += 1;
    }

    pub fn connect_count(&self) -> usize {
        lock(&self.script).connects
    }

    pub fn clients(&self) -> Vec<Arc<ScriptedClient>> {
        lock(&self.script).clients.clone()
    }

    pub fn last_client(&self) -> Option<Arc<ScriptedClient>> {
        lock(&self.script).clients.last().cloned()
    }
}

#[async_trait]
impl ProtocolConnector for ScriptedConnector {
    async fn connect(
        &self,
        tenant: &TenantId,
        creds: CredentialSet,
        events: EventSink,
    ) -> Result<SharedProtocolClient, TransportError> {
        let opened = {
            let mut script = lock(&self.script);
            script.connects += 1;
            if let Some(error) = script.failures.pop_front() {
                return Err(error);
            }
            if script.hangs > 0 {
                script.hangs -= 1;
                None
            } else {
                let client = Arc::new(ScriptedClient::new(tenant.clone(), creds, events));
                script.clients.push(client.clone());
                Some((client, script.connects))
            }
        };
        let Some((client, number)) = opened else {
            return std::future::pending().await;
        };

        match self.auto {
            AutoPlay::Manual => {}
            AutoPlay::Challenge => {
                client.issue_challenge(format!("challenge-{number}"));
            }
            AutoPlay::Pair { .. } if !client.creds().is_empty() => {
                client.open();
            }
            AutoPlay::Pair { after } => {
                client.issue_challenge(format!("loopback-{}", uuid::Uuid::new_v4()));
                let paired = client.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let creds = CredentialSet::new().with_entry(
                        "creds.json",
                        serde_json::to_vec(&serde_json::json!({
                            "me": paired.tenant.as_str(),
                            "registered": true
                        }))
                        .unwrap_or_default(),
                    );
                    paired.update_creds(creds);
                    paired.open();
                });
            }
        }
        Ok(client)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub address: String,
    pub text: String,
}

pub struct ScriptedClient {
    tenant: TenantId,
    creds: CredentialSet,
    sink: Mutex<Option<EventSink>>,
    sent: Mutex<Vec<SentMessage>>,
    send_error: Mutex<Option<TransportError>>,
    hang_sends: AtomicBool,
    profile_picture: Mutex<Option<String>>,
    closes: AtomicUsize,
    logouts: AtomicUsize,
}

impl ScriptedClient {
    fn new(tenant: TenantId, creds: CredentialSet, sink: EventSink) -> Self {
        Self {
            tenant,
            creds,
            sink: Mutex::new(Some(sink)),
            sent: Mutex::new(Vec::new()),
            send_error: Mutex::new(None),
            hang_sends: AtomicBool::new(false),
            profile_picture: Mutex::new(None),
            closes: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Credentials the connection was opened with.
    pub fn creds(&self) -> &CredentialSet {
        &self.creds
    }

    /// Pushes an event; `false` once the client is closed or the session stopped listening.
    pub fn emit(&self, event: ProtocolEvent) -> bool {
        lock(&self.sink)
            .as_ref()
            .is_some_and(|sink| sink.emit(event))
    }

    pub fn issue_challenge(&self, token: impl Into<String>) -> bool {
        self.emit(ProtocolEvent::PairingChallengeIssued {
            token: token.into(),
        })
    }

    pub fn open(&self) -> bool {
        self.emit(ProtocolEvent::Opened)
    }

    pub fn drop_connection(&self, reason: DisconnectReason) -> bool {
        self.emit(ProtocolEvent::Closed { reason })
    }

    pub fn update_creds(&self, creds: CredentialSet) -> bool {
        self.emit(ProtocolEvent::CredsUpdated(creds))
    }

    pub fn receive(&self, message: InboundEvent) -> bool {
        self.emit(ProtocolEvent::MessageReceived(message))
    }

    pub fn fail_sends(&self, error: TransportError) {
        *lock(&self.send_error) = Some(error);
    }

    /// Sends from now on never complete.
    pub fn hang_sends(&self) {
        self.hang_sends.store(true, Ordering::SeqCst);
    }

    pub fn set_profile_picture(&self, url: impl Into<String>) {
        *lock(&self.profile_picture) = Some(url.into());
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.sink).is_none()
    }
}

#[async_trait]
impl ProtocolClient for ScriptedClient {
    async fn send_text(&self, address: &str, text: &str) -> Result<Option<String>, TransportError> {
        if let Some(error) = lock(&self.send_error).clone() {
            return Err(error);
        }
        if self.hang_sends.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        let mut sent = lock(&self.sent);
        sent.push(SentMessage {
            address: address.to_string(),
            text: text.to_string(),
        });
        Ok(Some(format!("msg-{}", sent.len())))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        lock(&self.sink).take();
        Ok(())
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        self.close().await
    }

    async fn profile_picture_url(&self, _address: &str) -> Result<Option<String>, TransportError> {
        Ok(lock(&self.profile_picture).clone())
    }
}

/// Captures every webhook event instead of sending it.
#[derive(Default)]
pub struct RecordingRelay {
    events: Mutex<Vec<WebhookEvent>>,
}

impl RecordingRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<WebhookEvent> {
        lock(&self.events).clone()
    }

    pub fn messages(&self) -> Vec<MessageRecord> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                WebhookEvent::Message(record) => Some(record.clone()),
                WebhookEvent::Status(_) => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<StatusRecord> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                WebhookEvent::Status(record) => Some(record.clone()),
                WebhookEvent::Message(_) => None,
            })
            .collect()
    }

    pub fn status_kinds(&self) -> Vec<StatusKind> {
        self.statuses().into_iter().map(|record| record.state).collect()
    }
}

#[async_trait]
impl WebhookRelay for RecordingRelay {
    async fn deliver(&self, event: &WebhookEvent) -> Result<(), WebhookError> {
        lock(&self.events).push(event.clone());
        Ok(())
    }
}
