//! Per-tenant connection lifecycle.
//!
//! Every transition of a [`TenantSession`] runs under its own async mutex, so a
//! session's events, timers and API calls never interleave. The lock is released
//! while the connector opens a new connection; the connection is then adopted only
//! if the session's generation is unchanged.
//!
//! The generation is bumped whenever a new client is requested or the current one is
//! torn down. Event pumps and timers capture the generation they were created for and
//! do nothing once it is stale.
//!
//! Webhook deliveries go through one worker task per session, so a tenant's events
//! reach the downstream consumer in the order they happened.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use gsm_credentials::{CredentialSet, SharedCredentialStore};
use tokio::sync::{Mutex, MutexGuard, OnceCell, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::address::normalize_outbound_address;
use crate::error::SessionError;
use crate::idempotency::SeenSet;
use crate::protocol::{
    DisconnectReason, EventSink, InboundEvent, ProtocolEvent, SharedConnector,
    SharedProtocolClient,
};
use crate::settings::SessionSettings;
use crate::telemetry;
use crate::types::{
    ConnectOutcome, ConnectionState, PairingChallenge, SendReceipt, SessionStatus, TenantId,
};
use crate::webhook::{MessageRecord, SharedRelay, StatusKind, StatusRecord, WebhookEvent};

/// Collaborators shared by every session of a registry.
#[derive(Clone)]
pub struct SessionDeps {
    pub connector: SharedConnector,
    pub store: SharedCredentialStore,
    pub relay: SharedRelay,
    pub settings: Arc<SessionSettings>,
}

/// Published after every transition; readable without taking the session lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub challenge: Option<PairingChallenge>,
}

struct ScheduledTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

fn cancel_timer(slot: &mut Option<ScheduledTimer>) {
    if let Some(timer) = slot.take() {
        timer.handle.abort();
    }
}

/// Work for the session's webhook worker, delivered strictly in order.
enum Delivery {
    Status(WebhookEvent),
    Message {
        record: MessageRecord,
        sender: String,
        client: Option<SharedProtocolClient>,
    },
}

fn spawn_delivery_worker(
    relay: SharedRelay,
    lookup_timeout: Duration,
) -> mpsc::UnboundedSender<Delivery> {
    let (outbox, mut queue) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(delivery) = queue.recv().await {
            let event = match delivery {
                Delivery::Status(event) => event,
                Delivery::Message {
                    mut record,
                    sender,
                    client,
                } => {
                    if let Some(client) = client {
                        match timeout(lookup_timeout, client.profile_picture_url(&sender)).await {
                            Ok(Ok(url)) => record.sender_profile_picture = url,
                            Ok(Err(err)) => debug!(error = %err, "profile picture lookup failed"),
                            Err(_) => debug!("profile picture lookup timed out"),
                        }
                    }
                    WebhookEvent::Message(record)
                }
            };
            if let Err(err) = relay.deliver(&event).await {
                warn!(
                    tenant = %event.tenant_id(),
                    kind = event.kind(),
                    error = %err,
                    "webhook delivery failed; dropping event"
                );
            }
        }
    });
    outbox
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectOrigin {
    Explicit,
    Recovery,
}

struct SessionInner {
    state: ConnectionState,
    generation: u64,
    client: Option<SharedProtocolClient>,
    pump: Option<JoinHandle<()>>,
    creds: CredentialSet,
    challenge: Option<PairingChallenge>,
    reconnect_attempts: u32,
    reconnect_timer: Option<ScheduledTimer>,
    challenge_timer: Option<ScheduledTimer>,
    recent: SeenSet,
}

pub struct TenantSession {
    tenant: TenantId,
    deps: SessionDeps,
    inner: Mutex<SessionInner>,
    snapshot: watch::Sender<SessionSnapshot>,
    retired: AtomicBool,
    destroyed: OnceCell<()>,
    outbox: OnceLock<mpsc::UnboundedSender<Delivery>>,
}

impl TenantSession {
    /// Creates an idle session. Nothing is loaded or connected until [`connect`](Self::connect).
    pub fn new(tenant: TenantId, deps: SessionDeps) -> Arc<Self> {
        let (snapshot, _) = watch::channel(SessionSnapshot {
            status: SessionStatus::new(tenant.clone(), ConnectionState::Idle, false, 0),
            challenge: None,
        });
        let recent = SeenSet::new(deps.settings.dedupe_ttl);
        Arc::new(Self {
            tenant,
            deps,
            inner: Mutex::new(SessionInner {
                state: ConnectionState::Idle,
                generation: 0,
                client: None,
                pump: None,
                creds: CredentialSet::new(),
                challenge: None,
                reconnect_attempts: 0,
                reconnect_timer: None,
                challenge_timer: None,
                recent,
            }),
            snapshot,
            retired: AtomicBool::new(false),
            destroyed: OnceCell::new(),
            outbox: OnceLock::new(),
        })
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant
    }

    pub fn status(&self) -> SessionStatus {
        self.snapshot.borrow().status.clone()
    }

    /// The current pairing challenge, present only while awaiting pairing.
    pub fn pairing_challenge(&self) -> Option<PairingChallenge> {
        self.snapshot.borrow().challenge.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    /// True once destruction has started; every later operation fails with `Retired`.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    pub async fn reconnect_pending(&self) -> bool {
        self.inner.lock().await.reconnect_timer.is_some()
    }

    pub async fn challenge_expiry_pending(&self) -> bool {
        self.inner.lock().await.challenge_timer.is_some()
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.is_retired() {
            Err(SessionError::Retired(self.tenant.to_string()))
        } else {
            Ok(())
        }
    }

    /// Starts a connection from `Idle` or `Failed`, resetting the reconnect budget.
    ///
    /// Calling it while a reconnect backoff is pending skips the wait.
    pub async fn connect(self: &Arc<Self>) -> Result<ConnectOutcome, SessionError> {
        self.ensure_live()?;
        let mut inner = self.inner.lock().await;
        match inner.state {
            ConnectionState::Connected => return Ok(ConnectOutcome::AlreadyConnected),
            ConnectionState::Connecting
                if inner.client.is_none() && inner.reconnect_timer.is_some() =>
            {
                debug!(tenant = %self.tenant, "explicit connect overrides pending reconnect");
            }
            ConnectionState::Connecting
            | ConnectionState::AwaitingPairing
            | ConnectionState::Closing => return Ok(ConnectOutcome::InProgress),
            ConnectionState::Idle | ConnectionState::Failed => {}
        }

        cancel_timer(&mut inner.reconnect_timer);
        cancel_timer(&mut inner.challenge_timer);
        inner.reconnect_attempts = 0;
        match self.deps.store.load(self.tenant.as_str()).await {
            Ok(Some(creds)) => inner.creds = creds,
            Ok(None) => debug!(tenant = %self.tenant, "no stored credentials; pairing required"),
            Err(err) => warn!(
                tenant = %self.tenant,
                error = %err,
                "failed to load credentials; continuing with in-memory set"
            ),
        }

        self.open_connection(inner, ConnectOrigin::Explicit).await?;
        Ok(ConnectOutcome::Started)
    }

    async fn open_connection(
        self: &Arc<Self>,
        mut inner: MutexGuard<'_, SessionInner>,
        origin: ConnectOrigin,
    ) -> Result<(), SessionError> {
        inner.generation += 1;
        let generation = inner.generation;
        inner.state = ConnectionState::Connecting;
        inner.challenge = None;
        self.publish(&inner);
        let creds = inner.creds.clone();
        drop(inner);

        let (sink, events) = EventSink::channel();
        let attempt = timeout(
            self.deps.settings.connect_timeout,
            self.deps.connector.connect(&self.tenant, creds, sink),
        )
        .await;
        let result = match attempt {
            Ok(Ok(client)) => Ok(client),
            Ok(Err(err)) => Err(SessionError::Transport(err)),
            Err(_) => Err(SessionError::Timeout {
                operation: "connect",
            }),
        };

        let mut inner = self.inner.lock().await;
        let stale = inner.generation != generation || self.is_retired();
        match result {
            Ok(client) if stale => {
                drop(inner);
                debug!(tenant = %self.tenant, generation, "closing superseded connection");
                self.close_client(client, false).await;
                Ok(())
            }
            Ok(client) => {
                inner.client = Some(client);
                inner.pump = Some(self.spawn_pump(generation, events));
                debug!(tenant = %self.tenant, generation, "connection opened; awaiting events");
                Ok(())
            }
            Err(err) if stale => {
                debug!(
                    tenant = %self.tenant,
                    generation,
                    error = %err,
                    "superseded connect failed"
                );
                Ok(())
            }
            Err(err) => match origin {
                ConnectOrigin::Explicit => {
                    warn!(tenant = %self.tenant, error = %err, "connect failed");
                    inner.state = ConnectionState::Idle;
                    self.publish(&inner);
                    Err(err)
                }
                ConnectOrigin::Recovery => {
                    warn!(tenant = %self.tenant, error = %err, "reconnect failed");
                    let reason = DisconnectReason::ConnectFailed(err.to_string());
                    self.schedule_recovery(&mut inner, &reason);
                    Ok(())
                }
            },
        }
    }

    fn spawn_pump(
        self: &Arc<Self>,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<ProtocolEvent>,
    ) -> JoinHandle<()> {
        let session = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                if !session.handle_event(generation, event).await {
                    break;
                }
            }
        })
    }

    /// Applies one transport event. Returns `false` once the connection is stale.
    async fn handle_event(self: &Arc<Self>, generation: u64, event: ProtocolEvent) -> bool {
        let mut inner = self.inner.lock().await;
        if self.is_retired() || inner.generation != generation || inner.client.is_none() {
            debug!(tenant = %self.tenant, generation, "ignoring event from stale connection");
            return false;
        }

        match event {
            ProtocolEvent::PairingChallengeIssued { token } => {
                self.on_pairing_challenge(&mut inner, token)
            }
            ProtocolEvent::Opened => self.on_opened(&mut inner).await,
            ProtocolEvent::Closed { reason } => self.on_closed(&mut inner, reason).await,
            ProtocolEvent::CredsUpdated(update) => {
                inner.creds.merge(update);
                self.persist_creds(&inner.creds).await;
            }
            ProtocolEvent::MessageReceived(message) => self.on_message(&mut inner, message),
        }
        true
    }

    fn on_pairing_challenge(self: &Arc<Self>, inner: &mut SessionInner, token: String) {
        if !matches!(
            inner.state,
            ConnectionState::Connecting | ConnectionState::AwaitingPairing
        ) {
            debug!(tenant = %self.tenant, state = %inner.state, "ignoring pairing challenge");
            return;
        }
        let ttl = self.deps.settings.challenge_ttl;
        inner.state = ConnectionState::AwaitingPairing;
        inner.challenge = Some(PairingChallenge::issue(token, ttl));
        self.schedule_challenge_expiry(inner, ttl);
        self.publish(inner);
        info!(tenant = %self.tenant, ttl_secs = ttl.as_secs(), "pairing challenge issued");
        self.notify(StatusKind::PairingRequired, None, inner.reconnect_attempts);
    }

    async fn on_opened(&self, inner: &mut SessionInner) {
        cancel_timer(&mut inner.challenge_timer);
        cancel_timer(&mut inner.reconnect_timer);
        inner.state = ConnectionState::Connected;
        inner.challenge = None;
        inner.reconnect_attempts = 0;
        self.publish(inner);
        if !inner.creds.is_empty() {
            self.persist_creds(&inner.creds).await;
        }
        self.notify(StatusKind::Connected, None, 0);
    }

    async fn on_closed(self: &Arc<Self>, inner: &mut SessionInner, reason: DisconnectReason) {
        let client = inner.client.take();
        // The pump running this handler exits on its own once the generation moves on.
        inner.pump.take();
        cancel_timer(&mut inner.challenge_timer);
        inner.challenge = None;

        if reason.is_terminal() {
            cancel_timer(&mut inner.reconnect_timer);
            inner.state = ConnectionState::Closing;
            self.publish(inner);
            if let Some(client) = client {
                self.close_client(client, false).await;
            }
            if let Err(err) = self.deps.store.delete(self.tenant.as_str()).await {
                warn!(
                    tenant = %self.tenant,
                    error = %err,
                    "failed to clear credentials after logout"
                );
            }
            inner.creds = CredentialSet::new();
            inner.reconnect_attempts = 0;
            inner.state = ConnectionState::Idle;
            self.publish(inner);
            info!(
                tenant = %self.tenant,
                reason = %reason,
                "session logged out; credentials cleared"
            );
            self.notify(StatusKind::LoggedOut, Some(reason.to_string()), 0);
            return;
        }

        if let Some(client) = client {
            self.close_client(client, false).await;
        }
        self.schedule_recovery(inner, &reason);
    }

    /// Schedules the next reconnect, or gives up once the budget is spent.
    fn schedule_recovery(self: &Arc<Self>, inner: &mut SessionInner, reason: &DisconnectReason) {
        let max = self.deps.settings.max_reconnect_attempts;
        if inner.reconnect_attempts >= max {
            cancel_timer(&mut inner.reconnect_timer);
            inner.state = ConnectionState::Failed;
            self.publish(inner);
            error!(
                tenant = %self.tenant,
                attempt = inner.reconnect_attempts,
                reason = %reason,
                "reconnect budget exhausted; session failed"
            );
            telemetry::session_failed(&self.tenant);
            self.notify(
                StatusKind::Failed,
                Some(reason.to_string()),
                inner.reconnect_attempts,
            );
            return;
        }

        inner.reconnect_attempts += 1;
        let delay = self.deps.settings.backoff.delay_for(inner.reconnect_attempts);
        self.schedule_reconnect(inner, delay);
        inner.state = ConnectionState::Connecting;
        self.publish(inner);
        info!(
            tenant = %self.tenant,
            attempt = inner.reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "reconnect scheduled"
        );
        telemetry::reconnect_scheduled(&self.tenant);
        self.notify(
            StatusKind::Reconnecting,
            Some(reason.to_string()),
            inner.reconnect_attempts,
        );
    }

    fn schedule_reconnect(self: &Arc<Self>, inner: &mut SessionInner, delay: Duration) {
        cancel_timer(&mut inner.reconnect_timer);
        let generation = inner.generation;
        let session = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(session) = session.upgrade() {
                session.on_reconnect_due(generation).await;
            }
        });
        inner.reconnect_timer = Some(ScheduledTimer { generation, handle });
    }

    fn schedule_challenge_expiry(self: &Arc<Self>, inner: &mut SessionInner, ttl: Duration) {
        cancel_timer(&mut inner.challenge_timer);
        let generation = inner.generation;
        let session = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(session) = session.upgrade() {
                session.on_challenge_expired(generation).await;
            }
        });
        inner.challenge_timer = Some(ScheduledTimer { generation, handle });
    }

    async fn on_reconnect_due(self: &Arc<Self>, generation: u64) {
        let mut inner = self.inner.lock().await;
        let armed = inner.reconnect_timer.as_ref().map(|timer| timer.generation);
        if self.is_retired() || inner.generation != generation || armed != Some(generation) {
            return;
        }
        // This task is the timer; detach rather than abort it.
        inner.reconnect_timer.take();
        info!(
            tenant = %self.tenant,
            attempt = inner.reconnect_attempts,
            "reconnecting"
        );
        if let Err(err) = self.open_connection(inner, ConnectOrigin::Recovery).await {
            debug!(tenant = %self.tenant, error = %err, "reconnect attempt ended with error");
        }
    }

    async fn on_challenge_expired(self: &Arc<Self>, generation: u64) {
        let mut inner = self.inner.lock().await;
        let armed = inner.challenge_timer.as_ref().map(|timer| timer.generation);
        if self.is_retired()
            || inner.generation != generation
            || armed != Some(generation)
            || inner.state != ConnectionState::AwaitingPairing
        {
            return;
        }
        inner.challenge_timer.take();
        info!(tenant = %self.tenant, "pairing challenge expired; requesting a new one");

        if let Some(pump) = inner.pump.take() {
            pump.abort();
        }
        inner.challenge = None;
        inner.reconnect_attempts = 0;
        if let Some(client) = inner.client.take() {
            self.close_client(client, false).await;
        }
        if let Err(err) = self.open_connection(inner, ConnectOrigin::Recovery).await {
            debug!(tenant = %self.tenant, error = %err, "re-issue after expiry ended with error");
        }
    }

    fn on_message(&self, inner: &mut SessionInner, message: InboundEvent) {
        match self
            .deps
            .settings
            .inbound
            .evaluate(&self.tenant, &message, &mut inner.recent)
        {
            Ok(record) => {
                telemetry::inbound(&self.tenant, "accepted");
                self.relay_message(record, message.remote_address, inner.client.clone());
            }
            Err(rejection) => {
                telemetry::inbound(&self.tenant, rejection.as_str());
                debug!(
                    tenant = %self.tenant,
                    verdict = rejection.as_str(),
                    message_id = message.message_id.as_deref().unwrap_or("-"),
                    "dropping inbound message"
                );
            }
        }
    }

    fn relay_message(
        &self,
        record: MessageRecord,
        sender: String,
        client: Option<SharedProtocolClient>,
    ) {
        self.enqueue(Delivery::Message {
            record,
            sender,
            client,
        });
    }

    /// Hands a delivery to this session's worker, spawning it on first use.
    fn enqueue(&self, delivery: Delivery) {
        let outbox = self.outbox.get_or_init(|| {
            spawn_delivery_worker(
                self.deps.relay.clone(),
                self.deps.settings.profile_lookup_timeout,
            )
        });
        if outbox.send(delivery).is_err() {
            warn!(tenant = %self.tenant, "webhook worker stopped; dropping event");
        }
    }

    /// Sends a text message. Fails fast unless the session is connected.
    pub async fn send_text(&self, address: &str, text: &str) -> Result<SendReceipt, SessionError> {
        self.ensure_live()?;
        if self.status().state != ConnectionState::Connected {
            telemetry::outbound(&self.tenant, "not_connected");
            return Err(SessionError::NotConnected(self.tenant.to_string()));
        }
        let destination = normalize_outbound_address(address).inspect_err(|_| {
            telemetry::outbound(&self.tenant, "invalid_address");
        })?;

        let client = {
            let inner = self.inner.lock().await;
            match (&inner.client, inner.state) {
                (Some(client), ConnectionState::Connected) => client.clone(),
                _ => {
                    telemetry::outbound(&self.tenant, "not_connected");
                    return Err(SessionError::NotConnected(self.tenant.to_string()));
                }
            }
        };

        match timeout(
            self.deps.settings.send_timeout,
            client.send_text(&destination, text),
        )
        .await
        {
            Ok(Ok(message_id)) => {
                telemetry::outbound(&self.tenant, "sent");
                Ok(SendReceipt { message_id })
            }
            Ok(Err(err)) => {
                telemetry::outbound(&self.tenant, "transport_error");
                warn!(tenant = %self.tenant, error = %err, "send failed");
                Err(SessionError::Transport(err))
            }
            Err(_) => {
                telemetry::outbound(&self.tenant, "timeout");
                warn!(tenant = %self.tenant, "send timed out");
                Err(SessionError::Timeout { operation: "send" })
            }
        }
    }

    /// Closes the connection and cancels timers. Credentials are kept.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        let was_idle = inner.state == ConnectionState::Idle && inner.client.is_none();
        self.teardown(&mut inner, false).await;
        if !was_idle {
            info!(tenant = %self.tenant, "session disconnected");
            self.notify(StatusKind::Disconnected, None, 0);
        }
    }

    /// Tears the session down for good and deletes its persisted credentials.
    ///
    /// Concurrent and repeated calls wait for the first teardown to finish.
    pub async fn destroy(&self) -> Result<(), SessionError> {
        self.retired.store(true, Ordering::SeqCst);
        let mut outcome = Ok(());
        let slot = &mut outcome;
        self.destroyed
            .get_or_init(|| async move {
                let mut inner = self.inner.lock().await;
                self.teardown(&mut inner, true).await;
                inner.creds = CredentialSet::new();
                if let Err(err) = self.deps.store.delete(self.tenant.as_str()).await {
                    *slot = Err(SessionError::from(err));
                }
                info!(tenant = %self.tenant, "session destroyed");
                self.notify(StatusKind::Disconnected, Some("deleted".into()), 0);
            })
            .await;
        outcome
    }

    async fn teardown(&self, inner: &mut SessionInner, logout: bool) {
        cancel_timer(&mut inner.reconnect_timer);
        cancel_timer(&mut inner.challenge_timer);
        if let Some(pump) = inner.pump.take() {
            pump.abort();
        }
        inner.generation += 1;
        inner.challenge = None;
        inner.reconnect_attempts = 0;
        if let Some(client) = inner.client.take() {
            let was_connected = inner.state == ConnectionState::Connected;
            inner.state = ConnectionState::Closing;
            self.publish(inner);
            self.close_client(client, logout && was_connected).await;
        }
        inner.state = ConnectionState::Idle;
        self.publish(inner);
    }

    async fn close_client(&self, client: SharedProtocolClient, logout: bool) {
        let limit = self.deps.settings.close_timeout;
        let result = if logout {
            timeout(limit, client.logout()).await
        } else {
            timeout(limit, client.close()).await
        };
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(tenant = %self.tenant, error = %err, "client close reported an error")
            }
            Err(_) => warn!(tenant = %self.tenant, "client close timed out"),
        }
    }

    async fn persist_creds(&self, creds: &CredentialSet) {
        if let Err(err) = self.deps.store.save(self.tenant.as_str(), creds).await {
            warn!(tenant = %self.tenant, error = %err, "failed to persist credentials");
        }
    }

    fn publish(&self, inner: &SessionInner) {
        let status = SessionStatus::new(
            self.tenant.clone(),
            inner.state,
            inner.challenge.is_some(),
            inner.reconnect_attempts,
        );
        let previous = self.snapshot.send_replace(SessionSnapshot {
            status,
            challenge: inner.challenge.clone(),
        });
        if previous.status.state != inner.state {
            info!(
                tenant = %self.tenant,
                generation = inner.generation,
                from = %previous.status.state,
                state = %inner.state,
                "session state changed"
            );
            telemetry::state_transition(&self.tenant, inner.state);
        }
    }

    fn notify(&self, state: StatusKind, reason: Option<String>, reconnect_attempts: u32) {
        self.enqueue(Delivery::Status(WebhookEvent::Status(StatusRecord {
            tenant_id: self.tenant.clone(),
            state,
            reason,
            reconnect_attempts,
        })));
    }
}
