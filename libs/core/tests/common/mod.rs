#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use gsm_core::testkit::{RecordingRelay, ScriptedClient, ScriptedConnector};
use gsm_core::{SessionDeps, SessionSettings, TenantId, TenantRegistry};
use gsm_credentials::MemoryCredentialStore;

pub struct Harness {
    pub registry: TenantRegistry,
    pub connector: Arc<ScriptedConnector>,
    pub store: Arc<MemoryCredentialStore>,
    pub relay: Arc<RecordingRelay>,
}

impl Harness {
    pub fn new(settings: SessionSettings) -> Self {
        Self::with_connector(ScriptedConnector::new(), settings)
    }

    pub fn with_connector(connector: Arc<ScriptedConnector>, settings: SessionSettings) -> Self {
        let store = Arc::new(MemoryCredentialStore::new());
        let relay = RecordingRelay::new();
        let registry = TenantRegistry::new(SessionDeps {
            connector: connector.clone(),
            store: store.clone(),
            relay: relay.clone(),
            settings: Arc::new(settings),
        });
        Self {
            registry,
            connector,
            store,
            relay,
        }
    }

    pub fn client(&self) -> Arc<ScriptedClient> {
        self.connector
            .last_client()
            .unwrap_or_else(|| panic!("no client was connected"))
    }
}

pub fn tenant(raw: &str) -> TenantId {
    TenantId::parse(raw).unwrap()
}

pub fn fast_settings() -> SessionSettings {
    let mut settings = SessionSettings::default();
    settings.backoff.base = Duration::from_millis(100);
    settings.backoff.max = Duration::from_millis(1_000);
    settings.challenge_ttl = Duration::from_secs(30);
    settings
}

/// Lets spawned pumps, timers and relay tasks run to quiescence.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

pub async fn eventually<F>(what: &str, check: F)
where
    F: Fn() -> bool,
{
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never held: {what}");
}
