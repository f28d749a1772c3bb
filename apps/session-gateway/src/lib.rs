//! HTTP control surface for multi-tenant messaging sessions.

pub mod config;
pub mod http;
pub mod reqid;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::serve;
use gsm_core::{
    HttpWebhookRelay, NoopRelay, SessionDeps, SharedConnector, SharedRelay, TenantRegistry,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub use crate::config::GatewayConfig;
pub use crate::http::build_router;

pub fn build_relay(config: &GatewayConfig) -> Result<SharedRelay> {
    match &config.webhook_url {
        Some(url) => {
            let relay = HttpWebhookRelay::new(url.clone(), config.webhook_timeout)
                .context("failed to build webhook client")?;
            Ok(Arc::new(relay))
        }
        None => {
            warn!("no webhook url configured; inbound messages will not be relayed");
            Ok(Arc::new(NoopRelay))
        }
    }
}

pub async fn build_registry(
    config: &GatewayConfig,
    connector: SharedConnector,
) -> Result<Arc<TenantRegistry>> {
    let store = gsm_credentials::build_store(&config.store)
        .await
        .context("failed to open credential store")?;
    let deps = SessionDeps {
        connector,
        store,
        relay: build_relay(config)?,
        settings: Arc::new(config.session.clone()),
    };
    Ok(Arc::new(TenantRegistry::new(deps)))
}

pub async fn run(config: GatewayConfig, connector: SharedConnector) -> Result<()> {
    let registry = build_registry(&config, connector).await?;
    if config.restore_sessions {
        match registry.restore().await {
            Ok(restored) => info!(restored, "restored stored sessions"),
            Err(err) => warn!(error = %err, "session restore failed"),
        }
    }

    let router = build_router(registry.clone(), &config.allowed_origins)?;
    let listener = TcpListener::bind(config.addr).await?;
    info!(
        environment = %config.environment,
        webhook = config.webhook_url.as_deref().unwrap_or("disabled"),
        "session-gateway listening on {}",
        config.addr
    );

    serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    registry.shutdown().await;
    info!("session-gateway stopped");
    Ok(())
}
