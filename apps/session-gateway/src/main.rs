use std::time::Duration;

use anyhow::Result;
use gsm_core::testkit::ScriptedConnector;
use gsm_session_gateway::{GatewayConfig, run};
use gsm_telemetry::install as init_telemetry;
use tracing::warn;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_telemetry("session-gateway")?;

    let config = GatewayConfig::from_env()?;
    warn!("using the loopback protocol connector; pairing completes automatically");
    run(config, ScriptedConnector::auto_pairing(Duration::from_secs(5))).await
}
