use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use gsm_core::SessionSettings;
use gsm_credentials::StoreBackend;
use url::Url;

const DEFAULT_WEBHOOK_PATH: &str = "/webhook/whatsapp";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub addr: SocketAddr,
    pub environment: String,
    /// Full downstream URL; `None` disables the relay.
    pub webhook_url: Option<String>,
    pub webhook_timeout: Duration,
    pub allowed_origins: Vec<String>,
    pub store: StoreBackend,
    pub session: SessionSettings,
    pub restore_sessions: bool,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = value("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".into());
        let ip = IpAddr::from_str(bind_addr.trim()).context("invalid BIND_ADDR")?;
        let port = match value("PORT") {
            Some(raw) => raw.trim().parse::<u16>().context("invalid PORT")?,
            None => 3000,
        };

        let environment = value("DEPLOYMENT_ENV")
            .or_else(|| value("NODE_ENV"))
            .unwrap_or_else(|| "development".into());
        let production = environment.eq_ignore_ascii_case("production");
        let base_url = if production {
            value("WEBHOOK_URL_PRODUCTION").or_else(|| value("FLASK_APP_URL_PRODUCTION"))
        } else {
            value("WEBHOOK_URL").or_else(|| value("FLASK_APP_URL"))
        };
        let webhook_path = value("WEBHOOK_PATH").unwrap_or_else(|| DEFAULT_WEBHOOK_PATH.into());
        let webhook_url = base_url
            .map(|base| webhook_endpoint(&base, &webhook_path))
            .transpose()?;
        let webhook_timeout = match value("WEBHOOK_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(
                raw.trim()
                    .parse::<u64>()
                    .context("invalid WEBHOOK_TIMEOUT_SECS")?,
            ),
            None => Duration::from_secs(10),
        };

        let allowed_origins = value("ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let restore_sessions = match value("RESTORE_SESSIONS") {
            Some(raw) => parse_flag(&raw).context("invalid RESTORE_SESSIONS")?,
            None => true,
        };

        let store =
            StoreBackend::from_lookup(&lookup).context("invalid credential store configuration")?;
        let mut session = SessionSettings::from_lookup(&lookup)?;
        session.profile_lookup_timeout = webhook_timeout;

        Ok(Self {
            addr: SocketAddr::new(ip, port),
            environment,
            webhook_url,
            webhook_timeout,
            allowed_origins,
            store,
            session,
            restore_sessions,
        })
    }
}

fn webhook_endpoint(base: &str, path: &str) -> Result<String> {
    let path = path.trim();
    let joined = format!(
        "{}/{}",
        base.trim().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).with_context(|| format!("invalid webhook url `{joined}`"))?;
    Ok(joined)
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got `{other}`"),
    }
}
