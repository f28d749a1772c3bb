use std::env;
use std::time::Duration;

use crate::backoff::ReconnectBackoff;
use crate::inbound::InboundPolicy;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("invalid value `{value}` for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Tunables shared by every session in a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub max_reconnect_attempts: u32,
    pub backoff: ReconnectBackoff,
    pub challenge_ttl: Duration,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub close_timeout: Duration,
    pub profile_lookup_timeout: Duration,
    pub dedupe_ttl: Duration,
    pub inbound: InboundPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            backoff: ReconnectBackoff::default(),
            challenge_ttl: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(20),
            close_timeout: Duration::from_secs(5),
            profile_lookup_timeout: Duration::from_secs(10),
            dedupe_ttl: Duration::from_secs(600),
            inbound: InboundPolicy::default(),
        }
    }
}

impl SessionSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |key: &'static str| -> Result<Option<u64>, SettingsError> {
            match lookup(key).map(|v| v.trim().to_string()) {
                None => Ok(None),
                Some(v) if v.is_empty() => Ok(None),
                Some(v) => v
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| SettingsError::Invalid { key, value: v }),
            }
        };

        let max_reconnect_attempts = match number("RECONNECT_MAX_ATTEMPTS")? {
            Some(v) => u32::try_from(v).map_err(|_| SettingsError::Invalid {
                key: "RECONNECT_MAX_ATTEMPTS",
                value: v.to_string(),
            })?,
            None => defaults.max_reconnect_attempts,
        };
        let backoff = ReconnectBackoff {
            base: number("RECONNECT_BASE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff.base),
            max: number("RECONNECT_MAX_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff.max),
        };
        let secs = |key: &'static str, default: Duration| -> Result<Duration, SettingsError> {
            Ok(number(key)?.map(Duration::from_secs).unwrap_or(default))
        };

        let inbound = lookup("ALLOWED_SENDERS")
            .map(|raw| InboundPolicy::allow_only(raw.split(',').map(str::trim)))
            .unwrap_or_default();

        Ok(Self {
            max_reconnect_attempts,
            backoff,
            challenge_ttl: secs("PAIRING_CHALLENGE_TTL_SECS", defaults.challenge_ttl)?,
            connect_timeout: secs("CONNECT_TIMEOUT_SECS", defaults.connect_timeout)?,
            send_timeout: secs("SEND_TIMEOUT_SECS", defaults.send_timeout)?,
            inbound,
            ..defaults
        })
    }
}
