use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::SessionError;

/// Caller-supplied tenant identity; the key into the registry and the credential store.
///
/// ```
/// use gsm_core::TenantId;
///
/// let tenant = TenantId::parse("acme-01").unwrap();
/// assert_eq!(tenant.as_str(), "acme-01");
/// assert!(TenantId::parse("../escape").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, SessionError> {
        let raw = raw.into();
        gsm_credentials::validate_tenant_key(&raw)
            .map_err(|_| SessionError::InvalidTenant(raw.clone()))?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for TenantId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    AwaitingPairing,
    Connected,
    /// Transient while a client is being torn down.
    Closing,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingPairing => "awaiting_pairing",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Failed => "failed",
        }
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::AwaitingPairing
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a session, safe to hand to callers without locking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub tenant_id: TenantId,
    pub state: ConnectionState,
    pub connected: bool,
    pub has_pairing_challenge: bool,
    pub reconnect_attempts: u32,
    pub is_connecting: bool,
}

impl SessionStatus {
    pub(crate) fn new(
        tenant_id: TenantId,
        state: ConnectionState,
        has_pairing_challenge: bool,
        reconnect_attempts: u32,
    ) -> Self {
        Self {
            tenant_id,
            state,
            connected: state == ConnectionState::Connected,
            has_pairing_challenge,
            reconnect_attempts,
            is_connecting: state.is_connecting(),
        }
    }
}

/// Opaque pairing token as issued by the transport, with its validity window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingChallenge {
    pub token: String,
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl PairingChallenge {
    pub(crate) fn issue(token: String, ttl: Duration) -> Self {
        let issued_at = OffsetDateTime::now_utc();
        let ttl = time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX);
        Self {
            token,
            issued_at,
            expires_at: issued_at.saturating_add(ttl),
        }
    }

    /// Whole seconds of validity left, never negative.
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - OffsetDateTime::now_utc())
            .whole_seconds()
            .max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Started,
    AlreadyConnected,
    InProgress,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_with_camel_case_fields() {
        let status = SessionStatus::new(
            TenantId::parse("t1").unwrap(),
            ConnectionState::AwaitingPairing,
            true,
            2,
        );
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "tenantId": "t1",
                "state": "awaiting_pairing",
                "connected": false,
                "hasPairingChallenge": true,
                "reconnectAttempts": 2,
                "isConnecting": true
            })
        );
    }

    #[test]
    fn tenant_ids_deserialize_through_validation() {
        let ok: TenantId = serde_json::from_str("\"tenant.a\"").unwrap();
        assert_eq!(ok.to_string(), "tenant.a");
        assert!(serde_json::from_str::<TenantId>("\"a/b\"").is_err());
    }

    #[test]
    fn challenge_reports_remaining_validity() {
        let challenge = PairingChallenge::issue("abc123".into(), Duration::from_secs(60));
        let remaining = challenge.remaining_secs();
        assert!((59..=60).contains(&remaining));
    }
}
