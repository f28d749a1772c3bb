//! Contract between sessions and a messaging-network binding.
//!
//! A binding implements [`ProtocolConnector`]; each successful connect hands back a
//! [`ProtocolClient`] for that one connection attempt. The binding reports everything
//! that happens on the connection by pushing [`ProtocolEvent`]s into the [`EventSink`]
//! it was given, in transport order.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use gsm_credentials::CredentialSet;
use tokio::sync::mpsc;

use crate::types::TenantId;

pub type SharedProtocolClient = Arc<dyn ProtocolClient>;
pub type SharedConnector = Arc<dyn ProtocolConnector>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("connection closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait ProtocolConnector: Send + Sync {
    /// Opens a new connection for `tenant` using `creds` (empty for a fresh pairing).
    async fn connect(
        &self,
        tenant: &TenantId,
        creds: CredentialSet,
        events: EventSink,
    ) -> Result<SharedProtocolClient, TransportError>;
}

#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Sends a text message; returns the transport's message id when it has one.
    async fn send_text(&self, address: &str, text: &str) -> Result<Option<String>, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;

    /// Revokes the linked device. Bindings without a logout notion just close.
    async fn logout(&self) -> Result<(), TransportError> {
        self.close().await
    }

    async fn profile_picture_url(&self, _address: &str) -> Result<Option<String>, TransportError> {
        Ok(None)
    }
}

/// Why the transport closed a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    LoggedOut,
    Unauthorized,
    ConnectionLost,
    ConnectionReplaced,
    RestartRequired,
    TimedOut,
    ConnectFailed(String),
    Other(String),
}

impl DisconnectReason {
    /// Authentication is gone; reconnecting with the same credentials cannot succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DisconnectReason::LoggedOut | DisconnectReason::Unauthorized
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            DisconnectReason::LoggedOut => "logged_out",
            DisconnectReason::Unauthorized => "unauthorized",
            DisconnectReason::ConnectionLost => "connection_lost",
            DisconnectReason::ConnectionReplaced => "connection_replaced",
            DisconnectReason::RestartRequired => "restart_required",
            DisconnectReason::TimedOut => "timed_out",
            DisconnectReason::ConnectFailed(detail) | DisconnectReason::Other(detail) => detail,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
            MediaKind::Sticker => "sticker",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundContent {
    Text(String),
    Media {
        kind: MediaKind,
        media_ref: String,
        caption: Option<String>,
    },
    Unsupported(String),
}

/// A message as reported by the transport, before any filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub message_id: Option<String>,
    /// Chat address the message arrived on, e.g. `5511999999999@s.whatsapp.net`.
    pub remote_address: String,
    pub from_me: bool,
    pub push_name: Option<String>,
    pub content: InboundContent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    PairingChallengeIssued { token: String },
    Opened,
    Closed { reason: DisconnectReason },
    /// Partial credential update; merged into the session's set.
    CredsUpdated(CredentialSet),
    MessageReceived(InboundEvent),
}

/// Where a binding pushes the events of one connection.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ProtocolEvent>,
}

impl EventSink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<ProtocolEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns `false` once the session has stopped listening to this connection.
    pub fn emit(&self, event: ProtocolEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_auth_failures_are_terminal() {
        assert!(DisconnectReason::LoggedOut.is_terminal());
        assert!(DisconnectReason::Unauthorized.is_terminal());
        assert!(!DisconnectReason::ConnectionLost.is_terminal());
        assert!(!DisconnectReason::ConnectionReplaced.is_terminal());
        assert!(!DisconnectReason::Other("network error".into()).is_terminal());
    }

    #[tokio::test]
    async fn sink_reports_a_dropped_receiver() {
        let (sink, mut rx) = EventSink::channel();
        assert!(sink.emit(ProtocolEvent::Opened));
        assert_eq!(rx.recv().await, Some(ProtocolEvent::Opened));
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.emit(ProtocolEvent::Opened));
    }
}
