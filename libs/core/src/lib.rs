//! Tenant session lifecycle for the Greentic session gateway.
//!
//! A [`TenantRegistry`] supervises one [`TenantSession`] per tenant. Each session owns
//! its protocol client, pairing challenge, reconnect timer and credential handle, and
//! serializes its own transitions; sessions never coordinate with each other.

pub mod address;
pub mod backoff;
pub mod error;
pub mod idempotency;
pub mod inbound;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod settings;
mod telemetry;
#[cfg(feature = "testkit")]
pub mod testkit;
pub mod types;
pub mod webhook;

pub use address::{normalize_outbound_address, sender_digits};
pub use backoff::ReconnectBackoff;
pub use error::SessionError;
pub use idempotency::SeenSet;
pub use inbound::{InboundPolicy, Rejection};
pub use protocol::{
    DisconnectReason, EventSink, InboundContent, InboundEvent, MediaKind, ProtocolClient,
    ProtocolConnector, ProtocolEvent, SharedConnector, SharedProtocolClient, TransportError,
};
pub use registry::TenantRegistry;
pub use session::{SessionDeps, SessionSnapshot, TenantSession};
pub use settings::{SessionSettings, SettingsError};
pub use types::{
    ConnectOutcome, ConnectionState, PairingChallenge, SendReceipt, SessionStatus, TenantId,
};
pub use webhook::{
    HttpWebhookRelay, MessageRecord, NoopRelay, SharedRelay, StatusKind, StatusRecord,
    WebhookError, WebhookEvent, WebhookRelay,
};

pub use gsm_credentials::{CredentialSet, CredentialStore, SharedCredentialStore};
