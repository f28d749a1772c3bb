//! Filtering and normalization of inbound transport messages.

use std::collections::HashSet;

use crate::address::{is_shared_address, sender_digits};
use crate::idempotency::SeenSet;
use crate::protocol::{InboundContent, InboundEvent};
use crate::types::TenantId;
use crate::webhook::MessageRecord;

/// Why an inbound message was not relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    FromSelf,
    SharedAddress,
    NotAllowed,
    Duplicate,
    Unsupported,
    Malformed,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::FromSelf => "from_self",
            Rejection::SharedAddress => "shared_address",
            Rejection::NotAllowed => "not_allowed",
            Rejection::Duplicate => "duplicate",
            Rejection::Unsupported => "unsupported",
            Rejection::Malformed => "malformed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundPolicy {
    /// Sender digits accepted inbound; `None` accepts everyone.
    pub allowed_senders: Option<HashSet<String>>,
}

impl InboundPolicy {
    pub fn allow_only<I, S>(senders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed: HashSet<String> = senders
            .into_iter()
            .filter_map(|sender| {
                let digits: String = sender
                    .as_ref()
                    .chars()
                    .filter(char::is_ascii_digit)
                    .collect();
                (!digits.is_empty()).then_some(digits)
            })
            .collect();
        Self {
            allowed_senders: (!allowed.is_empty()).then_some(allowed),
        }
    }

    /// Applies the policy and produces the canonical record for an accepted message.
    ///
    /// Accepted message ids are recorded in `recent` so re-deliveries are dropped.
    pub fn evaluate(
        &self,
        tenant: &TenantId,
        event: &InboundEvent,
        recent: &mut SeenSet,
    ) -> Result<MessageRecord, Rejection> {
        if event.from_me {
            return Err(Rejection::FromSelf);
        }
        if is_shared_address(&event.remote_address) {
            return Err(Rejection::SharedAddress);
        }
        let sender = sender_digits(&event.remote_address).ok_or(Rejection::Malformed)?;
        if let Some(allowed) = &self.allowed_senders {
            if !allowed.contains(&sender) {
                return Err(Rejection::NotAllowed);
            }
        }

        let (text, message_kind, media_ref) = match &event.content {
            InboundContent::Text(text) if text.trim().is_empty() => {
                return Err(Rejection::Malformed);
            }
            InboundContent::Text(text) => (text.clone(), "text".to_string(), None),
            InboundContent::Media {
                kind,
                media_ref,
                caption,
            } => (
                caption.clone().unwrap_or_default(),
                kind.as_str().to_string(),
                Some(media_ref.clone()),
            ),
            InboundContent::Unsupported(_) => return Err(Rejection::Unsupported),
        };

        if let Some(id) = &event.message_id {
            if recent.seen_or_insert(id) {
                return Err(Rejection::Duplicate);
            }
        }

        Ok(MessageRecord {
            tenant_id: tenant.clone(),
            sender_address: sender,
            text,
            message_kind,
            media_ref,
            sender_profile_name: event.push_name.clone().filter(|name| !name.is_empty()),
            sender_profile_picture: None,
        })
    }
}
