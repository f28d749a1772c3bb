mod common;

use std::sync::Arc;

use common::{Harness, eventually, fast_settings, settle, tenant};
use gsm_core::testkit::ScriptedClient;
use gsm_core::{
    InboundContent, InboundEvent, InboundPolicy, MediaKind, SessionSettings, TenantSession,
};

fn message(id: &str, from: &str, text: &str) -> InboundEvent {
    InboundEvent {
        message_id: Some(id.into()),
        remote_address: from.into(),
        from_me: false,
        push_name: Some("Ana".into()),
        content: InboundContent::Text(text.into()),
    }
}

async fn connected(h: &Harness) -> (Arc<TenantSession>, Arc<ScriptedClient>) {
    let session = h.registry.get_or_create(&tenant("t1"));
    session.connect().await.unwrap();
    let client = h.client();
    client.open();
    eventually("connected", || session.status().connected).await;
    (session, client)
}

#[tokio::test(start_paused = true)]
async fn group_messages_are_dropped_without_a_webhook() {
    let h = Harness::new(fast_settings());
    let (_session, client) = connected(&h).await;

    client.receive(message("g1", "120363025@g.us", "hello group"));
    client.receive(message("b1", "status@broadcast", "story"));
    let mut own = message("o1", "5511999999999@s.whatsapp.net", "echo");
    own.from_me = true;
    client.receive(own);
    settle().await;

    assert!(h.relay.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn individual_messages_are_normalized_and_enriched() {
    let h = Harness::new(fast_settings());
    let (_session, client) = connected(&h).await;
    client.set_profile_picture("https://pics.example/ana.jpg");

    client.receive(message("m1", "5511999999999:7@s.whatsapp.net", "oi"));
    eventually("message relayed", || h.relay.messages().len() == 1).await;

    let record = &h.relay.messages()[0];
    assert_eq!(record.tenant_id.as_str(), "t1");
    assert_eq!(record.sender_address, "5511999999999");
    assert_eq!(record.text, "oi");
    assert_eq!(record.message_kind, "text");
    assert_eq!(record.sender_profile_name.as_deref(), Some("Ana"));
    assert_eq!(
        record.sender_profile_picture.as_deref(),
        Some("https://pics.example/ana.jpg")
    );
}

#[tokio::test(start_paused = true)]
async fn media_and_redeliveries() {
    let h = Harness::new(fast_settings());
    let (_session, client) = connected(&h).await;

    let mut photo = message("m2", "5511999999999@s.whatsapp.net", "");
    photo.content = InboundContent::Media {
        kind: MediaKind::Image,
        media_ref: "media/photo-1".into(),
        caption: None,
    };
    client.receive(photo.clone());
    client.receive(photo);
    settle().await;

    let messages = h.relay.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message_kind, "image");
    assert_eq!(messages[0].media_ref.as_deref(), Some("media/photo-1"));
    assert_eq!(messages[0].text, "");
}

#[tokio::test(start_paused = true)]
async fn allow_list_limits_who_gets_relayed() {
    let settings = SessionSettings {
        inbound: InboundPolicy::allow_only(["5511999999999"]),
        ..fast_settings()
    };
    let h = Harness::new(settings);
    let (_session, client) = connected(&h).await;

    client.receive(message("m3", "4915112345678@s.whatsapp.net", "spam"));
    client.receive(message("m4", "5511999999999@s.whatsapp.net", "hi"));
    eventually("allowed sender relayed", || h.relay.messages().len() == 1).await;
    settle().await;

    let messages = h.relay.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender_address, "5511999999999");
}
