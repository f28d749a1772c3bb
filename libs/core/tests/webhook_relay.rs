use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use gsm_core::{
    HttpWebhookRelay, StatusKind, StatusRecord, TenantId, WebhookError, WebhookEvent,
    WebhookRelay,
};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

async fn spawn_sink(status: StatusCode) -> (String, Arc<Mutex<Vec<Value>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let captured = received.clone();
    let app = Router::new().route(
        "/webhook/whatsapp",
        post(move |Json(body): Json<Value>| {
            let captured = captured.clone();
            async move {
                captured.lock().await.push(body);
                status
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/webhook/whatsapp"), received)
}

fn connected_event() -> WebhookEvent {
    WebhookEvent::Status(StatusRecord {
        tenant_id: TenantId::parse("t1").unwrap(),
        state: StatusKind::Connected,
        reason: None,
        reconnect_attempts: 0,
    })
}

#[tokio::test]
async fn posts_events_as_json() {
    let (url, received) = spawn_sink(StatusCode::OK).await;
    let relay = HttpWebhookRelay::new(url, Duration::from_secs(5)).unwrap();

    relay.deliver(&connected_event()).await.unwrap();

    let bodies = received.lock().await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["type"], "status");
    assert_eq!(bodies[0]["tenantId"], "t1");
    assert_eq!(bodies[0]["state"], "connected");
}

#[tokio::test]
async fn non_success_status_is_reported_not_retried() {
    let (url, received) = spawn_sink(StatusCode::INTERNAL_SERVER_ERROR).await;
    let relay = HttpWebhookRelay::new(url, Duration::from_secs(5)).unwrap();

    let err = relay.deliver(&connected_event()).await.unwrap_err();
    assert!(matches!(err, WebhookError::Status(500)));
    assert_eq!(received.lock().await.len(), 1);
}

#[tokio::test]
async fn unreachable_endpoint_fails_fast() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let relay = HttpWebhookRelay::new(
        format!("http://{addr}/webhook/whatsapp"),
        Duration::from_secs(2),
    )
    .unwrap();
    let err = relay.deliver(&connected_event()).await.unwrap_err();
    assert!(matches!(
        err,
        WebhookError::Request(_) | WebhookError::Timeout
    ));
}
