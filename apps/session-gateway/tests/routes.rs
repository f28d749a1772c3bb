use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use gsm_core::testkit::{RecordingRelay, ScriptedConnector};
use gsm_core::{CredentialSet, CredentialStore, SessionDeps, SessionSettings, TenantRegistry};
use gsm_credentials::MemoryCredentialStore;
use gsm_session_gateway::build_router;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

struct App {
    router: Router,
    registry: Arc<TenantRegistry>,
    connector: Arc<ScriptedConnector>,
    store: Arc<MemoryCredentialStore>,
}

fn app(connector: Arc<ScriptedConnector>) -> App {
    let store = Arc::new(MemoryCredentialStore::new());
    let registry = Arc::new(TenantRegistry::new(SessionDeps {
        connector: connector.clone(),
        store: store.clone(),
        relay: RecordingRelay::new(),
        settings: Arc::new(SessionSettings::default()),
    }));
    let router = build_router(registry.clone(), &[]).expect("router");
    App {
        router,
        registry,
        connector,
        store,
    }
}

async fn call(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router handles request");
    assert!(response.headers().contains_key("x-request-id"));
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn health_reports_tenant_counts() {
    let app = app(ScriptedConnector::new());
    let (status, body) = call(&app.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "tenants": 0, "connected": 0}));
}

#[tokio::test]
async fn create_session_rejects_duplicates_and_bad_ids() {
    let app = app(ScriptedConnector::new());

    let create = json!({"tenantId": "t1"});
    let (status, body) = call(&app.router, "POST", "/sessions", Some(create.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["tenantId"], "t1");
    assert_eq!(body["state"], "idle");

    let (status, body) = call(&app.router, "POST", "/sessions", Some(create)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_exists");

    let (status, body) = call(
        &app.router,
        "POST",
        "/sessions",
        Some(json!({"tenantId": "../etc"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_tenant");
    assert_eq!(app.connector.connect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn pairing_flow_over_http() {
    let app = app(ScriptedConnector::issuing_challenges());

    let (status, body) = call(&app.router, "GET", "/sessions/t1/qr", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    settle().await;

    let (status, body) = call(&app.router, "GET", "/sessions/t1/qr", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pairing");
    assert_eq!(body["qr"], "challenge-1");
    assert!(body["issuedAt"].as_str().is_some());
    assert!(body["expiresInSecs"].as_i64().unwrap() > 0);

    let (status, body) = call(&app.router, "POST", "/sessions/t1/connect", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "accepted");
    assert_eq!(app.connector.connect_count(), 1);

    app.connector.last_client().unwrap().open();
    settle().await;

    let (status, body) = call(&app.router, "GET", "/sessions/t1/qr", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "connected"}));

    let (status, body) = call(&app.router, "POST", "/sessions/t1/connect", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "already_connected");

    let (_, body) = call(&app.router, "GET", "/health", None).await;
    assert_eq!(body["connected"], 1);
}

#[tokio::test(start_paused = true)]
async fn status_lazily_connects_idle_sessions() {
    let app = app(ScriptedConnector::new());

    let (status, body) = call(&app.router, "GET", "/sessions/t1/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "connecting");
    assert_eq!(body["isConnecting"], true);
    assert_eq!(app.connector.connect_count(), 1);

    let (_, _) = call(&app.router, "GET", "/sessions/t1/status", None).await;
    assert_eq!(app.connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn send_message_validates_and_delivers() {
    let app = app(ScriptedConnector::new());

    let (status, body) = call(
        &app.router,
        "POST",
        "/sessions/t1/messages",
        Some(json!({"to": "+55 11 99999-9999", "text": "oi"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "not_connected");

    let (status, body) = call(
        &app.router,
        "POST",
        "/sessions/t1/messages",
        Some(json!({"to": "5511999999999", "text": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");

    call(&app.router, "POST", "/sessions/t1/connect", None).await;
    app.connector.last_client().unwrap().open();
    settle().await;

    let (status, body) = call(
        &app.router,
        "POST",
        "/sessions/t1/messages",
        Some(json!({"to": "12", "text": "oi"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_address");

    let (status, body) = call(
        &app.router,
        "POST",
        "/sessions/t1/messages",
        Some(json!({"to": "+55 11 99999-9999", "text": "oi"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["messageId"].as_str().is_some());

    let sent = app.connector.last_client().unwrap().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].address, "5511999999999@s.whatsapp.net");
}

#[tokio::test(start_paused = true)]
async fn disconnect_delete_and_clear() {
    let app = app(ScriptedConnector::new());
    app.store
        .save(
            "t1",
            &CredentialSet::new().with_entry("creds.json", b"{}".to_vec()),
        )
        .await
        .unwrap();

    let (status, body) = call(&app.router, "POST", "/sessions/ghost/disconnect", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    call(&app.router, "POST", "/sessions/t1/connect", None).await;
    let (status, body) = call(&app.router, "POST", "/sessions/t1/disconnect", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));
    assert!(app.store.contains("t1"));

    let (status, _) = call(&app.router, "DELETE", "/sessions/t1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!app.store.contains("t1"));
    assert!(app.registry.is_empty());

    let (status, body) = call(&app.router, "DELETE", "/sessions/ghost", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    for tenant in ["a", "b"] {
        call(&app.router, "POST", "/sessions", Some(json!({"tenantId": tenant}))).await;
    }
    let (_, listed) = call(&app.router, "GET", "/sessions", None).await;
    assert_eq!(listed.as_array().unwrap().len(), 2);

    let (status, body) = call(&app.router, "DELETE", "/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "cleared": 2}));
    assert!(app.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn hung_send_maps_to_gateway_timeout() {
    let app = app(ScriptedConnector::new());
    call(&app.router, "POST", "/sessions/t1/connect", None).await;
    let client = app.connector.last_client().unwrap();
    client.open();
    settle().await;
    client.hang_sends();

    let (status, body) = call(
        &app.router,
        "POST",
        "/sessions/t1/messages",
        Some(json!({"to": "5511999999999", "text": "oi"})),
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["code"], "timeout");

    let (_, status) = call(&app.router, "GET", "/sessions/t1/status", None).await;
    assert_eq!(status["state"], "connected");
}

#[tokio::test]
async fn every_response_gets_its_own_request_id() {
    let app = app(ScriptedConnector::new());
    let mut ids = Vec::new();
    for _ in 0..2 {
        let response = app
            .router
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let id = response.headers()["x-request-id"].to_str().unwrap().to_string();
        assert!(Uuid::parse_str(&id).is_ok());
        ids.push(id);
    }
    assert_ne!(ids[0], ids[1]);
}
