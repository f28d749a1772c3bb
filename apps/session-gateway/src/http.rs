use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router, debug_handler,
    extract::{Extension, Json, Path},
    http::{HeaderValue, Method, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use gsm_core::{
    ConnectOutcome, ConnectionState, SessionError, SessionStatus, TenantId, TenantRegistry,
};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{Instrument, info_span, warn};

use crate::reqid::with_request_id;

#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<TenantRegistry>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("{0}")]
    BadRequest(String),
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    error: String,
    code: &'static str,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Session(err) => match err {
                SessionError::NotConnected(_) | SessionError::AlreadyExists(_) => {
                    StatusCode::CONFLICT
                }
                SessionError::InvalidAddress(_) | SessionError::InvalidTenant(_) => {
                    StatusCode::BAD_REQUEST
                }
                SessionError::NotFound(_) => StatusCode::NOT_FOUND,
                SessionError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                SessionError::Transport(_) => StatusCode::BAD_GATEWAY,
                SessionError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
                SessionError::Retired(_) => StatusCode::GONE,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Session(err) => err.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, code = self.code(), "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub tenant_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub to: String,
    pub text: String,
}

#[derive(Serialize, Debug)]
pub struct AckResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    cleared: Option<usize>,
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
}

impl AckResponse {
    fn ok() -> Self {
        Self {
            success: true,
            cleared: None,
            message_id: None,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ConnectResponse {
    status: &'static str,
}

#[derive(Serialize, Debug)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairingResponse {
    #[serde(rename_all = "camelCase")]
    Pairing {
        qr: String,
        issued_at: String,
        expires_in_secs: i64,
    },
    Connected,
    Pending,
}

#[derive(Serialize, Debug)]
pub struct HealthResponse {
    status: &'static str,
    tenants: usize,
    connected: usize,
}

pub fn build_router(registry: Arc<TenantRegistry>, allowed_origins: &[String]) -> Result<Router> {
    let state = GatewayState { registry };
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/sessions", get(list_sessions).post(create_session).delete(clear_sessions))
        .route("/sessions/{tenant}", axum::routing::delete(delete_session))
        .route("/sessions/{tenant}/connect", post(connect_session))
        .route("/sessions/{tenant}/qr", get(pairing_challenge))
        .route("/sessions/{tenant}/status", get(session_status))
        .route("/sessions/{tenant}/messages", post(send_message))
        .route("/sessions/{tenant}/disconnect", post(disconnect_session))
        .layer(middleware::from_fn(with_request_id))
        .layer(Extension(state));

    if let Some(cors) = cors_layer(allowed_origins)? {
        router = router.layer(cors);
    }
    Ok(router)
}

fn cors_layer(allowed_origins: &[String]) -> Result<Option<CorsLayer>> {
    if allowed_origins.is_empty() {
        return Ok(None);
    }
    let origin = if allowed_origins.iter().any(|origin| origin == "*") {
        AllowOrigin::from(Any)
    } else {
        let origins = allowed_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin).with_context(|| format!("invalid origin `{origin}`"))
            })
            .collect::<Result<Vec<_>>>()?;
        AllowOrigin::list(origins)
    };
    Ok(Some(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE]),
    ))
}

fn parse_tenant(raw: String) -> ApiResult<TenantId> {
    Ok(TenantId::parse(raw)?)
}

async fn health(Extension(state): Extension<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        tenants: state.registry.len(),
        connected: state.registry.connected_count(),
    })
}

async fn list_sessions(Extension(state): Extension<GatewayState>) -> Json<Vec<SessionStatus>> {
    Json(state.registry.list().collect())
}

#[debug_handler]
async fn create_session(
    Extension(state): Extension<GatewayState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionStatus>)> {
    let tenant = parse_tenant(request.tenant_id)?;
    let session = state.registry.create(&tenant)?;
    Ok((StatusCode::CREATED, Json(session.status())))
}

async fn clear_sessions(Extension(state): Extension<GatewayState>) -> Json<AckResponse> {
    let cleared = state.registry.clear().await;
    Json(AckResponse {
        cleared: Some(cleared),
        ..AckResponse::ok()
    })
}

async fn delete_session(
    Path(tenant): Path<String>,
    Extension(state): Extension<GatewayState>,
) -> ApiResult<Json<AckResponse>> {
    let tenant = parse_tenant(tenant)?;
    let span = info_span!("delete_session", tenant = %tenant);
    async move {
        state.registry.delete(&tenant).await;
        Ok(Json(AckResponse::ok()))
    }
    .instrument(span)
    .await
}

async fn connect_session(
    Path(tenant): Path<String>,
    Extension(state): Extension<GatewayState>,
) -> ApiResult<(StatusCode, Json<ConnectResponse>)> {
    let tenant = parse_tenant(tenant)?;
    let span = info_span!("connect_session", tenant = %tenant);
    async move {
        let session = state.registry.get_or_create(&tenant);
        let response = match session.connect().await? {
            ConnectOutcome::AlreadyConnected => (
                StatusCode::OK,
                Json(ConnectResponse {
                    status: "already_connected",
                }),
            ),
            ConnectOutcome::Started | ConnectOutcome::InProgress => (
                StatusCode::ACCEPTED,
                Json(ConnectResponse { status: "accepted" }),
            ),
        };
        Ok(response)
    }
    .instrument(span)
    .await
}

async fn pairing_challenge(
    Path(tenant): Path<String>,
    Extension(state): Extension<GatewayState>,
) -> ApiResult<(StatusCode, Json<PairingResponse>)> {
    let tenant = parse_tenant(tenant)?;
    let span = info_span!("pairing_challenge", tenant = %tenant);
    async move {
        let session = state.registry.get_or_create(&tenant);
        if session.status().connected {
            return Ok((StatusCode::OK, Json(PairingResponse::Connected)));
        }
        if let Some(challenge) = session.pairing_challenge() {
            let issued_at = challenge
                .issued_at
                .format(&Rfc3339)
                .unwrap_or_else(|_| challenge.issued_at.unix_timestamp().to_string());
            return Ok((
                StatusCode::OK,
                Json(PairingResponse::Pairing {
                    expires_in_secs: challenge.remaining_secs(),
                    qr: challenge.token,
                    issued_at,
                }),
            ));
        }
        if matches!(
            session.status().state,
            ConnectionState::Idle | ConnectionState::Failed
        ) {
            session.connect().await?;
        }
        Ok((StatusCode::ACCEPTED, Json(PairingResponse::Pending)))
    }
    .instrument(span)
    .await
}

async fn session_status(
    Path(tenant): Path<String>,
    Extension(state): Extension<GatewayState>,
) -> ApiResult<Json<SessionStatus>> {
    let tenant = parse_tenant(tenant)?;
    let span = info_span!("session_status", tenant = %tenant);
    async move {
        let session = state.registry.get_or_create(&tenant);
        if session.status().state == ConnectionState::Idle {
            if let Err(err) = session.connect().await {
                warn!(error = %err, "lazy connect from status request failed");
            }
        }
        Ok(Json(session.status()))
    }
    .instrument(span)
    .await
}

async fn send_message(
    Path(tenant): Path<String>,
    Extension(state): Extension<GatewayState>,
    Json(request): Json<SendRequest>,
) -> ApiResult<Json<AckResponse>> {
    let tenant = parse_tenant(tenant)?;
    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text is required".into()));
    }
    let span = info_span!("send_message", tenant = %tenant);
    async move {
        let session = state.registry.get_or_create(&tenant);
        let receipt = session.send_text(&request.to, &request.text).await?;
        Ok(Json(AckResponse {
            message_id: receipt.message_id,
            ..AckResponse::ok()
        }))
    }
    .instrument(span)
    .await
}

async fn disconnect_session(
    Path(tenant): Path<String>,
    Extension(state): Extension<GatewayState>,
) -> ApiResult<Json<AckResponse>> {
    let tenant = parse_tenant(tenant)?;
    let session = state
        .registry
        .get(&tenant)
        .ok_or_else(|| SessionError::NotFound(tenant.to_string()))?;
    session
        .disconnect()
        .instrument(info_span!("disconnect_session", tenant = %tenant))
        .await;
    Ok(Json(AckResponse::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_map_to_statuses() {
        let cases = [
            (SessionError::NotConnected("t".into()), StatusCode::CONFLICT),
            (SessionError::InvalidAddress("x".into()), StatusCode::BAD_REQUEST),
            (SessionError::AlreadyExists("t".into()), StatusCode::CONFLICT),
            (SessionError::NotFound("t".into()), StatusCode::NOT_FOUND),
            (
                SessionError::Timeout { operation: "send" },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                SessionError::Transport(gsm_core::TransportError::Closed),
                StatusCode::BAD_GATEWAY,
            ),
            (SessionError::Retired("t".into()), StatusCode::GONE),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
        assert_eq!(
            ApiError::BadRequest("nope".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn pairing_response_shape() {
        let pairing = PairingResponse::Pairing {
            qr: "abc123".into(),
            issued_at: "2024-01-01T00:00:00Z".into(),
            expires_in_secs: 42,
        };
        assert_eq!(
            serde_json::to_value(pairing).unwrap(),
            serde_json::json!({
                "status": "pairing",
                "qr": "abc123",
                "issuedAt": "2024-01-01T00:00:00Z",
                "expiresInSecs": 42
            })
        );
        assert_eq!(
            serde_json::to_value(PairingResponse::Pending).unwrap(),
            serde_json::json!({"status": "pending"})
        );
    }

    #[test]
    fn empty_origin_list_disables_cors() {
        assert!(cors_layer(&[]).unwrap().is_none());
        assert!(cors_layer(&["*".to_string()]).unwrap().is_some());
        assert!(cors_layer(&["http://a.test".to_string()]).unwrap().is_some());
    }
}
