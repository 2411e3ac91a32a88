//! HTTP handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use tracing::info;

use ami_client::config::DEFAULT_AMI_PORT;

use crate::bridge::{BridgeStatus, OriginateOptions};
use crate::error::BridgeError;
use crate::health::{self, HealthResponse};
use crate::metrics::HTTP_REQUESTS_TOTAL;
use crate::server::AppState;
use crate::websocket::session::run_ws_session;

fn count(route: &'static str) {
    metrics::counter!(HTTP_REQUESTS_TOTAL, "route" => route).increment(1);
}

fn required(value: Option<String>, field: &str) -> Result<String, BridgeError> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BridgeError::BadRequest(format!("{field} is required")))
}

/// Body of `POST /connect`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    host: Option<String>,
    #[serde(default, deserialize_with = "port_number_or_string")]
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
}

/// Form fields arrive as strings, so `"5038"` is accepted alongside `5038`.
/// A blank string means unset.
fn port_number_or_string<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Option::<Port>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Port::Number(port)) => Ok(Some(port)),
        Some(Port::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(Port::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid port: {text}"))),
    }
}

/// POST /connect
pub async fn connect(
    State(state): State<AppState>,
    body: Result<Json<ConnectRequest>, JsonRejection>,
) -> Result<Json<Value>, BridgeError> {
    count("connect");
    let Json(req) = body?;
    let host = required(req.host, "host")?;
    let username = required(req.username, "username")?;
    let port = req.port.unwrap_or(DEFAULT_AMI_PORT);
    let config = state.bridge.config_for(
        &host,
        port,
        &username,
        req.password.as_deref().unwrap_or_default(),
    );

    info!(host = %host, port, username = %username, "connect requested");
    state.bridge.connect(config).await?;
    Ok(Json(json!({ "success": true, "message": "Connected to AMI" })))
}

/// POST /disconnect
pub async fn disconnect(State(state): State<AppState>) -> Json<Value> {
    count("disconnect");
    state.bridge.disconnect().await;
    Json(json!({ "success": true, "message": "Disconnected from AMI" }))
}

/// GET /status
pub async fn status(State(state): State<AppState>) -> Json<BridgeStatus> {
    count("status");
    Json(state.bridge.status())
}

/// Body of `POST /originate`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginateRequest {
    channel: Option<String>,
    extension: Option<String>,
    context: Option<String>,
    #[serde(rename = "callerID", alias = "callerId")]
    caller_id: Option<String>,
}

/// POST /originate
pub async fn originate(
    State(state): State<AppState>,
    body: Result<Json<OriginateRequest>, JsonRejection>,
) -> Result<Response, BridgeError> {
    count("originate");
    let Json(req) = body?;
    let channel = required(req.channel, "channel")?;
    let extension = required(req.extension, "extension")?;
    let context = req.context.filter(|c| !c.is_empty());

    let ok = state
        .bridge
        .originate(
            &channel,
            &extension,
            OriginateOptions {
                context: context.clone(),
                caller_id: req.caller_id,
            },
        )
        .await;

    let (status, message) = if ok {
        (StatusCode::OK, "Call originated successfully")
    } else {
        (StatusCode::BAD_GATEWAY, "Failed to originate call")
    };
    let body = json!({
        "success": ok,
        "message": message,
        "details": {
            "channel": channel,
            "extension": extension,
            "context": context.as_deref().unwrap_or(ami_proto::action::DEFAULT_CONTEXT),
        },
    });
    Ok((status, Json(body)).into_response())
}

/// GET /channels
pub async fn channels(State(state): State<AppState>) -> Response {
    count("channels");
    match state.bridge.active_channels().await {
        Some(reply) => Json(json!({ "success": true, "data": reply })).into_response(),
        None => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "success": false, "data": null })),
        )
            .into_response(),
    }
}

/// GET /pjsip-endpoints
pub async fn pjsip_endpoints(State(state): State<AppState>) -> Response {
    count("pjsip_endpoints");
    match state.bridge.pjsip_endpoints().await {
        Ok(endpoints) => {
            let message = format!("Found {} endpoints", endpoints.len());
            Json(json!({ "success": true, "data": endpoints, "message": message })).into_response()
        }
        Err(e) => {
            let err = BridgeError::from(e);
            let body = json!({
                "success": false,
                "data": [],
                "message": err.to_string(),
                "code": err.code(),
            });
            (err.status(), Json(body)).into_response()
        }
    }
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.bridge.client().is_connected(),
        state.bridge.subscriber_count(),
    ))
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// GET /ws
pub async fn ws(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    count("ws");
    let token = state.shutdown.token();
    upgrade.on_upgrade(move |socket| {
        run_ws_session(
            socket,
            state.bridge,
            state.heartbeat,
            state.queue_size,
            token,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_trims_and_rejects_blank() {
        assert_eq!(required(Some(" pbx ".into()), "host").unwrap(), "pbx");
        assert!(matches!(
            required(Some("  ".into()), "host"),
            Err(BridgeError::BadRequest(m)) if m == "host is required"
        ));
        assert!(required(None, "username").is_err());
    }

    #[test]
    fn originate_request_accepts_caller_id_spellings() {
        let a: OriginateRequest =
            serde_json::from_str(r#"{"channel":"PJSIP/1000","extension":"200","callerID":"Desk"}"#)
                .unwrap();
        assert_eq!(a.caller_id.as_deref(), Some("Desk"));
        let b: OriginateRequest =
            serde_json::from_str(r#"{"channel":"PJSIP/1000","extension":"200","callerId":"Desk"}"#)
                .unwrap();
        assert_eq!(b.caller_id.as_deref(), Some("Desk"));
    }

    #[test]
    fn connect_request_fields_are_optional() {
        let req: ConnectRequest = serde_json::from_str("{}").unwrap();
        assert!(req.host.is_none());
        assert!(req.port.is_none());
    }

    #[test]
    fn connect_port_accepts_number_or_string() {
        let req: ConnectRequest = serde_json::from_str(r#"{"port":5038}"#).unwrap();
        assert_eq!(req.port, Some(5038));
        let req: ConnectRequest = serde_json::from_str(r#"{"port":" 5039 "}"#).unwrap();
        assert_eq!(req.port, Some(5039));
        let req: ConnectRequest = serde_json::from_str(r#"{"port":""}"#).unwrap();
        assert!(req.port.is_none());
        let req: ConnectRequest = serde_json::from_str(r#"{"port":null}"#).unwrap();
        assert!(req.port.is_none());
        assert!(serde_json::from_str::<ConnectRequest>(r#"{"port":"abc"}"#).is_err());
        assert!(serde_json::from_str::<ConnectRequest>(r#"{"port":70000}"#).is_err());
    }
}
