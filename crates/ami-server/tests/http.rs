//! HTTP and WebSocket façade against a mock AMI server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ami_client::test_helpers::{
    endpoint_list, event, response, MockAmi, Reply, SECRET, TIMEOUT, USERNAME,
};
use ami_client::{AmiClient, AmiConfig, ConnectionState};
use ami_server::{Bridge, BridgeServer, OriginateOptions, ReconnectPolicy, ServerConfig};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tower::ServiceExt;

fn make_server() -> BridgeServer {
    server_with(AmiConfig::new("127.0.0.1", 5038, "", ""), ReconnectPolicy::default())
}

fn server_with(defaults: AmiConfig, policy: ReconnectPolicy) -> BridgeServer {
    let bridge = Bridge::new(AmiClient::new(), defaults, policy);
    BridgeServer::new(ServerConfig::default(), Arc::new(bridge))
}

async fn wait_for_state(server: &BridgeServer, want: ConnectionState) {
    let mut changes = server.bridge().client().state_changes();
    let _ = timeout(TIMEOUT, changes.wait_for(|s| *s == want))
        .await
        .unwrap()
        .unwrap();
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            req = req.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 256 * 1024)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn connect_body(mock: &MockAmi, secret: &str) -> Value {
    json!({
        "host": "127.0.0.1",
        "port": mock.addr.port(),
        "username": USERNAME,
        "password": secret,
    })
}

#[tokio::test]
async fn status_reports_disconnected() {
    let app = make_server().router();
    let (status, body) = call(&app, "GET", "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connected"], false);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn connect_then_disconnect() {
    let mock = MockAmi::start().await;
    let app = make_server().router();

    let (status, body) = call(&app, "POST", "/connect", Some(connect_body(&mock, SECRET))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Connected to AMI");

    let (_, body) = call(&app, "GET", "/status", None).await;
    assert_eq!(body["connected"], true);

    let (status, body) = call(&app, "POST", "/disconnect", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, body) = call(&app, "GET", "/status", None).await;
    assert_eq!(body["connected"], false);
    mock.wait_for_received(2).await;
    assert_eq!(mock.received_named("Logoff").len(), 1);
}

#[tokio::test]
async fn connect_with_bad_secret_is_unauthorized() {
    let mock = MockAmi::start().await;
    let app = make_server().router();

    let (status, body) = call(&app, "POST", "/connect", Some(connect_body(&mock, "nope"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "AUTHENTICATION_FAILED");
    assert!(body["error"].as_str().unwrap().contains("Authentication failed"));
}

#[tokio::test]
async fn connect_to_closed_port_is_bad_gateway() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let app = make_server().router();

    let body = json!({"host": "127.0.0.1", "port": port, "username": "admin", "password": "x"});
    let (status, body) = call(&app, "POST", "/connect", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "CONNECT_FAILED");
}

#[tokio::test]
async fn connect_without_host_is_bad_request() {
    let app = make_server().router();
    let (status, body) = call(&app, "POST", "/connect", Some(json!({"username": "admin"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "host is required");
}

async fn post_raw(app: &Router, uri: &str, content_type: Option<&str>, body: &str) -> (StatusCode, Value) {
    let mut req = Request::builder().method("POST").uri(uri);
    if let Some(content_type) = content_type {
        req = req.header("content-type", content_type);
    }
    let resp = app
        .clone()
        .oneshot(req.body(Body::from(body.to_owned())).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 256 * 1024)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn malformed_bodies_get_json_errors() {
    let app = make_server().router();

    let (status, body) = post_raw(
        &app,
        "/connect",
        Some("application/json"),
        r#"{"host":"pbx","username":"admin","port":"abc"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "INVALID_BODY");
    assert!(body["error"].as_str().unwrap().contains("invalid port"), "{body}");

    let (status, body) = post_raw(
        &app,
        "/originate",
        None,
        r#"{"channel":"PJSIP/1000","extension":"200"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "INVALID_BODY");

    let (status, body) = post_raw(&app, "/connect", Some("application/json"), "not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "INVALID_BODY");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn connect_accepts_port_as_string() {
    let mock = MockAmi::start().await;
    let app = make_server().router();

    let req = json!({
        "host": "127.0.0.1",
        "port": mock.addr.port().to_string(),
        "username": USERNAME,
        "password": SECRET,
    });
    let (status, body) = call(&app, "POST", "/connect", Some(req)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn originate_success_and_failure() {
    let mock = MockAmi::with_handler(|msg| {
        let id = msg.action_id().unwrap_or_default();
        match (msg.get("Action"), msg.get("Exten")) {
            (Some("Originate"), Some("200")) => {
                Reply::Send(vec![response(id, "Success", "Originate successfully queued")])
            }
            (Some("Originate"), _) => Reply::Send(vec![response(id, "Error", "Extension does not exist")]),
            _ => Reply::Silent,
        }
    })
    .await;
    let app = make_server().router();
    let _ = call(&app, "POST", "/connect", Some(connect_body(&mock, SECRET))).await;

    let req = json!({"channel": "PJSIP/1000", "extension": "200", "callerID": "Front Desk"});
    let (status, body) = call(&app, "POST", "/originate", Some(req)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["details"]["channel"], "PJSIP/1000");
    assert_eq!(body["details"]["context"], "from-internal");

    let sent = mock.received_named("Originate");
    assert_eq!(sent[0].get("CallerID"), Some("Front Desk"));
    assert_eq!(sent[0].get("Priority"), Some("1"));

    let req = json!({"channel": "PJSIP/1000", "extension": "999", "context": "internal"});
    let (status, body) = call(&app, "POST", "/originate", Some(req)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["success"], false);
    assert_eq!(body["details"]["context"], "internal");
}

#[tokio::test]
async fn originate_without_reply_is_false_after_timeout() {
    let mock = MockAmi::start().await;
    let mut defaults = AmiConfig::new("127.0.0.1", 5038, "", "");
    defaults.action_timeout_ms = 300;
    let server = server_with(defaults, ReconnectPolicy::default());
    let app = server.router();
    let (status, _) = call(&app, "POST", "/connect", Some(connect_body(&mock, SECRET))).await;
    assert_eq!(status, StatusCode::OK);

    let started = Instant::now();
    let ok = server
        .bridge()
        .originate("PJSIP/1000", "200", OriginateOptions::default())
        .await;
    let elapsed = started.elapsed();
    assert!(!ok);
    assert!(elapsed >= Duration::from_millis(300), "gave up early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "gave up late: {elapsed:?}");

    let req = json!({"channel": "PJSIP/1000", "extension": "200"});
    let (status, body) = call(&app, "POST", "/originate", Some(req)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Failed to originate call");
    assert_eq!(mock.received_named("Originate").len(), 2);
    assert!(server.bridge().status().connected);
}

#[tokio::test]
async fn originate_missing_channel_is_bad_request() {
    let app = make_server().router();
    let (status, body) = call(&app, "POST", "/originate", Some(json!({"extension": "200"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "channel is required");
}

#[tokio::test]
async fn channels_returns_raw_response() {
    let mock = MockAmi::with_handler(|msg| match msg.get("Action") {
        Some("Status") => Reply::Send(vec![response(
            msg.action_id().unwrap_or_default(),
            "Success",
            "Channel status will follow",
        )]),
        _ => Reply::Silent,
    })
    .await;
    let app = make_server().router();

    let (status, body) = call(&app, "GET", "/channels", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["success"], false);
    assert!(body["data"].is_null());

    let _ = call(&app, "POST", "/connect", Some(connect_body(&mock, SECRET))).await;
    let (status, body) = call(&app, "GET", "/channels", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["Message"], "Channel status will follow");
}

#[tokio::test]
async fn pjsip_endpoints_are_normalized() {
    let mock = MockAmi::with_handler(|msg| match msg.get("Action") {
        Some("PJSIPShowEndpoints") => Reply::Send(endpoint_list(
            msg.action_id().unwrap_or_default(),
            &[("1000", "1000/1000"), ("1001", "")],
        )),
        _ => Reply::Silent,
    })
    .await;
    let app = make_server().router();
    let _ = call(&app, "POST", "/connect", Some(connect_body(&mock, SECRET))).await;

    let (status, body) = call(&app, "GET", "/pjsip-endpoints", None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Found 2 endpoints");
    assert_eq!(body["data"][0]["endpoint"], "1000");
    assert_eq!(body["data"][0]["objectName"], "1000");
    assert_eq!(body["data"][0]["status"], "Not in use");
    assert_eq!(body["data"][1]["endpoint"], "1001");
}

#[tokio::test]
async fn pjsip_endpoints_while_disconnected() {
    let app = make_server().router();
    let (status, body) = call(&app, "GET", "/pjsip-endpoints", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn websocket_streams_status_then_events() {
    let mock = MockAmi::start().await;
    let server = make_server();
    let addr = server.listen().await.unwrap();
    server
        .bridge()
        .connect(server.bridge().config_for("127.0.0.1", mock.addr.port(), USERNAME, SECRET))
        .await
        .unwrap();

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let greeting = read_text(&mut ws).await;
    assert_eq!(greeting["type"], "status");
    assert_eq!(greeting["connected"], true);

    mock.push(event("Newchannel").with("Channel", "PJSIP/1000-00000001"));
    let frame = read_text(&mut ws).await;
    assert_eq!(frame["type"], "event");
    assert_eq!(frame["data"]["Event"], "Newchannel");
    assert_eq!(frame["data"]["Channel"], "PJSIP/1000-00000001");

    mock.close_connection();
    let frame = read_text(&mut ws).await;
    assert_eq!(frame["type"], "status");
    assert_eq!(frame["connected"], false);

    assert!(server.shutdown().shutdown(TIMEOUT).await);
}

#[tokio::test]
async fn websocket_client_is_detached_on_close() {
    let server = make_server();
    let addr = server.listen().await.unwrap();

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let greeting = read_text(&mut ws).await;
    assert_eq!(greeting["connected"], false);
    assert_eq!(server.bridge().subscriber_count(), 1);

    ws.close(None).await.unwrap();
    drop(ws);
    timeout(TIMEOUT, async {
        while server.bridge().subscriber_count() > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(server.shutdown().shutdown(TIMEOUT).await);
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn read_text(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
        match msg {
            WsMessage::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

fn fast_reconnect() -> ReconnectPolicy {
    ReconnectPolicy {
        enabled: true,
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        jitter_factor: 0.0,
    }
}

#[tokio::test]
async fn supervisor_restores_dropped_connection() {
    let mock = MockAmi::start().await;
    let server = server_with(mock.config(), fast_reconnect());
    assert!(server.spawn_supervisor());
    server.bridge().connect(mock.config()).await.unwrap();

    mock.close_connection();
    timeout(TIMEOUT, async {
        while mock.received_named("Login").len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    wait_for_state(&server, ConnectionState::Connected).await;

    assert!(server.bridge().supervisor().is_armed());
    assert!(server.shutdown().shutdown(TIMEOUT).await);
}

#[tokio::test]
async fn explicit_disconnect_is_not_restored() {
    let mock = MockAmi::start().await;
    let server = server_with(mock.config(), fast_reconnect());
    assert!(server.spawn_supervisor());
    server.bridge().connect(mock.config()).await.unwrap();

    server.bridge().disconnect().await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!server.bridge().status().connected);
    assert_eq!(mock.received_named("Login").len(), 1);
    assert!(server.shutdown().shutdown(TIMEOUT).await);
}
