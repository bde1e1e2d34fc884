//! End-to-end: a real server, a WebSocket client, and running projects.

use std::path::Path;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use loom::hub::ConnectionConfig;
use loom::project::RunningSource;
use loom::server::{AppState, create_router};
use loom::{Host, LoomConfig};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const MONITOR_INTERVAL: Duration = Duration::from_millis(200);

const SERVICE: &str = r#"
    const answers = {};

    service.route("POST", "/ask", (req) => {
        return ui.request(req.body.session, { title: "Proceed?" }, (data, error) => {
            answers.last = error ? { error } : { data };
        });
    });
    service.route("GET", "/answer", () => answers.last ?? null);
    service.route("GET", "/shout", () => {
        console.warn("shouting at", service.projectId);
        return "ok";
    });
"#;

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

async fn serve(root: &Path) -> (Host, String) {
    serve_with(root, None).await
}

/// Like [`serve`], optionally overriding socket liveness settings.
async fn serve_with(root: &Path, connection: Option<ConnectionConfig>) -> (Host, String) {
    write(root, "shop/project.toml", "");
    write(root, "shop/releases/1.0.0/main.js", SERVICE);

    let mut config = LoomConfig::default();
    config.projects.dir = root.to_path_buf();
    config.projects.autostart = false;
    config.modules.dir = None;
    config.broadcaster.monitor_interval_ms = MONITOR_INTERVAL.as_millis() as u64;

    let host = Host::start(config).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = match connection {
        Some(connection) => create_router(AppState::new(host.controller().clone(), host.hub().clone(), connection)),
        None => host.router(),
    };
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (host, format!("ws://{}/ws?user=ada", addr))
}

/// Next frame matching `pred`, splitting batched messages.
async fn next_frame(client: &mut Client, within: Duration, pred: impl Fn(&Value) -> bool) -> Value {
    tokio::time::timeout(within, async {
        loop {
            let msg = client.next().await.expect("socket closed").expect("socket error");
            let Message::Text(text) = msg else { continue };
            for line in text.lines() {
                let frame: Value = serde_json::from_str(line).unwrap();
                if pred(&frame) {
                    return frame;
                }
            }
        }
    })
    .await
    .expect("expected frame did not arrive in time")
}

async fn send(client: &mut Client, action: Value) {
    client.send(Message::Text(action.to_string())).await.unwrap();
}

async fn connect(url: &str) -> (Client, String) {
    let (mut client, _) = connect_async(url).await.unwrap();
    let handshake = next_frame(&mut client, Duration::from_secs(2), |_| true).await;
    assert_eq!(handshake["type"], "session");
    let session = handshake["sessionId"].as_str().unwrap().to_string();
    (client, session)
}

fn event(kind: &'static str) -> impl Fn(&Value) -> bool {
    move |frame| frame["projectId"] == "shop" && frame["event"]["type"] == kind
}

#[tokio::test]
async fn subscriber_sees_fresh_monitor_after_start() {
    let tmp = TempDir::new().unwrap();
    let (host, url) = serve(tmp.path()).await;
    let (mut client, _) = connect(&url).await;

    send(&mut client, json!({ "action": "subscribe", "projectId": "shop" })).await;
    // Subscription is applied before the start below is observed
    tokio::time::sleep(Duration::from_millis(50)).await;

    let source: RunningSource = "release:1.0.0".parse().unwrap();
    host.controller().start("shop", &source).await.unwrap();

    let status = next_frame(&mut client, MONITOR_INTERVAL * 2, event("status")).await;
    assert_eq!(status["event"]["data"]["running"], true);

    let monitor = next_frame(&mut client, MONITOR_INTERVAL * 2, event("monitor")).await;
    assert_eq!(monitor["event"]["data"]["totalRequests"], 0);
    assert_eq!(monitor["event"]["data"]["label"], "release:1.0.0");

    host.shutdown().await;
}

#[tokio::test]
async fn console_output_streams_as_log_events() {
    let tmp = TempDir::new().unwrap();
    let (host, url) = serve(tmp.path()).await;
    let (mut client, _) = connect(&url).await;
    send(&mut client, json!({ "action": "subscribe", "projectId": "shop" })).await;
    host.controller()
        .start("shop", &"release:1.0.0".parse().unwrap())
        .await
        .unwrap();

    host.manager().invoke("shop", "GET", "/shout", json!({})).await.unwrap();

    let log = next_frame(&mut client, Duration::from_secs(2), event("log")).await;
    assert_eq!(log["event"]["data"]["level"], "warn");
    assert_eq!(log["event"]["data"]["message"], "shouting at shop");

    host.shutdown().await;
}

#[tokio::test]
async fn ui_request_round_trips_through_the_browser_session() {
    let tmp = TempDir::new().unwrap();
    let (host, url) = serve(tmp.path()).await;
    let (mut client, session) = connect(&url).await;
    send(&mut client, json!({ "action": "subscribe", "projectId": "shop" })).await;
    host.controller()
        .start("shop", &"release:1.0.0".parse().unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let request_id = host
        .manager()
        .invoke("shop", "POST", "/ask", json!({ "body": { "session": session } }))
        .await
        .unwrap();

    let prompt = next_frame(&mut client, Duration::from_secs(2), event("ui_request")).await;
    assert_eq!(prompt["event"]["data"]["requestId"], request_id);
    assert_eq!(prompt["event"]["data"]["schema"]["title"], "Proceed?");

    send(
        &mut client,
        json!({
            "action": "ui_response",
            "projectId": "shop",
            "requestId": request_id,
            "data": { "confirmed": true }
        }),
    )
    .await;

    let mut answer = Value::Null;
    for _ in 0..100 {
        answer = host.manager().invoke("shop", "GET", "/answer", json!({})).await.unwrap();
        if !answer.is_null() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(answer, json!({ "data": { "confirmed": true } }));

    host.shutdown().await;
}

#[tokio::test]
async fn disconnect_abandons_pending_ui_requests() {
    let tmp = TempDir::new().unwrap();
    let (host, url) = serve(tmp.path()).await;
    let (mut client, session) = connect(&url).await;
    send(&mut client, json!({ "action": "subscribe", "projectId": "shop" })).await;
    host.controller()
        .start("shop", &"release:1.0.0".parse().unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    host.manager()
        .invoke("shop", "POST", "/ask", json!({ "body": { "session": session } }))
        .await
        .unwrap();
    next_frame(&mut client, Duration::from_secs(2), event("ui_request")).await;
    client.close(None).await.unwrap();

    let mut answer = Value::Null;
    for _ in 0..100 {
        answer = host.manager().invoke("shop", "GET", "/answer", json!({})).await.unwrap();
        if !answer.is_null() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(answer, json!({ "error": "session disconnected" }));

    host.shutdown().await;
}

#[tokio::test]
async fn server_pings_idle_clients() {
    let tmp = TempDir::new().unwrap();
    let connection = ConnectionConfig {
        ping_interval: Duration::from_millis(100),
        idle_timeout: Duration::from_secs(5),
        ..ConnectionConfig::default()
    };
    let (host, url) = serve_with(tmp.path(), Some(connection)).await;
    let (mut client, _) = connect(&url).await;

    let ping = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Ping(_))) => return true,
                Some(Ok(_)) => continue,
                _ => return false,
            }
        }
    })
    .await;
    assert_eq!(ping, Ok(true));

    host.shutdown().await;
}

#[tokio::test]
async fn silent_clients_are_closed_and_unregistered() {
    let tmp = TempDir::new().unwrap();
    let connection = ConnectionConfig {
        ping_interval: Duration::from_secs(30),
        idle_timeout: Duration::from_millis(200),
        ..ConnectionConfig::default()
    };
    let (host, url) = serve_with(tmp.path(), Some(connection)).await;
    let (mut client, _) = connect(&url).await;
    send(&mut client, json!({ "action": "subscribe", "projectId": "shop" })).await;

    let mut subscribed = 0;
    for _ in 0..50 {
        subscribed = host.hub().subscriber_count("shop").await.unwrap();
        if subscribed == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(subscribed, 1);

    // Say nothing more; the server gives up after the idle timeout
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "socket still open after the idle timeout");

    let mut clients = usize::MAX;
    for _ in 0..100 {
        clients = host.hub().client_count().await.unwrap();
        if clients == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(clients, 0);
    assert_eq!(host.hub().subscriber_count("shop").await.unwrap(), 0);

    host.shutdown().await;
}
