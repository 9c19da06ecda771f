//! End-to-end tests over real sockets.
//!
//! Starts the server on an ephemeral port and drives it with WebSocket
//! clients and plain HTTP requests.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use plaza_server::config::ServerConfig;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn start_server() -> (SocketAddr, tokio::task::JoinHandle<anyhow::Result<()>>) {
    start_server_with(ServerConfig::default()).await
}

async fn start_server_with(
    config: ServerConfig,
) -> (SocketAddr, tokio::task::JoinHandle<anyhow::Result<()>>) {
    let config = ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        port: None,
        ..config
    };
    plaza_server::server::Server::new(config).start().await.unwrap()
}

async fn stats(addr: SocketAddr) -> Value {
    reqwest::get(format!("http://{addr}/api/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

fn usernames(stats: &Value) -> Vec<&str> {
    stats["users"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["username"].as_str().unwrap())
        .collect()
}

/// Open a socket and return it with the id the relay assigned.
async fn connect(addr: SocketAddr) -> (Ws, String) {
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let hello = next_event(&mut ws).await;
    assert_eq!(hello["event"], "connected");
    let id = hello["data"]["id"].as_str().unwrap().to_string();
    (ws, id)
}

async fn send(ws: &mut Ws, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

async fn next_event(ws: &mut Ws) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Skip frames until one matches.
async fn wait_for(ws: &mut Ws, desc: &str, predicate: impl Fn(&Value) -> bool) -> Value {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if tokio::time::Instant::now() > deadline {
            panic!("Timeout waiting for: {desc}");
        }
        let event = next_event(ws).await;
        if predicate(&event) {
            return event;
        }
    }
}

async fn join(addr: SocketAddr, name: &str) -> (Ws, String) {
    let (mut ws, id) = connect(addr).await;
    send(&mut ws, json!({"event": "join", "data": name})).await;
    wait_for(&mut ws, "userJoined", |e| e["event"] == "userJoined").await;
    (ws, id)
}

#[tokio::test]
async fn join_and_public_message() {
    let (addr, _h) = start_server().await;
    let (mut ana, _) = join(addr, "ana").await;
    let (mut beto, _) = join(addr, "beto").await;

    let update = wait_for(&mut ana, "presence with beto", |e| {
        e["event"] == "usersUpdate" && e["data"].as_array().is_some_and(|u| u.len() == 2)
    })
    .await;
    assert_eq!(update["data"][1]["username"], "beto");

    send(&mut beto, json!({"event": "publicMessage", "data": "hola"})).await;
    for ws in [&mut ana, &mut beto] {
        let msg = wait_for(ws, "beto's message", |e| {
            e["event"] == "publicMessage" && e["data"]["sender"] == "beto"
        })
        .await;
        assert_eq!(msg["data"]["body"], "hola");
        assert_eq!(msg["data"]["kind"], "public");
    }
}

#[tokio::test]
async fn taken_name_is_refused() {
    let (addr, _h) = start_server().await;
    let (_ana, _) = join(addr, "ana").await;

    let (mut other, _) = connect(addr).await;
    send(&mut other, json!({"event": "join", "data": "ana"})).await;
    let reply = next_event(&mut other).await;
    assert_eq!(reply, json!({"event": "usernameTaken"}));
}

#[tokio::test]
async fn private_message_reaches_only_the_pair() {
    let (addr, _h) = start_server().await;
    let (mut ana, _) = join(addr, "ana").await;
    let (mut beto, beto_id) = join(addr, "beto").await;
    let (mut carla, _) = join(addr, "carla").await;

    send(
        &mut ana,
        json!({"event": "privateMessage", "data": {"to": beto_id, "message": "psst"}}),
    )
    .await;
    for ws in [&mut beto, &mut ana] {
        let msg = wait_for(ws, "private message", |e| e["event"] == "privateMessage").await;
        assert_eq!(msg["data"]["sender"], "ana");
        assert_eq!(msg["data"]["to"], "beto");
    }

    // Carla's next frame is her own message, not the private one.
    send(&mut carla, json!({"event": "publicMessage", "data": "marker"})).await;
    let seen = wait_for(&mut carla, "marker", |e| {
        e["event"] == "privateMessage" || e["data"]["body"] == "marker"
    })
    .await;
    assert_eq!(seen["event"], "publicMessage");
}

#[tokio::test]
async fn private_message_to_missing_user_is_an_error() {
    let (addr, _h) = start_server().await;
    let (mut ana, _) = join(addr, "ana").await;
    send(
        &mut ana,
        json!({"event": "privateMessage", "data": {"to": "c999", "message": "hello?"}}),
    )
    .await;
    let err = wait_for(&mut ana, "error", |e| e["event"] == "error").await;
    assert_eq!(err["data"], "user not found");
}

#[tokio::test]
async fn closing_a_socket_updates_presence() {
    let (addr, _h) = start_server().await;
    let (mut ana, _) = join(addr, "ana").await;
    let (mut beto, _) = join(addr, "beto").await;
    wait_for(&mut ana, "presence with beto", |e| {
        e["event"] == "usersUpdate" && e["data"].as_array().is_some_and(|u| u.len() == 2)
    })
    .await;

    beto.close(None).await.unwrap();
    let update = wait_for(&mut ana, "presence without beto", |e| {
        e["event"] == "usersUpdate" && e["data"].as_array().is_some_and(|u| u.len() == 1)
    })
    .await;
    assert_eq!(update["data"][0]["username"], "ana");
    let notice = wait_for(&mut ana, "departure notice", |e| e["event"] == "publicMessage").await;
    assert_eq!(notice["data"]["kind"], "system");
    assert_eq!(notice["data"]["body"], "beto left the chat");
}

#[tokio::test]
async fn malformed_frames_are_ignored() {
    let (addr, _h) = start_server().await;
    let (mut ws, _) = connect(addr).await;
    ws.send(Message::Text("not json".into())).await.unwrap();
    send(&mut ws, json!({"event": "shout", "data": "x"})).await;
    ws.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();

    // Still connected and able to join.
    send(&mut ws, json!({"event": "join", "data": "ana"})).await;
    let joined = next_event(&mut ws).await;
    assert_eq!(joined["event"], "userJoined");
}

#[tokio::test]
async fn stats_and_health_endpoints() {
    let (addr, _h) = start_server().await;
    let (_ana, _) = join(addr, "ana").await;
    let (_beto, _) = join(addr, "beto").await;
    let (_lurker, _) = connect(addr).await;

    let stats = stats(addr).await;
    assert_eq!(stats["connectedUsers"], 2);
    assert_eq!(usernames(&stats), ["ana", "beto"]);
    assert!(stats["users"][0]["joinTime"].is_string());

    let health: Value = reqwest::get(format!("http://{addr}/api/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 3);
}

#[tokio::test]
async fn silent_client_is_dropped_while_responsive_one_stays() {
    let (addr, _h) = start_server_with(ServerConfig {
        reconcile_interval_secs: 1,
        ping_interval_secs: 1,
        ping_timeout_secs: 1,
        ..Default::default()
    })
    .await;

    // Joins, then never reads again, so pings go unanswered.
    let (_ghost, _) = join(addr, "ghost").await;

    // Keeps reading, which answers every ping with a pong.
    let (mut ana, _) = join(addr, "ana").await;
    let reader = tokio::spawn(async move { while let Some(Ok(_)) = ana.next().await {} });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let stats = stats(addr).await;
        if usernames(&stats) == ["ana"] {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "silent client still listed: {stats}"
        );
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    // Well past the silence limit, the responsive client is still there.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(usernames(&stats(addr).await), ["ana"]);
    reader.abort();
}

#[tokio::test]
async fn oversized_frame_closes_the_connection() {
    let (addr, _h) = start_server_with(ServerConfig {
        max_frame_len: 256,
        ..Default::default()
    })
    .await;
    let (mut ws, _) = join(addr, "ana").await;

    let body = "x".repeat(1024);
    send(&mut ws, json!({"event": "publicMessage", "data": body})).await;

    // Drain until the relay hangs up; the big message is never echoed.
    loop {
        match timeout(TIMEOUT, ws.next()).await.expect("connection was not closed") {
            Some(Ok(Message::Text(text))) => {
                assert!(!text.as_str().contains(&body), "oversized message was relayed");
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            Some(Ok(_)) => {}
        }
    }

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while stats(addr).await["connectedUsers"] != 0 {
        assert!(tokio::time::Instant::now() < deadline, "user not retired");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
