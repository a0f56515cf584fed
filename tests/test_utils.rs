#![allow(dead_code)]

//! Shared harness: boots the full server (in-memory database, WebSocket
//! gateway and HTTP API on ephemeral ports) and provides small client
//! helpers for driving it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sqlx::sqlite::SqlitePoolOptions;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use huddle_server::config::{Config, DbConfig, LoggingConfig};
use huddle_server::context::AppContext;
use huddle_server::events::{ClientEvent, ServerEvent};
use huddle_server::types::{Group, GroupKind};
use huddle_server::{build_context, db, run_http_server, run_websocket_server};

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestApp {
    pub ctx: AppContext,
    pub ws_url: String,
    pub http_url: String,
}

pub fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        jwt_secret: "test-secret-key-that-is-long-enough!!".to_string(),
        jwt_issuer: "huddle-test".to_string(),
        port: 0,
        http_port: 0,
        rust_log: "warn".to_string(),
        logging: LoggingConfig {
            enable_user_identifiers: true,
            hash_salt: "test-salt".to_string(),
        },
        db: DbConfig { max_connections: 1 },
    }
}

pub async fn spawn_app() -> TestApp {
    // A single connection keeps the in-memory database alive for the whole
    // test; a second connection would see a fresh empty database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory database");
    db::run_migrations(&pool).await.expect("migrations failed");

    let ctx = build_context(pool, Arc::new(test_config())).expect("failed to build context");

    let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_addr = ws_listener.local_addr().unwrap();
    let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_addr = http_listener.local_addr().unwrap();

    tokio::spawn(run_websocket_server(ctx.clone(), ws_listener));
    let http_ctx = ctx.clone();
    tokio::spawn(async move {
        let _ = run_http_server(http_ctx, http_listener).await;
    });

    TestApp {
        ctx,
        ws_url: format!("ws://{}", ws_addr),
        http_url: format!("http://{}", http_addr),
    }
}

impl TestApp {
    pub fn token_for(&self, user_id: &str) -> String {
        self.ctx
            .auth_manager
            .create_token(user_id)
            .expect("token creation failed")
    }

    /// Seeds a group with `admin` as admin and `members` as members.
    pub async fn seed_group(&self, name: &str, admin: &str, members: &[&str]) -> Group {
        let member_ids: Vec<String> = members.iter().map(|m| m.to_string()).collect();
        self.ctx
            .directory
            .create(name, None, GroupKind::Group, admin, &member_ids)
            .await
            .expect("failed to seed group")
    }
}

pub async fn ws_connect(app: &TestApp) -> WsClient {
    let (ws, _) = connect_async(&app.ws_url)
        .await
        .expect("WebSocket connect failed");
    ws
}

pub async fn send_event(ws: &mut WsClient, event: &ClientEvent) {
    let json = serde_json::to_string(event).unwrap();
    ws.send(WsMessage::Text(json)).await.expect("send failed");
}

/// Next JSON event from the server, failing the test after two seconds.
pub async fn recv_event(ws: &mut WsClient) -> ServerEvent {
    let deadline = Duration::from_secs(2);
    loop {
        let frame = tokio::time::timeout(deadline, ws.next())
            .await
            .expect("timed out waiting for server event")
            .expect("connection closed")
            .expect("websocket error");
        match frame {
            WsMessage::Text(text) => {
                return serde_json::from_str(&text).expect("unparseable server event")
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

/// Asserts that nothing arrives within a short window.
pub async fn expect_silence(ws: &mut WsClient) {
    let result = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(result.is_err(), "expected no event, got {:?}", result);
}

/// Connects and authenticates, consuming the `authenticated` event.
pub async fn authenticate(app: &TestApp, user_id: &str) -> WsClient {
    let mut ws = ws_connect(app).await;
    send_event(
        &mut ws,
        &ClientEvent::Authenticate {
            token: app.token_for(user_id),
        },
    )
    .await;
    match recv_event(&mut ws).await {
        ServerEvent::Authenticated { user_id: uid } => assert_eq!(uid, user_id),
        other => panic!("expected authenticated, got {:?}", other),
    }
    ws
}

/// Joins a room, consuming the `joined` event.
pub async fn join_room(ws: &mut WsClient, group_id: &str) {
    send_event(
        ws,
        &ClientEvent::Join {
            group_id: group_id.to_string(),
        },
    )
    .await;
    match recv_event(ws).await {
        ServerEvent::Joined { group_id: gid } => assert_eq!(gid, group_id),
        other => panic!("expected joined, got {:?}", other),
    }
}
