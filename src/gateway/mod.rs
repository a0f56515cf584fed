//! Session Gateway: one task per WebSocket connection.
//!
//! A connection starts unauthenticated; the first event must be
//! `authenticate` or the connection is closed with an unauthorized error.
//! Once authenticated, room-scoped events are validated against the hub
//! and the directory before anything is forwarded. Whichever way the
//! connection ends, the cleanup tail runs: every room subscription is
//! dropped and the fan-out registration removed.

pub mod connection;
mod handlers;

use futures_util::StreamExt;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::context::AppContext;
use crate::events::{ClientEvent, ServerEvent};
use crate::utils::log_safe_id;
use connection::ConnectionHandler;
use handlers::{dispatch, Flow};

pub async fn handle_websocket(
    ws_stream: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    ctx: AppContext,
) {
    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let conn_id = Uuid::new_v4();
    let mut handler = ConnectionHandler::new(ws_sender, tx, conn_id, addr);

    loop {
        tokio::select! {
            inbound = ws_receiver.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => {
                                if let Flow::Close = dispatch(&mut handler, &ctx, event).await {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, peer = %addr, "Unparseable client event");
                                handler
                                    .send_error("BAD_PAYLOAD", "could not parse event")
                                    .await;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if handler.send_pong(data).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, peer = %addr, "WebSocket error");
                        break;
                    }
                }
            }

            Some(event) = rx.recv() => {
                if handler.send_event(&event).await.is_err() {
                    break;
                }
            }
        }
    }

    // The cleanup tail runs on every disconnect path, voluntary or not,
    // so no room keeps a subscription for a dead connection.
    ctx.hub.drop_connection(conn_id).await;
    if let Some(user_id) = handler.user_id().cloned() {
        ctx.fanout.deregister(&user_id, conn_id).await;

        if ctx.config.logging.enable_user_identifiers {
            tracing::info!(user_id = %user_id, peer = %addr, "User disconnected");
        } else {
            tracing::info!(
                user_hash = %log_safe_id(&user_id, &ctx.config.logging.hash_salt),
                peer = %addr,
                "User disconnected"
            );
        }
    } else {
        tracing::debug!(peer = %addr, "Connection closed before authentication");
    }
}
