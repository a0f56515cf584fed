//! Per-connection send side: the WebSocket sink plus the queue other tasks
//! use to reach this connection.

use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::error::{AppError, AppResult};
use crate::events::ServerEvent;
use crate::hub::ConnectionId;

pub struct ConnectionHandler {
    ws_sender: SplitSink<WebSocketStream<TcpStream>, WsMessage>,
    tx: mpsc::UnboundedSender<ServerEvent>,
    conn_id: ConnectionId,
    user_id: Option<String>,
    addr: SocketAddr,
}

impl ConnectionHandler {
    pub fn new(
        ws_sender: SplitSink<WebSocketStream<TcpStream>, WsMessage>,
        tx: mpsc::UnboundedSender<ServerEvent>,
        conn_id: ConnectionId,
        addr: SocketAddr,
    ) -> Self {
        Self {
            ws_sender,
            tx,
            conn_id,
            user_id: None,
            addr,
        }
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `None` until `authenticate` succeeds.
    pub fn user_id(&self) -> Option<&String> {
        self.user_id.as_ref()
    }

    pub fn set_user_id(&mut self, user_id: String) {
        self.user_id = Some(user_id);
    }

    /// Clone of this connection's queue, handed to the hub and the fan-out
    /// registry so broadcasts and notifications reach this socket.
    pub fn tx(&self) -> mpsc::UnboundedSender<ServerEvent> {
        self.tx.clone()
    }

    /// Serializes the event as a JSON text frame. An `Err` here means the
    /// socket is gone and the caller should tear the connection down.
    pub async fn send_event(&mut self, event: &ServerEvent) -> AppResult<()> {
        let json = serde_json::to_string(event)?;
        self.ws_sender
            .send(WsMessage::Text(json))
            .await
            .map_err(AppError::from)
    }

    /// Best-effort error frame; a failed send is logged, not propagated,
    /// because the read loop will observe the dead socket on its own.
    pub async fn send_error(&mut self, code: &str, message: &str) {
        let event = ServerEvent::Error {
            code: code.to_string(),
            message: message.to_string(),
        };
        if let Err(e) = self.send_event(&event).await {
            tracing::debug!(error = %e, peer = %self.addr, "Failed to send error event");
        }
    }

    pub async fn send_app_error(&mut self, error: &AppError) {
        error.log();
        self.send_error(error.error_code(), &error.user_message())
            .await;
    }

    pub async fn send_pong(&mut self, data: Vec<u8>) -> AppResult<()> {
        self.ws_sender
            .send(WsMessage::Pong(data))
            .await
            .map_err(AppError::from)
    }
}
