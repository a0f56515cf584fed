//! huddle-server: real-time group messaging.
//!
//! Durable, ordered message log per group (SQLite) with live fan-out to
//! WebSocket rooms. History reads bypass the live layer and query the store
//! directly over HTTP; live delivery is best-effort and never a substitute
//! for the durable log.

use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_tungstenite::accept_async;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod events;
pub mod fanout;
pub mod gateway;
pub mod hub;
pub mod routes;
pub mod store;
pub mod types;
pub mod utils;

use auth::AuthManager;
use broadcast::Broadcaster;
use config::Config;
use context::AppContext;
use fanout::NotificationFanout;
use hub::RoomHub;
use store::{GroupDirectory, MessageStore};

pub use error::{AppError, AppResult};

/// Accept loop for the WebSocket gateway. One task per connection.
pub async fn run_websocket_server(app_context: AppContext, listener: TcpListener) {
    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept socket");
                continue;
            }
        };

        let ctx = app_context.clone();

        tokio::spawn(async move {
            match accept_async(socket).await {
                Ok(ws_stream) => gateway::handle_websocket(ws_stream, addr, ctx).await,
                Err(e) => {
                    tracing::debug!(error = %e, peer = %addr, "WebSocket upgrade failed");
                }
            }
        });
    }
}

/// HTTP server for history reads, group management and health checks.
pub async fn run_http_server(app_context: AppContext, listener: TcpListener) -> Result<()> {
    let app = routes::create_router(Arc::new(app_context));
    axum::serve(listener, app).await?;
    Ok(())
}

/// Assembles the shared application context from an open pool and config.
///
/// Also spawns the last-message projection: a background task that listens
/// on the append-event bus and updates the group's denormalized pointer.
/// The pointer is a UI convenience, not a correctness-critical field, so
/// projection failures are logged and swallowed.
pub fn build_context(pool: db::DbPool, config: Arc<Config>) -> Result<AppContext> {
    let auth_manager = Arc::new(AuthManager::new(&config)?);
    let store = MessageStore::new(pool.clone());
    let directory = GroupDirectory::new(pool.clone());
    let hub = Arc::new(RoomHub::new());
    let broadcaster = Broadcaster::new(hub.clone());
    let fanout = Arc::new(NotificationFanout::new());

    let ctx = AppContext {
        db_pool: pool,
        store,
        directory,
        hub,
        broadcaster,
        fanout,
        auth_manager,
        config,
    };

    spawn_last_message_projection(&ctx);

    Ok(ctx)
}

fn spawn_last_message_projection(ctx: &AppContext) {
    let mut appends = ctx.store.subscribe_appends();
    let directory = ctx.directory.clone();

    tokio::spawn(async move {
        loop {
            match appends.recv().await {
                Ok(event) => {
                    let msg = event.message;
                    if let Err(e) = directory
                        .update_last_message(&msg.group_id, &msg.id)
                        .await
                    {
                        tracing::warn!(
                            error = %e,
                            group_id = %msg.group_id,
                            message_id = %msg.id,
                            "Last-message projection update failed"
                        );
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    // Only the newest pointer matters; dropped events are fine.
                    tracing::debug!(skipped = skipped, "Last-message projection lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

pub async fn run() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app_config = Arc::new(config);

    let pool = db::connect_pool(&app_config.database_url, app_config.db.max_connections).await?;
    tracing::info!("Connected to database");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations applied");

    let app_context = build_context(pool, app_config.clone())?;

    let ws_addr = format!("0.0.0.0:{}", app_config.port);
    let ws_listener = TcpListener::bind(&ws_addr).await?;
    tracing::info!("Huddle server listening on {} (WebSocket)", ws_addr);

    let http_addr = format!("0.0.0.0:{}", app_config.http_port);
    let http_listener = TcpListener::bind(&http_addr).await?;
    tracing::info!("HTTP API listening on http://{}", http_addr);

    let websocket_server = run_websocket_server(app_context.clone(), ws_listener);
    let http_server = run_http_server(app_context, http_listener);

    tokio::select! {
        _ = websocket_server => {
            tracing::info!("WebSocket server shut down.");
        },
        res = http_server => {
            if let Err(e) = res {
                tracing::error!(error = %e, "HTTP server failed");
            }
        },
        _ = signal::ctrl_c() => {
            tracing::info!("Shutdown signal received. Shutting down...");
        }
    }

    Ok(())
}
