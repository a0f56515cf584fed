//! HTTP surface: health plus the chat REST endpoints.

pub mod extractors;
mod groups;
mod health;
mod messages;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::context::AppContext;

pub fn create_router(app_context: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/chat/groups",
            post(groups::create_group).get(groups::list_groups),
        )
        .route("/chat/groups/init", post(groups::init_group))
        .route(
            "/chat/groups/:group_id/participants",
            post(groups::add_participant),
        )
        .route("/chat/groups/:group_id/archive", post(groups::archive_group))
        .route(
            "/chat/groups/:group_id/settings",
            post(groups::update_settings),
        )
        .route(
            "/chat/:group_id/messages",
            get(messages::get_history).post(messages::post_message),
        )
        .route(
            "/chat/messages/:message_id/reactions",
            post(messages::add_reaction),
        )
        .route("/chat/messages/:message_id/read", post(messages::mark_read))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_context)
}
