//! Message endpoints: paged history, REST append, reactions and read
//! markers for clients that are not on a live socket.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::config::DEFAULT_PAGE_SIZE;
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::events::ServerEvent;
use crate::types::{Attachment, MessageKind, ParticipantRole};

use super::extractors::AuthenticatedUser;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Chronological page of a group's history. Requires authentication but
/// not membership: history of a known group id is readable, archived
/// groups included.
pub async fn get_history(
    State(ctx): State<Arc<AppContext>>,
    _user: AuthenticatedUser,
    Path(group_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> AppResult<impl IntoResponse> {
    let page = params.page.unwrap_or(1);
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE);

    let (messages, pagination) = ctx.store.history(&group_id, page, limit).await?;

    Ok(Json(json!({
        "status": "success",
        "results": messages.len(),
        "page": pagination.page,
        "totalPages": pagination.total_pages,
        "data": messages,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageRequest {
    pub text: String,
    pub kind: Option<MessageKind>,
    pub attachments: Option<Vec<Attachment>>,
}

/// REST append. Goes through the same store path as the live gateway and
/// broadcasts the stored message to the room afterwards, so socket-joined
/// members see REST-posted messages in real time.
pub async fn post_message(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    Path(group_id): Path<String>,
    Json(req): Json<PostMessageRequest>,
) -> AppResult<impl IntoResponse> {
    require_posting_role(&ctx, &group_id, &user.0).await?;

    let message = ctx
        .store
        .append(
            &group_id,
            &user.0,
            &req.text,
            req.kind.unwrap_or(MessageKind::Text),
            req.attachments.unwrap_or_default(),
        )
        .await?;

    ctx.broadcaster
        .broadcast(
            &group_id,
            ServerEvent::MessageReceived(message.clone()),
            None,
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "data": message })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRequest {
    pub emoji: String,
}

/// Adds (or refreshes) a reaction. The group is derived from the message,
/// and the reactor must be a participant of it.
pub async fn add_reaction(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    Path(message_id): Path<String>,
    Json(req): Json<ReactionRequest>,
) -> AppResult<impl IntoResponse> {
    let group_id = ctx.store.fetch_message_group(&message_id).await?;
    require_participant(&ctx, &group_id, &user.0).await?;

    let reaction = ctx.store.add_reaction(&message_id, &user.0, &req.emoji).await?;

    ctx.broadcaster
        .broadcast(
            &group_id,
            ServerEvent::ReactionAdded {
                group_id: group_id.clone(),
                message_id,
                user_id: user.0,
                emoji: reaction.emoji.clone(),
            },
            None,
        )
        .await;

    Ok(Json(json!({ "status": "success", "data": reaction })))
}

pub async fn mark_read(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    Path(message_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let group_id = ctx.store.fetch_message_group(&message_id).await?;
    require_participant(&ctx, &group_id, &user.0).await?;

    let marker = ctx.store.mark_read(&message_id, &user.0).await?;

    ctx.broadcaster
        .broadcast(
            &group_id,
            ServerEvent::MessageRead {
                group_id: group_id.clone(),
                message_id,
                user_id: user.0,
            },
            None,
        )
        .await;

    Ok(Json(json!({ "status": "success", "data": marker })))
}

async fn require_participant(
    ctx: &AppContext,
    group_id: &str,
    user_id: &str,
) -> AppResult<ParticipantRole> {
    ctx.directory
        .role_of(group_id, user_id)
        .await?
        .ok_or_else(|| AppError::forbidden("not a participant of this group"))
}

async fn require_posting_role(
    ctx: &AppContext,
    group_id: &str,
    user_id: &str,
) -> AppResult<()> {
    match require_participant(ctx, group_id, user_id).await? {
        ParticipantRole::Viewer => Err(AppError::forbidden("viewers may not post in this group")),
        _ => Ok(()),
    }
}
