//! Event handlers for authenticated WebSocket sessions.

use crate::context::AppContext;
use crate::error::AppError;
use crate::events::{Ack, AckStatus, ClientEvent, SendMessage, ServerEvent};
use crate::types::{MessageKind, ParticipantRole};
use crate::utils::log_safe_id;

use super::connection::ConnectionHandler;

/// Whether the read loop keeps going after an event is handled.
pub(crate) enum Flow {
    Continue,
    Close,
}

pub(crate) async fn dispatch(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    event: ClientEvent,
) -> Flow {
    let Some(user_id) = handler.user_id().cloned() else {
        return match event {
            ClientEvent::Authenticate { token } => handle_authenticate(handler, ctx, &token).await,
            _ => {
                handler
                    .send_error("UNAUTHORIZED", "authenticate before sending events")
                    .await;
                Flow::Close
            }
        };
    };

    match event {
        ClientEvent::Authenticate { .. } => {
            handler
                .send_error("VALIDATION_ERROR", "already authenticated")
                .await;
        }
        ClientEvent::Join { group_id } => handle_join(handler, ctx, &user_id, &group_id).await,
        ClientEvent::Leave { group_id } => {
            ctx.hub.leave(handler.conn_id(), &group_id).await;
            let event = ServerEvent::Left { group_id };
            if let Err(e) = handler.send_event(&event).await {
                e.log();
            }
        }
        ClientEvent::SendMessage(payload) => {
            handle_send_message(handler, ctx, &user_id, payload).await
        }
        ClientEvent::Typing { group_id } => {
            let event = ServerEvent::UserTyping {
                group_id: group_id.clone(),
                user_id: user_id.clone(),
            };
            relay_to_joined_room(handler, ctx, &group_id, event).await;
        }
        ClientEvent::StopTyping { group_id } => {
            let event = ServerEvent::UserStoppedTyping {
                group_id: group_id.clone(),
                user_id: user_id.clone(),
            };
            relay_to_joined_room(handler, ctx, &group_id, event).await;
        }
        ClientEvent::React {
            group_id,
            message_id,
            emoji,
        } => handle_react(handler, ctx, &user_id, &group_id, &message_id, &emoji).await,
        ClientEvent::MarkRead {
            group_id,
            message_id,
        } => handle_mark_read(handler, ctx, &user_id, &group_id, &message_id).await,
    }

    Flow::Continue
}

/// First event on every connection. A bad token closes the connection;
/// a good one registers the user for notification fan-out.
async fn handle_authenticate(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    token: &str,
) -> Flow {
    let claims = match ctx.auth_manager.verify_token(token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(error = %e, peer = %handler.addr(), "WebSocket authentication failed");
            handler
                .send_error("UNAUTHORIZED", "invalid or expired token")
                .await;
            return Flow::Close;
        }
    };

    let user_id = claims.sub;
    handler.set_user_id(user_id.clone());
    ctx.fanout
        .register(&user_id, handler.conn_id(), handler.tx())
        .await;

    if ctx.config.logging.enable_user_identifiers {
        tracing::info!(user_id = %user_id, peer = %handler.addr(), "User authenticated");
    } else {
        tracing::info!(
            user_hash = %log_safe_id(&user_id, &ctx.config.logging.hash_salt),
            peer = %handler.addr(),
            "User authenticated"
        );
    }

    let event = ServerEvent::Authenticated { user_id };
    if handler.send_event(&event).await.is_err() {
        return Flow::Close;
    }
    Flow::Continue
}

/// Joining requires being a participant of an active group. The directory
/// is the authority; the hub only tracks live subscriptions.
async fn handle_join(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    user_id: &str,
    group_id: &str,
) {
    let group = match ctx.directory.get(group_id).await {
        Ok(group) => group,
        Err(e) => {
            handler.send_app_error(&e).await;
            return;
        }
    };

    if !group.is_active {
        let e = AppError::not_found(format!("group {}", group_id));
        handler.send_app_error(&e).await;
        return;
    }
    if group.role_of(user_id).is_none() {
        let e = AppError::forbidden("not a participant of this group");
        handler.send_app_error(&e).await;
        return;
    }

    ctx.hub
        .join(handler.conn_id(), group_id, user_id, handler.tx())
        .await;

    let event = ServerEvent::Joined {
        group_id: group_id.to_string(),
    };
    if let Err(e) = handler.send_event(&event).await {
        e.log();
    }
}

/// Append, then acknowledge the sender, then broadcast. The broadcast
/// includes the origin connection so every room member, sender included,
/// sees the same stored message.
async fn handle_send_message(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    user_id: &str,
    payload: SendMessage,
) {
    if let Err(e) = check_can_post(handler, ctx, user_id, &payload.group_id).await {
        nack(handler, payload.client_msg_id, &e).await;
        return;
    }

    let message = match ctx
        .store
        .append(
            &payload.group_id,
            user_id,
            &payload.text,
            payload.kind.unwrap_or(MessageKind::Text),
            payload.attachments.unwrap_or_default(),
        )
        .await
    {
        Ok(message) => message,
        Err(e) => {
            nack(handler, payload.client_msg_id, &e).await;
            return;
        }
    };

    let ack = ServerEvent::Ack(Ack {
        client_msg_id: payload.client_msg_id,
        status: AckStatus::Ok,
        message_id: Some(message.id.clone()),
        created_at: Some(message.created_at),
    });
    if let Err(e) = handler.send_event(&ack).await {
        e.log();
    }

    ctx.broadcaster
        .broadcast(
            &payload.group_id,
            ServerEvent::MessageReceived(message),
            None,
        )
        .await;
}

async fn handle_react(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    user_id: &str,
    group_id: &str,
    message_id: &str,
    emoji: &str,
) {
    if !ctx.hub.is_joined(handler.conn_id(), group_id).await {
        let e = AppError::forbidden("join the room before reacting");
        handler.send_app_error(&e).await;
        return;
    }

    // The message must actually live in the room the client claims.
    match ctx.store.fetch_message_group(message_id).await {
        Ok(actual) if actual == group_id => {}
        Ok(_) => {
            let e = AppError::validation("message does not belong to this group");
            handler.send_app_error(&e).await;
            return;
        }
        Err(e) => {
            handler.send_app_error(&e).await;
            return;
        }
    }

    if let Err(e) = ctx.store.add_reaction(message_id, user_id, emoji).await {
        handler.send_app_error(&e).await;
        return;
    }

    let event = ServerEvent::ReactionAdded {
        group_id: group_id.to_string(),
        message_id: message_id.to_string(),
        user_id: user_id.to_string(),
        emoji: emoji.to_string(),
    };
    ctx.broadcaster
        .broadcast(group_id, event, Some(handler.conn_id()))
        .await;
}

async fn handle_mark_read(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    user_id: &str,
    group_id: &str,
    message_id: &str,
) {
    if !ctx.hub.is_joined(handler.conn_id(), group_id).await {
        let e = AppError::forbidden("join the room before marking messages read");
        handler.send_app_error(&e).await;
        return;
    }

    match ctx.store.fetch_message_group(message_id).await {
        Ok(actual) if actual == group_id => {}
        Ok(_) => {
            let e = AppError::validation("message does not belong to this group");
            handler.send_app_error(&e).await;
            return;
        }
        Err(e) => {
            handler.send_app_error(&e).await;
            return;
        }
    }

    if let Err(e) = ctx.store.mark_read(message_id, user_id).await {
        handler.send_app_error(&e).await;
        return;
    }

    let event = ServerEvent::MessageRead {
        group_id: group_id.to_string(),
        message_id: message_id.to_string(),
        user_id: user_id.to_string(),
    };
    ctx.broadcaster
        .broadcast(group_id, event, Some(handler.conn_id()))
        .await;
}

/// Ephemeral signals (typing indicators) go to everyone in the room except
/// the origin. Not joined means not forwarded.
async fn relay_to_joined_room(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    group_id: &str,
    event: ServerEvent,
) {
    if !ctx.hub.is_joined(handler.conn_id(), group_id).await {
        let e = AppError::forbidden("join the room before signaling");
        handler.send_app_error(&e).await;
        return;
    }
    ctx.broadcaster
        .broadcast(group_id, event, Some(handler.conn_id()))
        .await;
}

/// Sending requires a live room subscription and a role that may post.
/// Viewers are read-only; the store separately enforces admins-only groups.
async fn check_can_post(
    handler: &ConnectionHandler,
    ctx: &AppContext,
    user_id: &str,
    group_id: &str,
) -> Result<(), AppError> {
    if !ctx.hub.is_joined(handler.conn_id(), group_id).await {
        return Err(AppError::forbidden("join the room before sending messages"));
    }
    match ctx.directory.role_of(group_id, user_id).await? {
        Some(ParticipantRole::Viewer) => {
            Err(AppError::forbidden("viewers may not post in this group"))
        }
        Some(_) => Ok(()),
        None => Err(AppError::forbidden("not a participant of this group")),
    }
}

/// Failed sends get both a correlating negative ack and an error event.
async fn nack(handler: &mut ConnectionHandler, client_msg_id: Option<String>, error: &AppError) {
    let ack = ServerEvent::Ack(Ack {
        client_msg_id,
        status: AckStatus::Error,
        message_id: None,
        created_at: None,
    });
    if let Err(e) = handler.send_event(&ack).await {
        e.log();
    }
    handler.send_app_error(error).await;
}
