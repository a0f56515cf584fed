//! Group endpoints: creation, link-key init, listing, membership and
//! archival.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::events::{ServerEvent, UserNotification};
use crate::types::{GroupKind, GroupSettings, ParticipantRole};

use super::extractors::AuthenticatedUser;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub name: String,
    pub description: Option<String>,
    pub kind: Option<GroupKind>,
    #[serde(default)]
    pub participants: Vec<String>,
}

/// Explicit group creation. The caller becomes admin; everyone else in
/// `participants` joins as a member and gets an invite notification.
pub async fn create_group(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateGroupRequest>,
) -> AppResult<impl IntoResponse> {
    let group = ctx
        .directory
        .create(
            &req.name,
            req.description.as_deref(),
            req.kind.unwrap_or(GroupKind::Group),
            &user.0,
            &req.participants,
        )
        .await?;

    for participant in &group.participants {
        if participant.user_id != user.0 {
            ctx.fanout
                .notify_user(
                    &participant.user_id,
                    UserNotification::GroupInvite {
                        group_id: group.id.clone(),
                        group_name: group.name.clone(),
                        invited_by: user.0.clone(),
                        role: participant.role,
                    },
                )
                .await;
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "data": group })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitGroupRequest {
    pub link_key: String,
    pub name: Option<String>,
}

/// Find-or-create keyed on an external entity. Concurrent calls for the
/// same key all land on the same group.
pub async fn init_group(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    Json(req): Json<InitGroupRequest>,
) -> AppResult<impl IntoResponse> {
    if req.link_key.trim().is_empty() {
        return Err(AppError::validation("linkKey must not be empty"));
    }

    let default_name = req
        .name
        .unwrap_or_else(|| format!("Project Chat - {}", req.link_key));
    let group = ctx
        .directory
        .get_or_create(&req.link_key, &default_name, &user.0)
        .await?;

    // The caller may be hitting a group someone else created; make sure
    // they are in it before handing the id back.
    if group.role_of(&user.0).is_none() {
        ctx.directory
            .add_participant(&group.id, &user.0, ParticipantRole::Member)
            .await?;
    }
    let group = ctx.directory.get(&group.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "data": group })),
    ))
}

/// Active groups of the caller, most recently active first.
pub async fn list_groups(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let groups = ctx.directory.list_for_user(&user.0).await?;

    Ok(Json(json!({
        "status": "success",
        "results": groups.len(),
        "data": groups,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddParticipantRequest {
    pub user_id: String,
    pub role: Option<ParticipantRole>,
}

/// Admin-only. Adding is idempotent; the invite notification and the room
/// broadcast fire only when the user was actually new.
pub async fn add_participant(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    Path(group_id): Path<String>,
    Json(req): Json<AddParticipantRequest>,
) -> AppResult<impl IntoResponse> {
    require_admin(&ctx, &group_id, &user.0).await?;

    let role = req.role.unwrap_or(ParticipantRole::Member);
    let added = ctx
        .directory
        .add_participant(&group_id, &req.user_id, role)
        .await?;

    if added {
        let group = ctx.directory.get(&group_id).await?;
        ctx.fanout
            .notify_user(
                &req.user_id,
                UserNotification::GroupInvite {
                    group_id: group_id.clone(),
                    group_name: group.name.clone(),
                    invited_by: user.0.clone(),
                    role,
                },
            )
            .await;
        ctx.broadcaster
            .broadcast(
                &group_id,
                ServerEvent::GroupUpdated {
                    group_id: group_id.clone(),
                },
                None,
            )
            .await;
    }

    Ok(Json(json!({ "status": "success", "added": added })))
}

/// Admin-only. Replaces the group's feature flags and tells the room.
pub async fn update_settings(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    Path(group_id): Path<String>,
    Json(settings): Json<GroupSettings>,
) -> AppResult<impl IntoResponse> {
    require_admin(&ctx, &group_id, &user.0).await?;

    ctx.directory.update_settings(&group_id, &settings).await?;
    ctx.broadcaster
        .broadcast(
            &group_id,
            ServerEvent::GroupUpdated {
                group_id: group_id.clone(),
            },
            None,
        )
        .await;

    Ok(Json(json!({ "status": "success" })))
}

/// Admin-only soft archive. The room is told once; history stays readable.
pub async fn archive_group(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    Path(group_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    require_admin(&ctx, &group_id, &user.0).await?;

    ctx.directory.deactivate(&group_id).await?;
    ctx.broadcaster
        .broadcast(
            &group_id,
            ServerEvent::GroupUpdated {
                group_id: group_id.clone(),
            },
            None,
        )
        .await;

    Ok(Json(json!({ "status": "success" })))
}

async fn require_admin(ctx: &AppContext, group_id: &str, user_id: &str) -> AppResult<()> {
    match ctx.directory.role_of(group_id, user_id).await? {
        Some(ParticipantRole::Admin) => Ok(()),
        Some(_) => Err(AppError::forbidden("admin role required")),
        None => Err(AppError::forbidden("not a participant of this group")),
    }
}
