//! Group Directory: membership, roles and group metadata.

use chrono::Utc;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::types::{Group, GroupKind, GroupSettings, Participant, ParticipantRole};

use super::{fetch_group_row, fetch_role, GroupRow};

#[derive(Clone)]
pub struct GroupDirectory {
    pool: DbPool,
}

impl GroupDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Loads a group with its participants. `NotFound` if the id is
    /// unknown; deactivated groups are returned with `is_active = false`
    /// and callers decide whether that matters.
    pub async fn get(&self, group_id: &str) -> AppResult<Group> {
        let row = fetch_group_row(&self.pool, group_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("group {}", group_id)))?;

        self.hydrate(row).await
    }

    /// Group implicitly tied to an external entity (e.g. a project) through
    /// `link_key`. Safe under concurrent calls for the same key: the UNIQUE
    /// constraint on `link_key` makes exactly one insert win, and every
    /// caller then reads the same row back.
    pub async fn get_or_create(
        &self,
        link_key: &str,
        default_name: &str,
        creator_id: &str,
    ) -> AppResult<Group> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let inserted = sqlx::query(
            r#"
            INSERT INTO groups (id, link_key, name, kind, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT(link_key) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(link_key)
        .bind(default_name)
        .bind(GroupKind::Project.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            self.insert_participant(&id, creator_id, ParticipantRole::Admin)
                .await?;
        }

        let group_id: String =
            sqlx::query_scalar(r#"SELECT id FROM groups WHERE link_key = $1"#)
                .bind(link_key)
                .fetch_one(&self.pool)
                .await?;

        self.get(&group_id).await
    }

    /// Explicit creation. The creator becomes the group's admin, which is
    /// how every group starts out satisfying the at-least-one-admin
    /// invariant.
    pub async fn create(
        &self,
        name: &str,
        description: Option<&str>,
        kind: GroupKind,
        creator_id: &str,
        member_ids: &[String],
    ) -> AppResult<Group> {
        if name.trim().is_empty() {
            return Err(AppError::validation("group name must not be empty"));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO groups (id, name, description, kind, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(description)
        .bind(kind.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.insert_participant(&id, creator_id, ParticipantRole::Admin)
            .await?;
        for member in member_ids {
            if member != creator_id {
                self.insert_participant(&id, member, ParticipantRole::Member)
                    .await?;
            }
        }

        self.get(&id).await
    }

    /// Idempotent: re-adding an existing member is a no-op that leaves the
    /// original role and join time untouched. Returns whether the user was
    /// newly added, so callers know whether to fan out an invite.
    pub async fn add_participant(
        &self,
        group_id: &str,
        user_id: &str,
        role: ParticipantRole,
    ) -> AppResult<bool> {
        fetch_group_row(&self.pool, group_id)
            .await?
            .filter(|g| g.is_active)
            .ok_or_else(|| AppError::not_found(format!("group {}", group_id)))?;

        let added = self.insert_participant(group_id, user_id, role).await?;
        if added {
            self.touch(group_id).await?;
        }
        Ok(added)
    }

    async fn insert_participant(
        &self,
        group_id: &str,
        user_id: &str,
        role: ParticipantRole,
    ) -> AppResult<bool> {
        let affected = sqlx::query(
            r#"
            INSERT INTO participants (group_id, user_id, role, joined_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT(group_id, user_id) DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(role.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected == 1)
    }

    /// Changes a participant's role. Demoting the sole admin is rejected:
    /// a group always has at least one admin.
    pub async fn set_role(
        &self,
        group_id: &str,
        user_id: &str,
        role: ParticipantRole,
    ) -> AppResult<()> {
        let current = fetch_role(&self.pool, group_id, user_id)
            .await?
            .ok_or_else(|| {
                AppError::not_found(format!("participant {} in group {}", user_id, group_id))
            })?;

        if current == ParticipantRole::Admin && role != ParticipantRole::Admin {
            let admins: i64 = sqlx::query_scalar(
                r#"SELECT COUNT(*) FROM participants WHERE group_id = $1 AND role = 'admin'"#,
            )
            .bind(group_id)
            .fetch_one(&self.pool)
            .await?;

            if admins <= 1 {
                return Err(AppError::validation(
                    "a group must keep at least one admin",
                ));
            }
        }

        sqlx::query(
            r#"UPDATE participants SET role = $1 WHERE group_id = $2 AND user_id = $3"#,
        )
        .bind(role.as_str())
        .bind(group_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Active groups the user participates in, most recently active first.
    pub async fn list_for_user(&self, user_id: &str) -> AppResult<Vec<Group>> {
        let rows = sqlx::query_as::<_, GroupRow>(
            r#"
            SELECT g.id, g.link_key, g.name, g.description, g.kind,
                   g.allow_attachments, g.allow_reactions, g.admins_only_posting,
                   g.is_active, g.last_message_id, g.created_at, g.updated_at
            FROM groups g
            JOIN participants p ON p.group_id = g.id
            WHERE p.user_id = $1 AND g.is_active = 1
            ORDER BY g.updated_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            groups.push(self.hydrate(row).await?);
        }
        Ok(groups)
    }

    /// Best-effort projection of the most recent message. Runs after the
    /// append has already committed; a failure here is logged by the
    /// projection task and never rolls anything back. Also bumps
    /// `updated_at` so list ordering tracks activity.
    pub async fn update_last_message(&self, group_id: &str, message_id: &str) -> AppResult<()> {
        sqlx::query(
            r#"UPDATE groups SET last_message_id = $1, updated_at = $2 WHERE id = $3"#,
        )
        .bind(message_id)
        .bind(Utc::now())
        .bind(group_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn role_of(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> AppResult<Option<ParticipantRole>> {
        fetch_role(&self.pool, group_id, user_id).await
    }

    /// Replaces the group's posting and feature flags wholesale.
    pub async fn update_settings(
        &self,
        group_id: &str,
        settings: &GroupSettings,
    ) -> AppResult<()> {
        let affected = sqlx::query(
            r#"
            UPDATE groups
            SET allow_attachments = $1, allow_reactions = $2,
                admins_only_posting = $3, updated_at = $4
            WHERE id = $5
            "#,
        )
        .bind(settings.allow_attachments)
        .bind(settings.allow_reactions)
        .bind(settings.admins_only_posting)
        .bind(Utc::now())
        .bind(group_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(AppError::not_found(format!("group {}", group_id)));
        }
        Ok(())
    }

    /// Soft archive. Groups are never hard-deleted; a deactivated group
    /// rejects appends but its history stays readable.
    pub async fn deactivate(&self, group_id: &str) -> AppResult<()> {
        let affected = sqlx::query(
            r#"UPDATE groups SET is_active = 0, updated_at = $1 WHERE id = $2"#,
        )
        .bind(Utc::now())
        .bind(group_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(AppError::not_found(format!("group {}", group_id)));
        }
        Ok(())
    }

    async fn touch(&self, group_id: &str) -> AppResult<()> {
        sqlx::query(r#"UPDATE groups SET updated_at = $1 WHERE id = $2"#)
            .bind(Utc::now())
            .bind(group_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn hydrate(&self, row: GroupRow) -> AppResult<Group> {
        #[derive(sqlx::FromRow)]
        struct ParticipantRow {
            user_id: String,
            role: String,
            joined_at: chrono::DateTime<Utc>,
        }

        let participant_rows = sqlx::query_as::<_, ParticipantRow>(
            r#"
            SELECT user_id, role, joined_at
            FROM participants
            WHERE group_id = $1
            ORDER BY joined_at, user_id
            "#,
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await?;

        let participants = participant_rows
            .into_iter()
            .map(|p| {
                let role = ParticipantRole::parse(&p.role).ok_or_else(|| {
                    AppError::internal(format!("unknown participant role '{}'", p.role))
                })?;
                Ok(Participant {
                    user_id: p.user_id,
                    role,
                    joined_at: p.joined_at,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        let kind = GroupKind::parse(&row.kind)
            .ok_or_else(|| AppError::internal(format!("unknown group kind '{}'", row.kind)))?;

        Ok(Group {
            id: row.id,
            link_key: row.link_key,
            name: row.name,
            description: row.description,
            kind,
            settings: GroupSettings {
                allow_attachments: row.allow_attachments,
                allow_reactions: row.allow_reactions,
                admins_only_posting: row.admins_only_posting,
            },
            is_active: row.is_active,
            last_message_id: row.last_message_id,
            participants,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
