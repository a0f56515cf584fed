//! Durable storage: the Message Store and the Group Directory.
//!
//! The store is the source of truth. Live delivery is layered on top and
//! never consulted for reads; anything a disconnected client missed is
//! recovered through `history`.

mod groups;

pub use groups::GroupDirectory;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::{MAX_MESSAGE_CHARS, MAX_PAGE_SIZE};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::events::AppendEvent;
use crate::types::{
    Attachment, MessageKind, Pagination, ParticipantRole, Reaction, ReadMarker, StoredMessage,
};

const APPEND_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct GroupRow {
    pub id: String,
    pub link_key: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub kind: String,
    pub allow_attachments: bool,
    pub allow_reactions: bool,
    pub admins_only_posting: bool,
    pub is_active: bool,
    pub last_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) async fn fetch_group_row(pool: &DbPool, group_id: &str) -> AppResult<Option<GroupRow>> {
    let row = sqlx::query_as::<_, GroupRow>(
        r#"
        SELECT id, link_key, name, description, kind,
               allow_attachments, allow_reactions, admins_only_posting,
               is_active, last_message_id, created_at, updated_at
        FROM groups
        WHERE id = $1
        "#,
    )
    .bind(group_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

pub(crate) async fn fetch_role(
    pool: &DbPool,
    group_id: &str,
    user_id: &str,
) -> AppResult<Option<ParticipantRole>> {
    let role: Option<String> = sqlx::query_scalar(
        r#"
        SELECT role FROM participants
        WHERE group_id = $1 AND user_id = $2
        "#,
    )
    .bind(group_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(role.as_deref().and_then(ParticipantRole::parse))
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct MessageRow {
    seq: i64,
    id: String,
    group_id: String,
    sender_id: String,
    body: String,
    kind: String,
    attachments: String,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self) -> AppResult<StoredMessage> {
        let kind = MessageKind::parse(&self.kind)
            .ok_or_else(|| AppError::internal(format!("unknown message kind '{}'", self.kind)))?;
        let attachments: Vec<Attachment> = serde_json::from_str(&self.attachments)?;

        Ok(StoredMessage {
            id: self.id,
            seq: self.seq,
            group_id: self.group_id,
            sender_id: self.sender_id,
            body: self.body,
            kind,
            attachments,
            reactions: Vec::new(),
            read_by: Vec::new(),
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ReactionRow {
    message_id: String,
    user_id: String,
    emoji: String,
    reacted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ReadMarkerRow {
    message_id: String,
    user_id: String,
    read_at: DateTime<Utc>,
}

/// Durable, ordered record of messages per group.
///
/// Appends are linearizable per group: the `seq` column is assigned by
/// SQLite's AUTOINCREMENT under its single-writer lock, so two concurrent
/// appends to the same group always get distinct, strictly increasing
/// ordering positions.
#[derive(Clone)]
pub struct MessageStore {
    pool: DbPool,
    append_tx: broadcast::Sender<AppendEvent>,
}

impl MessageStore {
    pub fn new(pool: DbPool) -> Self {
        let (append_tx, _) = broadcast::channel(APPEND_BUS_CAPACITY);
        Self { pool, append_tx }
    }

    /// Hook bus: every successful append publishes an `AppendEvent` after
    /// the write has committed. Subscribers cannot fail the append.
    pub fn subscribe_appends(&self) -> broadcast::Receiver<AppendEvent> {
        self.append_tx.subscribe()
    }

    /// Durably appends a message to a group's log.
    ///
    /// Fails with `NotFound` if the group is missing or deactivated,
    /// `Forbidden` if posting is admins-only and the sender is not an admin
    /// (or attachments are sent to a group that disallows them), and
    /// `Validation` for an empty or oversized body.
    pub async fn append(
        &self,
        group_id: &str,
        sender_id: &str,
        body: &str,
        kind: MessageKind,
        attachments: Vec<Attachment>,
    ) -> AppResult<StoredMessage> {
        let group = fetch_group_row(&self.pool, group_id)
            .await?
            .filter(|g| g.is_active)
            .ok_or_else(|| AppError::not_found(format!("group {}", group_id)))?;

        if group.admins_only_posting {
            let role = fetch_role(&self.pool, group_id, sender_id).await?;
            if role != Some(ParticipantRole::Admin) {
                return Err(AppError::forbidden("only admins may post in this group"));
            }
        }

        if !attachments.is_empty() && !group.allow_attachments {
            return Err(AppError::forbidden("attachments are disabled for this group"));
        }

        if kind == MessageKind::Text && body.trim().is_empty() {
            return Err(AppError::validation("message body must not be empty"));
        }
        if body.chars().count() > MAX_MESSAGE_CHARS {
            return Err(AppError::validation(format!(
                "message body exceeds {} characters",
                MAX_MESSAGE_CHARS
            )));
        }

        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let attachments_json = serde_json::to_string(&attachments)?;

        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO messages (id, group_id, sender_id, body, kind, attachments, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING seq
            "#,
        )
        .bind(&id)
        .bind(group_id)
        .bind(sender_id)
        .bind(body)
        .bind(kind.as_str())
        .bind(&attachments_json)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        let message = StoredMessage {
            id,
            seq,
            group_id: group_id.to_string(),
            sender_id: sender_id.to_string(),
            body: body.to_string(),
            kind,
            attachments,
            reactions: Vec::new(),
            read_by: Vec::new(),
            created_at,
        };

        // No subscribers is fine; the send result only reports that.
        let _ = self.append_tx.send(AppendEvent {
            message: message.clone(),
        });

        Ok(message)
    }

    /// Returns one page of a group's log in chronological (oldest-first)
    /// order, with pagination metadata. Page 1 holds the newest messages.
    ///
    /// Paging is offset-based over a log that may be appended to while the
    /// client walks it, so a row can shift between pages. That is an
    /// accepted limitation of this read path, not a bug: pages are a
    /// best-effort snapshot and the live layer covers the gap.
    pub async fn history(
        &self,
        group_id: &str,
        page: u32,
        page_size: u32,
    ) -> AppResult<(Vec<StoredMessage>, Pagination)> {
        fetch_group_row(&self.pool, group_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("group {}", group_id)))?;

        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = (page as i64 - 1) * page_size as i64;

        let total: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM messages WHERE group_id = $1"#,
        )
        .bind(group_id)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT seq, id, group_id, sender_id, body, kind, attachments, created_at
            FROM messages
            WHERE group_id = $1
            ORDER BY seq DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(group_id)
        .bind(page_size as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<StoredMessage> = rows
            .into_iter()
            .rev() // newest-first internally, chronological out
            .map(MessageRow::into_message)
            .collect::<AppResult<_>>()?;

        self.attach_annotations(group_id, &mut messages).await?;

        let total_pages = if total == 0 {
            1
        } else {
            ((total + page_size as i64 - 1) / page_size as i64) as u32
        };

        Ok((
            messages,
            Pagination {
                page,
                page_size,
                total_pages,
                total_results: total as u64,
            },
        ))
    }

    /// Loads reactions and read markers for a page of messages in two
    /// range queries keyed on the page's seq span.
    async fn attach_annotations(
        &self,
        group_id: &str,
        messages: &mut [StoredMessage],
    ) -> AppResult<()> {
        let (Some(first), Some(last)) = (messages.first(), messages.last()) else {
            return Ok(());
        };
        let (min_seq, max_seq) = (first.seq, last.seq);

        let reaction_rows = sqlx::query_as::<_, ReactionRow>(
            r#"
            SELECT r.message_id, r.user_id, r.emoji, r.reacted_at
            FROM reactions r
            JOIN messages m ON m.id = r.message_id
            WHERE m.group_id = $1 AND m.seq BETWEEN $2 AND $3
            ORDER BY r.reacted_at
            "#,
        )
        .bind(group_id)
        .bind(min_seq)
        .bind(max_seq)
        .fetch_all(&self.pool)
        .await?;

        let marker_rows = sqlx::query_as::<_, ReadMarkerRow>(
            r#"
            SELECT rm.message_id, rm.user_id, rm.read_at
            FROM read_markers rm
            JOIN messages m ON m.id = rm.message_id
            WHERE m.group_id = $1 AND m.seq BETWEEN $2 AND $3
            ORDER BY rm.read_at
            "#,
        )
        .bind(group_id)
        .bind(min_seq)
        .bind(max_seq)
        .fetch_all(&self.pool)
        .await?;

        let mut reactions: HashMap<String, Vec<Reaction>> = HashMap::new();
        for row in reaction_rows {
            reactions.entry(row.message_id).or_default().push(Reaction {
                user_id: row.user_id,
                emoji: row.emoji,
                reacted_at: row.reacted_at,
            });
        }

        let mut markers: HashMap<String, Vec<ReadMarker>> = HashMap::new();
        for row in marker_rows {
            markers.entry(row.message_id).or_default().push(ReadMarker {
                user_id: row.user_id,
                read_at: row.read_at,
            });
        }

        for message in messages.iter_mut() {
            if let Some(r) = reactions.remove(&message.id) {
                message.reactions = r;
            }
            if let Some(m) = markers.remove(&message.id) {
                message.read_by = m;
            }
        }

        Ok(())
    }

    /// Idempotent upsert: re-adding the same (user, emoji) pair refreshes
    /// the timestamp instead of duplicating the row.
    pub async fn add_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> AppResult<Reaction> {
        let group_id = self.fetch_message_group(message_id).await?;

        let group = fetch_group_row(&self.pool, &group_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("group {}", group_id)))?;
        if !group.allow_reactions {
            return Err(AppError::forbidden("reactions are disabled for this group"));
        }

        let reacted_at = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO reactions (message_id, user_id, emoji, reacted_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT(message_id, user_id, emoji)
                DO UPDATE SET reacted_at = excluded.reacted_at
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .bind(reacted_at)
        .execute(&self.pool)
        .await?;

        Ok(Reaction {
            user_id: user_id.to_string(),
            emoji: emoji.to_string(),
            reacted_at,
        })
    }

    /// Idempotent upsert: one read marker per user per message, the
    /// timestamp follows the latest call.
    pub async fn mark_read(&self, message_id: &str, user_id: &str) -> AppResult<ReadMarker> {
        self.fetch_message_group(message_id).await?;

        let read_at = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO read_markers (message_id, user_id, read_at)
            VALUES ($1, $2, $3)
            ON CONFLICT(message_id, user_id)
                DO UPDATE SET read_at = excluded.read_at
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(read_at)
        .execute(&self.pool)
        .await?;

        Ok(ReadMarker {
            user_id: user_id.to_string(),
            read_at,
        })
    }

    /// The group a message belongs to; `NotFound` if the message is absent.
    pub async fn fetch_message_group(&self, message_id: &str) -> AppResult<String> {
        let group_id: Option<String> =
            sqlx::query_scalar(r#"SELECT group_id FROM messages WHERE id = $1"#)
                .bind(message_id)
                .fetch_optional(&self.pool)
                .await?;

        group_id.ok_or_else(|| AppError::not_found(format!("message {}", message_id)))
    }
}
