use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

pub type DbPool = Pool<Sqlite>;

pub async fn connect_pool(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parse DATABASE_URL {}", database_url))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .context("connect to sqlite")?;

    Ok(pool)
}

/// Applies the schema. Statements are idempotent so this runs on every boot.
///
/// `messages.seq` is the ordering key for the whole store: AUTOINCREMENT
/// guarantees it is strictly increasing and never reused, which is what the
/// per-group append ordering relies on.
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .context("enable foreign_keys")?;

    let stmts = [
        r#"
        CREATE TABLE IF NOT EXISTS groups (
            id                  TEXT PRIMARY KEY,
            link_key            TEXT UNIQUE,
            name                TEXT NOT NULL,
            description         TEXT,
            kind                TEXT NOT NULL DEFAULT 'group',
            allow_attachments   INTEGER NOT NULL DEFAULT 1,
            allow_reactions     INTEGER NOT NULL DEFAULT 1,
            admins_only_posting INTEGER NOT NULL DEFAULT 0,
            is_active           INTEGER NOT NULL DEFAULT 1,
            last_message_id     TEXT,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        );"#,
        r#"
        CREATE TABLE IF NOT EXISTS participants (
            group_id  TEXT NOT NULL,
            user_id   TEXT NOT NULL,
            role      TEXT NOT NULL DEFAULT 'member',
            joined_at TEXT NOT NULL,
            PRIMARY KEY (group_id, user_id),
            FOREIGN KEY (group_id) REFERENCES groups(id)
        );"#,
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            seq         INTEGER PRIMARY KEY AUTOINCREMENT,
            id          TEXT NOT NULL UNIQUE,
            group_id    TEXT NOT NULL,
            sender_id   TEXT NOT NULL,
            body        TEXT NOT NULL,
            kind        TEXT NOT NULL DEFAULT 'text',
            attachments TEXT NOT NULL DEFAULT '[]',
            created_at  TEXT NOT NULL,
            FOREIGN KEY (group_id) REFERENCES groups(id)
        );"#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_messages_group_seq
            ON messages(group_id, seq);"#,
        r#"
        CREATE TABLE IF NOT EXISTS read_markers (
            message_id TEXT NOT NULL,
            user_id    TEXT NOT NULL,
            read_at    TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id),
            FOREIGN KEY (message_id) REFERENCES messages(id)
        );"#,
        r#"
        CREATE TABLE IF NOT EXISTS reactions (
            message_id TEXT NOT NULL,
            user_id    TEXT NOT NULL,
            emoji      TEXT NOT NULL,
            reacted_at TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id, emoji),
            FOREIGN KEY (message_id) REFERENCES messages(id)
        );"#,
    ];

    for s in &stmts {
        sqlx::query(s)
            .execute(pool)
            .await
            .with_context(|| format!("apply migration: {}", &s[..s.len().min(60)].replace('\n', " ")))?;
    }

    Ok(())
}
