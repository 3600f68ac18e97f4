use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::appresult::{AppError, AppResult};
use crate::db;
use crate::rooms::store as rooms;
use crate::users::UserRef;

pub const MAX_CONTENT_LEN: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user: Uuid,
    pub read_at: i64,
}

/// A message with its sender resolved to display identity and its read
/// receipts attached. This is the shape both delivery paths hand to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: Uuid,
    pub room: Uuid,
    pub sender: UserRef,
    pub content: String,
    pub message_type: MessageKind,
    pub read_by: Vec<ReadReceipt>,
    pub is_deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// History pagination. Offset-based so a reader can restart from any page.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Page {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 200;

impl Page {
    fn limit(&self) -> i64 {
        i64::from(self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE))
    }

    fn offset(&self) -> i64 {
        i64::from(self.page.unwrap_or(1).max(1) - 1) * self.limit()
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    room_id: String,
    sender_id: String,
    sender_name: String,
    sender_avatar: String,
    content: String,
    message_type: MessageKind,
    is_deleted: bool,
    created_at: i64,
    updated_at: i64,
}

const RESOLVED_COLUMNS: &str = "m.id, m.room_id, m.sender_id, \
     u.name AS sender_name, u.avatar AS sender_avatar, \
     m.content, m.message_type, m.is_deleted, m.created_at, m.updated_at";

/// Persists a new message and advances the room's last-message pointer.
///
/// The pointer update is a second, separate statement issued only after the
/// message row exists; it is advisory, and a failure here leaves the message
/// itself intact.
pub async fn append(
    pool: &SqlitePool,
    room_id: Uuid,
    sender_id: Uuid,
    content: &str,
    kind: MessageKind,
) -> AppResult<Uuid> {
    let content = validate_content(content)?;
    rooms::ensure_active(pool, room_id).await?;

    let id = Uuid::now_v7();
    let now = db::now_ms();
    sqlx::query(
        "INSERT INTO messages (id,room_id,sender_id,content,message_type,is_deleted,created_at,updated_at) \
         VALUES (?,?,?,?,?,0,?,?)",
    )
    .bind(id.to_string())
    .bind(room_id.to_string())
    .bind(sender_id.to_string())
    .bind(content)
    .bind(kind)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    sqlx::query("UPDATE rooms SET last_message_id=?, updated_at=? WHERE id=?")
        .bind(id.to_string())
        .bind(now)
        .bind(room_id.to_string())
        .execute(pool)
        .await?;

    Ok(id)
}

/// Single message with sender identity resolved. Soft-deleted messages are
/// indistinguishable from missing ones here.
pub async fn get_resolved(pool: &SqlitePool, id: Uuid) -> AppResult<MessageView> {
    let row: Option<MessageRow> = sqlx::query_as(&format!(
        "SELECT {RESOLVED_COLUMNS} FROM messages m \
         JOIN users u ON u.id = m.sender_id WHERE m.id=?"
    ))
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) if !row.is_deleted => {
            let receipts: Vec<(String, i64)> =
                sqlx::query_as("SELECT user_id,read_at FROM message_reads WHERE message_id=? ORDER BY read_at")
                    .bind(id.to_string())
                    .fetch_all(pool)
                    .await?;
            let mut read_by = Vec::with_capacity(receipts.len());
            for (user, read_at) in receipts {
                read_by.push(ReadReceipt {
                    user: db::parse_uuid(&user)?,
                    read_at,
                });
            }
            to_view(row, read_by)
        }
        _ => Err(AppError::NotFound("message")),
    }
}

/// Room history: non-deleted messages in ascending creation order. Insertion
/// order breaks millisecond ties so readers always see the store's true
/// append order, whichever path produced each message.
pub async fn history(pool: &SqlitePool, room_id: Uuid, page: Page) -> AppResult<Vec<MessageView>> {
    let rows: Vec<MessageRow> = sqlx::query_as(&format!(
        "SELECT {RESOLVED_COLUMNS} FROM messages m \
         JOIN users u ON u.id = m.sender_id \
         WHERE m.room_id=? AND m.is_deleted=0 \
         ORDER BY m.created_at ASC, m.rowid ASC \
         LIMIT ? OFFSET ?"
    ))
    .bind(room_id.to_string())
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    let receipts: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT r.message_id, r.user_id, r.read_at FROM message_reads r \
         JOIN messages m ON m.id = r.message_id \
         WHERE m.room_id=? ORDER BY r.read_at",
    )
    .bind(room_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut by_message: HashMap<String, Vec<ReadReceipt>> = HashMap::new();
    for (message_id, user, read_at) in receipts {
        by_message.entry(message_id).or_default().push(ReadReceipt {
            user: db::parse_uuid(&user)?,
            read_at,
        });
    }

    let mut views = Vec::with_capacity(rows.len());
    for row in rows {
        let read_by = by_message.remove(&row.id).unwrap_or_default();
        views.push(to_view(row, read_by)?);
    }
    Ok(views)
}

pub async fn edit(
    pool: &SqlitePool,
    id: Uuid,
    actor: Uuid,
    new_content: &str,
) -> AppResult<MessageView> {
    let new_content = validate_content(new_content)?;
    let (sender, is_deleted) = sender_of(pool, id).await?.ok_or(AppError::NotFound("message"))?;
    if is_deleted {
        return Err(AppError::NotFound("message"));
    }
    if sender != actor {
        return Err(AppError::Forbidden("only the sender can edit a message"));
    }

    sqlx::query("UPDATE messages SET content=?, updated_at=? WHERE id=?")
        .bind(new_content)
        .bind(db::now_ms())
        .bind(id.to_string())
        .execute(pool)
        .await?;

    get_resolved(pool, id).await
}

/// Soft delete: the row stays, history and lookups stop returning it.
/// Re-deleting an already-deleted message is a no-op.
pub async fn soft_delete(pool: &SqlitePool, id: Uuid, actor: Uuid) -> AppResult<()> {
    let (sender, _) = sender_of(pool, id).await?.ok_or(AppError::NotFound("message"))?;
    if sender != actor {
        return Err(AppError::Forbidden("only the sender can delete a message"));
    }

    sqlx::query("UPDATE messages SET is_deleted=1, updated_at=? WHERE id=?")
        .bind(db::now_ms())
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Adds a read receipt from `reader` to every non-deleted message in the room
/// that lacks one. A single INSERT OR IGNORE over the receipt table's primary
/// key, so running it twice changes nothing.
pub async fn mark_read(pool: &SqlitePool, room_id: Uuid, reader: Uuid) -> AppResult<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO message_reads (message_id,user_id,read_at) \
         SELECT id, ?, ? FROM messages WHERE room_id=? AND is_deleted=0",
    )
    .bind(reader.to_string())
    .bind(db::now_ms())
    .bind(room_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

fn validate_content(content: &str) -> AppResult<&str> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::Validation(
            "message content must not be empty".to_owned(),
        ));
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(AppError::Validation(format!(
            "message content exceeds {MAX_CONTENT_LEN} characters"
        )));
    }
    Ok(content)
}

async fn sender_of(pool: &SqlitePool, id: Uuid) -> AppResult<Option<(Uuid, bool)>> {
    let row: Option<(String, bool)> =
        sqlx::query_as("SELECT sender_id,is_deleted FROM messages WHERE id=?")
            .bind(id.to_string())
            .fetch_optional(pool)
            .await?;
    match row {
        Some((sender, is_deleted)) => Ok(Some((db::parse_uuid(&sender)?, is_deleted))),
        None => Ok(None),
    }
}

fn to_view(row: MessageRow, read_by: Vec<ReadReceipt>) -> AppResult<MessageView> {
    Ok(MessageView {
        id: db::parse_uuid(&row.id)?,
        room: db::parse_uuid(&row.room_id)?,
        sender: UserRef {
            id: db::parse_uuid(&row.sender_id)?,
            name: row.sender_name,
            avatar: row.sender_avatar,
        },
        content: row.content,
        message_type: row.message_type,
        read_by,
        is_deleted: row.is_deleted,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}
