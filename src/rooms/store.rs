use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::appresult::{AppError, AppResult};
use crate::db;
use crate::users::UserRef;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum RoomKind {
    #[default]
    Private,
    Group,
    Virtual,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoom {
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: RoomKind,
    pub members: Vec<Uuid>,
    pub created_by: Option<Uuid>,
    pub description: Option<String>,
}

/// A room with its member set resolved for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub id: Uuid,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: RoomKind,
    pub members: Vec<UserRef>,
    pub created_by: Option<Uuid>,
    pub last_message: Option<Uuid>,
    pub is_active: bool,
    pub description: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(sqlx::FromRow)]
struct RoomRow {
    id: String,
    name: Option<String>,
    kind: RoomKind,
    created_by: Option<String>,
    last_message_id: Option<String>,
    is_active: bool,
    description: Option<String>,
    created_at: i64,
    updated_at: i64,
}

const ROOM_COLUMNS: &str =
    "id,name,kind,created_by,last_message_id,is_active,description,created_at,updated_at";

pub async fn create(pool: &SqlitePool, spec: NewRoom) -> AppResult<RoomView> {
    if let Some(name) = &spec.name {
        if name.chars().count() > MAX_NAME_LEN {
            return Err(AppError::Validation(format!(
                "room name exceeds {MAX_NAME_LEN} characters"
            )));
        }
    }
    if let Some(description) = &spec.description {
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(AppError::Validation(format!(
                "room description exceeds {MAX_DESCRIPTION_LEN} characters"
            )));
        }
    }

    // Membership is a set; duplicates in the request collapse before the
    // private-room arity check.
    let mut seen = HashSet::new();
    let members: Vec<Uuid> = spec
        .members
        .into_iter()
        .filter(|member| seen.insert(*member))
        .collect();

    if members.is_empty() {
        return Err(AppError::Validation(
            "a room needs at least one member".to_owned(),
        ));
    }
    if spec.kind == RoomKind::Private && members.len() != 2 {
        return Err(AppError::Validation(
            "private rooms must have exactly 2 members".to_owned(),
        ));
    }

    let id = Uuid::now_v7();
    let now = db::now_ms();
    sqlx::query(
        "INSERT INTO rooms (id,name,kind,created_by,is_active,description,created_at,updated_at) \
         VALUES (?,?,?,?,1,?,?,?)",
    )
    .bind(id.to_string())
    .bind(&spec.name)
    .bind(spec.kind)
    .bind(spec.created_by.map(|u| u.to_string()))
    .bind(&spec.description)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    for member in &members {
        sqlx::query("INSERT OR IGNORE INTO room_members (room_id,user_id) VALUES (?,?)")
            .bind(id.to_string())
            .bind(member.to_string())
            .execute(pool)
            .await?;
    }

    get(pool, id).await
}

/// Active rooms the user belongs to, most recently touched first.
pub async fn list_for_user(pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<RoomView>> {
    let rows: Vec<RoomRow> = sqlx::query_as(
        "SELECT r.id,r.name,r.kind,r.created_by,r.last_message_id,r.is_active,\
                r.description,r.created_at,r.updated_at \
         FROM rooms r \
         JOIN room_members m ON m.room_id = r.id \
         WHERE m.user_id=? AND r.is_active=1 \
         ORDER BY r.updated_at DESC",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut views = Vec::with_capacity(rows.len());
    for row in rows {
        views.push(to_view(pool, row).await?);
    }
    Ok(views)
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> AppResult<RoomView> {
    let row: Option<RoomRow> =
        sqlx::query_as(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id=?"))
            .bind(id.to_string())
            .fetch_optional(pool)
            .await?;

    match row {
        Some(row) if row.is_active => to_view(pool, row).await,
        // A deactivated room is gone as far as callers are concerned.
        _ => Err(AppError::NotFound("room")),
    }
}

pub async fn add_member(pool: &SqlitePool, id: Uuid, user_id: Uuid) -> AppResult<RoomView> {
    ensure_active(pool, id).await?;
    sqlx::query("INSERT OR IGNORE INTO room_members (room_id,user_id) VALUES (?,?)")
        .bind(id.to_string())
        .bind(user_id.to_string())
        .execute(pool)
        .await?;
    touch(pool, id).await?;
    get(pool, id).await
}

pub async fn remove_member(pool: &SqlitePool, id: Uuid, user_id: Uuid) -> AppResult<RoomView> {
    ensure_active(pool, id).await?;
    sqlx::query("DELETE FROM room_members WHERE room_id=? AND user_id=?")
        .bind(id.to_string())
        .bind(user_id.to_string())
        .execute(pool)
        .await?;
    touch(pool, id).await?;
    get(pool, id).await
}

/// Soft delete. There is no way back through this interface.
pub async fn deactivate(pool: &SqlitePool, id: Uuid) -> AppResult<()> {
    let result = sqlx::query("UPDATE rooms SET is_active=0, updated_at=? WHERE id=?")
        .bind(db::now_ms())
        .bind(id.to_string())
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("room"));
    }
    Ok(())
}

pub(crate) async fn ensure_active(pool: &SqlitePool, id: Uuid) -> AppResult<()> {
    let row: Option<(bool,)> = sqlx::query_as("SELECT is_active FROM rooms WHERE id=?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    match row {
        Some((true,)) => Ok(()),
        _ => Err(AppError::NotFound("room")),
    }
}

async fn to_view(pool: &SqlitePool, row: RoomRow) -> AppResult<RoomView> {
    let members: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT u.id,u.name,u.avatar FROM room_members m \
         JOIN users u ON u.id = m.user_id \
         WHERE m.room_id=? ORDER BY u.name",
    )
    .bind(&row.id)
    .fetch_all(pool)
    .await?;

    let mut resolved = Vec::with_capacity(members.len());
    for (id, name, avatar) in members {
        resolved.push(UserRef {
            id: db::parse_uuid(&id)?,
            name,
            avatar,
        });
    }

    Ok(RoomView {
        id: db::parse_uuid(&row.id)?,
        name: row.name,
        kind: row.kind,
        members: resolved,
        created_by: row.created_by.as_deref().map(db::parse_uuid).transpose()?,
        last_message: row
            .last_message_id
            .as_deref()
            .map(db::parse_uuid)
            .transpose()?,
        is_active: row.is_active,
        description: row.description,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

async fn touch(pool: &SqlitePool, id: Uuid) -> AppResult<()> {
    sqlx::query("UPDATE rooms SET updated_at=? WHERE id=?")
        .bind(db::now_ms())
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}
