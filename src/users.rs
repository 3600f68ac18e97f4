//! The chat-relevant slice of the user collection: display identity for
//! resolving message senders and room members, plus the presence columns the
//! tracker mutates. Full profile CRUD is owned by another service.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::appresult::{AppError, AppResult};
use crate::db;

pub const DEFAULT_AVATAR: &str = "https://i.pravatar.cc/150";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum OnlineStatus {
    Online,
    Offline,
    Away,
}

/// Display identity attached to resolved messages and room member lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRef {
    pub id: Uuid,
    pub name: String,
    pub avatar: String,
}

pub async fn create(pool: &SqlitePool, name: &str, avatar: &str) -> AppResult<UserRef> {
    let name = name.trim();
    if name.chars().count() < 2 || name.chars().count() > 50 {
        return Err(AppError::Validation(
            "user name must be between 2 and 50 characters".to_owned(),
        ));
    }

    let id = Uuid::now_v7();
    let now = db::now_ms();
    sqlx::query(
        "INSERT INTO users (id,name,avatar,online_status,last_seen,created_at,updated_at) \
         VALUES (?,?,?,'offline',NULL,?,?)",
    )
    .bind(id.to_string())
    .bind(name)
    .bind(avatar)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(UserRef {
        id,
        name: name.to_owned(),
        avatar: avatar.to_owned(),
    })
}

pub async fn get_ref(pool: &SqlitePool, user_id: Uuid) -> AppResult<UserRef> {
    let row: Option<(String, String, String)> =
        sqlx::query_as("SELECT id,name,avatar FROM users WHERE id=?")
            .bind(user_id.to_string())
            .fetch_optional(pool)
            .await?;

    let (id, name, avatar) = row.ok_or(AppError::NotFound("user"))?;
    Ok(UserRef {
        id: db::parse_uuid(&id)?,
        name,
        avatar,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn created_user_resolves_by_id() {
        let pool = test_pool().await;
        let user = create(&pool, "Asha", DEFAULT_AVATAR).await.expect("create");
        let resolved = get_ref(&pool, user.id).await.expect("resolve");
        assert_eq!(resolved, user);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let pool = test_pool().await;
        let err = get_ref(&pool, Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("user")));
    }

    #[tokio::test]
    async fn single_character_name_is_rejected() {
        let pool = test_pool().await;
        let err = create(&pool, "A", DEFAULT_AVATAR).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
