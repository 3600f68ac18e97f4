//! Per-user presence state machine: offline —connect→ online —disconnect→
//! offline. Each transition persists the status and a fresh last-seen
//! timestamp and hands back the update for the gateway to broadcast. `away`
//! is stored but never produced here; an external idle detector owns it.

use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::appresult::{AppError, AppResult};
use crate::db;
use crate::users::OnlineStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub user_id: Uuid,
    pub status: OnlineStatus,
    pub last_seen: i64,
}

#[derive(Clone)]
pub struct PresenceTracker {
    pool: SqlitePool,
}

impl PresenceTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Idempotent: reconnecting an already-online user re-emits the same
    /// online update.
    pub async fn connect(&self, user_id: Uuid) -> AppResult<PresenceUpdate> {
        self.transition(user_id, OnlineStatus::Online).await
    }

    pub async fn disconnect(&self, user_id: Uuid) -> AppResult<PresenceUpdate> {
        self.transition(user_id, OnlineStatus::Offline).await
    }

    pub async fn status_of(&self, user_id: Uuid) -> AppResult<(OnlineStatus, Option<i64>)> {
        let row: Option<(OnlineStatus, Option<i64>)> =
            sqlx::query_as("SELECT online_status,last_seen FROM users WHERE id=?")
                .bind(user_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.ok_or(AppError::NotFound("user"))
    }

    async fn transition(&self, user_id: Uuid, status: OnlineStatus) -> AppResult<PresenceUpdate> {
        let now = db::now_ms();
        let result =
            sqlx::query("UPDATE users SET online_status=?, last_seen=?, updated_at=? WHERE id=?")
                .bind(status)
                .bind(now)
                .bind(now)
                .bind(user_id.to_string())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("user"));
        }

        Ok(PresenceUpdate {
            user_id,
            status,
            last_seen: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::users;
    use std::time::Duration;

    #[tokio::test]
    async fn connect_then_disconnect_walks_the_state_machine() {
        let pool = test_pool().await;
        let user = users::create(&pool, "Asha", users::DEFAULT_AVATAR)
            .await
            .expect("user");
        let tracker = PresenceTracker::new(pool.clone());

        let online = tracker.connect(user.id).await.expect("connect");
        assert_eq!(online.status, OnlineStatus::Online);
        assert_eq!(
            tracker.status_of(user.id).await.expect("status"),
            (OnlineStatus::Online, Some(online.last_seen))
        );

        tokio::time::sleep(Duration::from_millis(10)).await;

        let offline = tracker.disconnect(user.id).await.expect("disconnect");
        assert_eq!(offline.status, OnlineStatus::Offline);
        assert!(offline.last_seen > online.last_seen);
        assert_eq!(
            tracker.status_of(user.id).await.expect("status"),
            (OnlineStatus::Offline, Some(offline.last_seen))
        );
    }

    #[tokio::test]
    async fn reconnecting_an_online_user_is_idempotent() {
        let pool = test_pool().await;
        let user = users::create(&pool, "Asha", users::DEFAULT_AVATAR)
            .await
            .expect("user");
        let tracker = PresenceTracker::new(pool.clone());

        tracker.connect(user.id).await.expect("first connect");
        let again = tracker.connect(user.id).await.expect("second connect");
        assert_eq!(again.status, OnlineStatus::Online);
    }

    #[tokio::test]
    async fn unknown_user_cannot_transition() {
        let pool = test_pool().await;
        let tracker = PresenceTracker::new(pool.clone());
        let err = tracker.connect(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("user")));
    }
}
