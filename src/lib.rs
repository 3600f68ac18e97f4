pub mod appresult;
pub mod auth;
pub mod db;
pub mod messages;
pub mod presence;
pub mod realtime;
pub mod rooms;
pub mod users;

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::SqlitePool;

pub use appresult::{AppError, AppResult};
use presence::PresenceTracker;
use realtime::Broadcaster;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub broadcaster: Arc<Broadcaster>,
    pub presence: PresenceTracker,
}

impl AppState {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self {
            presence: PresenceTracker::new(db_pool.clone()),
            broadcaster: Arc::new(Broadcaster::new()),
            db_pool,
        }
    }
}
