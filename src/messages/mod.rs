pub mod store;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::AppState;
use crate::appresult::AppResult;
use crate::auth::CurrentUser;
use crate::messages::store::{MessageKind, Page};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_message))
        .route(
            "/{id}",
            get(room_history).put(update_message).delete(delete_message),
        )
        .route("/read/{id}", patch(mark_room_read))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewMessage {
    room: Uuid,
    content: String,
    #[serde(default)]
    message_type: MessageKind,
}

#[derive(Debug, Deserialize)]
struct EditMessage {
    content: String,
}

async fn room_history(
    State(db_pool): State<SqlitePool>,
    _user: CurrentUser,
    Path(room_id): Path<Uuid>,
    Query(page): Query<Page>,
) -> AppResult<impl IntoResponse> {
    let messages = store::history(&db_pool, room_id, page).await?;
    Ok(Json(messages))
}

/// REST fallback for clients without a live realtime connection; lands in the
/// same store as the gateway's send path.
async fn create_message(
    State(db_pool): State<SqlitePool>,
    user: CurrentUser,
    Json(body): Json<NewMessage>,
) -> AppResult<impl IntoResponse> {
    let id = store::append(&db_pool, body.room, user.id, &body.content, body.message_type).await?;
    let message = store::get_resolved(&db_pool, id).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn update_message(
    State(db_pool): State<SqlitePool>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<EditMessage>,
) -> AppResult<impl IntoResponse> {
    let message = store::edit(&db_pool, id, user.id, &body.content).await?;
    Ok(Json(message))
}

async fn delete_message(
    State(db_pool): State<SqlitePool>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    store::soft_delete(&db_pool, id, user.id).await?;
    Ok(Json(json!({ "success": true, "message": "Message deleted" })))
}

async fn mark_room_read(
    State(db_pool): State<SqlitePool>,
    user: CurrentUser,
    Path(room_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    store::mark_read(&db_pool, room_id, user.id).await?;
    Ok(Json(json!({ "success": true })))
}
