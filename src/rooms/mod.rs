pub mod store;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::appresult::AppResult;
use crate::auth::CurrentUser;
use crate::{AppState, rooms::store::NewRoom};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_room))
        .route("/user/{user_id}", get(user_rooms))
        .route("/{id}", get(room_by_id).delete(delete_room))
        .route("/{id}/add", patch(add_member))
        .route("/{id}/remove", patch(remove_member))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberChange {
    user_id: Uuid,
}

async fn create_room(
    State(db_pool): State<SqlitePool>,
    user: CurrentUser,
    Json(mut spec): Json<NewRoom>,
) -> AppResult<impl IntoResponse> {
    if spec.created_by.is_none() {
        spec.created_by = Some(user.id);
    }
    let room = store::create(&db_pool, spec).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": room })),
    ))
}

async fn user_rooms(
    State(db_pool): State<SqlitePool>,
    _user: CurrentUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let rooms = store::list_for_user(&db_pool, user_id).await?;
    Ok(Json(json!({ "success": true, "data": rooms })))
}

async fn room_by_id(
    State(db_pool): State<SqlitePool>,
    _user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let room = store::get(&db_pool, id).await?;
    Ok(Json(json!({ "success": true, "data": room })))
}

async fn add_member(
    State(db_pool): State<SqlitePool>,
    _user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(change): Json<MemberChange>,
) -> AppResult<impl IntoResponse> {
    let room = store::add_member(&db_pool, id, change.user_id).await?;
    Ok(Json(json!({ "success": true, "data": room })))
}

async fn remove_member(
    State(db_pool): State<SqlitePool>,
    _user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(change): Json<MemberChange>,
) -> AppResult<impl IntoResponse> {
    let room = store::remove_member(&db_pool, id, change.user_id).await?;
    Ok(Json(json!({ "success": true, "data": room })))
}

async fn delete_room(
    State(db_pool): State<SqlitePool>,
    _user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    store::deactivate(&db_pool, id).await?;
    Ok(Json(json!({ "success": true, "message": "Room deleted" })))
}
